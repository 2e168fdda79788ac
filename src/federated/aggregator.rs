//! Aggregation engines.
//!
//! The coordinator only needs "run one round"; [`FedAvgEngine`] is the
//! reference weighted-averaging implementation.

use crate::coordinator::config::ResourceRoots;
use crate::core::{now, Error, ModelDigest, Result, Timestamp};
use crate::federated::store::{ClientUpdate, FederationState, GlobalModel};
use crate::federated::strategy::Topology;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// File extension of staged client updates.
pub const UPDATE_FILE_EXTENSION: &str = "update";

/// Outcome of one aggregation round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    /// Round number, starting at 1
    pub round: u64,
    /// Jobs that produced a new global model
    pub jobs_aggregated: usize,
    /// Client updates consumed
    pub updates_consumed: usize,
    /// Round start
    pub started_at: Timestamp,
    /// Round end
    pub finished_at: Timestamp,
}

impl RoundReport {
    /// A round that found nothing to aggregate.
    pub fn empty(round: u64, started_at: Timestamp) -> Self {
        Self {
            round,
            jobs_aggregated: 0,
            updates_consumed: 0,
            started_at,
            finished_at: now(),
        }
    }

    /// Whether the round did any work.
    pub fn is_noop(&self) -> bool {
        self.updates_consumed == 0
    }
}

/// Something that can run aggregation rounds.
///
/// Implementations must tolerate rounds with no pending updates and guard
/// their own state against concurrent invocation.
#[async_trait]
pub trait AggregationEngine: Send + Sync {
    /// Run one aggregation round.
    async fn run_round(&self) -> Result<RoundReport>;

    /// Engine name for logs.
    fn name(&self) -> &str;
}

#[derive(Debug, Default)]
struct EngineState {
    round: u64,
    total_updates: u64,
}

/// Sample-weighted averaging engine.
pub struct FedAvgEngine {
    topology: Topology,
    roots: ResourceRoots,
    state: FederationState,
    inner: Mutex<EngineState>,
}

impl FedAvgEngine {
    /// Create an engine for a topology, working in `roots`.
    pub fn new(topology: Topology, roots: ResourceRoots, state: FederationState) -> Self {
        Self {
            topology,
            roots,
            state,
            inner: Mutex::new(EngineState::default()),
        }
    }

    /// Topology the engine was built for.
    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Updates consumed so far.
    pub async fn total_updates(&self) -> u64 {
        self.inner.lock().await.total_updates
    }

    /// Move staged update files into the update store.
    ///
    /// A file is queued only once it has been removed from disk, so it can
    /// never be counted twice. Unreadable entries are logged and left in place.
    async fn ingest_staged_updates(&self) -> Result<usize> {
        let mut jobs = match tokio::fs::read_dir(&self.roots.job_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut ingested = 0;
        loop {
            let job = match jobs.next_entry().await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    warn!(root = %self.roots.job_root.display(), error = %e, "Cannot list job directory");
                    break;
                }
            };
            match job.file_type().await {
                Ok(kind) if kind.is_dir() => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %job.path().display(), error = %e, "Skipping unreadable job entry");
                    continue;
                }
            }

            let updates_dir = job.path().join("updates");
            let mut files = match tokio::fs::read_dir(&updates_dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            loop {
                let file = match files.next_entry().await {
                    Ok(Some(file)) => file,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(path = %updates_dir.display(), error = %e, "Cannot list staged updates");
                        break;
                    }
                };
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some(UPDATE_FILE_EXTENSION) {
                    continue;
                }
                if let Some(update) = claim_update_file(&path).await {
                    self.state.updates.submit(update);
                    ingested += 1;
                }
            }
        }

        Ok(ingested)
    }

    /// Write a model version under the model root.
    async fn persist(&self, model: &GlobalModel) -> Result<PathBuf> {
        let dir = self.roots.job_models_dir(&model.job_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("global_{}.bin", model.version));
        let bytes = bincode::serialize(model)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

#[async_trait]
impl AggregationEngine for FedAvgEngine {
    async fn run_round(&self) -> Result<RoundReport> {
        let mut inner = self.inner.lock().await;
        inner.round += 1;
        let round = inner.round;
        let started_at = now();

        if self.topology == Topology::Standalone {
            let staged = self.ingest_staged_updates().await?;
            if staged > 0 {
                debug!(round, staged, "Ingested staged client updates");
            }
        }

        let mut pending: Vec<(String, Vec<ClientUpdate>)> =
            self.state.updates.drain().into_iter().collect();
        if pending.is_empty() {
            debug!(round, "No pending client updates");
            return Ok(RoundReport::empty(round, started_at));
        }
        pending.sort_by(|a, b| a.0.cmp(&b.0));

        let mut jobs_aggregated = 0;
        let mut updates_consumed = 0;
        let mut failed = Vec::new();

        for (job_id, updates) in pending {
            updates_consumed += updates.len();
            let Some((weights, participants)) = fed_avg(&job_id, &updates) else {
                continue;
            };

            let model = GlobalModel {
                version: self.state.models.version_of(&job_id) + 1,
                digest: ModelDigest::of_weights(&weights),
                job_id: job_id.clone(),
                weights,
                participants,
                aggregated_at: now(),
            };

            if let Err(e) = self.persist(&model).await {
                warn!(
                    job = %job_id,
                    version = model.version,
                    error = %e,
                    "Failed to persist global model, requeueing updates"
                );
                failed.push(format!("{}: {}", job_id, e));
                updates_consumed -= updates.len();
                for update in updates {
                    self.state.updates.submit(update);
                }
                continue;
            }

            info!(
                job = %job_id,
                version = model.version,
                participants = model.participants.len(),
                digest = %model.digest.short(),
                "Published global model"
            );
            self.state.models.publish(model);
            jobs_aggregated += 1;
        }

        inner.total_updates += updates_consumed as u64;

        if !failed.is_empty() {
            return Err(Error::AggregationRound(format!(
                "round {} could not persist: {}",
                round,
                failed.join("; ")
            )));
        }

        Ok(RoundReport {
            round,
            jobs_aggregated,
            updates_consumed,
            started_at,
            finished_at: now(),
        })
    }

    fn name(&self) -> &str {
        "fed_avg"
    }
}

/// Weighted average of one job's updates.
///
/// Updates whose dimension differs from the first are dropped. Weights are
/// sample counts, or uniform when every count is zero.
pub fn fed_avg(job_id: &str, updates: &[ClientUpdate]) -> Option<(Vec<f32>, Vec<String>)> {
    let dim = updates.first()?.weights.len();

    let accepted: Vec<&ClientUpdate> = updates
        .iter()
        .filter(|u| {
            let ok = u.weights.len() == dim;
            if !ok {
                warn!(
                    job = %job_id,
                    client = %u.client_id,
                    expected = dim,
                    got = u.weights.len(),
                    "Dropping update with mismatched dimension"
                );
            }
            ok
        })
        .collect();

    let total_samples: u128 = accepted.iter().map(|u| u128::from(u.sample_count)).sum();
    let mut aggregated = vec![0.0f64; dim];

    for update in &accepted {
        let weight = if total_samples > 0 {
            update.sample_count as f64 / total_samples as f64
        } else {
            1.0 / accepted.len() as f64
        };
        for (acc, w) in aggregated.iter_mut().zip(update.weights.iter()) {
            *acc += weight * f64::from(*w);
        }
    }

    let participants = accepted.iter().map(|u| u.client_id.clone()).collect();
    Some((aggregated.into_iter().map(|v| v as f32).collect(), participants))
}

/// Stage an update file for a standalone engine to pick up.
pub async fn stage_update(roots: &ResourceRoots, update: &ClientUpdate) -> Result<PathBuf> {
    let dir = roots.job_updates_dir(&update.job_id);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(format!(
        "{}-{}.{}",
        update.client_id,
        uuid::Uuid::new_v4().simple(),
        UPDATE_FILE_EXTENSION
    ));
    tokio::fs::write(&path, bincode::serialize(update)?).await?;
    Ok(path)
}

/// Load a persisted global model.
pub async fn load_model(path: &Path) -> Result<GlobalModel> {
    let bytes = tokio::fs::read(path).await?;
    Ok(bincode::deserialize(&bytes)?)
}

async fn read_update_file(path: &Path) -> Result<ClientUpdate> {
    let bytes = tokio::fs::read(path).await?;
    Ok(bincode::deserialize(&bytes)?)
}

/// Read a staged update and remove its file. `None` if either step fails.
async fn claim_update_file(path: &Path) -> Option<ClientUpdate> {
    let update = match read_update_file(path).await {
        Ok(update) => update,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable update file");
            return None;
        }
    };
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Cannot remove staged update, leaving it for a later round");
        return None;
    }
    Some(update)
}
