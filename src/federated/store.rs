//! Shared federation state.
//!
//! Pending client updates flow from the endpoint into the [`UpdateStore`];
//! aggregated models flow from the engine into the [`ModelRegistry`].

use crate::core::{now, ModelDigest, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// A model update submitted by one client for one job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientUpdate {
    /// Job the update belongs to
    pub job_id: String,
    /// Submitting client
    pub client_id: String,
    /// Model weights after local training
    pub weights: Vec<f32>,
    /// Number of local samples (aggregation weight)
    pub sample_count: u64,
    /// Submission timestamp
    pub submitted_at: Timestamp,
}

impl ClientUpdate {
    /// Create an update stamped with the current time.
    pub fn new(job_id: &str, client_id: &str, weights: Vec<f32>, sample_count: u64) -> Self {
        Self {
            job_id: job_id.to_string(),
            client_id: client_id.to_string(),
            weights,
            sample_count,
            submitted_at: now(),
        }
    }
}

/// A published global model version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalModel {
    /// Job the model belongs to
    pub job_id: String,
    /// Monotonic version, starting at 1
    pub version: u64,
    /// Aggregated weights
    pub weights: Vec<f32>,
    /// Digest of the weights
    pub digest: ModelDigest,
    /// Clients that contributed
    pub participants: Vec<String>,
    /// Aggregation timestamp
    pub aggregated_at: Timestamp,
}

/// Pending client updates, grouped by job.
#[derive(Debug, Default)]
pub struct UpdateStore {
    pending: Mutex<HashMap<String, Vec<ClientUpdate>>>,
}

impl UpdateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an update. Returns the number pending for its job.
    pub fn submit(&self, update: ClientUpdate) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let queue = pending.entry(update.job_id.clone()).or_default();
        queue.push(update);
        queue.len()
    }

    /// Take every pending update, leaving the store empty.
    pub fn drain(&self) -> HashMap<String, Vec<ClientUpdate>> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *pending)
    }

    /// Pending update count for one job.
    pub fn pending_for(&self, job_id: &str) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.get(job_id).map(Vec::len).unwrap_or(0)
    }

    /// Total pending update count.
    pub fn pending_count(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.values().map(Vec::len).sum()
    }
}

/// Latest global model per job.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, GlobalModel>>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a model, replacing any older version.
    pub fn publish(&self, model: GlobalModel) {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        models.insert(model.job_id.clone(), model);
    }

    /// Latest model for a job.
    pub fn latest(&self, job_id: &str) -> Option<GlobalModel> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models.get(job_id).cloned()
    }

    /// Latest version for a job (0 if none published).
    pub fn version_of(&self, job_id: &str) -> u64 {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models.get(job_id).map(|m| m.version).unwrap_or(0)
    }

    /// Job ids with a published model.
    pub fn jobs(&self) -> Vec<String> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        let mut jobs: Vec<String> = models.keys().cloned().collect();
        jobs.sort();
        jobs
    }
}

/// Handles to the state shared by an engine and an endpoint.
#[derive(Clone, Debug, Default)]
pub struct FederationState {
    /// Pending client updates
    pub updates: Arc<UpdateStore>,
    /// Published global models
    pub models: Arc<ModelRegistry>,
}

impl FederationState {
    /// Create fresh, empty state.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_and_drain() {
        let store = UpdateStore::new();
        assert_eq!(store.submit(ClientUpdate::new("job-a", "c1", vec![1.0], 10)), 1);
        assert_eq!(store.submit(ClientUpdate::new("job-a", "c2", vec![2.0], 10)), 2);
        assert_eq!(store.submit(ClientUpdate::new("job-b", "c1", vec![3.0], 10)), 1);

        assert_eq!(store.pending_for("job-a"), 2);
        assert_eq!(store.pending_count(), 3);

        let drained = store.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_registry_replaces_version() {
        let registry = ModelRegistry::new();
        assert!(registry.latest("job").is_none());
        assert_eq!(registry.version_of("job"), 0);

        for version in 1..=2 {
            registry.publish(GlobalModel {
                job_id: "job".to_string(),
                version,
                weights: vec![version as f32],
                digest: ModelDigest::of_weights(&[version as f32]),
                participants: vec!["c1".to_string()],
                aggregated_at: now(),
            });
        }

        assert_eq!(registry.version_of("job"), 2);
        assert_eq!(registry.latest("job").unwrap().weights, vec![2.0]);
        assert_eq!(registry.jobs(), vec!["job".to_string()]);
    }

    #[test]
    fn test_state_clones_share_stores() {
        let state = FederationState::new();
        let other = state.clone();
        other.updates.submit(ClientUpdate::new("job", "c1", vec![0.5], 1));
        assert_eq!(state.updates.pending_count(), 1);
    }
}
