//! End-to-end coordinator scenarios over real sockets and real time.

use fedcoord::coordinator::{
    CoordinatorConfig, CoordinatorEvent, CoordinatorSettings, FederationCoordinator, Lifecycle, ResourceRoots,
};
use fedcoord::endpoint::EndpointClient;
use fedcoord::federated::{stage_update, ClientUpdate, FederateStrategy};
use fedcoord::runtime::RestartPolicy;
use fedcoord::Error;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};
use tokio_test::assert_ok;

fn roots(dir: &TempDir) -> ResourceRoots {
    ResourceRoots::under(dir.path())
}

async fn connect_with_retry(addr: SocketAddr, api_version: &str) -> EndpointClient {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match EndpointClient::connect(addr, api_version).await {
            Ok(client) => return client,
            Err(e) if Instant::now() >= deadline => panic!("endpoint at {} never came up: {}", addr, e),
            Err(_) => sleep(Duration::from_millis(50)).await,
        }
    }
}

/// Wait for a `RoundCompleted` event matching `pred`.
async fn next_round<P>(events: &mut broadcast::Receiver<CoordinatorEvent>, within: Duration, pred: P) -> bool
where
    P: Fn(&fedcoord::federated::RoundReport) -> bool,
{
    timeout(within, async {
        loop {
            match events.recv().await {
                Ok(CoordinatorEvent::RoundCompleted(report)) if pred(&report) => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    })
    .await
    .unwrap_or(false)
}

#[tokio::test]
async fn test_standalone_aggregates_staged_updates() {
    let dir = TempDir::new().unwrap();
    let roots = roots(&dir);
    stage_update(&roots, &ClientUpdate::new("mnist", "client-a", vec![1.0, 2.0], 10))
        .await
        .unwrap();
    stage_update(&roots, &ClientUpdate::new("mnist", "client-b", vec![3.0, 4.0], 30))
        .await
        .unwrap();

    let mut coordinator = FederationCoordinator::standalone(FederateStrategy::FedAvg, roots.clone()).unwrap();
    let mut events = coordinator.subscribe();
    assert_ok!(coordinator.start());
    assert_eq!(coordinator.lifecycle(), Lifecycle::Running);

    assert!(next_round(&mut events, Duration::from_secs(6), |r| r.round >= 1).await);
    assert_eq!(coordinator.executor().submitted(), 0);
    assert!(coordinator.address().is_none());

    let model = coordinator.state().models.latest("mnist").unwrap();
    assert_eq!(model.version, 1);
    assert!((model.weights[0] - 2.5).abs() < 1e-6);
    assert!((model.weights[1] - 3.5).abs() < 1e-6);
    assert!(roots.job_models_dir("mnist").join("global_1.bin").exists());

    assert_ok!(coordinator.shutdown().await);
}

#[tokio::test]
async fn test_cluster_fed_avg_serves_and_aggregates() {
    let dir = TempDir::new().unwrap();
    let mut coordinator =
        FederationCoordinator::cluster("127.0.0.1", 39100, "v1", FederateStrategy::FedAvg, roots(&dir)).unwrap();
    let mut events = coordinator.subscribe();
    assert_ok!(coordinator.start());
    assert_eq!(coordinator.executor().submitted(), 1);

    let addr: SocketAddr = "127.0.0.1:39100".parse().unwrap();
    let mut client = connect_with_retry(addr, "v1").await;
    assert_eq!(client.ping().await.unwrap(), "v1");
    assert_eq!(
        client
            .submit_update(ClientUpdate::new("cifar", "edge-1", vec![0.5; 4], 8))
            .await
            .unwrap(),
        1
    );

    assert!(next_round(&mut events, Duration::from_secs(11), |r| r.jobs_aggregated == 1).await);
    let model = client.fetch_model("cifar").await.unwrap().unwrap();
    assert_eq!(model.version, 1);
    assert_eq!(model.participants, vec!["edge-1".to_string()]);

    assert_ok!(coordinator.shutdown().await);
    assert!(EndpointClient::connect(addr, "v1").await.is_err());
}

#[tokio::test]
async fn test_cluster_fed_distillation_runs_endpoint_only() {
    let dir = TempDir::new().unwrap();
    let mut coordinator = FederationCoordinator::cluster(
        "127.0.0.1",
        39101,
        "v2",
        FederateStrategy::FedDistillation,
        roots(&dir),
    )
    .unwrap();
    let mut events = coordinator.subscribe();
    assert_ok!(coordinator.start());
    assert!(!coordinator.has_aggregator());

    let mut client = connect_with_retry("127.0.0.1:39101".parse().unwrap(), "v2").await;
    assert_eq!(client.ping().await.unwrap(), "v2");
    let refused = client
        .submit_update(ClientUpdate::new("distill", "edge-1", vec![1.0], 1))
        .await
        .unwrap_err();
    assert!(refused.to_string().contains("no server aggregator"));

    assert!(!next_round(&mut events, Duration::from_secs(10), |_| true).await);
    assert_eq!(coordinator.scheduler_ticks(), None);
    assert_eq!(coordinator.metrics().rounds_completed, 0);
    assert_eq!(coordinator.state().updates.pending_count(), 0);
    assert!(client.fetch_model("distill").await.unwrap().is_none());

    assert_ok!(coordinator.shutdown().await);
}

#[tokio::test]
async fn test_wrong_api_version_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut coordinator = FederationCoordinator::cluster(
        "127.0.0.1",
        39102,
        "v1",
        FederateStrategy::FedDistillation,
        roots(&dir),
    )
    .unwrap();
    assert_ok!(coordinator.start());

    let mut client = connect_with_retry("127.0.0.1:39102".parse().unwrap(), "v9").await;
    assert!(client.ping().await.is_err());
    assert_eq!(coordinator.state().updates.pending_count(), 0);

    assert_ok!(coordinator.shutdown().await);
}

#[tokio::test]
async fn test_endpoint_bind_failure_is_reported() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let dir = TempDir::new().unwrap();
    let config = CoordinatorConfig::cluster("127.0.0.1", port, "v1", FederateStrategy::FedDistillation)
        .with_roots(roots(&dir))
        .with_settings(CoordinatorSettings::default().with_restart_policy(RestartPolicy::OnFailure {
            max_restarts: 1,
            backoff_ms: 20,
            max_backoff_ms: 50,
        }));
    let mut coordinator = FederationCoordinator::from_config(config).unwrap();
    let mut events = coordinator.subscribe();
    assert_ok!(coordinator.start());

    let result = timeout(Duration::from_secs(5), coordinator.wait_endpoint())
        .await
        .unwrap()
        .unwrap();
    match result {
        Err(Error::EndpointStart { address, .. }) => assert_eq!(address, format!("127.0.0.1:{}", port)),
        other => panic!("expected bind failure, got {:?}", other),
    }

    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        if event.is_failure() {
            failures += 1;
        }
    }
    assert_eq!(failures, 2);
    assert_eq!(coordinator.metrics().endpoint_failures, 2);

    assert_ok!(coordinator.shutdown().await);
    drop(occupied);
}

#[test]
fn test_unsupported_pair_fails_at_construction() {
    let dir = TempDir::new().unwrap();
    let result = FederationCoordinator::standalone(FederateStrategy::FedDistillation, roots(&dir));
    assert!(matches!(result, Err(Error::UnsupportedStrategy { .. })));
}

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("coordinator.json");
    let config = CoordinatorConfig::cluster("localhost", 9000, "v1", FederateStrategy::FedAvg)
        .with_roots(roots(&dir))
        .with_settings(CoordinatorSettings::default().with_round_period(Duration::from_secs(2)));
    std::fs::write(&path, config.to_json().unwrap()).unwrap();

    let loaded = CoordinatorConfig::from_json_file(&path).unwrap();
    assert_eq!(loaded, config);
    let coordinator = FederationCoordinator::from_config(loaded).unwrap();
    assert_eq!(coordinator.settings().round_period(), Duration::from_secs(2));
    assert_eq!(coordinator.address().unwrap().authority(), "localhost:9000");
}
