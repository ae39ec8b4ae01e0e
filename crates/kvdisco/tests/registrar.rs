use bytes::Bytes;
use kvdisco::{
    Discovery, DiscoveryConfig, DiscoveryError, Entries, Entry, MemoryStore, DEFAULT_HEARTBEAT,
    DEFAULT_TTL,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const KEY: &str = "path/docker/swarm/nodes/10.0.0.1:2375";

async fn discovery(config: DiscoveryConfig) -> Discovery<MemoryStore> {
    Discovery::initialize("127.0.0.1:2379/path", config)
        .await
        .unwrap()
}

async fn next<T>(rx: &mut mpsc::Receiver<T>) -> Option<T> {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting on stream")
}

#[tokio::test(start_paused = true)]
async fn test_register_writes_immediately_and_on_every_heartbeat() {
    let d = discovery(DiscoveryConfig::default()).await;
    let stop = CancellationToken::new();
    let _errors = d
        .register(
            "10.0.0.1:2375",
            Duration::from_secs(10),
            Duration::from_secs(30),
            stop.clone(),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(d.store().get(KEY).await, Some(Bytes::from_static(b"10.0.0.1:2375")));
    assert_eq!(d.store().calls().await.put, 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(d.store().calls().await.put, 2);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(d.store().calls().await.put, 4);

    stop.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_register_failures_are_reported_and_retried() {
    let d = discovery(DiscoveryConfig::default()).await;
    d.store().set_put_failure(Some("test error")).await;

    let stop = CancellationToken::new();
    let mut errors = d
        .register("10.0.0.1:2375", Duration::from_secs(5), Duration::ZERO, stop.clone())
        .unwrap();

    let err = next(&mut errors).await.unwrap();
    match &err {
        DiscoveryError::Registration { key, source } => {
            assert_eq!(key, KEY);
            assert_eq!(source.to_string(), "test error");
        }
        other => panic!("unexpected error: {other}"),
    }

    // The next heartbeat still happens and fails again
    assert!(next(&mut errors).await.is_some());

    // Once the backend recovers the key appears
    d.store().set_put_failure(None).await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(d.store().get(KEY).await.is_some());

    stop.cancel();
    assert!(next(&mut errors).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_deregisters() {
    let d = discovery(DiscoveryConfig::default()).await;
    let stop = CancellationToken::new();
    let mut errors = d
        .register("10.0.0.1:2375", Duration::ZERO, Duration::ZERO, stop.clone())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(d.store().get(KEY).await.is_some());

    stop.cancel();
    assert!(next(&mut errors).await.is_none());
    assert!(d.store().get(KEY).await.is_none());
    assert_eq!(d.store().calls().await.delete, 1);
}

#[tokio::test(start_paused = true)]
async fn test_crashed_member_expires_from_watch() {
    let config = DiscoveryConfig {
        deregister_on_stop: false,
        ..Default::default()
    };
    let d = discovery(config).await;

    let stop_watch = CancellationToken::new();
    let (mut snapshots, _watch_errors) = d.watch(stop_watch.clone());
    assert!(next(&mut snapshots).await.unwrap().is_empty());

    let stop_member = CancellationToken::new();
    let _errors = d
        .register(
            "10.0.0.1:2375",
            Duration::from_secs(5),
            Duration::from_secs(15),
            stop_member.clone(),
        )
        .unwrap();
    assert_eq!(
        next(&mut snapshots).await.unwrap(),
        Entries::from(vec![Entry::new("10.0.0.1", "2375")])
    );

    // Simulate a crash: heartbeats stop, the key is left behind
    stop_member.cancel();
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(d.store().purge_expired().await, 1);
    assert!(next(&mut snapshots).await.unwrap().is_empty());

    stop_watch.cancel();
}

#[tokio::test]
async fn test_register_rejects_bad_address() {
    let d = discovery(DiscoveryConfig::default()).await;
    let result = d.register(
        "not-an-address",
        Duration::ZERO,
        Duration::ZERO,
        CancellationToken::new(),
    );
    assert!(matches!(result, Err(DiscoveryError::InvalidAddress(_))));

    let result = d.register_once("also bad").await;
    assert!(matches!(result, Err(DiscoveryError::InvalidAddress(_))));
    assert_eq!(d.store().calls().await.put, 0);
}

#[tokio::test]
async fn test_register_once_failure() {
    let d = discovery(DiscoveryConfig::default()).await;
    d.store().set_put_failure(Some("test error")).await;

    let err = d.register_once("10.0.0.1:2375").await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Registration { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_zero_configured_heartbeat_and_ttl_use_builtin_defaults() {
    let config = DiscoveryConfig {
        heartbeat: Duration::ZERO,
        ttl: Duration::ZERO,
        ..Default::default()
    };
    let d = discovery(config).await;
    let stop = CancellationToken::new();
    let mut errors = d
        .register("10.0.0.1:2375", Duration::ZERO, Duration::ZERO, stop.clone())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(d.store().get(KEY).await.is_some());
    assert_eq!(d.store().calls().await.put, 1);

    // Next heartbeat lands on the built-in interval
    tokio::time::sleep(DEFAULT_HEARTBEAT).await;
    assert_eq!(d.store().calls().await.put, 2);
    assert!(errors.try_recv().is_err());

    // The key carries the built-in TTL
    stop.cancel();
    assert!(next(&mut errors).await.is_none());
    d.register_once("10.0.0.2:2375").await.unwrap();
    tokio::time::sleep(DEFAULT_TTL - Duration::from_secs(1)).await;
    assert!(d.store().get("path/docker/swarm/nodes/10.0.0.2:2375").await.is_some());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(d.store().get("path/docker/swarm/nodes/10.0.0.2:2375").await.is_none());
}
