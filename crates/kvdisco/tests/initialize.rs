use async_trait::async_trait;
use bytes::Bytes;
use kvdisco::{
    Connect, Discovery, DiscoveryConfig, DiscoveryError, KvPairStream, KvStore, MemoryStore,
    StoreError, WriteOptions, DEFAULT_DISCOVERY_PATH,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_initialize() {
    let d = Discovery::<MemoryStore>::initialize("127.0.0.1", DiscoveryConfig::default())
        .await
        .unwrap();
    assert_eq!(d.store().endpoints(), ["127.0.0.1"]);
    assert_eq!(d.namespace().path(), DEFAULT_DISCOVERY_PATH);

    let d = Discovery::<MemoryStore>::initialize("127.0.0.1:1234/path", DiscoveryConfig::default())
        .await
        .unwrap();
    assert_eq!(d.store().endpoints(), ["127.0.0.1:1234"]);
    assert_eq!(d.namespace().path(), format!("path/{DEFAULT_DISCOVERY_PATH}"));

    let d = Discovery::<MemoryStore>::initialize(
        "127.0.0.1:1234,127.0.0.2:1234,127.0.0.3:1234/path",
        DiscoveryConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(
        d.store().endpoints(),
        ["127.0.0.1:1234", "127.0.0.2:1234", "127.0.0.3:1234"]
    );
    assert_eq!(d.namespace().path(), format!("path/{DEFAULT_DISCOVERY_PATH}"));
}

#[tokio::test]
async fn test_initialize_twice_is_identical() {
    let uri = "127.0.0.1:1234,127.0.0.2:1234/path";
    let a = Discovery::<MemoryStore>::initialize(uri, DiscoveryConfig::default())
        .await
        .unwrap();
    let b = Discovery::<MemoryStore>::initialize(uri, DiscoveryConfig::default())
        .await
        .unwrap();
    assert_eq!(a.namespace(), b.namespace());
    assert_eq!(a.store().endpoints(), b.store().endpoints());
}

#[tokio::test]
async fn test_initialize_with_custom_discovery_path() {
    let config = DiscoveryConfig {
        discovery_path: "services/api".to_string(),
        ..Default::default()
    };
    let d = Discovery::<MemoryStore>::initialize("127.0.0.1:2379/prod", config)
        .await
        .unwrap();
    assert_eq!(d.namespace().path(), "prod/services/api");
}

#[tokio::test]
async fn test_initialize_rejects_bad_uri() {
    let result = Discovery::<MemoryStore>::initialize("", DiscoveryConfig::default()).await;
    assert!(matches!(result, Err(DiscoveryError::InvalidUri { .. })));
}

/// Backend whose connection always fails.
struct Unreachable;

#[async_trait]
impl KvStore for Unreachable {
    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        unreachable!()
    }

    async fn put(
        &self,
        _key: &str,
        _value: Bytes,
        _options: Option<WriteOptions>,
    ) -> Result<(), StoreError> {
        unreachable!()
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        unreachable!()
    }

    async fn watch_tree(
        &self,
        _prefix: &str,
        _stop: CancellationToken,
    ) -> Result<KvPairStream, StoreError> {
        unreachable!()
    }
}

#[async_trait]
impl Connect for Unreachable {
    async fn connect(_endpoints: &[String], _config: &DiscoveryConfig) -> Result<Self, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_initialize_connection_failure_is_fatal() {
    let result =
        Discovery::<Unreachable>::initialize("127.0.0.1:2379/path", DiscoveryConfig::default())
            .await;

    match result {
        Err(DiscoveryError::ConnectionInit { endpoints, source }) => {
            assert_eq!(endpoints, ["127.0.0.1:2379"]);
            assert_eq!(source.to_string(), "connection refused");
        }
        _ => panic!("expected ConnectionInit"),
    }
}
