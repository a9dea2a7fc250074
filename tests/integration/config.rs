//! Client configuration files

use crate::common::*;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn default_file_round_trips_into_a_client() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    ClientConfig::write_default_if_missing(&path).unwrap();

    let config = ClientConfig::from_file(&path).unwrap();
    assert_eq!(config, ClientConfig::default());

    let cluster = std::sync::Arc::new(LocalCluster::new(topology()));
    let store = KvStore::connect(topology(), cluster.clone(), cluster, config).unwrap();
    assert!(store.put(&key("/cfg/1"), "v").unwrap().is_some());
}

#[test]
fn file_settings_reach_the_dispatcher() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        r#"
request_timeout_ms = 750
read_consistency = "absolute"
write_durability = "commit_sync"
max_serial_version = 1

[retry]
max_retries = 0
"#,
    )
    .unwrap();

    let config = ClientConfig::from_file(&path).unwrap();
    assert_eq!(config.request_timeout(), Duration::from_millis(750));
    assert_eq!(config.consistency().unwrap(), Consistency::Absolute);
    assert_eq!(config.durability().unwrap(), Durability::COMMIT_SYNC);

    let tc = TestCluster::with_config(config);
    let k = key("/cfg/2");
    tc.store.put(&k, "v").unwrap();
    assert_eq!(
        tc.store.dispatcher().negotiated_version(tc.master_of(&k)),
        Some(SerialVersion::V1)
    );

    // No retries: one lost frame surfaces immediately
    tc.transport.lose_next_requests(1);
    assert!(tc.store.get(&k).is_err());
}

#[test]
fn bad_file_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "write_durability = \"eventually\"\n").unwrap();

    let err = ClientConfig::from_file(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains(CONFIG_FILE_NAME));
}
