//! Topology refresh and partition migration

use crate::common::*;

fn migrate(tc: &TestCluster, k: &Key) -> (PartitionId, RepGroupId) {
    let partition = tc.partition_of(k);
    let to = tc.other_group(k);
    tc.cluster.migrate_partition(partition, to).unwrap();
    (partition, to)
}

#[test]
fn client_follows_a_migrated_partition() {
    let tc = TestCluster::new();
    let k = key("/move/1/-/a");
    tc.store.put(&k, "before").unwrap();
    let old_seq = tc.store.dispatcher().topology().sequence_number();

    let (partition, to) = migrate(&tc, &k);

    // First request hits the old owner, which rejects it as stale
    assert_eq!(tc.store.get(&k).unwrap().unwrap().value, Value::from("before"));
    let router = tc.store.dispatcher().router();
    assert_eq!(router.resolve(partition).unwrap(), to);
    assert_eq!(router.topology().sequence_number(), old_seq + 1);
}

#[test]
fn migration_reissues_versions() {
    let tc = TestCluster::new();
    let k = key("/move/2");
    let before = tc.store.put(&k, "v").unwrap().unwrap();

    migrate(&tc, &k);

    let after = tc.store.get(&k).unwrap().unwrap();
    assert_eq!(after.value, Value::from("v"));
    assert_ne!(after.version, before);
    assert!(tc.store.put_if_version(&k, "w", before).unwrap().is_none());
    assert!(tc.store.put_if_version(&k, "w", after.version).unwrap().is_some());
}

#[test]
fn execute_after_migration() {
    let tc = TestCluster::new();
    let k = key("/move/3/-/a");
    tc.store.put(&k, "a").unwrap();
    migrate(&tc, &k);

    let ops = vec![
        BatchOperation::new(Operation::put_if_present(k.clone(), "a2"), true),
        BatchOperation::new(Operation::put(key("/move/3/-/b"), "b"), true),
    ];
    let outcome = tc.store.execute(ops, &WriteOptions::new()).unwrap();
    assert!(outcome.is_committed());
    assert_eq!(tc.store.get(&k).unwrap().unwrap().value, Value::from("a2"));
}

#[test]
fn iteration_survives_migration() {
    let tc = TestCluster::new();
    for i in 0..8 {
        tc.store
            .put(&key(&format!("/move/4/-/{}", i)), "v")
            .unwrap();
    }
    let parent = key("/move/4");
    let options = ScanOptions::new()
        .with_parent(parent.clone())
        .with_direction(Direction::Forward)
        .with_batch_size(3);
    let mut iter = tc.store.partition_iterator(&options).unwrap();
    let first: Vec<Key> = iter.by_ref().take(3).map(|r| r.unwrap().key).collect();

    migrate(&tc, &parent);

    let rest: Vec<Key> = iter.map(|r| r.unwrap().key).collect();
    assert_eq!(first.len() + rest.len(), 8);
    assert!(first.last().unwrap() < rest.first().unwrap());
}

#[test]
fn version_consistency_reads_own_write() {
    let tc = TestCluster::new();
    let k = key("/move/5");
    let version = tc.store.put(&k, "v").unwrap().unwrap();

    let options = ReadOptions::new().with_consistency(Consistency::Version {
        version,
        timeout_ms: 100,
    });
    let got = tc.store.get_with(&k, &options).unwrap().unwrap();
    assert_eq!(got.version, version);
}

#[test]
fn absolute_reads_fail_without_master() {
    let tc = TestCluster::new();
    let k = key("/move/6");
    tc.store.put(&k, "v").unwrap();
    tc.cluster.mark_unavailable(tc.master_of(&k));

    let absolute = ReadOptions::new().with_consistency(Consistency::Absolute);
    let err = tc.store.get_with(&k, &absolute).unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::NodeUnavailable | ErrorKind::RequestTimeout
    ));

    // Replicas still serve relaxed reads
    assert!(tc.store.get(&k).unwrap().is_some());
}
