//! Key to partition to group routing

use crate::common::*;
use proptest::prelude::*;

#[test]
fn records_land_in_the_routed_partition() {
    let tc = TestCluster::new();
    for i in 0..40 {
        let k = key(&format!("/route/{}/-/x", i));
        tc.store.put(&k, "v").unwrap();

        let partition = tc.partition_of(&k);
        let group = tc.group_of(&k);
        let svc = tc.cluster.group(group).unwrap();
        assert!(svc.hosts(partition));
        assert!(svc.record_count(partition).unwrap() >= 1);
    }
}

#[test]
fn every_group_hosts_some_partition() {
    let tc = TestCluster::new();
    let topology = tc.store.dispatcher().topology();
    let mut total = 0;
    for group in topology.rep_groups() {
        let hosted = topology.partitions_of(group.id);
        assert!(!hosted.is_empty(), "{} hosts nothing", group.id);
        total += hosted.len();
    }
    assert_eq!(total as u32, PARTITIONS);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_minor_path_never_changes_the_partition(
        major in prop::collection::vec("[a-z0-9]{1,6}", 1..4),
        minor_a in prop::collection::vec("[a-z0-9]{1,6}", 0..4),
        minor_b in prop::collection::vec("[a-z0-9]{1,6}", 0..4),
    ) {
        let router = PartitionRouter::new(
            std::sync::Arc::new(topology()),
            std::sync::Arc::new(MessageCatalog::default()),
        );
        let a = Key::new(major.clone(), minor_a).unwrap();
        let b = Key::new(major, minor_b).unwrap();
        let pa = router.route(&a);
        prop_assert_eq!(pa, router.route(&b));
        prop_assert!(pa.number() >= 1 && pa.number() <= PARTITIONS);
    }
}
