//! Resumable and parallel iteration

use crate::common::*;
use rand::Rng;
use std::collections::BTreeSet;

fn populate(store: &KvStore, users: usize, fields: usize) -> BTreeSet<String> {
    let mut written = BTreeSet::new();
    for u in 0..users {
        for f in 0..fields {
            let path = format!("/user/{}/-/field/{}", u, f);
            store.put(&key(&path), path.as_str()).unwrap();
            written.insert(path);
        }
    }
    written
}

fn collect(iter: impl Iterator<Item = Result<ScanEntry>>) -> Vec<String> {
    iter.map(|r| r.unwrap().key.to_string()).collect()
}

#[test]
fn partition_iterator_forward_and_reverse() {
    let tc = TestCluster::new();
    populate(&tc.store, 1, 9);
    tc.store.put(&key("/user/0"), "root").unwrap();

    let forward = ScanOptions::new()
        .with_parent(key("/user/0"))
        .with_depth(Depth::DescendantsOnly)
        .with_direction(Direction::Forward)
        .with_batch_size(4);
    let fwd = collect(tc.store.partition_iterator(&forward).unwrap());
    assert_eq!(fwd.len(), 9);
    assert!(!fwd.contains(&"/user/0".to_string()));
    let mut sorted = fwd.clone();
    sorted.sort_by_key(|p| key(p));
    assert_eq!(fwd, sorted);

    let reverse = forward.clone().with_direction(Direction::Reverse);
    let mut rev = collect(tc.store.partition_iterator(&reverse).unwrap());
    rev.reverse();
    assert_eq!(rev, fwd);
}

#[test]
fn store_iterator_returns_every_record_once_for_any_batch_size() {
    let tc = TestCluster::new();
    let written = populate(&tc.store, 20, 3);
    let mut rng = rand::thread_rng();

    for _ in 0..5 {
        let batch: u32 = rng.gen_range(1..=20);
        let options = ScanOptions::new().with_batch_size(batch);
        let seen = collect(tc.store.store_iterator(options).unwrap());
        assert_eq!(seen.len(), written.len(), "batch size {}", batch);
        let unique: BTreeSet<String> = seen.into_iter().collect();
        assert_eq!(unique, written, "batch size {}", batch);
    }
}

#[test]
fn store_iterator_with_partial_major_parent() {
    let tc = TestCluster::new();
    populate(&tc.store, 6, 2);
    tc.store.put(&key("/other/1"), "x").unwrap();

    let options = ScanOptions::new().with_parent(key("/user"));
    let seen = collect(tc.store.store_iterator(options).unwrap());
    assert_eq!(seen.len(), 12);
    assert!(seen.iter().all(|p| p.starts_with("/user/")));
}

#[test]
fn parallel_scan_matches_store_iterator() {
    let tc = TestCluster::new();
    let written = populate(&tc.store, 15, 4);

    let options = ScanOptions::new().with_batch_size(5).keys_only();
    let mut scan = tc.store.parallel_scan(options).unwrap();
    let mut seen = Vec::new();
    for entry in scan.by_ref() {
        let entry = entry.unwrap();
        assert!(entry.value.is_none());
        seen.push(entry.key.to_string());
    }
    assert_eq!(seen.len(), written.len());
    assert_eq!(seen.into_iter().collect::<BTreeSet<_>>(), written);

    let records: u64 = scan.shard_metrics().iter().map(|m| m.records).sum();
    assert_eq!(records as usize, written.len());
}

#[test]
fn interrupted_scan_resumes_where_it_failed() {
    let tc = TestCluster::new();
    populate(&tc.store, 1, 10);
    let parent = key("/user/0");
    let group = tc.group_of(&parent);

    let options = ScanOptions::new()
        .with_parent(parent)
        .with_direction(Direction::Forward)
        .with_batch_size(3)
        .with_read_options(ReadOptions::new().with_consistency(Consistency::Absolute));
    let mut iter = tc.store.partition_iterator(&options).unwrap();

    // Drain exactly two batches so nothing is left buffered
    let mut seen = collect(iter.by_ref().take(6));
    assert_eq!(iter.batches_fetched(), 2);

    // Master goes away between batches
    let master = RepNodeId::new(group.number(), 1);
    tc.cluster.mark_unavailable(master);
    let failure = iter.next().unwrap().unwrap_err();
    match &failure {
        Error::IterationFault { resume_key, .. } => {
            assert_eq!(resume_key.as_ref().map(|k| k.to_string()), seen.last().cloned());
        }
        other => panic!("expected iteration fault, got {:?}", other),
    }

    tc.cluster.mark_available(master);
    seen.extend(collect(iter));
    assert_eq!(seen.len(), 10);
    assert_eq!(seen.iter().collect::<BTreeSet<_>>().len(), 10);
}
