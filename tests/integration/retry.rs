//! Retry and idempotence under lost frames

use crate::common::*;
use std::time::{Duration, Instant};

#[test]
fn lost_put_reply_is_retried_transparently() {
    let tc = TestCluster::new();
    let k = key("/retry/1");
    tc.transport.lose_next_replies(1);

    let out = tc
        .store
        .put_returning(&k, "v", &WriteOptions::new())
        .unwrap();
    assert!(out.success);
    assert_eq!(out.attempts, 2);
    assert!(!out.ambiguous);
    assert_eq!(tc.store.get(&k).unwrap().unwrap().version, out.version.unwrap());
}

#[test]
fn lost_request_is_retried() {
    let tc = TestCluster::new();
    let k = key("/retry/2");
    tc.transport.lose_next_requests(2);

    let out = tc
        .store
        .put_if_absent_returning(&k, "v", &WriteOptions::new())
        .unwrap();
    // Nothing reached the server before the third send
    assert!(out.success);
    assert_eq!(out.attempts, 3);
    assert!(!out.ambiguous);
}

#[test]
fn conditional_write_after_lost_reply_is_ambiguous() {
    let tc = TestCluster::new();
    let k = key("/retry/3");
    tc.transport.lose_next_replies(1);

    let options = WriteOptions::new().with_return_choice(ReturnChoice::All);
    let out = tc.store.put_if_absent_returning(&k, "mine", &options).unwrap();

    // The first attempt committed; the retry sees its own write
    assert!(!out.success);
    assert!(out.ambiguous);
    assert_eq!(out.attempts, 2);
    assert_eq!(out.previous.value, Some(Value::from("mine")));
    assert_eq!(tc.store.get(&k).unwrap().unwrap().value, Value::from("mine"));
}

#[test]
fn delete_after_lost_reply() {
    let tc = TestCluster::new();
    let k = key("/retry/4");
    tc.store.put(&k, "v").unwrap();
    tc.transport.lose_next_replies(1);

    let out = tc.store.delete_returning(&k, &WriteOptions::new()).unwrap();
    // Deletes are idempotent: the key is gone either way
    assert!(!out.success);
    assert!(!out.ambiguous);
    assert!(tc.store.get(&k).unwrap().is_none());
}

#[test]
fn retries_are_bounded() {
    let tc = TestCluster::new();
    tc.transport.lose_next_requests(10);
    let before = tc.transport.sends();

    let err = tc.store.put(&key("/retry/5"), "v").unwrap_err();
    assert!(matches!(err, Error::RequestTimeout { .. }));
    assert_eq!(tc.transport.sends() - before, 3);
}

#[test]
fn no_retry_config_sends_once() {
    let tc = TestCluster::with_config(
        ClientConfig::default()
            .with_retry(RetryConfig::no_retry())
            .with_request_timeout(Duration::from_secs(2)),
    );
    tc.transport.lose_next_requests(1);
    let before = tc.transport.sends();

    assert!(tc.store.get(&key("/retry/6")).is_err());
    assert_eq!(tc.transport.sends() - before, 1);
}

#[test]
fn slow_cluster_hits_the_deadline() {
    let tc = TestCluster::new();
    tc.cluster.set_latency(Some(Duration::from_millis(500)));

    let options = ReadOptions::new().with_timeout(Duration::from_millis(50));
    let started = Instant::now();
    let err = tc.store.get_with(&key("/retry/7"), &options).unwrap_err();

    assert!(matches!(err, Error::RequestTimeout { .. }));
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[test]
fn write_durability_needs_a_majority() {
    let tc = TestCluster::new();
    let k = key("/retry/8");
    let group = tc.group_of(&k);
    tc.cluster.mark_unavailable(RepNodeId::new(group.number(), 2));

    // Two of three is still a majority
    assert!(tc.store.put(&k, "a").unwrap().is_some());

    tc.cluster.mark_unavailable(RepNodeId::new(group.number(), 3));
    let err = tc.store.put(&k, "b").unwrap_err();
    assert!(matches!(err, Error::DurabilityNotMet { required: 2, available: 1, .. }));

    // Reads are unaffected
    assert_eq!(tc.store.get(&k).unwrap().unwrap().value, Value::from("a"));
}

#[test]
fn relaxed_durability_accepts_a_lone_master() {
    let tc = TestCluster::new();
    let k = key("/retry/9");
    let group = tc.group_of(&k);
    tc.cluster.mark_unavailable(RepNodeId::new(group.number(), 2));
    tc.cluster.mark_unavailable(RepNodeId::new(group.number(), 3));

    let relaxed = Durability {
        replica_ack: ReplicaAckPolicy::None,
        ..Durability::COMMIT_NO_SYNC
    };
    let options = WriteOptions::new().with_durability(relaxed);
    assert!(tc.store.put_returning(&k, "v", &options).unwrap().success);
}
