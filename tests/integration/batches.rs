//! Atomic execute batches and multi-key operations

use crate::common::*;

fn put(path: &str, value: &str) -> BatchOperation {
    BatchOperation::new(Operation::put(key(path), value), true)
}

// ============================================================================
// Execute
// ============================================================================

#[test]
fn execute_commits_all_members() {
    let tc = TestCluster::new();
    let ops = vec![
        put("/order/7/-/header", "h"),
        put("/order/7/-/line/1", "l1"),
        BatchOperation::new(Operation::put_if_absent(key("/order/7/-/line/2"), "l2"), true),
    ];

    let outcome = tc.store.execute(ops, &WriteOptions::new()).unwrap();
    match outcome.outcome {
        ExecuteOutcome::Committed(results) => {
            assert_eq!(results.len(), 3);
            assert!(results.iter().all(|r| r.is_success()));
        }
        other => panic!("expected commit, got {:?}", other),
    }
    for path in ["/order/7/-/header", "/order/7/-/line/1", "/order/7/-/line/2"] {
        assert!(tc.store.get(&key(path)).unwrap().is_some(), "{} missing", path);
    }
}

#[test]
fn execute_abort_leaves_nothing_visible() {
    let tc = TestCluster::new();
    let existing = key("/order/8/-/line/2");
    let ver = tc.store.put(&existing, "taken").unwrap().unwrap();

    let ops = vec![
        put("/order/8/-/line/1", "l1"),
        BatchOperation::new(
            Operation::put_if_absent(existing.clone(), "l2").with_return_choice(ReturnChoice::All),
            true,
        ),
        put("/order/8/-/line/3", "l3"),
    ];
    let outcome = tc.store.execute(ops, &WriteOptions::new()).unwrap();

    match outcome.outcome {
        ExecuteOutcome::Aborted {
            failed_index,
            failed_result,
        } => {
            assert_eq!(failed_index, 1);
            let write = failed_result.as_write().unwrap();
            assert!(!write.success);
            assert_eq!(write.previous_value, Some(Value::from("taken")));
            assert_eq!(write.previous_version, Some(ver));
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert!(tc.store.get(&key("/order/8/-/line/1")).unwrap().is_none());
    assert!(tc.store.get(&key("/order/8/-/line/3")).unwrap().is_none());
    assert_eq!(tc.store.get(&existing).unwrap().unwrap().version, ver);
}

#[test]
fn execute_without_abort_flag_commits_failed_member() {
    let tc = TestCluster::new();
    tc.store.put(&key("/order/9/-/a"), "old").unwrap();
    let ops = vec![
        BatchOperation::new(Operation::put_if_absent(key("/order/9/-/a"), "new"), false),
        put("/order/9/-/b", "b"),
    ];

    let outcome = tc.store.execute(ops, &WriteOptions::new()).unwrap();
    match outcome.outcome {
        ExecuteOutcome::Committed(results) => {
            assert!(!results[0].is_success());
            assert!(results[1].is_success());
        }
        other => panic!("expected commit, got {:?}", other),
    }
    assert_eq!(
        tc.store.get(&key("/order/9/-/a")).unwrap().unwrap().value,
        Value::from("old")
    );
}

#[test]
fn aborted_execute_is_sent_once() {
    let tc = TestCluster::new();
    tc.store.put(&key("/order/10/-/a"), "x").unwrap();
    let before = tc.transport.sends();

    let ops = vec![BatchOperation::new(
        Operation::put_if_absent(key("/order/10/-/a"), "y"),
        true,
    )];
    let outcome = tc.store.execute(ops, &WriteOptions::new()).unwrap();

    assert!(!outcome.is_committed());
    assert_eq!(outcome.attempts, 1);
    assert!(!outcome.ambiguous);
    assert_eq!(tc.transport.sends() - before, 1);
}

#[test]
fn conditional_batch_after_lost_reply_is_ambiguous() {
    let tc = TestCluster::new();
    let k = key("/acct/7/-/a");
    tc.transport.lose_next_replies(1);

    let ops = vec![BatchOperation::new(Operation::put_if_absent(k.clone(), "mine"), true)];
    let outcome = tc.store.execute(ops, &WriteOptions::new()).unwrap();

    // The first attempt committed; the resent batch aborts on its own write
    assert!(matches!(outcome.outcome, ExecuteOutcome::Aborted { failed_index: 0, .. }));
    assert!(outcome.ambiguous);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(tc.store.get(&k).unwrap().unwrap().value, Value::from("mine"));
}

#[test]
fn unconditional_batch_after_lost_reply_commits() {
    let tc = TestCluster::new();
    tc.transport.lose_next_replies(1);

    let ops = vec![put("/acct/8/-/a", "a"), put("/acct/8/-/b", "b")];
    let outcome = tc.store.execute(ops, &WriteOptions::new()).unwrap();

    assert!(outcome.is_committed());
    assert_eq!(outcome.attempts, 2);
    assert!(!outcome.ambiguous);
}

#[test]
fn execute_rejected_before_send() {
    let tc = TestCluster::new();
    let before = tc.transport.sends();

    let empty = tc.store.execute(Vec::new(), &WriteOptions::new());
    assert!(matches!(empty, Err(Error::IllegalArgument { .. })));

    let spanning = vec![put("/order/11/-/a", "a"), put("/order/12/-/a", "a")];
    let err = tc.store.execute(spanning, &WriteOptions::new()).unwrap_err();
    assert!(matches!(err, Error::IllegalArgument { .. }));

    let read = vec![BatchOperation::new(Operation::get(key("/order/13/-/a")), true)];
    let err = tc.store.execute(read, &WriteOptions::new()).unwrap_err();
    assert!(matches!(err, Error::IllegalArgument { .. }));

    assert_eq!(tc.transport.sends(), before);
}

// ============================================================================
// Multi-key
// ============================================================================

#[test]
fn multi_get_and_delete_share_a_snapshot_of_one_major_path() {
    let tc = TestCluster::new();
    for path in [
        "/acct/1",
        "/acct/1/-/email",
        "/acct/1/-/addr/home",
        "/acct/1/-/addr/work",
        "/acct/2/-/email",
    ] {
        tc.store.put(&key(path), path).unwrap();
    }

    let all = MultiKeySpec::new(key("/acct/1"));
    let records = tc.store.multi_get(&all, &ReadOptions::new()).unwrap();
    let paths: Vec<String> = records.iter().map(|r| r.key.to_string()).collect();
    assert_eq!(
        paths,
        vec![
            "/acct/1",
            "/acct/1/-/addr/home",
            "/acct/1/-/addr/work",
            "/acct/1/-/email",
        ]
    );

    let children = MultiKeySpec::new(key("/acct/1")).with_depth(Depth::ChildrenOnly);
    let keys = tc.store.multi_get_keys(&children, &ReadOptions::new()).unwrap();
    let paths: Vec<String> = keys.iter().map(|k| k.key.to_string()).collect();
    assert_eq!(paths, vec!["/acct/1/-/email"]);

    let addr = MultiKeySpec::new(key("/acct/1/-/addr")).with_depth(Depth::DescendantsOnly);
    assert_eq!(tc.store.multi_delete(&addr, &WriteOptions::new()).unwrap(), 2);
    assert!(tc.store.get(&key("/acct/1/-/addr/home")).unwrap().is_none());
    assert!(tc.store.get(&key("/acct/1/-/email")).unwrap().is_some());
    assert!(tc.store.get(&key("/acct/2/-/email")).unwrap().is_some());
}

#[test]
fn multi_get_with_range() {
    let tc = TestCluster::new();
    for c in ["a", "b", "c", "d"] {
        tc.store.put(&key(&format!("/cat/-/{}", c)), c).unwrap();
    }
    let range = KeyRange::new(Some("b".into()), true, Some("d".into()), false).unwrap();
    let spec = MultiKeySpec::new(key("/cat"))
        .with_range(range)
        .with_depth(Depth::ChildrenOnly);
    let keys = tc.store.multi_get_keys(&spec, &ReadOptions::new()).unwrap();
    let paths: Vec<String> = keys.iter().map(|k| k.key.to_string()).collect();
    assert_eq!(paths, vec!["/cat/-/b", "/cat/-/c"]);
}

#[test]
fn colocated_major_path_child_is_outside_the_subtree() {
    let tc = TestCluster::new();
    // A longer major path that happens to hash to the parent's partition
    let n = (0..1000)
        .find(|n| {
            tc.partition_of(&key(&format!("/cart/{}", n)))
                == tc.partition_of(&key(&format!("/cart/{}/x", n)))
        })
        .expect("some cart colocates with its major-path child");
    let parent = key(&format!("/cart/{}", n));
    let item = key(&format!("/cart/{}/-/a", n));
    let child = key(&format!("/cart/{}/x", n));
    tc.store.put(&item, "item").unwrap();
    tc.store.put(&child, "other cart").unwrap();

    let spec = MultiKeySpec::new(parent.clone());
    let keys = tc.store.multi_get_keys(&spec, &ReadOptions::new()).unwrap();
    let paths: Vec<Key> = keys.into_iter().map(|k| k.key).collect();
    assert_eq!(paths, vec![item.clone()]);

    let scanned: Vec<Key> = tc
        .store
        .partition_iterator(&ScanOptions::new().with_parent(parent))
        .unwrap()
        .map(|e| e.unwrap().key)
        .collect();
    assert_eq!(scanned, vec![item.clone()]);

    assert_eq!(tc.store.multi_delete(&spec, &WriteOptions::new()).unwrap(), 1);
    assert!(tc.store.get(&item).unwrap().is_none());
    assert_eq!(tc.store.get(&child).unwrap().unwrap().value, Value::from("other cart"));
}
