//! Conditional writes and the return-value protocol

use crate::common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

// ============================================================================
// Conditional semantics
// ============================================================================

#[test]
fn put_if_absent_keeps_first_value() {
    let tc = TestCluster::new();
    let k = key("/cond/1/-/a");

    assert!(tc.store.put_if_absent(&k, "v1").unwrap().is_some());
    assert!(tc.store.put_if_absent(&k, "v2").unwrap().is_none());
    assert_eq!(tc.store.get(&k).unwrap().unwrap().value, Value::from("v1"));
}

#[test]
fn put_if_version_accepts_only_current_version() {
    let tc = TestCluster::new();
    let k = key("/cond/2");
    let ver1 = tc.store.put(&k, "v1").unwrap().unwrap();

    // Any other version is stale, including one from another key
    let other = tc.store.put(&key("/cond/2/-/x"), "x").unwrap().unwrap();
    assert!(tc.store.put_if_version(&k, "v2", other).unwrap().is_none());
    assert_eq!(tc.store.get(&k).unwrap().unwrap().value, Value::from("v1"));

    let ver2 = tc.store.put_if_version(&k, "v2", ver1).unwrap().unwrap();
    assert_ne!(ver1, ver2);
    assert_eq!(tc.store.get(&k).unwrap().unwrap().version, ver2);
}

#[test]
fn delete_twice() {
    let tc = TestCluster::new();
    let k = key("/cond/3");
    tc.store.put(&k, "v").unwrap();

    assert!(tc.store.delete(&k).unwrap());
    assert!(!tc.store.delete(&k).unwrap());
    assert!(tc.store.get(&k).unwrap().is_none());
}

#[test]
fn delete_if_version_on_absent_and_mismatch() {
    let tc = TestCluster::new();
    let k = key("/cond/4");
    let ver1 = tc.store.put(&k, "v1").unwrap().unwrap();
    let ver2 = tc.store.put(&k, "v2").unwrap().unwrap();

    assert!(!tc.store.delete_if_version(&k, ver1).unwrap());
    assert!(tc.store.delete_if_version(&k, ver2).unwrap());
    assert!(!tc.store.delete_if_version(&k, ver2).unwrap());
}

#[test]
fn failed_condition_returns_previous_state() {
    let tc = TestCluster::new();
    let k = key("/cond/5");
    let ver1 = tc.store.put(&k, "current").unwrap().unwrap();
    let all = WriteOptions::new().with_return_choice(ReturnChoice::All);

    let out = tc.store.put_if_absent_returning(&k, "new", &all).unwrap();
    assert!(!out.success);
    assert!(out.version.is_none());
    assert_eq!(out.previous.value, Some(Value::from("current")));
    assert_eq!(out.previous.version, Some(ver1));

    // The returned version is enough to retry without another read
    let retried = tc
        .store
        .put_if_version(&k, "new", out.previous.version.unwrap())
        .unwrap();
    assert!(retried.is_some());
}

#[test]
fn return_choice_none_carries_nothing() {
    let tc = TestCluster::new();
    let k = key("/cond/6");
    tc.store.put(&k, "a").unwrap();
    let out = tc
        .store
        .put_returning(&k, "b", &WriteOptions::new())
        .unwrap();
    assert!(out.success);
    assert!(out.previous.is_empty());
}

#[test]
fn round_trip_then_delete() {
    let tc = TestCluster::new();
    for i in 0..50 {
        let k = key(&format!("/rt/{}/-/{}", i % 7, i));
        let v = format!("value-{}", i);
        tc.store.put(&k, v.as_str()).unwrap();
        let got = tc.store.get(&k).unwrap().unwrap();
        assert_eq!(got.value, Value::from(v.as_str()));
        assert!(tc.store.delete(&k).unwrap());
        assert!(tc.store.get(&k).unwrap().is_none());
    }
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn concurrent_compare_and_set_counter() {
    let tc = TestCluster::new();
    let k = key("/counter/-/hits");
    tc.store.put(&k, "0").unwrap();

    const THREADS: usize = 4;
    const INCREMENTS: usize = 25;
    let conflicts = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..THREADS {
            let store = tc.store.clone();
            let k = k.clone();
            let conflicts = &conflicts;
            s.spawn(move || {
                for _ in 0..INCREMENTS {
                    loop {
                        let current = store.get(&k).unwrap().unwrap();
                        let n: usize = std::str::from_utf8(current.value.as_bytes())
                            .unwrap()
                            .parse()
                            .unwrap();
                        let next = (n + 1).to_string();
                        if store
                            .put_if_version(&k, next.as_str(), current.version)
                            .unwrap()
                            .is_some()
                        {
                            break;
                        }
                        conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    let final_value = tc.store.get(&k).unwrap().unwrap().value;
    assert_eq!(final_value, Value::from((THREADS * INCREMENTS).to_string().as_str()));
}
