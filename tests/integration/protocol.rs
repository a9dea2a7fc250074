//! Serial version negotiation end to end

use crate::common::*;

#[test]
fn v1_server_drops_table_ids() {
    let tc = TestCluster::new();
    tc.cluster.set_serial_version(SerialVersion::V1);
    let k = key("/proto/1");

    let put = Operation::put(k.clone(), "v").with_table_id(7);
    assert!(tc.store.write(put, &WriteOptions::new()).unwrap().success);

    let got = tc
        .store
        .dispatcher()
        .dispatch(&Operation::get(k.clone()), RequestPolicy::default(), TEST_TIMEOUT)
        .unwrap();
    match got.result {
        OperationResult::Get { record, table_id } => {
            assert!(record.is_some());
            assert_eq!(table_id, None);
        }
        other => panic!("unexpected {:?}", other),
    }
    let master = tc.master_of(&k);
    assert_eq!(
        tc.store.dispatcher().negotiated_version(master),
        Some(SerialVersion::V1)
    );
}

#[test]
fn v2_server_keeps_table_ids() {
    let tc = TestCluster::new();
    let k = key("/proto/2");
    let put = Operation::put(k.clone(), "v").with_table_id(7);
    tc.store.write(put, &WriteOptions::new()).unwrap();

    let got = tc
        .store
        .dispatcher()
        .dispatch(&Operation::get(k), RequestPolicy::default(), TEST_TIMEOUT)
        .unwrap();
    assert!(matches!(got.result, OperationResult::Get { table_id: Some(7), .. }));
}

#[test]
fn table_scan_needs_v2() {
    let tc = TestCluster::new();
    tc.cluster.set_serial_version(SerialVersion::V1);
    tc.store.put(&key("/proto/3/-/a"), "v").unwrap();

    let options = ScanOptions::new()
        .with_parent(key("/proto/3"))
        .with_direction(Direction::Forward)
        .with_table_id(1);
    let mut iter = tc.store.partition_iterator(&options).unwrap();
    let err = iter.next().unwrap().unwrap_err();
    match err {
        Error::IterationFault { source, .. } => {
            assert!(matches!(*source, Error::UnsupportedOperation { .. }));
        }
        other => panic!("expected iteration fault, got {:?}", other),
    }
}

#[test]
fn client_pinned_to_v1() {
    let tc = TestCluster::with_config(test_config().with_max_serial_version(SerialVersion::V1));
    let k = key("/proto/4");
    tc.store.put(&k, "v").unwrap();
    assert_eq!(
        tc.store.dispatcher().negotiated_version(tc.master_of(&k)),
        Some(SerialVersion::V1)
    );
}
