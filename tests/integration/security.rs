//! Credentials and re-authentication

use crate::common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct TokenSource {
    calls: AtomicUsize,
    token: String,
}

impl ReauthenticateHandler for TokenSource {
    fn reauthenticate(&self) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.token.clone()))
    }
}

fn client_with_handler(tc: &TestCluster, handler: Arc<TokenSource>) -> KvStore {
    let dispatcher = RequestDispatcher::new(
        topology(),
        tc.cluster.clone(),
        tc.transport.clone(),
        test_config(),
    )
    .unwrap()
    .with_reauthenticate_handler(handler);
    KvStore::new(Arc::new(dispatcher))
}

#[test]
fn missing_credentials_are_not_retried() {
    let tc = TestCluster::new();
    tc.cluster.require_auth_token(Some("s3cret".to_string()));
    let before = tc.transport.sends();

    let err = tc.store.put(&key("/sec/1"), "v").unwrap_err();
    assert!(err.is_security());
    assert!(!err.is_retryable());
    assert_eq!(tc.transport.sends() - before, 1);
}

#[test]
fn handler_renews_expired_credentials() {
    let tc = TestCluster::new();
    let handler = Arc::new(TokenSource {
        calls: AtomicUsize::new(0),
        token: "s3cret".to_string(),
    });
    let store = client_with_handler(&tc, handler.clone());
    tc.cluster.require_auth_token(Some("s3cret".to_string()));

    let k = key("/sec/2");
    assert!(store.put(&k, "v").unwrap().is_some());
    assert!(store.get(&k).unwrap().is_some());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

    // Credentials rotate on the server
    tc.cluster.require_auth_token(Some("rotated".to_string()));
    let err = store.get(&k).unwrap_err();
    assert!(matches!(err, Error::AuthenticationRequired { .. }));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn explicit_token() {
    let tc = TestCluster::new();
    tc.cluster.require_auth_token(Some("s3cret".to_string()));
    tc.store
        .dispatcher()
        .set_auth_token(Some("s3cret".to_string()));
    assert!(tc.store.put(&key("/sec/3"), "v").unwrap().is_some());
}
