//! Integration Tests
//!
//! Client, wire codec and reference rep groups exercised together through
//! an in-process cluster:
//! - Conditional writes and the return-value protocol
//! - Atomic batches
//! - Retry and idempotence under lost frames
//! - Resumable iteration
//! - Routing, topology refresh and partition migration
//! - Credentials, durability and protocol negotiation

#[path = "../common/mod.rs"]
mod common;

mod batches;
mod conditional_writes;
mod config;
mod iteration;
mod protocol;
mod retry;
mod routing;
mod security;
mod topology;
