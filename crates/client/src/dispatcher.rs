//! Request dispatch
//!
//! [`RequestDispatcher`] turns one [`Operation`] into a routed, encoded and
//! retried request:
//!
//! ```text
//! validate ─▶ ┌ resolve partition ─▶ select node ─▶ encode ─▶ send ─▶ decode ┐
//!             └──────────── retry / refresh / re-authenticate ◀─────────────┘
//! ```
//!
//! Each attempt resolves against the topology snapshot current at that
//! moment, so a refresh between attempts reroutes the retry. A
//! `TopologyStale` answer triggers a refresh and an immediate re-issue that
//! does not count against the transient retry budget.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use shardline_core::{
    Consistency, Durability, Error, Key, Limits, MessageCatalog, MessageId, PartitionId,
    RepNodeId, Result,
};
use shardline_protocol::{
    decode_response, encode_request, validate_operation, Operation, OperationResult, Request,
    Response, SerialVersion, Transport,
};
use shardline_topology::{
    Access, PartitionRouter, RepNodeStateTable, Topology, TopologyHandle, TopologySource,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::retry::{with_retry, Deadline};

/// Topology refreshes allowed within one call
const MAX_TOPOLOGY_REFRESHES: usize = 5;

/// Supplies fresh credentials after the store rejects the current ones
pub trait ReauthenticateHandler: Send + Sync {
    /// Obtain a new token; `None` clears the token
    fn reauthenticate(&self) -> Result<Option<String>>;
}

/// Read and write policies of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestPolicy {
    /// Applied when the operation is a read
    pub consistency: Consistency,
    /// Applied when the operation is a write
    pub durability: Durability,
}

/// Result of a dispatched operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// Result returned by the serving node
    pub result: OperationResult,
    /// Attempts made under the transient retry budget
    pub attempts: usize,
}

#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Key(&'a Key),
    Partition(PartitionId),
}

/// Routes, sends and retries operations
pub struct RequestDispatcher {
    topology: TopologyHandle,
    source: Arc<dyn TopologySource>,
    transport: Arc<dyn Transport>,
    node_state: Arc<RepNodeStateTable>,
    messages: Arc<MessageCatalog>,
    limits: Limits,
    config: ClientConfig,
    max_serial_version: SerialVersion,
    negotiated: RwLock<FxHashMap<RepNodeId, SerialVersion>>,
    auth_token: RwLock<Option<String>>,
    reauth: Option<Arc<dyn ReauthenticateHandler>>,
}

impl RequestDispatcher {
    /// Create a dispatcher starting from `topology`.
    ///
    /// # Errors
    ///
    /// `Config` if `config` is invalid.
    pub fn new(
        topology: Topology,
        source: Arc<dyn TopologySource>,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Result<Self> {
        config.validate()?;
        let max_serial_version = config.serial_version()?;
        let node_state = Arc::new(RepNodeStateTable::seeded_from(&topology));
        Ok(Self {
            topology: TopologyHandle::new(topology),
            source,
            transport,
            node_state,
            messages: Arc::new(MessageCatalog::default()),
            limits: Limits::default(),
            config,
            max_serial_version,
            negotiated: RwLock::new(FxHashMap::default()),
            auth_token: RwLock::new(None),
            reauth: None,
        })
    }

    /// Use `messages` for runtime error messages
    pub fn with_messages(mut self, messages: Arc<MessageCatalog>) -> Self {
        self.messages = messages;
        self
    }

    /// Override client-side argument limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Share an existing node state table
    pub fn with_node_state(mut self, node_state: Arc<RepNodeStateTable>) -> Self {
        node_state.seed_masters(&self.topology.current());
        self.node_state = node_state;
        self
    }

    /// Install a re-authentication hook
    pub fn with_reauthenticate_handler(mut self, handler: Arc<dyn ReauthenticateHandler>) -> Self {
        self.reauth = Some(handler);
        self
    }

    /// Set the token presented with every request
    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write() = token;
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current topology snapshot
    pub fn topology(&self) -> Arc<Topology> {
        self.topology.current()
    }

    /// Liveness and load table used for node selection
    pub fn node_state(&self) -> &Arc<RepNodeStateTable> {
        &self.node_state
    }

    /// Message catalog
    pub fn messages(&self) -> &Arc<MessageCatalog> {
        &self.messages
    }

    /// Client-side argument limits
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Serial version agreed with `node`, if negotiated
    pub fn negotiated_version(&self, node: RepNodeId) -> Option<SerialVersion> {
        self.negotiated.read().get(&node).copied()
    }

    /// Router over the current snapshot
    pub fn router(&self) -> PartitionRouter {
        PartitionRouter::new(self.topology.current(), Arc::clone(&self.messages))
            .with_max_active_requests(self.config.request_limits.max_active_requests)
    }

    /// Fetch a topology from the source and install it if newer
    pub fn refresh_topology(&self) -> Result<bool> {
        let installed = self.topology.refresh_from(self.source.as_ref())?;
        if installed {
            self.node_state.seed_masters(&self.topology.current());
        }
        Ok(installed)
    }

    /// Dispatch an operation to the partition owning its routing key.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` when the operation has no routing key or fails
    /// validation, otherwise the fault of the final attempt.
    pub fn dispatch(
        &self,
        operation: &Operation,
        policy: RequestPolicy,
        timeout: Duration,
    ) -> Result<Dispatched> {
        validate_operation(operation, &self.limits, &self.messages)?;
        let key = operation.routing_key().ok_or_else(|| {
            Error::illegal_argument(format!(
                "{} must be sent to an explicit partition",
                operation.opcode().name()
            ))
        })?;
        self.run(Target::Key(key), operation, policy, timeout)
    }

    /// Dispatch an operation to an explicit partition
    pub fn dispatch_to(
        &self,
        partition: PartitionId,
        operation: &Operation,
        policy: RequestPolicy,
        timeout: Duration,
    ) -> Result<Dispatched> {
        validate_operation(operation, &self.limits, &self.messages)?;
        self.run(Target::Partition(partition), operation, policy, timeout)
    }

    fn run(
        &self,
        target: Target<'_>,
        operation: &Operation,
        policy: RequestPolicy,
        timeout: Duration,
    ) -> Result<Dispatched> {
        let deadline = Deadline::after(timeout);
        let mut excluded: Vec<RepNodeId> = Vec::new();
        let mut refreshes = 0;
        let mut reauthenticated = false;
        let mut attempts = 0;

        let outcome = with_retry(&self.config.retry, &deadline, |_| {
            attempts += 1;
            loop {
                match self.attempt(target, operation, policy, &deadline, &mut excluded) {
                    Err(e) if e.is_topology_stale()
                        && refreshes < MAX_TOPOLOGY_REFRESHES
                        && !deadline.is_expired() =>
                    {
                        refreshes += 1;
                        debug!(refresh = refreshes, error = %e, "Refreshing topology");
                        if !self.refresh_topology()? {
                            // Server ahead of the source; give it a moment
                            std::thread::sleep(
                                self.config.retry.retry_delay().min(deadline.remaining()),
                            );
                        }
                    }
                    Err(Error::AuthenticationRequired { message })
                        if !reauthenticated && self.reauth.is_some() =>
                    {
                        reauthenticated = true;
                        self.reauthenticate(&message)?;
                    }
                    other => return other,
                }
            }
        });

        match outcome {
            Ok(done) => Ok(Dispatched {
                result: done.value,
                attempts: done.attempts,
            }),
            Err(e) => Err(self.final_error(e, operation, &deadline, attempts)),
        }
    }

    fn attempt(
        &self,
        target: Target<'_>,
        operation: &Operation,
        policy: RequestPolicy,
        deadline: &Deadline,
        excluded: &mut Vec<RepNodeId>,
    ) -> Result<OperationResult> {
        if deadline.is_expired() {
            return Err(self.timed_out(operation, deadline));
        }

        let router = self.router();
        let partition = match target {
            Target::Key(key) => router.route(key),
            Target::Partition(p) => p,
        };
        let group = router.resolve(partition)?;
        let access = if operation.is_write() {
            Access::Write
        } else {
            Access::Read(policy.consistency)
        };

        let node = match router.select_node(group, access, self.node_state.as_ref(), excluded) {
            Ok(node) => node,
            Err(e) => {
                // Everyone failed once; let the next retry try them again
                if matches!(e, Error::NodeUnavailable { .. }) {
                    excluded.clear();
                }
                return Err(e);
            }
        };

        let topo_seq = router.topology().sequence_number();
        let request = Request {
            operation: operation.clone(),
            partition,
            topo_seq,
            timeout_ms: deadline.remaining().as_millis() as u64,
            consistency: policy.consistency,
            durability: policy.durability,
            auth_token: self.auth_token.read().clone(),
        };

        let started = Instant::now();
        let response = {
            let _active = self.node_state.begin_request(node);
            self.exchange(node, &request, deadline)
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.node_state.record_error(node);
                if matches!(e, Error::NodeUnavailable { .. }) {
                    excluded.push(node);
                }
                debug!(node = %node, partition = %partition, error = %e, "Send failed");
                return Err(e);
            }
        };

        self.node_state.record_success(node, started.elapsed());
        self.node_state.record_vlsn(node, response.node_vlsn);
        if response.topo_seq > topo_seq {
            debug!(
                local = topo_seq,
                remote = response.topo_seq,
                "Server reports newer topology"
            );
            if let Err(e) = self.refresh_topology() {
                warn!(error = %e, "Topology refresh failed");
            }
        }
        if response.result.is_err() {
            self.node_state.record_error(node);
        }
        response.result
    }

    /// Send at the negotiated version, renegotiating once if the server
    /// rejects it
    fn exchange(
        &self,
        node: RepNodeId,
        request: &Request,
        deadline: &Deadline,
    ) -> Result<Response> {
        let mut renegotiated = false;
        loop {
            let version = self.serial_version_for(node)?;
            let frame = encode_request(request, version)?;
            match self.transport.send(node, frame, deadline.remaining()) {
                Ok(reply) => {
                    let (response, _) = decode_response(&reply)?;
                    return Ok(response);
                }
                Err(Error::UnsupportedOperation { .. }) if !renegotiated => {
                    debug!(node = %node, version = %version, "Renegotiating serial version");
                    self.negotiated.write().remove(&node);
                    renegotiated = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn serial_version_for(&self, node: RepNodeId) -> Result<SerialVersion> {
        if let Some(v) = self.negotiated.read().get(&node) {
            return Ok(*v);
        }
        let server_max = self.transport.server_serial_version(node)?;
        let agreed = SerialVersion::negotiate(self.max_serial_version, server_max)?;
        debug!(node = %node, version = %agreed, "Negotiated serial version");
        self.negotiated.write().insert(node, agreed);
        Ok(agreed)
    }

    fn reauthenticate(&self, reason: &str) -> Result<()> {
        if let Some(handler) = &self.reauth {
            info!(reason = reason, "Re-authenticating");
            let token = handler.reauthenticate()?;
            self.set_auth_token(token);
        }
        Ok(())
    }

    fn timed_out(&self, operation: &Operation, deadline: &Deadline) -> Error {
        Error::RequestTimeout {
            timeout_ms: deadline.timeout().as_millis() as u64,
            message: self.messages.format(
                MessageId::RequestTimedOut,
                &[&deadline.elapsed().as_millis(), &operation.opcode().name()],
            ),
        }
    }

    fn final_error(
        &self,
        error: Error,
        operation: &Operation,
        deadline: &Deadline,
        attempts: usize,
    ) -> Error {
        let error = match error {
            Error::NodeUnavailable { .. } | Error::RequestLimitExceeded { .. }
                if deadline.is_expired() =>
            {
                self.timed_out(operation, deadline)
            }
            other => other,
        };
        if error.is_retryable() && attempts > 1 {
            warn!(
                op = operation.opcode().name(),
                "{}",
                self.messages
                    .format(MessageId::RetriesExhausted, &[&attempts, &error])
            );
        }
        error
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("topology_sequence", &self.topology.sequence_number())
            .field("max_serial_version", &self.max_serial_version)
            .field("reauth", &self.reauth.is_some())
            .finish()
    }
}
