//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-client connection state held by the stream broker."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use indexmap::IndexSet;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Identifier assigned to each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Lifecycle of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no well-formed query yet.
    Connected,
    /// At least one well-formed query received.
    Active,
    /// Keep-alive fired; the notice has been issued and the close is pending.
    TimedOut,
    /// Terminal; no state remains for the client.
    Closed,
}

impl ConnectionState {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Active)
    }
}

/// Why the broker asked the transport to end a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Send `notice` as a final text frame, then close.
    KeepAliveExpired { notice: String },
    /// Close without a notice.
    ServerShutdown,
}

/// Transport-facing end of a registered client.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    /// Serialised outbound text frames, in push order.
    pub outbound: mpsc::Receiver<String>,
    /// Fires once when the broker ends the connection.
    pub termination: oneshot::Receiver<Termination>,
}

pub(crate) struct ClientSession {
    pub(crate) state: ConnectionState,
    pub(crate) subscriptions: IndexSet<String>,
    pub(crate) outbound: mpsc::Sender<String>,
    termination: Option<oneshot::Sender<Termination>>,
    keep_alive: Option<JoinHandle<()>>,
    /// Bumped on every re-arm; a firing timer only acts on a matching value.
    pub(crate) generation: u64,
}

impl ClientSession {
    pub(crate) fn new(
        outbound: mpsc::Sender<String>,
        termination: oneshot::Sender<Termination>,
    ) -> Self {
        Self {
            state: ConnectionState::Connected,
            subscriptions: IndexSet::new(),
            outbound,
            termination: Some(termination),
            keep_alive: None,
            generation: 0,
        }
    }

    /// Replace the keep-alive task, cancelling the previous one.
    pub(crate) fn replace_keep_alive(&mut self, timer: JoinHandle<()>) {
        self.cancel_keep_alive();
        self.keep_alive = Some(timer);
    }

    pub(crate) fn cancel_keep_alive(&mut self) {
        if let Some(timer) = self.keep_alive.take() {
            timer.abort();
        }
    }

    /// Deliver `reason` to the transport; later calls are ignored.
    pub(crate) fn terminate(&mut self, reason: Termination) {
        if let Some(tx) = self.termination.take() {
            let _ = tx.send(reason);
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.cancel_keep_alive();
    }
}
