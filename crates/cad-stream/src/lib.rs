//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry stream broker and WebSocket surface."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Streams simulated device telemetry to subscribed WebSocket clients.
//!
//! [`StreamBroker`] owns the client registry: subscriptions, keep-alive timers
//! and the periodic push. [`websocket`] adapts it to axum WebSocket
//! connections.

pub mod broker;
pub mod error;
pub mod payload;
pub mod query;
pub mod session;
pub mod websocket;

pub use broker::{spawn_broadcaster, BroadcastReport, StreamBroker};
pub use error::{BrokerError, QueryError};
pub use payload::{resolve_stream, MessageType, PayloadBody, StreamKind, StreamPayload, StreamReadings};
pub use query::{parse_query, Query};
pub use session::{ClientHandle, ClientId, ConnectionState, Termination};
pub use websocket::{WebSocketServerBuilder, WebSocketServerHandle};
