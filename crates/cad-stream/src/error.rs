//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error types for query parsing and client registry operations."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use crate::session::ClientId;

/// Reasons an inbound frame could not be read as a subscription query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The frame text is not JSON at all.
    #[error("query is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// Valid JSON that does not match `{ "action": string, "streams": string[] }`.
    #[error("query has the wrong shape: {0}")]
    WrongShape(#[source] serde_json::Error),
    /// Binary frames never carry queries.
    #[error("binary frames are not accepted as queries")]
    NonText,
}

/// Failures of client registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("client {0} is not connected")]
    UnknownClient(ClientId),
    /// The keep-alive already fired; the timer cannot be rearmed.
    #[error("keep-alive for client {0} has already expired")]
    KeepAliveExpired(ClientId),
}
