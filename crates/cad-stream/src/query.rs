//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Client subscription query decoding."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Subscription request sent by a client.
///
/// `action` is carried for logging only; every well-formed query subscribes
/// the listed streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub action: String,
    pub streams: Vec<String>,
}

impl Query {
    /// The query malformed input degrades to: no action, no streams.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Decode `raw` into a [`Query`], distinguishing non-JSON from mis-shaped JSON.
pub fn parse_query(raw: &str) -> Result<Query, QueryError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(QueryError::InvalidJson)?;
    serde_json::from_value(value).map_err(QueryError::WrongShape)
}
