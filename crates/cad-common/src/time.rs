//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the simulator runtime."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use chrono::Utc;

/// Milliseconds since the Unix epoch, as stamped on outbound payloads.
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}
