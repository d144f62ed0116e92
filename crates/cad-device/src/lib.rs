//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated device module exports and shared types."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Simulated consumer access device for the CAD simulator.
//!
//! The device owns an append-only history of power readings, evolves it with a
//! bounded random walk and answers windowed and cost-aggregated queries. It has
//! no knowledge of networking.

pub mod device;
pub mod history;
pub mod random;
pub mod ticker;

pub use device::{
    DeviceParameters, SharedDevice, TelemetryDevice, COST_BLOCK_READINGS, READINGS_PER_MINUTE,
    READING_INTERVAL,
};
pub use history::{ReadingHistory, Watts};
pub use random::{RandomSource, RngSource, SequenceSource};
pub use ticker::spawn_device_ticker;
