//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the simulator runtime."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the CAD simulator workspace.
//! This crate exposes configuration loading, tracing setup, periodic task
//! scheduling and wall-clock helpers consumed by the device and stream crates.

pub mod config;
pub mod logging;
pub mod schedule;
pub mod time;

pub use config::{
    AppConfig, BrokerConfig, DeviceConfig, LoadedAppConfig, LoggingConfig, ServerConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use schedule::{spawn_periodic, PeriodicTask, RateLimiter};
pub use time::epoch_millis;
