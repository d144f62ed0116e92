//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Timer-driven advancement of the simulated device."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use cad_common::schedule::{spawn_periodic, PeriodicTask};
use tracing::trace;

use crate::device::SharedDevice;

/// Append one reading to `device` every `period` until the returned task is shut down.
///
/// `period` is independent of the logical reading interval used for window
/// arithmetic.
pub fn spawn_device_ticker(device: SharedDevice, period: Duration) -> PeriodicTask {
    spawn_periodic("device-tick", period, move || {
        let mut guard = device.write();
        let reading = guard.append_tick();
        trace!(reading, readings = guard.len(), "device tick");
    })
}
