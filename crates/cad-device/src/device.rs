//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Power reading simulation and windowed aggregation."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use cad_common::config::DeviceConfig;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::history::{ReadingHistory, Watts};
use crate::random::{RandomSource, RngSource};

/// Logical spacing between readings used by all window arithmetic.
pub const READING_INTERVAL: Duration = Duration::from_secs(10);
/// Readings per minute at [`READING_INTERVAL`].
pub const READINGS_PER_MINUTE: usize = 6;
/// Readings per cost block (30 minutes at [`READING_INTERVAL`]).
pub const COST_BLOCK_READINGS: usize = 30 * READINGS_PER_MINUTE;

/// Device handle shared between the tick loop and stream queries.
pub type SharedDevice = Arc<RwLock<TelemetryDevice>>;

/// Tunables of the random walk and the tariff.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceParameters {
    pub min_watts: u32,
    pub max_watts: u32,
    pub variance_watts: u32,
    pub change_rate: f64,
    pub cost_per_kwh: f64,
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self::from(&DeviceConfig::default())
    }
}

impl From<&DeviceConfig> for DeviceParameters {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            min_watts: config.min_watts,
            max_watts: config.max_watts,
            variance_watts: config.variance_watts,
            change_rate: config.change_rate,
            cost_per_kwh: config.cost_per_kwh,
        }
    }
}

/// Simulated metering device producing a continuously growing reading history.
pub struct TelemetryDevice {
    params: DeviceParameters,
    current: Watts,
    history: ReadingHistory,
    rng: Box<dyn RandomSource>,
}

impl std::fmt::Debug for TelemetryDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryDevice")
            .field("params", &self.params)
            .field("current", &self.current)
            .field("readings", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl TelemetryDevice {
    /// Build a device and seed `initial_readings` synthetic readings.
    pub fn new(
        params: DeviceParameters,
        initial_readings: usize,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        let mut device = Self {
            params,
            current: 0,
            history: ReadingHistory::with_capacity(initial_readings),
            rng,
        };
        device.current = device.random_start_point();
        for _ in 0..initial_readings {
            let reading = device.generate_next();
            device.history.push(reading);
        }
        debug!(
            baseline = device.current,
            readings = device.history.len(),
            "device history seeded"
        );
        device
    }

    /// Build a device from configuration, seeded from `config.seed` when present.
    pub fn from_config(config: &DeviceConfig) -> Self {
        let rng: Box<dyn RandomSource> = match config.seed {
            Some(seed) => Box::new(RngSource::seeded(seed)),
            None => Box::new(RngSource::from_entropy()),
        };
        let device = Self::new(DeviceParameters::from(config), config.initial_readings, rng);
        info!(
            readings = device.len(),
            seeded = config.seed.is_some(),
            min_watts = config.min_watts,
            max_watts = config.max_watts,
            "telemetry device ready"
        );
        device
    }

    pub fn into_shared(self) -> SharedDevice {
        Arc::new(RwLock::new(self))
    }

    /// Produce the next reading from the random walk.
    ///
    /// The baseline reset is decided after the returned value is computed, so
    /// a jump only affects subsequent readings.
    pub fn generate_next(&mut self) -> Watts {
        let noise = (self.rng.next_unit() * f64::from(self.params.variance_watts)).round();
        let reading = self.current.saturating_add(noise as Watts);
        if self.rng.next_unit() < self.params.change_rate {
            self.current = self.random_start_point();
        }
        reading
    }

    /// Append one freshly generated reading to the history.
    pub fn append_tick(&mut self) -> Watts {
        let reading = self.generate_next();
        self.history.push(reading);
        reading
    }

    /// The most recent `minutes * 6` readings, oldest first.
    pub fn window(&self, minutes: u32) -> &[Watts] {
        let count = (minutes as usize).saturating_mul(READINGS_PER_MINUTE);
        self.history.tail(count)
    }

    /// Average cost of every 30-minute block across the whole history.
    ///
    /// The trailing partial block is averaged over its actual length. An
    /// empty history yields no blocks.
    pub fn cost_windows(&self) -> Vec<f64> {
        let half_hour_rate = self.params.cost_per_kwh / 2.0;
        self.history
            .blocks(COST_BLOCK_READINGS)
            .map(|block| {
                let total: u64 = block.iter().map(|&w| u64::from(w)).sum();
                let mean = total as f64 / block.len() as f64;
                mean * half_hour_rate
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn history(&self) -> &ReadingHistory {
        &self.history
    }

    /// Baseline the next reading will drift from.
    pub fn current_baseline(&self) -> Watts {
        self.current
    }

    pub fn parameters(&self) -> &DeviceParameters {
        &self.params
    }

    fn random_start_point(&mut self) -> Watts {
        let span = f64::from(self.params.max_watts.saturating_sub(self.params.min_watts));
        self.params.min_watts + (self.rng.next_unit() * span).round() as Watts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SequenceSource;

    fn scripted(values: &[f64], initial: usize) -> TelemetryDevice {
        TelemetryDevice::new(
            DeviceParameters::default(),
            initial,
            Box::new(SequenceSource::new(values.to_vec())),
        )
    }

    /// Device whose history is exactly `values`, bypassing the random walk.
    fn with_history(values: &[Watts]) -> TelemetryDevice {
        let mut device = scripted(&[0.0], 0);
        for value in values {
            device.history.push(*value);
        }
        device
    }

    #[test]
    fn start_point_spans_configured_range() {
        // 50 + round(0.5 * 950)
        assert_eq!(scripted(&[0.5], 0).current_baseline(), 525);
        assert_eq!(scripted(&[0.0], 0).current_baseline(), 50);
        assert_eq!(scripted(&[0.9999999], 0).current_baseline(), 1000);
    }

    #[test]
    fn generate_next_drifts_then_resets_baseline() {
        // start, noise, reset check (hit), new start, noise, reset check (miss)
        let mut device = scripted(&[0.5, 0.9, 0.25, 0.1, 0.0, 0.3], 0);
        assert_eq!(device.generate_next(), 543);
        assert_eq!(device.current_baseline(), 145);
        assert_eq!(device.generate_next(), 145);
        assert_eq!(device.current_baseline(), 145);
    }

    #[test]
    fn reset_does_not_touch_returned_reading() {
        let mut device = scripted(&[0.0, 0.5, 0.0, 1.0 - f64::EPSILON], 0);
        // baseline 50, noise round(0.5 * 20) = 10, reset to ~1000
        assert_eq!(device.generate_next(), 60);
        assert_eq!(device.current_baseline(), 1000);
    }

    #[test]
    fn seeding_fills_history() {
        let device = scripted(&[0.5, 0.5, 0.9], 8640);
        assert_eq!(device.len(), 8640);
        assert!(device
            .history()
            .as_slice()
            .iter()
            .all(|&w| (50..=1020).contains(&w)));
    }

    #[test]
    fn append_tick_grows_history_by_one() {
        let mut device = scripted(&[0.5, 0.5, 0.9], 3);
        let reading = device.append_tick();
        assert_eq!(device.len(), 4);
        assert_eq!(device.history().as_slice().last(), Some(&reading));
    }

    #[test]
    fn window_returns_chronological_suffix() {
        let values: Vec<Watts> = (1..=100).collect();
        let device = with_history(&values);
        assert_eq!(device.window(5), &values[70..]);
        assert_eq!(device.window(0).len(), 0);
        assert_eq!(device.window(60), values.as_slice());
    }

    #[test]
    fn window_length_is_bounded_by_history() {
        let device = scripted(&[0.3, 0.7, 0.1], 500);
        for minutes in [0u32, 1, 5, 60, 83, 84, 1000] {
            let expected = (minutes as usize * READINGS_PER_MINUTE).min(500);
            let window = device.window(minutes);
            assert_eq!(window.len(), expected, "minutes = {minutes}");
            assert!(device.history().as_slice().ends_with(window));
        }
    }

    #[test]
    fn cost_windows_cover_whole_blocks() {
        let device = with_history(&vec![100; COST_BLOCK_READINGS * 3]);
        assert_eq!(device.cost_windows().len(), 3);
    }

    #[test]
    fn cost_windows_average_partial_tail_over_its_size() {
        let mut values = vec![200; COST_BLOCK_READINGS * 2];
        values.extend([100, 300, 500]);
        let device = with_history(&values);
        let costs = device.cost_windows();
        assert_eq!(costs.len(), 3);
        assert_eq!(costs[2], 300.0 * (0.12 / 2.0));
    }

    #[test]
    fn identical_block_costs_value_times_half_rate() {
        let device = with_history(&vec![437; COST_BLOCK_READINGS]);
        assert_eq!(device.cost_windows(), vec![437.0 * (0.12 / 2.0)]);
    }

    #[test]
    fn empty_history_has_no_cost_windows() {
        let device = scripted(&[0.5], 0);
        assert!(device.is_empty());
        assert!(device.cost_windows().is_empty());
        assert!(device.window(60).is_empty());
    }

    #[test]
    fn from_config_honours_seed() {
        let config = DeviceConfig {
            initial_readings: 64,
            seed: Some(7),
            ..DeviceConfig::default()
        };
        let a = TelemetryDevice::from_config(&config);
        let b = TelemetryDevice::from_config(&config);
        assert_eq!(a.history().as_slice(), b.history().as_slice());
        assert_eq!(a.current_baseline(), b.current_baseline());
    }
}
