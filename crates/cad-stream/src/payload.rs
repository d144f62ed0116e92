//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Stream name resolution and outbound update payloads."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use cad_device::{TelemetryDevice, Watts};
use serde::{Deserialize, Serialize};

const ACTIVE_POWER_HISTORY: &str = "activePower.history";
const ACTIVE_POWER: &str = "activePower";
const CURRENT_COSTS: &str = "currentCostsSmets2";

/// Device view selected by a stream name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Last hour of active power.
    ActivePowerHistory,
    /// Last five minutes of active power.
    ActivePowerLive,
    /// Half-hourly cost across the whole history.
    CurrentCosts,
    /// Unrecognised name; resolves to an empty reading list.
    Unknown,
}

impl StreamKind {
    /// Classify by substring containment, first match wins.
    pub fn classify(name: &str) -> Self {
        if name.contains(ACTIVE_POWER_HISTORY) {
            StreamKind::ActivePowerHistory
        } else if name.contains(ACTIVE_POWER) {
            StreamKind::ActivePowerLive
        } else if name.contains(CURRENT_COSTS) {
            StreamKind::CurrentCosts
        } else {
            StreamKind::Unknown
        }
    }

    /// Window length in minutes for power streams.
    pub fn window_minutes(&self) -> Option<u32> {
        match self {
            StreamKind::ActivePowerHistory => Some(60),
            StreamKind::ActivePowerLive => Some(5),
            StreamKind::CurrentCosts | StreamKind::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Update,
}

/// Readings carried by an update: whole watts or currency amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamReadings {
    Power(Vec<Watts>),
    Cost(Vec<f64>),
}

impl StreamReadings {
    pub fn len(&self) -> usize {
        match self {
            StreamReadings::Power(values) => values.len(),
            StreamReadings::Cost(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadBody {
    /// Epoch milliseconds when the snapshot was taken.
    pub last_updated: i64,
    pub readings: StreamReadings,
}

/// Snapshot pushed to a client for one subscribed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamPayload {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub stream: String,
    pub payload: PayloadBody,
}

/// Build a fresh payload for `name` from the current device state.
pub fn resolve_stream(name: &str, device: &TelemetryDevice, last_updated: i64) -> StreamPayload {
    let kind = StreamKind::classify(name);
    let readings = match kind {
        StreamKind::ActivePowerHistory | StreamKind::ActivePowerLive => {
            let minutes = kind.window_minutes().unwrap_or_default();
            StreamReadings::Power(device.window(minutes).to_vec())
        }
        StreamKind::CurrentCosts => StreamReadings::Cost(device.cost_windows()),
        StreamKind::Unknown => StreamReadings::Power(Vec::new()),
    };
    StreamPayload {
        message_type: MessageType::Update,
        stream: name.to_owned(),
        payload: PayloadBody {
            last_updated,
            readings,
        },
    }
}
