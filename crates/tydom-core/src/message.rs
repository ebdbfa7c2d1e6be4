// ── Message model ──
//
// Types flowing through the inbound pipeline:
//
//   TydomRawMessage ─decode─▶ TydomDecodedEnvelope ─hydrate─▶ TydomMessage
//                                      │                           + effects
//                                      └─ cache mutations
//
// Decoded values are plain data: they can be compared, cloned, and
// replayed. Only the hydrator touches the metadata caches.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};

use tydom_api::{TydomCommand, TydomRawMessage};

/// Name → value map of one endpoint's readings.
pub type DeviceData = BTreeMap<String, Value>;

/// `"{endpoint_id}_{device_id}"`, the key every cache and suppression
/// check uses.
pub fn unique_id(device_id: i64, endpoint_id: i64) -> String {
    format!("{endpoint_id}_{device_id}")
}

// ── Device updates ───────────────────────────────────────────────────

/// Which resource an update was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UpdateSource {
    Data,
    Cdata,
}

/// One endpoint's worth of readings from a single inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TydomDeviceUpdate {
    pub id: i64,
    pub endpoint_id: i64,
    pub unique_id: String,
    pub data: DeviceData,
    pub metadata: Option<Value>,
    /// Raw cdata entries, kept for command replies that carry no numbers.
    pub cdata_entries: Vec<Value>,
    pub source: UpdateSource,
}

// ── Cache mutations ──────────────────────────────────────────────────

/// Partial update of one device's cached metadata. `None` fields are left
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceMetadataMutation {
    pub unique_id: String,
    pub device_id: i64,
    pub endpoint_id: i64,
    pub name: Option<String>,
    pub usage: Option<String>,
    pub metadata: Option<Value>,
}

/// Scenario attributes from the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioMetadata {
    pub id: i64,
    pub name: Option<String>,
    pub scenario_type: Option<String>,
    pub picto: Option<String>,
    pub rule_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CacheMutation {
    Device(DeviceMetadataMutation),
    Scenario(ScenarioMetadata),
}

// ── Effects ──────────────────────────────────────────────────────────

/// A piece of a multi-frame command reply (alarm acknowledgements).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CdataReplyChunk {
    pub transaction_id: String,
    pub entries: Vec<Value>,
    /// Set when an entry carried `EOR: true`.
    pub done: bool,
}

/// Side effect requested by decoding or hydration. Executed in order by
/// the effect executor, never inline in the read path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TydomMessageEffect {
    SendCommands(Vec<TydomCommand>),
    SchedulePoll { urls: Vec<String>, interval: Duration },
    RefreshAll,
    PongReceived,
    CdataReplyChunk(CdataReplyChunk),
}

// ── Decoded envelope ─────────────────────────────────────────────────

/// A scenario as listed by `/scenarios/file`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioPayload {
    pub id: i64,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TydomArea {
    pub id: Option<i64>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DecodedPayload {
    GatewayInfo(Value),
    DeviceUpdates(Vec<TydomDeviceUpdate>),
    Scenarios(Vec<ScenarioPayload>),
    /// Group definitions from the configuration file.
    GroupMetadata(Vec<Value>),
    Groups(Vec<Value>),
    Moments(Vec<Value>),
    Areas(Vec<TydomArea>),
    /// The gateway's answer to `/refresh/all`.
    Echo,
    None,
}

/// Decoder output, consumed exactly once by the hydrator.
#[derive(Debug, Clone, PartialEq)]
pub struct TydomDecodedEnvelope {
    pub raw: TydomRawMessage,
    pub payload: DecodedPayload,
    pub cache_mutations: Vec<CacheMutation>,
    pub effects: Vec<TydomMessageEffect>,
}

impl TydomDecodedEnvelope {
    pub fn empty(raw: TydomRawMessage) -> Self {
        Self {
            raw,
            payload: DecodedPayload::None,
            cache_mutations: Vec::new(),
            effects: Vec::new(),
        }
    }
}

// ── Public output ────────────────────────────────────────────────────

/// Coarse device family derived from the gateway's `usage` string.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceKind {
    Shutter,
    Window,
    Door,
    GarageDoor,
    Gate,
    Light,
    Climate,
    Energy,
    Alarm,
    Smoke,
    Weather,
    Other,
}

impl DeviceKind {
    pub fn from_usage(usage: &str) -> Self {
        match usage {
            "shutter" | "klineShutter" | "awning" | "swingShutter" => Self::Shutter,
            "window" | "windowFrench" | "windowSliding" | "klineWindowFrench"
            | "klineWindowSliding" => Self::Window,
            "belmDoor" | "klineDoor" | "door" => Self::Door,
            "garage_door" | "garageDoor" => Self::GarageDoor,
            "gate" => Self::Gate,
            "light" | "plug" => Self::Light,
            "boiler" | "sh_hvac" | "electric" | "aeraulic" | "hvac" | "thermo" => Self::Climate,
            "conso" => Self::Energy,
            "alarm" => Self::Alarm,
            "sensorDFR" | "smoke" => Self::Smoke,
            "weather" => Self::Weather,
            _ => Self::Other,
        }
    }
}

/// A device endpoint with its cached identity and latest readings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TydomDevice {
    pub id: i64,
    pub endpoint_id: i64,
    pub unique_id: String,
    pub name: String,
    pub usage: String,
    pub kind: DeviceKind,
    pub data: DeviceData,
    pub metadata: Option<Value>,
    pub cdata_entries: Vec<Value>,
    pub source: UpdateSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TydomScenario {
    pub id: i64,
    pub name: String,
    pub scenario_type: String,
    pub picto: String,
    pub rule_id: Option<String>,
    pub raw: Value,
}

/// What consumers receive for every inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TydomMessage {
    GatewayInfo {
        info: Value,
        transaction_id: Option<String>,
    },
    Devices {
        devices: Vec<TydomDevice>,
        transaction_id: Option<String>,
    },
    Scenarios {
        scenarios: Vec<TydomScenario>,
        transaction_id: Option<String>,
    },
    Groups {
        groups: Vec<Value>,
        transaction_id: Option<String>,
    },
    Moments {
        moments: Vec<Value>,
        transaction_id: Option<String>,
    },
    Areas {
        areas: Vec<TydomArea>,
        transaction_id: Option<String>,
    },
    /// Anything not understood, or understood but fully filtered out.
    Raw(TydomRawMessage),
}

impl TydomMessage {
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Self::GatewayInfo { transaction_id, .. }
            | Self::Devices { transaction_id, .. }
            | Self::Scenarios { transaction_id, .. }
            | Self::Groups { transaction_id, .. }
            | Self::Moments { transaction_id, .. }
            | Self::Areas { transaction_id, .. } => transaction_id.as_deref(),
            Self::Raw(raw) => raw.transaction_id.as_deref(),
        }
    }

    /// Short label for logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GatewayInfo { .. } => "gateway_info",
            Self::Devices { .. } => "devices",
            Self::Scenarios { .. } => "scenarios",
            Self::Groups { .. } => "groups",
            Self::Moments { .. } => "moments",
            Self::Areas { .. } => "areas",
            Self::Raw(_) => "raw",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn unique_id_is_endpoint_first() {
        assert_eq!(unique_id(1, 2), "2_1");
    }

    #[test]
    fn usage_classification() {
        assert_eq!(DeviceKind::from_usage("klineShutter"), DeviceKind::Shutter);
        assert_eq!(DeviceKind::from_usage("garage_door"), DeviceKind::GarageDoor);
        assert_eq!(DeviceKind::from_usage("conso"), DeviceKind::Energy);
        assert_eq!(DeviceKind::from_usage("sensorDFR"), DeviceKind::Smoke);
        assert_eq!(DeviceKind::from_usage("mystery"), DeviceKind::Other);
    }

    #[test]
    fn kind_names_parse_back() {
        for kind in DeviceKind::iter() {
            assert_eq!(kind.as_ref().parse::<DeviceKind>().ok(), Some(kind));
        }
    }
}
