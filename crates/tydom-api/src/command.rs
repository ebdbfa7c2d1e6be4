// Outbound gateway commands
//
// The gateway accepts plain HTTP/1.1 request text inside WebSocket binary
// frames. Every request carries a `Transac-Id` that the gateway echoes on
// its response(s), which is how replies are correlated with commands.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;
use serde_json::json;

// ── Transaction ids ──────────────────────────────────────────────────

static TRANSACTION_COUNTER: OnceLock<AtomicU64> = OnceLock::new();

/// Next transaction id: millisecond wall-clock seed, strictly increasing
/// within the process so two commands never share an id.
pub fn next_transaction_id() -> String {
    let counter = TRANSACTION_COUNTER.get_or_init(|| {
        let seed = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
        AtomicU64::new(seed)
    });
    counter.fetch_add(1, Ordering::Relaxed).to_string()
}

// ── Method ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── TydomCommand ────────────────────────────────────────────────────

/// A single request to the gateway.
///
/// Values, not handles: commands can be cloned, queued, and replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TydomCommand {
    pub method: Method,
    pub path: String,
    pub body: Option<String>,
    pub transaction_id: String,
}

impl TydomCommand {
    pub fn new(method: Method, path: impl Into<String>, body: Option<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
            transaction_id: next_transaction_id(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path, None)
    }

    /// Override the generated transaction id (tests, replays).
    pub fn with_transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = id.into();
        self
    }

    // ── Catalogue ────────────────────────────────────────────────────

    pub fn info() -> Self {
        Self::get("/info")
    }

    pub fn ping() -> Self {
        Self::get("/ping")
    }

    pub fn configs_file() -> Self {
        Self::get("/configs/file")
    }

    pub fn devices_meta() -> Self {
        Self::get("/devices/meta")
    }

    pub fn devices_cmeta() -> Self {
        Self::get("/devices/cmeta")
    }

    pub fn devices_data() -> Self {
        Self::get("/devices/data")
    }

    pub fn areas_meta() -> Self {
        Self::get("/areas/meta")
    }

    pub fn areas_cmeta() -> Self {
        Self::get("/areas/cmeta")
    }

    pub fn areas_data() -> Self {
        Self::get("/areas/data")
    }

    pub fn scenarios_file() -> Self {
        Self::get("/scenarios/file")
    }

    pub fn groups_file() -> Self {
        Self::get("/groups/file")
    }

    pub fn moments_file() -> Self {
        Self::get("/moments/file")
    }

    pub fn refresh_all() -> Self {
        Self::new(Method::Post, "/refresh/all", None)
    }

    /// Read one endpoint's data (used by post-command polling).
    pub fn device_data(device_id: i64, endpoint_id: i64) -> Self {
        Self::get(device_data_path(device_id, endpoint_id))
    }

    /// Write a single named value to a device endpoint.
    pub fn put_device_data(
        device_id: i64,
        endpoint_id: i64,
        name: &str,
        value: serde_json::Value,
    ) -> Self {
        let body = json!([{ "name": name, "value": value }]).to_string();
        Self::new(Method::Put, device_data_path(device_id, endpoint_id), Some(body))
    }

    /// Send an alarm command (`ON`, `OFF`, `PANIC`, `ACK`...). Replies
    /// arrive as cdata chunks terminated by an `EOR` entry.
    pub fn alarm(
        device_id: i64,
        endpoint_id: i64,
        value: &str,
        pin: Option<&str>,
        zones: Option<&[u32]>,
    ) -> Self {
        let mut body = json!({ "value": value });
        if let Some(pin) = pin {
            body["pwd"] = json!(pin);
        }
        if let Some(zones) = zones {
            body["zones"] = json!(zones);
        }
        Self::new(
            Method::Put,
            format!("/devices/{device_id}/endpoints/{endpoint_id}/cdata?name=alarmCmd"),
            Some(body.to_string()),
        )
    }

    pub fn activate_scenario(scenario_id: i64) -> Self {
        Self::new(Method::Put, format!("/scenarios/{scenario_id}"), None)
    }

    // ── Wire format ──────────────────────────────────────────────────

    /// Render the HTTP request text sent over the socket.
    pub fn to_request_string(&self) -> String {
        let content_length = self.body.as_ref().map_or(0, String::len);
        let mut out = format!(
            "{} {} HTTP/1.1\r\nContent-Length: {content_length}\r\nContent-Type: application/json; charset=UTF-8\r\nTransac-Id: {}\r\n\r\n",
            self.method, self.path, self.transaction_id
        );
        if let Some(ref body) = self.body {
            out.push_str(body);
            out.push_str("\r\n\r\n");
        }
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_request_string().into_bytes()
    }

    /// If this is a `PUT /devices/{d}/endpoints/{e}/data`, the target ids.
    pub fn device_data_target(&self) -> Option<(i64, i64)> {
        if self.method != Method::Put {
            return None;
        }
        parse_device_data_path(&self.path)
    }
}

impl fmt::Display for TydomCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.method, self.path, self.transaction_id)
    }
}

fn device_data_path(device_id: i64, endpoint_id: i64) -> String {
    format!("/devices/{device_id}/endpoints/{endpoint_id}/data")
}

/// Parse `/devices/{d}/endpoints/{e}/data` (query ignored).
pub fn parse_device_data_path(path: &str) -> Option<(i64, i64)> {
    let path = path.split('?').next().unwrap_or(path);
    let mut segments = path.trim_start_matches('/').split('/');
    match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some("devices"), Some(d), Some("endpoints"), Some(e), Some("data"), None) => {
            Some((d.parse().ok()?, e.parse().ok()?))
        }
        _ => None,
    }
}
