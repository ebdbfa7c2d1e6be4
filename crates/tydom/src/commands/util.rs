//! Shared helpers for command handlers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use tydom_core::{Tydom, TydomCommand, TydomDevice, TydomMessage, TydomScenario};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Per-request timeout from `--timeout`.
pub fn request_timeout(global: &GlobalOpts) -> Duration {
    Duration::from_secs(global.timeout)
}

/// JSON view of a message, for `watch` and `send`.
pub fn message_json(message: &TydomMessage) -> Value {
    match message {
        TydomMessage::GatewayInfo {
            info,
            transaction_id,
        } => json!({"kind": "gateway_info", "transaction_id": transaction_id, "info": info}),
        TydomMessage::Devices {
            devices,
            transaction_id,
        } => json!({"kind": "devices", "transaction_id": transaction_id, "devices": devices}),
        TydomMessage::Scenarios {
            scenarios,
            transaction_id,
        } => json!({"kind": "scenarios", "transaction_id": transaction_id, "scenarios": scenarios}),
        TydomMessage::Groups {
            groups,
            transaction_id,
        } => json!({"kind": "groups", "transaction_id": transaction_id, "groups": groups}),
        TydomMessage::Moments {
            moments,
            transaction_id,
        } => json!({"kind": "moments", "transaction_id": transaction_id, "moments": moments}),
        TydomMessage::Areas {
            areas,
            transaction_id,
        } => json!({"kind": "areas", "transaction_id": transaction_id, "areas": areas}),
        TydomMessage::Raw(raw) => {
            let body = raw
                .body()
                .map(|body| String::from_utf8_lossy(body).into_owned());
            json!({
                "kind": "raw",
                "transaction_id": raw.transaction_id,
                "uri": raw.uri_origin,
                "parse_error": raw.parse_error,
                "body": body,
            })
        }
    }
}

fn unexpected(expected: &str, message: &TydomMessage) -> CliError {
    CliError::UnexpectedReply {
        expected: expected.into(),
        actual: message.kind().into(),
    }
}

/// Load the configuration file first so devices come back with names.
pub async fn load_devices(tydom: &Tydom, timeout: Duration) -> Result<Vec<TydomDevice>, CliError> {
    tydom.request(TydomCommand::configs_file(), timeout).await?;
    let message = tydom.request(TydomCommand::devices_data(), timeout).await?;
    match message.as_ref() {
        TydomMessage::Devices { devices, .. } => {
            let mut devices = devices.clone();
            devices.sort_by(|a, b| (a.id, a.endpoint_id).cmp(&(b.id, b.endpoint_id)));
            Ok(devices)
        }
        // Every endpoint unknown to the configuration file.
        TydomMessage::Raw(_) => Ok(Vec::new()),
        other => Err(unexpected("devices", other)),
    }
}

pub async fn load_scenarios(
    tydom: &Tydom,
    timeout: Duration,
) -> Result<Vec<TydomScenario>, CliError> {
    tydom.request(TydomCommand::configs_file(), timeout).await?;
    let message: Arc<TydomMessage> = tydom.request(TydomCommand::scenarios_file(), timeout).await?;
    match message.as_ref() {
        TydomMessage::Scenarios { scenarios, .. } => Ok(scenarios.clone()),
        other => Err(unexpected("scenarios", other)),
    }
}

/// Find an endpoint by unique id or (case-insensitive) name.
pub fn resolve_device<'a>(
    devices: &'a [TydomDevice],
    identifier: &str,
) -> Result<&'a TydomDevice, CliError> {
    devices
        .iter()
        .find(|d| d.unique_id == identifier)
        .or_else(|| {
            devices
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(identifier))
        })
        .ok_or_else(|| CliError::NotFound {
            resource_type: "device".into(),
            identifier: identifier.into(),
            list_command: "devices list".into(),
        })
}

/// Find a scenario by id or (case-insensitive) name.
pub fn resolve_scenario<'a>(
    scenarios: &'a [TydomScenario],
    identifier: &str,
) -> Result<&'a TydomScenario, CliError> {
    let by_id = identifier.parse::<i64>().ok();
    scenarios
        .iter()
        .find(|s| Some(s.id) == by_id)
        .or_else(|| {
            scenarios
                .iter()
                .find(|s| s.name.eq_ignore_ascii_case(identifier))
        })
        .ok_or_else(|| CliError::NotFound {
            resource_type: "scenario".into(),
            identifier: identifier.into(),
            list_command: "scenarios list".into(),
        })
}

/// Parse a CLI value as JSON, falling back to a plain string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// Compact one-line rendering of a reading for tables.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".into(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tydom_core::{DeviceKind, UpdateSource};

    fn device(id: i64, endpoint_id: i64, name: &str) -> TydomDevice {
        TydomDevice {
            id,
            endpoint_id,
            unique_id: tydom_core::unique_id(id, endpoint_id),
            name: name.into(),
            usage: "shutter".into(),
            kind: DeviceKind::Shutter,
            data: Default::default(),
            metadata: None,
            cdata_entries: Vec::new(),
            source: UpdateSource::Data,
        }
    }

    #[test]
    fn devices_resolve_by_unique_id_then_name() {
        let devices = [device(1, 2, "Living Room"), device(3, 4, "Kitchen")];
        assert_eq!(resolve_device(&devices, "4_3").unwrap().name, "Kitchen");
        assert_eq!(resolve_device(&devices, "living room").unwrap().unique_id, "2_1");
        assert!(matches!(
            resolve_device(&devices, "Attic"),
            Err(CliError::NotFound { .. })
        ));
    }

    #[test]
    fn values_parse_as_json_when_possible() {
        assert_eq!(parse_value("100"), json!(100));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("ON"), json!("ON"));
    }
}
