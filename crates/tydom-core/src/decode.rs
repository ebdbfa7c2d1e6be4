// ── Message decoder ──
//
// Pure function from one raw inbound frame to a decoded envelope. The
// decoder never looks at a cache and never allocates transaction ids, so
// decoding the same bytes twice yields equal envelopes.
//
// Dispatch is on the frame's `Uri-Origin` (responses) or request path
// (gateway-initiated pushes such as `PUT /devices/data`).

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use tydom_api::TydomRawMessage;

use crate::message::{
    CacheMutation, DecodedPayload, DeviceData, DeviceMetadataMutation, ScenarioMetadata,
    ScenarioPayload, TydomArea, TydomDecodedEnvelope, TydomDeviceUpdate, TydomMessageEffect,
    UpdateSource, unique_id,
};

/// Interval of the polls derived from a capability listing.
pub const CMETA_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Display name forced onto alarm endpoints.
pub const ALARM_DISPLAY_NAME: &str = "Tyxal Alarm";

/// Usage and name given to endpoints that expose energy counters.
pub const ENERGY_USAGE: &str = "conso";
pub const ENERGY_DISPLAY_NAME: &str = "Tywatt";

/// Decode one inbound frame.
pub fn decode(raw: &TydomRawMessage) -> TydomDecodedEnvelope {
    let mut envelope = TydomDecodedEnvelope::empty(raw.clone());

    if let Some(ref error) = raw.parse_error {
        debug!(error = %error, "unparseable frame, passing through");
        return envelope;
    }
    let Some(uri) = raw.uri_origin.as_deref() else {
        return envelope;
    };
    let path = uri.split('?').next().unwrap_or(uri);

    // Bodiless resources first: these matter even with an empty body.
    match path {
        "/ping" => {
            envelope.effects.push(TydomMessageEffect::PongReceived);
            return envelope;
        }
        "/events" => {
            envelope.effects.push(TydomMessageEffect::RefreshAll);
            return envelope;
        }
        "/refresh/all" => {
            envelope.payload = DecodedPayload::Echo;
            return envelope;
        }
        _ => {}
    }

    let Some(json) = raw.body().and_then(|body| parse_json(body, uri)) else {
        return envelope;
    };

    match path {
        "/info" => {
            if json.is_object() {
                envelope.payload = DecodedPayload::GatewayInfo(json);
            }
        }
        "/configs/file" => decode_configs_file(&json, &mut envelope),
        "/devices/meta" => decode_devices_meta(&json, &mut envelope),
        "/devices/cmeta" => decode_cmeta(&json, CmetaScope::Devices, &mut envelope),
        "/areas/cmeta" => decode_cmeta(&json, CmetaScope::Areas, &mut envelope),
        "/groups/file" => envelope.payload = DecodedPayload::Groups(array_field(&json, "groups")),
        "/moments/file" => {
            envelope.payload = DecodedPayload::Moments(array_field(&json, "moments"));
        }
        "/scenarios/file" => envelope.payload = DecodedPayload::Scenarios(decode_scenarios(&json)),
        "/areas/data" => envelope.payload = DecodedPayload::Areas(decode_areas(json)),
        _ if path.contains("/cdata") => {
            envelope.payload = DecodedPayload::DeviceUpdates(decode_cdata(&json, path));
        }
        _ if path.contains("/devices/") && path.contains("/data") => {
            envelope.payload = DecodedPayload::DeviceUpdates(decode_device_data(&json, path));
        }
        _ => trace!(uri, "no decoder for resource"),
    }

    envelope
}

fn parse_json(body: &[u8], uri: &str) -> Option<Value> {
    match serde_json::from_slice(body) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(uri, error = %e, "body is not JSON");
            None
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn array_field(json: &Value, key: &str) -> Vec<Value> {
    json.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn int_field(json: &Value, key: &str) -> Option<i64> {
    json.get(key).and_then(Value::as_i64)
}

fn str_field(json: &Value, key: &str) -> Option<String> {
    json.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Absent or zero `error` field.
fn endpoint_ok(endpoint: &Value) -> bool {
    endpoint.get("error").and_then(Value::as_i64).unwrap_or(0) == 0
}

/// Iterate `(device_id, endpoint)` over a `[{id, endpoints: [...]}]` body.
/// A single device object is accepted in place of the array.
fn device_endpoints(json: &Value) -> Vec<(i64, &Value)> {
    let devices: Vec<&Value> = match json {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![json],
        _ => Vec::new(),
    };

    devices
        .into_iter()
        .filter_map(|device| {
            let id = int_field(device, "id")?;
            let endpoints = device.get("endpoints")?.as_array()?;
            Some(endpoints.iter().map(move |ep| (id, ep)))
        })
        .flatten()
        .collect()
}

// ── /configs/file ────────────────────────────────────────────────────

fn decode_configs_file(json: &Value, envelope: &mut TydomDecodedEnvelope) {
    for endpoint in json.get("endpoints").and_then(Value::as_array).into_iter().flatten() {
        let (Some(endpoint_id), Some(device_id)) =
            (int_field(endpoint, "id_endpoint"), int_field(endpoint, "id_device"))
        else {
            continue;
        };

        let usage = str_field(endpoint, "last_usage").or_else(|| str_field(endpoint, "first_usage"));
        let name = if usage.as_deref() == Some("alarm") {
            Some(ALARM_DISPLAY_NAME.to_owned())
        } else {
            str_field(endpoint, "name")
        };

        envelope
            .cache_mutations
            .push(CacheMutation::Device(DeviceMetadataMutation {
                unique_id: unique_id(device_id, endpoint_id),
                device_id,
                endpoint_id,
                name,
                usage,
                metadata: None,
            }));
    }

    for scenario in json.get("scenarios").and_then(Value::as_array).into_iter().flatten() {
        let Some(id) = int_field(scenario, "id") else {
            continue;
        };
        envelope
            .cache_mutations
            .push(CacheMutation::Scenario(ScenarioMetadata {
                id,
                name: str_field(scenario, "name"),
                scenario_type: str_field(scenario, "type"),
                picto: str_field(scenario, "picto"),
                rule_id: scenario.get("rule_id").and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                }),
            }));
    }

    let groups = array_field(json, "groups");
    if !groups.is_empty() {
        envelope.payload = DecodedPayload::GroupMetadata(groups);
    }
}

// ── /devices/meta ────────────────────────────────────────────────────

fn decode_devices_meta(json: &Value, envelope: &mut TydomDecodedEnvelope) {
    for (device_id, endpoint) in device_endpoints(json) {
        let (Some(endpoint_id), Some(metadata)) =
            (int_field(endpoint, "id"), endpoint.get("metadata"))
        else {
            continue;
        };
        if !endpoint_ok(endpoint) || !metadata.is_array() {
            continue;
        }

        envelope
            .cache_mutations
            .push(CacheMutation::Device(DeviceMetadataMutation {
                unique_id: unique_id(device_id, endpoint_id),
                device_id,
                endpoint_id,
                name: None,
                usage: None,
                metadata: Some(metadata.clone()),
            }));
    }
}

// ── /devices/cmeta and /areas/cmeta ──────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum CmetaScope {
    Devices,
    Areas,
}

/// Energy counters and the parameter each one is enumerated over.
fn counter_parameter(name: &str) -> Option<&'static str> {
    match name {
        "energyIndex" | "energyHisto" => Some("dest"),
        "energyInstant" => Some("unit"),
        "energyDistrib" => Some("src"),
        _ => None,
    }
}

/// Query suffix for one enumerated counter value.
fn counter_query(name: &str, value: &str) -> String {
    match name {
        "energyIndex" => format!("&dest={value}&reset=false"),
        "energyInstant" => format!("&unit={value}&reset=false"),
        "energyHisto" => format!("&dest={value}&period=YEAR"),
        "energyDistrib" => format!("&period=YEAR&periodOffset=0&src={value}"),
        _ => String::new(),
    }
}

fn enum_values<'a>(entry: &'a Value, parameter: &str) -> Vec<&'a str> {
    entry
        .get("parameters")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|p| p.get("name").and_then(Value::as_str) == Some(parameter))
        .filter_map(|p| p.get("enum_values").and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .collect()
}

/// Poll URLs for the counters listed in one `cmetadata` array.
fn counter_urls(base: &str, cmetadata: &[Value]) -> (Vec<String>, bool) {
    let mut urls = Vec::new();
    let mut has_counter = false;

    for entry in cmetadata {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        let Some(parameter) = counter_parameter(name) else {
            continue;
        };
        has_counter = true;
        for value in enum_values(entry, parameter) {
            urls.push(format!("{base}/cdata?name={name}{}", counter_query(name, value)));
        }
    }

    (urls, has_counter)
}

fn decode_cmeta(json: &Value, scope: CmetaScope, envelope: &mut TydomDecodedEnvelope) {
    let mut urls = Vec::new();

    match scope {
        CmetaScope::Devices => {
            for (device_id, endpoint) in device_endpoints(json) {
                let Some(endpoint_id) = int_field(endpoint, "id") else {
                    continue;
                };
                if !endpoint_ok(endpoint) {
                    continue;
                }
                let Some(cmetadata) = endpoint.get("cmetadata").and_then(Value::as_array) else {
                    continue;
                };

                let base = format!("/devices/{device_id}/endpoints/{endpoint_id}");
                let (endpoint_urls, has_counter) = counter_urls(&base, cmetadata);
                if has_counter {
                    envelope
                        .cache_mutations
                        .push(CacheMutation::Device(DeviceMetadataMutation {
                            unique_id: unique_id(device_id, endpoint_id),
                            device_id,
                            endpoint_id,
                            name: Some(ENERGY_DISPLAY_NAME.to_owned()),
                            usage: Some(ENERGY_USAGE.to_owned()),
                            metadata: None,
                        }));
                }
                urls.extend(endpoint_urls);
            }
        }
        CmetaScope::Areas => {
            let areas: Vec<&Value> = match json {
                Value::Array(items) => items.iter().collect(),
                Value::Object(_) => vec![json],
                _ => Vec::new(),
            };
            for area in areas {
                let Some(area_id) = int_field(area, "id") else {
                    continue;
                };
                let Some(cmetadata) = area.get("cmetadata").and_then(Value::as_array) else {
                    continue;
                };
                let (area_urls, _) = counter_urls(&format!("/areas/{area_id}"), cmetadata);
                urls.extend(area_urls);
            }
        }
    }

    if !urls.is_empty() {
        envelope.effects.push(TydomMessageEffect::SchedulePoll {
            urls,
            interval: CMETA_POLL_INTERVAL,
        });
    }
}

// ── Device data ──────────────────────────────────────────────────────

fn up_to_date_values(entries: &[Value]) -> DeviceData {
    entries
        .iter()
        .filter(|entry| entry.get("validity").and_then(Value::as_str) == Some("upToDate"))
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?;
            Some((name.to_owned(), entry.get("value").cloned().unwrap_or(Value::Null)))
        })
        .collect()
}

fn decode_device_data(json: &Value, path: &str) -> Vec<TydomDeviceUpdate> {
    // A single-endpoint read answers with the bare endpoint object.
    if json.get("data").is_some() {
        let Some((device_id, endpoint_id)) = tydom_api::command::parse_device_data_path(path)
        else {
            return Vec::new();
        };
        return data_update(device_id, endpoint_id, json).into_iter().collect();
    }

    device_endpoints(json)
        .into_iter()
        .filter_map(|(device_id, endpoint)| {
            data_update(device_id, int_field(endpoint, "id")?, endpoint)
        })
        .collect()
}

fn data_update(device_id: i64, endpoint_id: i64, endpoint: &Value) -> Option<TydomDeviceUpdate> {
    if !endpoint_ok(endpoint) {
        return None;
    }
    let entries = endpoint.get("data")?.as_array()?;
    Some(TydomDeviceUpdate {
        id: device_id,
        endpoint_id,
        unique_id: unique_id(device_id, endpoint_id),
        data: up_to_date_values(entries),
        metadata: None,
        cdata_entries: Vec::new(),
        source: UpdateSource::Data,
    })
}

// ── cdata ────────────────────────────────────────────────────────────

/// Keys like `ELEC`, `GAS`, `TOTAL_1`: at least one letter, no lowercase.
fn is_all_caps(key: &str) -> bool {
    key.chars().any(|c| c.is_ascii_uppercase())
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn cdata_values(entries: &[Value]) -> DeviceData {
    let mut data = DeviceData::new();

    for entry in entries {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        let parameters = entry.get("parameters").and_then(Value::as_object);
        let values = entry.get("values").and_then(Value::as_object);
        let (Some(parameters), Some(values)) = (parameters, values) else {
            continue;
        };

        if let (Some(dest), Some(counter)) = (
            parameters.get("dest").and_then(Value::as_str),
            values.get("counter"),
        ) {
            data.insert(format!("{name}_{dest}"), counter.clone());
        }

        if parameters.contains_key("period") {
            spread_caps(name, values, &mut data);
        }
    }

    data
}

fn spread_caps(name: &str, values: &Map<String, Value>, data: &mut DeviceData) {
    for (key, value) in values.iter().filter(|(key, _)| is_all_caps(key)) {
        data.insert(format!("{name}_{key}"), value.clone());
    }
}

fn decode_cdata(json: &Value, path: &str) -> Vec<TydomDeviceUpdate> {
    let mut updates: Vec<TydomDeviceUpdate> = device_endpoints(json)
        .into_iter()
        .filter_map(|(device_id, endpoint)| {
            let endpoint_id = int_field(endpoint, "id")?;
            cdata_update(device_id, endpoint_id, endpoint)
        })
        .collect();

    // Bare endpoint object answering `GET /devices/{d}/endpoints/{e}/cdata`.
    if updates.is_empty() && json.get("cdata").is_some() {
        if let Some((device_id, endpoint_id)) = parse_cdata_path(path) {
            updates.extend(cdata_update(device_id, endpoint_id, json));
        }
    }

    updates
}

fn cdata_update(device_id: i64, endpoint_id: i64, endpoint: &Value) -> Option<TydomDeviceUpdate> {
    if !endpoint_ok(endpoint) {
        return None;
    }
    let entries = endpoint.get("cdata")?.as_array()?;
    Some(TydomDeviceUpdate {
        id: device_id,
        endpoint_id,
        unique_id: unique_id(device_id, endpoint_id),
        data: cdata_values(entries),
        metadata: None,
        cdata_entries: entries.clone(),
        source: UpdateSource::Cdata,
    })
}

fn parse_cdata_path(path: &str) -> Option<(i64, i64)> {
    let rest = path.strip_prefix("/devices/")?;
    let (device, rest) = rest.split_once("/endpoints/")?;
    let endpoint = rest.strip_suffix("/cdata")?;
    Some((device.parse().ok()?, endpoint.parse().ok()?))
}

// ── Files ────────────────────────────────────────────────────────────

fn decode_scenarios(json: &Value) -> Vec<ScenarioPayload> {
    json.get("scn")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|scenario| {
            Some(ScenarioPayload {
                id: int_field(scenario, "id")?,
                raw: scenario.clone(),
            })
        })
        .collect()
}

fn decode_areas(json: Value) -> Vec<TydomArea> {
    let items = match json {
        Value::Array(items) => items,
        other @ Value::Object(_) => vec![other],
        _ => Vec::new(),
    };
    items
        .into_iter()
        .map(|raw| TydomArea {
            id: int_field(&raw, "id"),
            raw,
        })
        .collect()
}
