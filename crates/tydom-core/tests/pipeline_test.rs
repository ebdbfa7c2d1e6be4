#![allow(clippy::unwrap_used)]
// Decode and hydrate real gateway frames against the in-memory caches.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use serde_json::json;

use tydom_api::TydomRawMessage;
use tydom_core::{
    CdataReplyChunk, DeviceKind, DeviceMetadataCache, DeviceMetadataStore, HydratedMessage, Hydrator,
    NoSuppression, ScenarioMetadataCache, SuppressionQuery, TydomMessage, TydomMessageEffect, decode,
};

fn response(uri: &str, transaction_id: &str, body: &str) -> TydomRawMessage {
    let frame = format!(
        "HTTP/1.1 200 OK\r\nUri-Origin: {uri}\r\nTransac-Id: {transaction_id}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    TydomRawMessage::new(Bytes::from(frame))
}

fn push(path: &str, body: &str) -> TydomRawMessage {
    let frame = format!(
        "PUT {path} HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    TydomRawMessage::new(Bytes::from(frame))
}

struct Pipeline {
    devices: Arc<DeviceMetadataCache>,
    hydrator: Hydrator,
}

impl Pipeline {
    fn new(suppression: Arc<dyn SuppressionQuery>) -> Self {
        let devices = Arc::new(DeviceMetadataCache::new());
        let hydrator = Hydrator::new(
            devices.clone(),
            Arc::new(ScenarioMetadataCache::new()),
            suppression,
        );
        Self { devices, hydrator }
    }

    fn feed(&self, raw: &TydomRawMessage) -> HydratedMessage {
        self.hydrator.hydrate(decode(raw))
    }
}

const CONFIG: &str = r#"{
    "endpoints": [
        {"id_endpoint": 2, "id_device": 1, "name": "Living Room", "last_usage": "shutter"},
        {"id_endpoint": 5, "id_device": 4, "name": "Alarm panel", "last_usage": "alarm"},
        {"id_endpoint": 9, "id_device": 8, "name": "Meter", "last_usage": "conso"}
    ],
    "scenarios": [{"id": 3, "name": "Night", "type": "NORMAL", "picto": "moon"}]
}"#;

#[test]
fn test_configured_shutter_update_becomes_device_message() {
    let pipeline = Pipeline::new(Arc::new(NoSuppression));
    pipeline.feed(&response("/configs/file", "1", CONFIG));
    assert_eq!(
        pipeline.devices.lookup("5_4").unwrap().name.as_deref(),
        Some("Tyxal Alarm")
    );

    let body = r#"[{"id":1,"endpoints":[{"id":2,"error":0,"data":[{"name":"level","value":50,"validity":"upToDate"}]}]}]"#;
    let hydrated = pipeline.feed(&response("/devices/data", "2", body));

    let TydomMessage::Devices {
        devices,
        transaction_id,
    } = hydrated.message
    else {
        panic!("expected devices");
    };
    assert_eq!(transaction_id.as_deref(), Some("2"));
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].unique_id, "2_1");
    assert_eq!(devices[0].usage, "shutter");
    assert_eq!(devices[0].kind, DeviceKind::Shutter);
    assert_eq!(devices[0].data["level"], json!(50));
}

#[test]
fn test_unknown_endpoint_degrades_to_raw() {
    let pipeline = Pipeline::new(Arc::new(NoSuppression));
    let body = r#"[{"id":77,"endpoints":[{"id":1,"error":0,"data":[{"name":"level","value":1,"validity":"upToDate"}]}]}]"#;
    let hydrated = pipeline.feed(&response("/devices/data", "9", body));

    assert!(matches!(hydrated.message, TydomMessage::Raw(_)));
    assert_eq!(hydrated.message.transaction_id(), Some("9"));
}

struct SuppressAll;

impl SuppressionQuery for SuppressAll {
    fn is_suppressed(&self, _unique_id: &str) -> bool {
        true
    }
}

#[test]
fn test_suppressed_broadcast_is_dropped_but_direct_reads_pass() {
    let pipeline = Pipeline::new(Arc::new(SuppressAll));
    pipeline.feed(&response("/configs/file", "1", CONFIG));

    let broadcast = r#"[{"id":1,"endpoints":[{"id":2,"error":0,"data":[{"name":"level","value":20,"validity":"upToDate"}]}]}]"#;
    let hydrated = pipeline.feed(&push("/devices/data", broadcast));
    assert!(matches!(hydrated.message, TydomMessage::Raw(_)));

    let direct = r#"{"id":2,"error":0,"data":[{"name":"level","value":30,"validity":"upToDate"}]}"#;
    let hydrated = pipeline.feed(&response("/devices/1/endpoints/2/data", "3", direct));
    let TydomMessage::Devices { devices, .. } = hydrated.message else {
        panic!("expected devices");
    };
    assert_eq!(devices[0].data["level"], json!(30));
}

#[test]
fn test_alarm_acknowledgement_becomes_reply_chunk() {
    let pipeline = Pipeline::new(Arc::new(NoSuppression));
    pipeline.feed(&response("/configs/file", "1", CONFIG));

    let body = r#"[{"id":4,"endpoints":[{"id":5,"error":0,"cdata":[{"name":"alarmCmd","values":{"EOR":true}}]}]}]"#;
    let hydrated = pipeline.feed(&response(
        "/devices/4/endpoints/5/cdata?name=alarmCmd",
        "42",
        body,
    ));

    assert!(matches!(hydrated.message, TydomMessage::Raw(_)));
    let chunks: Vec<&CdataReplyChunk> = hydrated
        .effects
        .iter()
        .filter_map(|effect| match effect {
            TydomMessageEffect::CdataReplyChunk(chunk) => Some(chunk),
            _ => None,
        })
        .collect();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].transaction_id, "42");
    assert!(chunks[0].done);
}

#[test]
fn test_cmeta_schedules_energy_polls() {
    let pipeline = Pipeline::new(Arc::new(NoSuppression));
    let body = r#"[{"id":1,"endpoints":[{"id":2,"error":0,"cmetadata":[
        {"name":"energyIndex","permission":"r","parameters":[
            {"name":"dest","type":"string","enum_values":["ELEC","GAS"]}
        ]}
    ]}]}]"#;
    let hydrated = pipeline.feed(&response("/devices/cmeta", "5", body));

    assert_eq!(
        hydrated.effects,
        vec![TydomMessageEffect::SchedulePoll {
            urls: vec![
                "/devices/1/endpoints/2/cdata?name=energyIndex&dest=ELEC&reset=false".to_owned(),
                "/devices/1/endpoints/2/cdata?name=energyIndex&dest=GAS&reset=false".to_owned(),
            ],
            interval: Duration::from_secs(60),
        }]
    );
    let meter = pipeline.devices.lookup("2_1").unwrap();
    assert_eq!(meter.usage.as_deref(), Some("conso"));
    assert_eq!(meter.name.as_deref(), Some("Tywatt"));
}

#[test]
fn test_decoding_is_repeatable() {
    let raw = response("/devices/cmeta", "5", r#"[{"id":1,"endpoints":[]}]"#);
    assert_eq!(decode(&raw), decode(&raw));
}

#[test]
fn test_malformed_frame_passes_through() {
    let pipeline = Pipeline::new(Arc::new(NoSuppression));
    let raw = TydomRawMessage::new(Bytes::from_static(b"garbage without separator"));
    let hydrated = pipeline.feed(&raw);

    let TydomMessage::Raw(raw) = hydrated.message else {
        panic!("expected raw passthrough");
    };
    assert!(raw.parse_error.is_some());
    assert!(hydrated.effects.is_empty());
}
