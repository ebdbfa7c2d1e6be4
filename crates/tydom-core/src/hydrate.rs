// ── Message hydrator ──
//
// Turns a decoded envelope into the message consumers see. Applies the
// envelope's cache mutations first, then joins device updates against the
// metadata cache. Updates for unknown endpoints are dropped, as are
// broadcast echoes of devices currently under post-command polling.

use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::cache::{DeviceMetadataStore, ScenarioMetadataStore, SuppressionQuery};
use crate::decode::ENERGY_USAGE;
use crate::message::{
    CacheMutation, CdataReplyChunk, DecodedPayload, DeviceKind, ScenarioPayload, TydomDecodedEnvelope,
    TydomDevice, TydomDeviceUpdate, TydomMessage, TydomMessageEffect, TydomScenario, UpdateSource,
};

/// URI of the unsolicited device-state broadcast.
const BROADCAST_DATA_URI: &str = "/devices/data";

/// Hydration result: the message plus every effect to enqueue, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct HydratedMessage {
    pub message: TydomMessage,
    pub effects: Vec<TydomMessageEffect>,
}

pub struct Hydrator {
    devices: Arc<dyn DeviceMetadataStore>,
    scenarios: Arc<dyn ScenarioMetadataStore>,
    suppression: Arc<dyn SuppressionQuery>,
}

impl Hydrator {
    pub fn new(
        devices: Arc<dyn DeviceMetadataStore>,
        scenarios: Arc<dyn ScenarioMetadataStore>,
        suppression: Arc<dyn SuppressionQuery>,
    ) -> Self {
        Self {
            devices,
            scenarios,
            suppression,
        }
    }

    pub fn hydrate(&self, envelope: TydomDecodedEnvelope) -> HydratedMessage {
        let TydomDecodedEnvelope {
            raw,
            payload,
            cache_mutations,
            mut effects,
        } = envelope;

        for mutation in &cache_mutations {
            match mutation {
                CacheMutation::Device(m) => self.devices.upsert(m),
                CacheMutation::Scenario(m) => self.scenarios.upsert(m),
            }
        }

        let transaction_id = raw.transaction_id.clone();
        let message = match payload {
            DecodedPayload::GatewayInfo(info) => TydomMessage::GatewayInfo {
                info,
                transaction_id,
            },
            DecodedPayload::DeviceUpdates(updates) => {
                let is_broadcast = raw.uri_origin.as_deref() == Some(BROADCAST_DATA_URI);
                let devices = self.hydrate_devices(
                    updates,
                    is_broadcast,
                    transaction_id.as_deref(),
                    &mut effects,
                );
                if devices.is_empty() {
                    TydomMessage::Raw(raw)
                } else {
                    TydomMessage::Devices {
                        devices,
                        transaction_id,
                    }
                }
            }
            DecodedPayload::Scenarios(payloads) => TydomMessage::Scenarios {
                scenarios: payloads.into_iter().map(|p| self.hydrate_scenario(p)).collect(),
                transaction_id,
            },
            DecodedPayload::GroupMetadata(groups) | DecodedPayload::Groups(groups) => {
                TydomMessage::Groups {
                    groups,
                    transaction_id,
                }
            }
            DecodedPayload::Moments(moments) => TydomMessage::Moments {
                moments,
                transaction_id,
            },
            DecodedPayload::Areas(areas) => TydomMessage::Areas {
                areas,
                transaction_id,
            },
            DecodedPayload::Echo | DecodedPayload::None => TydomMessage::Raw(raw),
        };

        HydratedMessage { message, effects }
    }

    fn hydrate_devices(
        &self,
        updates: Vec<TydomDeviceUpdate>,
        is_broadcast: bool,
        transaction_id: Option<&str>,
        effects: &mut Vec<TydomMessageEffect>,
    ) -> Vec<TydomDevice> {
        let mut devices = Vec::with_capacity(updates.len());

        for update in updates {
            if is_broadcast
                && update.source == UpdateSource::Data
                && self.suppression.is_suppressed(&update.unique_id)
            {
                trace!(unique_id = %update.unique_id, "suppressed during post-command polling");
                continue;
            }

            let Some(cached) = self.devices.lookup(&update.unique_id) else {
                trace!(unique_id = %update.unique_id, "no metadata, dropping update");
                continue;
            };
            let Some((name, usage)) = cached.identity() else {
                trace!(unique_id = %update.unique_id, "incomplete metadata, dropping update");
                continue;
            };

            if update.source == UpdateSource::Cdata {
                if usage == "alarm" {
                    if let (Some(tx), false) = (transaction_id, update.cdata_entries.is_empty()) {
                        effects.push(TydomMessageEffect::CdataReplyChunk(CdataReplyChunk {
                            transaction_id: tx.to_owned(),
                            done: update.cdata_entries.iter().any(is_end_of_reply),
                            entries: update.cdata_entries,
                        }));
                    }
                    continue;
                }
                if usage != ENERGY_USAGE || update.data.is_empty() {
                    continue;
                }
            }

            devices.push(TydomDevice {
                id: update.id,
                endpoint_id: update.endpoint_id,
                unique_id: update.unique_id,
                name: name.to_owned(),
                usage: usage.to_owned(),
                kind: DeviceKind::from_usage(usage),
                data: update.data,
                metadata: update.metadata.or_else(|| cached.metadata.clone()),
                cdata_entries: update.cdata_entries,
                source: update.source,
            });
        }

        devices
    }

    fn hydrate_scenario(&self, payload: ScenarioPayload) -> TydomScenario {
        let cached = self.scenarios.lookup(payload.id);
        let embedded = |key: &str| payload.raw.get(key).and_then(Value::as_str).map(str::to_owned);

        let name = cached
            .as_ref()
            .and_then(|m| m.name.clone())
            .or_else(|| embedded("name"))
            .unwrap_or_else(|| format!("Scenario {}", payload.id));
        let scenario_type = cached
            .as_ref()
            .and_then(|m| m.scenario_type.clone())
            .or_else(|| embedded("type"))
            .unwrap_or_else(|| "NORMAL".to_owned());
        let picto = cached
            .as_ref()
            .and_then(|m| m.picto.clone())
            .or_else(|| embedded("picto"))
            .unwrap_or_default();
        let rule_id = cached
            .as_ref()
            .and_then(|m| m.rule_id.clone())
            .or_else(|| embedded("rule_id"));

        TydomScenario {
            id: payload.id,
            name,
            scenario_type,
            picto,
            rule_id,
            raw: payload.raw,
        }
    }
}

/// `EOR: true` either on the entry or inside its values.
fn is_end_of_reply(entry: &Value) -> bool {
    let flag = |v: &Value| v.get("EOR").and_then(Value::as_bool).unwrap_or(false);
    flag(entry) || entry.get("values").is_some_and(flag)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use dashmap::DashSet;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use tydom_api::TydomRawMessage;

    use crate::cache::{DeviceMetadataCache, NoSuppression, ScenarioMetadataCache};
    use crate::decode::decode;
    use crate::message::{DeviceMetadataMutation, ScenarioMetadata};

    #[derive(Default)]
    struct Suppressed(DashSet<String>);

    impl SuppressionQuery for Suppressed {
        fn is_suppressed(&self, unique_id: &str) -> bool {
            self.0.contains(unique_id)
        }
    }

    fn cache_with(entries: &[(i64, i64, &str, &str)]) -> Arc<DeviceMetadataCache> {
        let cache = Arc::new(DeviceMetadataCache::new());
        for &(device_id, endpoint_id, name, usage) in entries {
            cache.upsert(&DeviceMetadataMutation {
                unique_id: crate::message::unique_id(device_id, endpoint_id),
                device_id,
                endpoint_id,
                name: Some(name.into()),
                usage: Some(usage.into()),
                metadata: None,
            });
        }
        cache
    }

    fn hydrator(devices: Arc<DeviceMetadataCache>, suppression: Arc<dyn SuppressionQuery>) -> Hydrator {
        Hydrator::new(devices, Arc::new(ScenarioMetadataCache::new()), suppression)
    }

    fn frame(start: &str, headers: &str, body: &str) -> TydomRawMessage {
        TydomRawMessage::new(Bytes::from(format!(
            "{start}\r\n{headers}Content-Length: {}\r\n\r\n{body}",
            body.len()
        )))
    }

    const LEVEL_BODY: &str = r#"[{"id":1,"endpoints":[{"id":2,"error":0,"data":[{"name":"level","value":50,"validity":"upToDate"}]}]}]"#;

    #[test]
    fn broadcast_data_is_joined_with_metadata() {
        let hydrator = hydrator(cache_with(&[(1, 2, "Living Room", "shutter")]), Arc::new(NoSuppression));
        let raw = frame("PUT /devices/data HTTP/1.1", "", LEVEL_BODY);

        let hydrated = hydrator.hydrate(decode(&raw));
        let TydomMessage::Devices { ref devices, .. } = hydrated.message else {
            panic!("expected devices, got {:?}", hydrated.message);
        };
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].unique_id, "2_1");
        assert_eq!(devices[0].name, "Living Room");
        assert_eq!(devices[0].usage, "shutter");
        assert_eq!(devices[0].kind, DeviceKind::Shutter);
        assert_eq!(devices[0].data["level"], json!(50));
    }

    #[test]
    fn unknown_devices_degrade_to_raw() {
        let hydrator = hydrator(cache_with(&[]), Arc::new(NoSuppression));
        let raw = frame(
            "HTTP/1.1 200 OK",
            "Uri-Origin: /devices/data\r\nTransac-Id: 55\r\n",
            LEVEL_BODY,
        );
        let hydrated = hydrator.hydrate(decode(&raw));
        assert!(matches!(hydrated.message, TydomMessage::Raw(_)));
        assert_eq!(hydrated.message.transaction_id(), Some("55"));
    }

    #[test]
    fn suppression_only_applies_to_broadcast() {
        let suppressed = Arc::new(Suppressed::default());
        suppressed.0.insert("2_1".into());
        let hydrator = hydrator(cache_with(&[(1, 2, "Living Room", "shutter")]), suppressed);

        let broadcast = frame("PUT /devices/data HTTP/1.1", "", LEVEL_BODY);
        assert!(matches!(hydrator.hydrate(decode(&broadcast)).message, TydomMessage::Raw(_)));

        let polled = frame(
            "HTTP/1.1 200 OK",
            "Uri-Origin: /devices/1/endpoints/2/data\r\n",
            LEVEL_BODY,
        );
        assert!(matches!(
            hydrator.hydrate(decode(&polled)).message,
            TydomMessage::Devices { .. }
        ));
    }

    #[test]
    fn alarm_reply_becomes_reply_chunk() {
        let hydrator = hydrator(cache_with(&[(4, 5, "Tyxal Alarm", "alarm")]), Arc::new(NoSuppression));
        let body = r#"[{"id":4,"endpoints":[{"id":5,"error":0,"cdata":[
            {"name":"alarmCmd","parameters":{"value":"ON"},"values":{"EOR":true}}
        ]}]}]"#;
        let raw = frame(
            "HTTP/1.1 200 OK",
            "Uri-Origin: /devices/4/endpoints/5/cdata?name=alarmCmd\r\nTransac-Id: 777\r\n",
            body,
        );

        let hydrated = hydrator.hydrate(decode(&raw));
        assert!(matches!(hydrated.message, TydomMessage::Raw(_)));
        assert_eq!(hydrated.effects.len(), 1);
        let TydomMessageEffect::CdataReplyChunk(ref chunk) = hydrated.effects[0] else {
            panic!("expected a reply chunk");
        };
        assert_eq!(chunk.transaction_id, "777");
        assert!(chunk.done);
        assert_eq!(chunk.entries.len(), 1);
    }

    #[test]
    fn alarm_chunk_without_eor_is_not_done() {
        let hydrator = hydrator(cache_with(&[(4, 5, "Tyxal Alarm", "alarm")]), Arc::new(NoSuppression));
        let body = r#"[{"id":4,"endpoints":[{"id":5,"cdata":[{"name":"histo","values":{"step":1}}]}]}]"#;
        let raw = frame(
            "HTTP/1.1 200 OK",
            "Uri-Origin: /devices/4/endpoints/5/cdata\r\nTransac-Id: 8\r\n",
            body,
        );
        let hydrated = hydrator.hydrate(decode(&raw));
        assert!(matches!(
            hydrated.effects.as_slice(),
            [TydomMessageEffect::CdataReplyChunk(CdataReplyChunk { done: false, .. })]
        ));
    }

    #[test]
    fn cdata_only_surfaces_energy_devices() {
        let hydrator = hydrator(
            cache_with(&[(1, 2, "Tywatt", "conso"), (3, 4, "Shutter", "shutter")]),
            Arc::new(NoSuppression),
        );
        let body = r#"[
            {"id":1,"endpoints":[{"id":2,"cdata":[{"name":"energyIndex","parameters":{"dest":"ELEC"},"values":{"counter":10}}]}]},
            {"id":3,"endpoints":[{"id":4,"cdata":[{"name":"energyIndex","parameters":{"dest":"ELEC"},"values":{"counter":11}}]}]}
        ]"#;
        let raw = frame("HTTP/1.1 200 OK", "Uri-Origin: /devices/cdata\r\n", body);
        let TydomMessage::Devices { devices, .. } = hydrator.hydrate(decode(&raw)).message else {
            panic!("expected devices");
        };
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].kind, DeviceKind::Energy);
        assert_eq!(devices[0].data["energyIndex_ELEC"], json!(10));
    }

    #[test]
    fn configs_file_then_data_in_sequence() {
        let cache = Arc::new(DeviceMetadataCache::new());
        let hydrator = hydrator(Arc::clone(&cache), Arc::new(NoSuppression));

        let config = frame(
            "HTTP/1.1 200 OK",
            "Uri-Origin: /configs/file\r\n",
            r#"{"endpoints":[{"id_endpoint":2,"id_device":1,"name":"Salon","last_usage":"light"}]}"#,
        );
        hydrator.hydrate(decode(&config));
        assert_eq!(cache.len(), 1);

        let data = frame("PUT /devices/data HTTP/1.1", "", LEVEL_BODY);
        let TydomMessage::Devices { devices, .. } = hydrator.hydrate(decode(&data)).message else {
            panic!("expected devices");
        };
        assert_eq!(devices[0].kind, DeviceKind::Light);
    }

    #[test]
    fn scenario_metadata_takes_precedence() {
        let scenarios = Arc::new(ScenarioMetadataCache::new());
        scenarios.upsert(&ScenarioMetadata {
            id: 1,
            name: Some("Night".into()),
            scenario_type: None,
            picto: Some("moon".into()),
            rule_id: None,
        });
        let hydrator = Hydrator::new(Arc::new(DeviceMetadataCache::new()), scenarios, Arc::new(NoSuppression));

        let raw = frame(
            "HTTP/1.1 200 OK",
            "Uri-Origin: /scenarios/file\r\n",
            r#"{"scn":[{"id":1,"name":"embedded","type":"SPECIAL"},{"id":2}]}"#,
        );
        let TydomMessage::Scenarios { scenarios, .. } = hydrator.hydrate(decode(&raw)).message else {
            panic!("expected scenarios");
        };
        assert_eq!(scenarios[0].name, "Night");
        assert_eq!(scenarios[0].scenario_type, "SPECIAL");
        assert_eq!(scenarios[0].picto, "moon");
        assert_eq!(scenarios[1].name, "Scenario 2");
        assert_eq!(scenarios[1].scenario_type, "NORMAL");
        assert_eq!(scenarios[1].picto, "");
    }

    #[test]
    fn envelope_effects_come_first() {
        let hydrator = hydrator(cache_with(&[]), Arc::new(NoSuppression));
        let raw = frame("HTTP/1.1 200 OK", "Uri-Origin: /ping\r\n", "");
        let hydrated = hydrator.hydrate(decode(&raw));
        assert_eq!(hydrated.effects, vec![TydomMessageEffect::PongReceived]);
    }
}
