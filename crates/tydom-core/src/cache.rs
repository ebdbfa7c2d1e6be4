// ── Metadata caches ──
//
// The decoder emits cache mutations; the hydrator applies them and then
// looks devices and scenarios up by id. Storage is behind traits so an
// embedding application can back them with its own persistence. The
// in-memory implementations are DashMap-backed and own their maps: no
// caller ever reaches the raw storage.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::message::{DeviceMetadataMutation, ScenarioMetadata};

// ── Collaborator interfaces ──────────────────────────────────────────

/// Cached identity of one device endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceMetadata {
    pub unique_id: String,
    pub device_id: i64,
    pub endpoint_id: i64,
    pub name: Option<String>,
    pub usage: Option<String>,
    pub metadata: Option<Value>,
}

impl DeviceMetadata {
    /// Name and usage, when both are known.
    pub fn identity(&self) -> Option<(&str, &str)> {
        Some((self.name.as_deref()?, self.usage.as_deref()?))
    }
}

pub trait DeviceMetadataStore: Send + Sync {
    fn lookup(&self, unique_id: &str) -> Option<DeviceMetadata>;
    fn upsert(&self, mutation: &DeviceMetadataMutation);
}

pub trait ScenarioMetadataStore: Send + Sync {
    fn lookup(&self, id: i64) -> Option<ScenarioMetadata>;
    fn upsert(&self, metadata: &ScenarioMetadata);
}

/// Answers whether broadcast updates for a device are currently masked by
/// post-command polling.
pub trait SuppressionQuery: Send + Sync {
    fn is_suppressed(&self, unique_id: &str) -> bool;
}

/// Never suppresses anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSuppression;

impl SuppressionQuery for NoSuppression {
    fn is_suppressed(&self, _unique_id: &str) -> bool {
        false
    }
}

// ── DeviceMetadataCache ──────────────────────────────────────────────

/// In-memory device metadata keyed by unique id.
///
/// Every upsert bumps a version counter that subscribers can watch.
pub struct DeviceMetadataCache {
    by_unique_id: DashMap<String, DeviceMetadata>,
    version: watch::Sender<u64>,
}

impl DeviceMetadataCache {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0_u64);
        Self {
            by_unique_id: DashMap::new(),
            version,
        }
    }

    pub fn len(&self) -> usize {
        self.by_unique_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_unique_id.is_empty()
    }

    /// All entries, sorted by device then endpoint id.
    pub fn snapshot(&self) -> Vec<DeviceMetadata> {
        let mut all: Vec<DeviceMetadata> =
            self.by_unique_id.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|m| (m.device_id, m.endpoint_id));
        all
    }

    pub fn subscribe_version(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

impl Default for DeviceMetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceMetadataStore for DeviceMetadataCache {
    fn lookup(&self, unique_id: &str) -> Option<DeviceMetadata> {
        self.by_unique_id.get(unique_id).map(|e| e.value().clone())
    }

    fn upsert(&self, mutation: &DeviceMetadataMutation) {
        self.by_unique_id
            .entry(mutation.unique_id.clone())
            .and_modify(|existing| {
                if let Some(ref name) = mutation.name {
                    existing.name = Some(name.clone());
                }
                if let Some(ref usage) = mutation.usage {
                    existing.usage = Some(usage.clone());
                }
                if let Some(ref metadata) = mutation.metadata {
                    existing.metadata = Some(metadata.clone());
                }
            })
            .or_insert_with(|| DeviceMetadata {
                unique_id: mutation.unique_id.clone(),
                device_id: mutation.device_id,
                endpoint_id: mutation.endpoint_id,
                name: mutation.name.clone(),
                usage: mutation.usage.clone(),
                metadata: mutation.metadata.clone(),
            });
        self.version.send_modify(|v| *v += 1);
    }
}

// ── ScenarioMetadataCache ────────────────────────────────────────────

/// In-memory scenario metadata keyed by scenario id.
pub struct ScenarioMetadataCache {
    by_id: DashMap<i64, ScenarioMetadata>,
}

impl ScenarioMetadataCache {
    pub fn new() -> Self {
        Self { by_id: DashMap::new() }
    }

    pub fn snapshot(&self) -> Vec<ScenarioMetadata> {
        let mut all: Vec<ScenarioMetadata> = self.by_id.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|m| m.id);
        all
    }
}

impl Default for ScenarioMetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioMetadataStore for ScenarioMetadataCache {
    fn lookup(&self, id: i64) -> Option<ScenarioMetadata> {
        self.by_id.get(&id).map(|e| e.value().clone())
    }

    fn upsert(&self, metadata: &ScenarioMetadata) {
        self.by_id.insert(metadata.id, metadata.clone());
    }
}
