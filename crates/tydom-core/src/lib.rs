// tydom-core: Decoding, hydration, schedulers and connection resolution between tydom-api and consumers.

pub mod cache;
pub mod config;
pub mod controller;
pub mod decode;
pub mod effects;
pub mod error;
pub mod hydrate;
pub mod message;
pub mod resolver;
pub mod schedule;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::{
    DeviceMetadata, DeviceMetadataCache, DeviceMetadataStore, NoSuppression, ScenarioMetadataCache,
    ScenarioMetadataStore, SuppressionQuery,
};
pub use config::{
    ConnectionPreference, CredentialPolicy, DiscoveryConfig, PollingConfig, PostCommandPollingConfig,
    TydomConfig,
};
pub use controller::{ConnectionState, SharedConnection, Tydom, initial_sync};
pub use decode::decode;
pub use effects::{EffectContext, EffectExecutor};
pub use error::CoreError;
pub use hydrate::{HydratedMessage, Hydrator};
pub use message::{
    CacheMutation, CdataReplyChunk, DecodedPayload, DeviceData, DeviceKind, DeviceMetadataMutation,
    ScenarioMetadata, TydomArea, TydomDecodedEnvelope, TydomDevice, TydomDeviceUpdate, TydomMessage,
    TydomMessageEffect, TydomScenario, UpdateSource, unique_id,
};
pub use resolver::{
    ConnectionOverride, CredentialStore, DiscoveryCandidate, DiscoveryMethod, GatewayCredentials,
    GatewayResolverIo, MemoryCredentialStore, ResolverIo, StoredGateway,
};
pub use schedule::{CommandSink, PollScheduler, PostCommandPolling, ReplyAccumulator};
pub use stream::MessageStream;

// Transport types consumers need alongside the controller.
pub use tydom_api::{ActivityFlag, ConnectionMode, KeepAliveConfig, Method, TlsMode, TydomCommand};
