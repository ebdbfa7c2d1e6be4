// ── Runtime connection configuration ──
//
// These types describe *how* to reach a Tydom gateway. They carry
// credential data and tuning, but never touch disk or the environment.
// The CLI constructs a `TydomConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use tydom_api::transport::TlsMode;
use tydom_api::{CloudConfig, CloudCredentials, KeepAliveConfig};

/// Which transport the resolver should aim for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionPreference {
    /// Try the LAN first, fall back to the cloud relay.
    #[default]
    Auto,
    Local,
    Remote,
}

/// Whether the resolver may call the cloud to fill in missing data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CredentialPolicy {
    #[default]
    AllowCloudLookup,
    UseStoredDataOnly,
}

/// Periodic cdata polling.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub enabled: bool,
    /// Overrides the interval requested by the gateway's capability list.
    pub interval: Option<Duration>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: None,
        }
    }
}

/// Polling started after a device write, to observe the device settle.
#[derive(Debug, Clone)]
pub struct PostCommandPollingConfig {
    pub interval: Duration,
    pub duration: Duration,
}

impl Default for PostCommandPollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            duration: Duration::from_secs(10),
        }
    }
}

/// Local gateway discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Scan the local /24 for hosts answering on the gateway port.
    pub subnet_scan: bool,
    /// Browse this mDNS service type. `None` disables mDNS.
    pub mdns_service_type: Option<String>,
    /// How long to collect mDNS answers.
    pub mdns_timeout: Duration,
    /// TCP connect timeout per host during the subnet scan.
    pub scan_timeout: Duration,
    /// Timeout of the authenticated ping used to confirm a candidate.
    pub probe_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            subnet_scan: true,
            mdns_service_type: Some("_tydom._tcp.local.".into()),
            mdns_timeout: Duration::from_secs(3),
            scan_timeout: Duration::from_millis(400),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for one gateway.
///
/// Built by the CLI, passed to [`Tydom`](crate::Tydom). Core never reads
/// config files.
#[derive(Debug, Clone)]
pub struct TydomConfig {
    pub mode: ConnectionPreference,
    /// Known LAN address of the gateway. Tried before any discovery.
    pub host: Option<String>,
    /// Gateway port. Defaults to 443.
    pub port: Option<u16>,
    pub mac: Option<String>,
    pub password: Option<SecretString>,
    pub cloud: Option<CloudCredentials>,
    pub cloud_endpoints: CloudConfig,
    pub credential_policy: CredentialPolicy,
    pub polling: PollingConfig,
    /// `None` disables the keep-alive ping.
    pub keep_alive: Option<KeepAliveConfig>,
    pub post_command: PostCommandPollingConfig,
    /// Certificate check for the LAN gateway socket only. Gateways serve a
    /// self-signed certificate, so local profiles opt into
    /// `DangerAcceptInvalid`; the cloud relay and the cloud API always
    /// verify against the system roots.
    pub tls: TlsMode,
    /// `false` talks plain `http://`/`ws://` to the gateway (test servers).
    pub use_tls: bool,
    pub timeout: Duration,
    pub discovery: DiscoveryConfig,
}

impl Default for TydomConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionPreference::default(),
            host: None,
            port: None,
            mac: None,
            password: None,
            cloud: None,
            cloud_endpoints: CloudConfig::default(),
            credential_policy: CredentialPolicy::default(),
            polling: PollingConfig::default(),
            keep_alive: Some(KeepAliveConfig::default()),
            post_command: PostCommandPollingConfig::default(),
            tls: TlsMode::System,
            use_tls: true,
            timeout: Duration::from_secs(30),
            discovery: DiscoveryConfig::default(),
        }
    }
}
