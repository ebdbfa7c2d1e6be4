//! Shared configuration for Tydom tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! a file-backed gateway state store, and translation to
//! `tydom_core::TydomConfig`. The CLI adds flag-aware overrides on top.

mod store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tydom_api::CloudCredentials;
use tydom_core::{
    ConnectionPreference, CredentialPolicy, DiscoveryConfig, KeepAliveConfig, PollingConfig,
    PostCommandPollingConfig, TlsMode, TydomConfig,
};

pub use store::{FileCredentialStore, state_path};

/// Keyring service name for every secret this crate stores.
pub const KEYRING_SERVICE: &str = "tydom";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("failed to parse state file: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named gateway profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Profile selected by name, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());
        self.profiles
            .get(&name)
            .map(|profile| (name.clone(), profile))
            .ok_or(ConfigError::UnknownProfile { profile: name })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Accept the gateway's self-signed certificate.
    #[serde(default = "default_insecure")]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: default_insecure(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_insecure() -> bool {
    true
}
fn default_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

/// A named gateway profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// "auto", "local" or "remote".
    #[serde(default)]
    pub mode: ConnectionPreference,

    /// LAN address of the gateway, tried before discovery.
    pub host: Option<String>,

    pub port: Option<u16>,

    /// Gateway MAC address (12 hex digits, separators allowed).
    pub mac: Option<String>,

    /// Gateway password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the gateway password.
    pub password_env: Option<String>,

    /// Delta Dore account used to look up the gateway password.
    pub cloud_email: Option<String>,

    /// Cloud account password (plaintext, prefer keyring).
    pub cloud_password: Option<String>,

    #[serde(default)]
    pub credential_policy: CredentialPolicy,

    #[serde(default = "default_true")]
    pub polling: bool,

    /// Seconds. Overrides the interval the gateway's capabilities ask for.
    pub poll_interval: Option<u64>,

    /// Seconds between keep-alive pings. `0` disables them.
    pub keep_alive_interval: Option<u64>,

    /// Keep pinging while the app is inactive.
    #[serde(default)]
    pub keep_alive_always: bool,

    pub post_command_interval_ms: Option<u64>,

    /// Seconds.
    pub post_command_duration: Option<u64>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,

    #[serde(default = "default_true")]
    pub subnet_scan: bool,

    /// mDNS service type to browse. Empty disables mDNS.
    pub mdns_service_type: Option<String>,

    /// Seconds.
    pub probe_timeout: Option<u64>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            mode: ConnectionPreference::default(),
            host: None,
            port: None,
            mac: None,
            password: None,
            password_env: None,
            cloud_email: None,
            cloud_password: None,
            credential_policy: CredentialPolicy::default(),
            polling: true,
            poll_interval: None,
            keep_alive_interval: None,
            keep_alive_always: false,
            post_command_interval_ms: None,
            post_command_duration: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
            subnet_scan: true,
            mdns_service_type: None,
            probe_timeout: None,
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "tydom", "tydom")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory holding per-profile gateway state.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".local/share"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

fn dirs_fallback(base: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(base);
    p.push("tydom");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
///
/// Nested keys use a double underscore:
/// `TYDOM_PROFILES__HOME__HOST=192.168.1.20`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TYDOM_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(profile_name: &str, secret: &str) -> Result<keyring::Entry, ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/{secret}"))
        .map_err(ConfigError::from)
}

fn keyring_secret(profile_name: &str, secret: &str) -> Option<SecretString> {
    keyring_entry(profile_name, secret)
        .ok()?
        .get_password()
        .ok()
        .map(SecretString::from)
}

/// Store a gateway password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name, "password")?.set_password(password)?;
    Ok(())
}

/// Store a cloud account password in the system keyring.
pub fn store_cloud_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name, "cloud-password")?.set_password(password)?;
    Ok(())
}

/// Resolve the gateway password: profile env var, `TYDOM_PASSWORD`,
/// keyring, then plaintext.
///
/// `None` is not an error: the resolver may still fetch it from the cloud.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    if let Ok(pw) = std::env::var("TYDOM_PASSWORD") {
        return Some(SecretString::from(pw));
    }

    if let Some(secret) = keyring_secret(profile_name, "password") {
        return Some(secret);
    }

    profile
        .password
        .as_ref()
        .map(|pw| SecretString::from(pw.clone()))
}

/// Resolve cloud credentials when the profile names an account.
pub fn resolve_cloud_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<Option<CloudCredentials>, ConfigError> {
    let Some(email) = profile
        .cloud_email
        .clone()
        .or_else(|| std::env::var("TYDOM_CLOUD_EMAIL").ok())
    else {
        return Ok(None);
    };

    let password = std::env::var("TYDOM_CLOUD_PASSWORD")
        .ok()
        .map(SecretString::from)
        .or_else(|| keyring_secret(profile_name, "cloud-password"))
        .or_else(|| profile.cloud_password.clone().map(SecretString::from))
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })?;

    Ok(Some(CloudCredentials { email, password }))
}

/// Upper-case a MAC address and drop `:`/`-` separators.
pub fn normalize_mac(mac: &str) -> Result<String, ConfigError> {
    let normalized: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .collect::<String>()
        .to_ascii_uppercase();
    if normalized.len() == 12 && normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(normalized)
    } else {
        Err(ConfigError::Validation {
            field: "mac".into(),
            reason: format!("expected 12 hex digits, got '{mac}'"),
        })
    }
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `TydomConfig` from a profile, no CLI flag overrides.
pub fn profile_to_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<TydomConfig, ConfigError> {
    let mac = profile.mac.as_deref().map(normalize_mac).transpose()?;
    let cloud = resolve_cloud_credentials(profile, profile_name)?;
    if mac.is_none() && cloud.is_none() {
        return Err(ConfigError::NoCredentials {
            profile: profile_name.into(),
        });
    }
    let password = resolve_password(profile, profile_name);

    let tls = if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else {
        TlsMode::System
    };

    let keep_alive = match profile.keep_alive_interval {
        Some(0) => None,
        interval => Some(KeepAliveConfig {
            interval: interval.map_or_else(
                || KeepAliveConfig::default().interval,
                Duration::from_secs,
            ),
            only_when_active: !profile.keep_alive_always,
        }),
    };

    let post_defaults = PostCommandPollingConfig::default();
    let post_command = PostCommandPollingConfig {
        interval: profile
            .post_command_interval_ms
            .map_or(post_defaults.interval, Duration::from_millis),
        duration: profile
            .post_command_duration
            .map_or(post_defaults.duration, Duration::from_secs),
    };

    let discovery_defaults = DiscoveryConfig::default();
    let mdns_service_type = match profile.mdns_service_type.as_deref() {
        Some("") => None,
        Some(service) => Some(service.to_owned()),
        None => discovery_defaults.mdns_service_type.clone(),
    };
    let discovery = DiscoveryConfig {
        subnet_scan: profile.subnet_scan,
        mdns_service_type,
        probe_timeout: profile
            .probe_timeout
            .map_or(discovery_defaults.probe_timeout, Duration::from_secs),
        ..discovery_defaults
    };

    Ok(TydomConfig {
        mode: profile.mode,
        host: profile.host.clone(),
        port: profile.port,
        mac,
        password,
        cloud,
        credential_policy: profile.credential_policy,
        polling: PollingConfig {
            enabled: profile.polling,
            interval: profile.poll_interval.map(Duration::from_secs),
        },
        keep_alive,
        post_command,
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        discovery,
        ..TydomConfig::default()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
output = "json"

[profiles.home]
mode = "local"
host = "192.168.1.20"
mac = "00:1a:25:01:02:03"
password = "plain"
credential_policy = "use-stored-data-only"
poll_interval = 120
keep_alive_interval = 0
mdns_service_type = ""
"#;

    fn sample() -> Config {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn normalize_mac_strips_separators() {
        assert_eq!(normalize_mac("00:1a:25-01:02:03").unwrap(), "001A25010203");
        assert!(matches!(
            normalize_mac("001A25"),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn profile_lookup_uses_default_profile() {
        let config = sample();
        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "home");
        assert_eq!(profile.mode, ConnectionPreference::Local);
        assert!(matches!(
            config.profile(Some("cabin")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn profile_translates_to_runtime_config() {
        let config = sample();
        let (name, profile) = config.profile(None).unwrap();
        let runtime = profile_to_config(profile, &name, &config.defaults).unwrap();

        assert_eq!(runtime.mac.as_deref(), Some("001A25010203"));
        assert_eq!(runtime.host.as_deref(), Some("192.168.1.20"));
        assert_eq!(runtime.credential_policy, CredentialPolicy::UseStoredDataOnly);
        assert_eq!(runtime.polling.interval, Some(Duration::from_secs(120)));
        assert!(runtime.keep_alive.is_none());
        assert!(runtime.discovery.mdns_service_type.is_none());
        assert!(matches!(runtime.tls, TlsMode::DangerAcceptInvalid));
        assert_eq!(runtime.timeout, Duration::from_secs(30));
    }

    #[test]
    fn profile_without_mac_or_cloud_account_is_rejected() {
        let profile = Profile::default();
        let err = profile_to_config(&profile, "empty", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { .. }));
    }

    #[test]
    fn config_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        save_config_to(&sample(), &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.default_profile.as_deref(), Some("home"));
        assert_eq!(loaded.defaults.output, "json");
        assert_eq!(loaded.profiles["home"].poll_interval, Some(120));
    }
}
