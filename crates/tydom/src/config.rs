//! CLI configuration: thin wrapper around `tydom_config` shared types.
//!
//! Re-exports the shared types and adds CLI-specific resolution that
//! respects `GlobalOpts` flag overrides (--host, --mac, --password, etc.).

use std::time::Duration;

use secrecy::SecretString;

use tydom_core::{ConnectionPreference, TlsMode, TydomConfig};

use crate::cli::{GlobalOpts, ModeArg};
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use tydom_config::{
    Config, Defaults, FileCredentialStore, Profile, config_path, load_config_or_default,
    save_config,
};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

impl From<ModeArg> for ConnectionPreference {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => Self::Auto,
            ModeArg::Local => Self::Local,
            ModeArg::Remote => Self::Remote,
        }
    }
}

/// Apply flag overrides to a copy of the profile.
fn apply_overrides(profile: &Profile, global: &GlobalOpts) -> Profile {
    let mut profile = profile.clone();
    if let Some(mode) = global.mode {
        profile.mode = mode.into();
    }
    if let Some(ref host) = global.host {
        profile.host = Some(host.clone());
    }
    if let Some(port) = global.port {
        profile.port = Some(port);
    }
    if let Some(ref mac) = global.mac {
        profile.mac = Some(mac.clone());
    }
    profile
}

/// Translate a `Profile` + global flags into a `TydomConfig`.
///
/// CLI flag overrides take priority over profile values.
pub fn resolve_profile(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
    global: &GlobalOpts,
) -> Result<TydomConfig, CliError> {
    let profile = apply_overrides(profile, global);
    let mut config = tydom_config::profile_to_config(&profile, profile_name, defaults)?;

    if let Some(ref password) = global.password {
        config.password = Some(SecretString::from(password.clone()));
    }
    if global.insecure {
        config.tls = TlsMode::DangerAcceptInvalid;
    }
    config.timeout = Duration::from_secs(global.timeout);
    Ok(config)
}

/// Build a `TydomConfig` from the config file, profile, and CLI overrides.
///
/// With no matching profile the flags alone must identify the gateway.
pub fn build_tydom_config(global: &GlobalOpts) -> Result<(String, TydomConfig), CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        None if global.profile.is_some() => {
            let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
            available.sort();
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            });
        }
        None => Profile::default(),
    };

    let config = resolve_profile(&profile, &profile_name, &cfg.defaults, global)?;
    Ok((profile_name, config))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["tydom"];
        argv.extend_from_slice(args);
        argv.push("probe");
        Cli::try_parse_from(argv).unwrap().global
    }

    #[test]
    fn flags_override_profile_values() {
        let profile = Profile {
            mode: ConnectionPreference::Remote,
            host: Some("10.0.0.2".into()),
            mac: Some("001A25010203".into()),
            password: Some("from-file".into()),
            ..Profile::default()
        };
        let opts = global(&[
            "--mode",
            "local",
            "--host",
            "10.0.0.9",
            "--password",
            "from-flag",
            "--timeout",
            "7",
        ]);

        let config = resolve_profile(&profile, "cli-test", &Defaults::default(), &opts).unwrap();
        assert_eq!(config.mode, ConnectionPreference::Local);
        assert_eq!(config.host.as_deref(), Some("10.0.0.9"));
        assert_eq!(config.timeout, Duration::from_secs(7));
        assert!(config.password.is_some());
    }
}
