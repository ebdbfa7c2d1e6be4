//! Config subcommand handlers.

use std::collections::HashMap;

use dialoguer::{Input, Select};

use tydom_core::{ConnectionPreference, CredentialPolicy, CredentialStore, StoredGateway};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Defaults, FileCredentialStore, Profile};
use crate::error::CliError;
use crate::output::Printer;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "insecure = {}", cfg.defaults.insecure);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "mode = \"{}\"", p.mode);
        if let Some(ref host) = p.host {
            let _ = writeln!(out, "host = \"{host}\"");
        }
        if let Some(port) = p.port {
            let _ = writeln!(out, "port = {port}");
        }
        if let Some(ref mac) = p.mac {
            let _ = writeln!(out, "mac = \"{mac}\"");
        }
        if p.password.is_some() {
            let _ = writeln!(out, "password = \"****\"");
        }
        if let Some(ref env) = p.password_env {
            let _ = writeln!(out, "password_env = \"{env}\"");
        }
        if let Some(ref email) = p.cloud_email {
            let _ = writeln!(out, "cloud_email = \"{email}\"");
        }
        if p.cloud_password.is_some() {
            let _ = writeln!(out, "cloud_password = \"****\"");
        }
        let _ = writeln!(out, "credential_policy = \"{}\"", p.credential_policy);
        let _ = writeln!(out, "polling = {}", p.polling);
        if let Some(interval) = p.poll_interval {
            let _ = writeln!(out, "poll_interval = {interval}");
        }
        if let Some(interval) = p.keep_alive_interval {
            let _ = writeln!(out, "keep_alive_interval = {interval}");
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
    }

    out
}

/// Delegate to the shared config crate's save function.
fn save_config(cfg: &Config) -> Result<(), CliError> {
    config::save_config(cfg)?;
    Ok(())
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn available_profiles(cfg: &Config) -> String {
    let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
    available.sort();
    if available.is_empty() {
        "(none)".into()
    } else {
        available.join(", ")
    }
}

/// Offer to store a secret in the system keyring or return it for plaintext config.
///
/// Returns `Some(secret)` if the user chose plaintext, `None` if stored in keyring.
fn prompt_keyring_storage(
    secret: &str,
    store: impl Fn(&str) -> Result<(), tydom_config::ConfigError>,
    prompt: &str,
    label: &str,
) -> Result<Option<String>, CliError> {
    let choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt(prompt)
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        store(secret).map_err(|e| CliError::Validation {
            field: "keyring".into(),
            reason: format!("failed to store {label} in keyring: {e}"),
        })?;
        eprintln!("   ✓ {label} stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(secret.to_owned()))
    }
}

fn parse_flag<T: std::str::FromStr>(key: &str, value: &str, expected: &str) -> Result<T, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: key.into(),
        reason: format!("must be {expected}"),
    })
}

/// Apply one `config set` key to a profile.
fn set_profile_key(profile: &mut Profile, key: &str, value: String) -> Result<(), CliError> {
    match key {
        "mode" => profile.mode = parse_flag(key, &value, "'auto', 'local' or 'remote'")?,
        "host" => profile.host = Some(value),
        "port" => profile.port = Some(parse_flag(key, &value, "a port number")?),
        "mac" => profile.mac = Some(tydom_config::normalize_mac(&value)?),
        "password" => profile.password = Some(value),
        "password_env" | "password-env" => profile.password_env = Some(value),
        "cloud_email" | "cloud-email" => profile.cloud_email = Some(value),
        "credential_policy" | "credential-policy" => {
            profile.credential_policy = parse_flag::<CredentialPolicy>(
                key,
                &value,
                "'allow-cloud-lookup' or 'use-stored-data-only'",
            )?;
        }
        "polling" => profile.polling = parse_flag(key, &value, "'true' or 'false'")?,
        "poll_interval" | "poll-interval" => {
            profile.poll_interval = Some(parse_flag(key, &value, "a number (seconds)")?);
        }
        "keep_alive_interval" | "keep-alive-interval" => {
            profile.keep_alive_interval = Some(parse_flag(key, &value, "a number (seconds)")?);
        }
        "subnet_scan" | "subnet-scan" => {
            profile.subnet_scan = parse_flag(key, &value, "'true' or 'false'")?;
        }
        "insecure" => profile.insecure = Some(parse_flag(key, &value, "'true' or 'false'")?),
        "timeout" => profile.timeout = Some(parse_flag(key, &value, "a number (seconds)")?),
        "ca_cert" | "ca-cert" => profile.ca_cert = Some(value.into()),
        other => {
            return Err(CliError::Validation {
                field: other.into(),
                reason: format!(
                    "unknown config key '{other}'. Valid keys: mode, host, port, mac, password, \
                     password_env, cloud_email, credential_policy, polling, poll_interval, \
                     keep_alive_interval, subnet_scan, insecure, timeout, ca_cert"
                ),
            });
        }
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

#[allow(clippy::too_many_lines)]
pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let config_path = config::config_path();
            eprintln!("✨ Tydom CLI configuration wizard");
            eprintln!("   Config path: {}\n", config_path.display());

            // 1. Profile name
            let profile_name: String = Input::new()
                .with_prompt("Profile name")
                .default("default".into())
                .interact_text()
                .map_err(prompt_err)?;

            // 2. Connection mode
            let modes = &[
                "Auto (LAN first, cloud relay fallback)",
                "Local only",
                "Cloud relay only",
            ];
            let mode = match Select::new()
                .with_prompt("Connection mode")
                .items(modes)
                .default(0)
                .interact()
                .map_err(prompt_err)?
            {
                1 => ConnectionPreference::Local,
                2 => ConnectionPreference::Remote,
                _ => ConnectionPreference::Auto,
            };

            // 3. Gateway identity
            let mac: String = Input::new()
                .with_prompt("Gateway MAC (blank to look it up in the cloud)")
                .allow_empty(true)
                .interact_text()
                .map_err(prompt_err)?;
            let mac = if mac.is_empty() {
                None
            } else {
                Some(tydom_config::normalize_mac(&mac)?)
            };

            let host: String = Input::new()
                .with_prompt("Gateway LAN address (blank to discover)")
                .allow_empty(true)
                .interact_text()
                .map_err(prompt_err)?;
            let host = (!host.is_empty()).then_some(host);

            // 4. Credentials
            let password = rpassword::prompt_password("Gateway password (blank to fetch from cloud): ")
                .map_err(prompt_err)?;
            let password = if password.is_empty() {
                None
            } else {
                prompt_keyring_storage(
                    &password,
                    |secret| tydom_config::store_password(&profile_name, secret),
                    "Where to store the gateway password?",
                    "Gateway password",
                )?
            };

            let mut cloud_email = None;
            let mut cloud_password = None;
            if mac.is_none() || password.is_none() {
                let email: String = Input::new()
                    .with_prompt("Delta Dore account email")
                    .interact_text()
                    .map_err(prompt_err)?;
                let secret = rpassword::prompt_password("Delta Dore account password: ")
                    .map_err(prompt_err)?;
                if email.is_empty() || secret.is_empty() {
                    return Err(CliError::Validation {
                        field: "cloud credentials".into(),
                        reason: "email and password cannot be empty".into(),
                    });
                }
                cloud_password = prompt_keyring_storage(
                    &secret,
                    |secret| tydom_config::store_cloud_password(&profile_name, secret),
                    "Where to store the account password?",
                    "Account password",
                )?;
                cloud_email = Some(email);
            }

            // 5. Build profile and config
            let profile = Profile {
                mode,
                host,
                mac,
                password,
                cloud_email,
                cloud_password,
                ..Profile::default()
            };

            let mut profiles = HashMap::new();
            profiles.insert(profile_name.clone(), profile);

            let cfg = Config {
                default_profile: Some(profile_name.clone()),
                defaults: Defaults::default(),
                profiles,
            };

            // 6. Write config
            save_config(&cfg)?;

            eprintln!("\n✓ Configuration written to {}", config_path.display());
            eprintln!("  Active profile: {profile_name}");
            eprintln!("\n  Test it: tydom probe");

            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            let out = Printer::new(global);
            let rendered = out.single(&cfg, format_config_redacted, |_| "config".into());
            out.print(&rendered);
            Ok(())
        }

        // ── Set <key> <value> ───────────────────────────────────────
        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);

            let profile = cfg.profiles.entry(profile_name.clone()).or_default();
            set_profile_key(profile, &key, value)?;

            save_config(&cfg)?;
            eprintln!("✓ Set {key} on profile '{profile_name}'");
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: tydom config init");
            } else {
                let mut names: Vec<_> = cfg.profiles.keys().collect();
                names.sort();
                for name in names {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();

            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: available_profiles(&cfg),
                    name,
                });
            }

            cfg.default_profile = Some(name.clone());
            save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        // ── SetPassword ─────────────────────────────────────────────
        ConfigCommand::SetPassword { profile, cloud } => {
            let cfg = config::load_config_or_default();
            let profile_name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));

            if !cfg.profiles.contains_key(&profile_name) {
                return Err(CliError::ProfileNotFound {
                    available: available_profiles(&cfg),
                    name: profile_name,
                });
            }

            let label = if cloud {
                "Delta Dore account password: "
            } else {
                "Gateway password: "
            };
            let secret = rpassword::prompt_password(label).map_err(prompt_err)?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: "secret".into(),
                    reason: "value cannot be empty".into(),
                });
            }

            if cloud {
                tydom_config::store_cloud_password(&profile_name, &secret)?;
            } else {
                tydom_config::store_password(&profile_name, &secret)?;
            }

            eprintln!("✓ Secret stored in system keyring for profile '{profile_name}'");
            Ok(())
        }

        // ── Forget ──────────────────────────────────────────────────
        ConfigCommand::Forget { profile } => {
            let cfg = config::load_config_or_default();
            let profile_name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));

            FileCredentialStore::for_profile(&profile_name).save(&StoredGateway::default())?;

            eprintln!("✓ Forgot remembered gateway for profile '{profile_name}'");
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn set_normalizes_mac_and_parses_mode() {
        let mut profile = Profile::default();
        set_profile_key(&mut profile, "mac", "00:1a:25:01:02:03".into()).unwrap();
        set_profile_key(&mut profile, "mode", "remote".into()).unwrap();
        set_profile_key(&mut profile, "poll-interval", "90".into()).unwrap();

        assert_eq!(profile.mac.as_deref(), Some("001A25010203"));
        assert_eq!(profile.mode, ConnectionPreference::Remote);
        assert_eq!(profile.poll_interval, Some(90));
    }

    #[test]
    fn set_rejects_unknown_keys_and_bad_values() {
        let mut profile = Profile::default();
        assert!(matches!(
            set_profile_key(&mut profile, "site", "x".into()),
            Err(CliError::Validation { .. })
        ));
        assert!(matches!(
            set_profile_key(&mut profile, "port", "http".into()),
            Err(CliError::Validation { .. })
        ));
    }

    #[test]
    fn redacted_view_masks_secrets() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "home".into(),
            Profile {
                password: Some("hunter2".into()),
                cloud_password: Some("s3cret".into()),
                ..Profile::default()
            },
        );
        let text = format_config_redacted(&cfg);
        assert!(text.contains("[profiles.home]"));
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("s3cret"));
    }
}
