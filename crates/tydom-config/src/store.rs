// ── Gateway state on disk ──
//
// Remembers what the resolver learned about a gateway between runs: its
// MAC, the LAN address that last answered, and when that happened. The
// gateway password never touches the state file; it lives in the keyring.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use tydom_core::{CoreError, CredentialStore, StoredGateway};

use crate::{ConfigError, KEYRING_SERVICE};

/// Path of the state file for `profile_name`.
pub fn state_path(profile_name: &str) -> PathBuf {
    crate::data_dir()
        .join("gateways")
        .join(format!("{profile_name}.toml"))
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct GatewayState {
    mac: Option<String>,
    cached_local_ip: Option<String>,
    last_updated: Option<DateTime<Utc>>,
}

/// [`CredentialStore`] backed by a TOML file and the system keyring.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    keyring_account: Option<String>,
}

impl FileCredentialStore {
    /// Store for a named profile. Passwords go to the profile's keyring slot.
    pub fn for_profile(profile_name: &str) -> Self {
        Self {
            path: state_path(profile_name),
            keyring_account: Some(format!("{profile_name}/password")),
        }
    }

    /// File-only store at an explicit path. Passwords are not persisted.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keyring_account: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_state(&self) -> Result<GatewayState, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(GatewayState::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_state(&self, state: &GatewayState) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string_pretty(state)?)?;
        Ok(())
    }

    fn keyring_entry(&self) -> Option<keyring::Entry> {
        let account = self.keyring_account.as_deref()?;
        keyring::Entry::new(KEYRING_SERVICE, account).ok()
    }
}

fn to_core(err: ConfigError) -> CoreError {
    CoreError::Config {
        message: err.to_string(),
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<StoredGateway, CoreError> {
        let state = self.read_state().map_err(to_core)?;
        let password = self
            .keyring_entry()
            .and_then(|entry| entry.get_password().ok())
            .map(SecretString::from);

        Ok(StoredGateway {
            mac: state.mac,
            password,
            cached_local_ip: state.cached_local_ip,
            last_updated: state.last_updated,
        })
    }

    fn save(&self, gateway: &StoredGateway) -> Result<(), CoreError> {
        self.write_state(&GatewayState {
            mac: gateway.mac.clone(),
            cached_local_ip: gateway.cached_local_ip.clone(),
            last_updated: gateway.last_updated,
        })
        .map_err(to_core)?;

        if let (Some(entry), Some(password)) = (self.keyring_entry(), gateway.password.as_ref()) {
            entry
                .set_password(password.expose_secret())
                .map_err(|e| to_core(e.into()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_state_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::at(dir.path().join("absent.toml"));

        let gateway = store.load().unwrap();
        assert!(gateway.mac.is_none());
        assert!(gateway.cached_local_ip.is_none());
    }

    #[test]
    fn saved_state_survives_reload_without_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateways").join("home.toml");
        let stamp = Utc::now();

        FileCredentialStore::at(&path)
            .save(&StoredGateway {
                mac: Some("001A25010203".into()),
                password: Some(SecretString::from("hunter2".to_string())),
                cached_local_ip: Some("192.168.1.20".into()),
                last_updated: Some(stamp),
            })
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("hunter2"));

        let gateway = FileCredentialStore::at(&path).load().unwrap();
        assert_eq!(gateway.mac.as_deref(), Some("001A25010203"));
        assert_eq!(gateway.cached_local_ip.as_deref(), Some("192.168.1.20"));
        assert_eq!(gateway.last_updated, Some(stamp));
        assert!(gateway.password.is_none());
    }

    #[test]
    fn corrupt_state_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "mac = [").unwrap();

        let err = FileCredentialStore::at(&path).load().unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }
}
