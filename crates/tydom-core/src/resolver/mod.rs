// ── Connection resolver ──
//
// `machine` decides, this module acts. `resolve` drives the pure state
// machine through a `ResolverIo`, which the controller backs with real
// sockets and tests back with scripted fakes.

pub mod discovery;
pub mod machine;

use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tydom_api::{
    ActivityFlag, CloudClient, ConnectionConfig, ConnectionMode, PasswordSource, TlsMode, TransportConfig,
    TydomConnection, TydomRawMessage,
};

use crate::config::{ConnectionPreference, CredentialPolicy, TydomConfig};
use crate::error::CoreError;

pub use discovery::{DiscoveryCandidate, DiscoveryMethod};
pub use machine::{
    ConnectionOverride, GatewayCredentials, ResolverAction, ResolverEvent, ResolverPhase,
    ResolverState, transition,
};

const DEFAULT_GATEWAY_PORT: u16 = 443;

impl From<ConnectionPreference> for ConnectionOverride {
    fn from(preference: ConnectionPreference) -> Self {
        match preference {
            ConnectionPreference::Auto => Self::None,
            ConnectionPreference::Local => Self::ForceLocal,
            ConnectionPreference::Remote => Self::ForceRemote,
        }
    }
}

// ── Credential persistence ───────────────────────────────────────────

/// Gateway data remembered between runs.
#[derive(Debug, Clone, Default)]
pub struct StoredGateway {
    pub mac: Option<String>,
    pub password: Option<SecretString>,
    pub cached_local_ip: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Where the resolver reads and writes remembered gateway data.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<StoredGateway, CoreError>;
    fn save(&self, gateway: &StoredGateway) -> Result<(), CoreError>;
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<StoredGateway>,
}

impl MemoryCredentialStore {
    pub fn new(initial: StoredGateway) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<StoredGateway, CoreError> {
        self.inner
            .lock()
            .map(|g| g.clone())
            .map_err(|_| CoreError::Internal("credential store lock poisoned".into()))
    }

    fn save(&self, gateway: &StoredGateway) -> Result<(), CoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| CoreError::Internal("credential store lock poisoned".into()))?;
        *inner = gateway.clone();
        Ok(())
    }
}

// ── Interpreter ──────────────────────────────────────────────────────

/// Side effects the resolver needs.
pub trait ResolverIo: Send + Sync {
    type Connection: Send;

    fn load_credentials(&self) -> impl Future<Output = Result<GatewayCredentials, CoreError>> + Send;

    /// Authenticated round trip against `host`, closed afterwards.
    fn probe(&self, credentials: &GatewayCredentials, host: &str) -> impl Future<Output = bool> + Send;

    fn discover(
        &self,
        credentials: &GatewayCredentials,
    ) -> impl Future<Output = Vec<DiscoveryCandidate>> + Send;

    fn connect_local(
        &self,
        credentials: &GatewayCredentials,
        host: &str,
    ) -> impl Future<Output = Result<Self::Connection, CoreError>> + Send;

    fn connect_remote(
        &self,
        credentials: &GatewayCredentials,
    ) -> impl Future<Output = Result<Self::Connection, CoreError>> + Send;

    fn persist_cached_ip(
        &self,
        credentials: &GatewayCredentials,
        host: &str,
    ) -> impl Future<Output = ()> + Send;
}

/// Successful resolution.
#[derive(Debug)]
pub struct Resolved<C> {
    pub connection: C,
    pub mode: ConnectionMode,
    pub host: String,
}

/// Run the state machine to a terminal phase.
///
/// On failure the most specific error seen along the way is returned, so
/// an authentication failure on the relay is not reported as a generic
/// resolution failure.
pub async fn resolve<I: ResolverIo>(
    io: &I,
    connection_override: ConnectionOverride,
) -> Result<Resolved<I::Connection>, CoreError> {
    let mut state = ResolverState::new(connection_override);
    let mut pending = vec![ResolverEvent::Start];
    let mut connection = None;
    let mut last_error: Option<CoreError> = None;

    while let Some(event) = pending.pop() {
        let (next, actions) = transition(state, event);
        state = next;
        debug!(phase = %state.phase, "resolver transition");

        for action in actions {
            let event = match (action, state.credentials.clone()) {
                (ResolverAction::LoadCredentials, _) => {
                    let loaded = match io.load_credentials().await {
                        Ok(credentials) => Some(credentials),
                        Err(e) => {
                            warn!(error = %e, "could not load gateway credentials");
                            last_error = Some(e);
                            None
                        }
                    };
                    Some(ResolverEvent::CredentialsLoaded(loaded))
                }
                (action, Some(credentials)) => {
                    perform(io, &credentials, action, &mut connection, &mut last_error).await
                }
                (_, None) => None,
            };
            pending.extend(event);
        }
    }

    match (state.phase, connection) {
        (ResolverPhase::Connected { mode, host }, Some(connection)) => {
            info!(mode = ?mode, host = %host, "gateway resolved");
            Ok(Resolved {
                connection,
                mode,
                host,
            })
        }
        (ResolverPhase::Failed { reason }, _) => Err(last_error.unwrap_or(CoreError::ResolutionFailed { reason })),
        (phase, _) => Err(CoreError::ResolutionFailed {
            reason: format!("resolver stopped in phase {phase}"),
        }),
    }
}

async fn perform<I: ResolverIo>(
    io: &I,
    credentials: &GatewayCredentials,
    action: ResolverAction,
    connection: &mut Option<I::Connection>,
    last_error: &mut Option<CoreError>,
) -> Option<ResolverEvent> {
    match action {
        // Handled by the caller before credentials exist.
        ResolverAction::LoadCredentials => None,
        ResolverAction::ProbeCachedIp { host } => {
            let success = io.probe(credentials, &host).await;
            debug!(host = %host, success, "cached IP probe");
            Some(ResolverEvent::CachedIpProbed { success })
        }
        ResolverAction::DiscoverLocal => {
            let cached = credentials.cached_local_ip.as_deref();
            let mut found = None;
            for candidate in io.discover(credentials).await {
                // Already probed in its own phase.
                if candidate.method == DiscoveryMethod::CachedIp || Some(candidate.host.as_str()) == cached {
                    continue;
                }
                if io.probe(credentials, &candidate.host).await {
                    info!(host = %candidate.host, method = %candidate.method, "gateway found on LAN");
                    found = Some(candidate.host);
                    break;
                }
            }
            Some(ResolverEvent::LocalDiscovered(found))
        }
        ResolverAction::ConnectLocal { host } => match io.connect_local(credentials, &host).await {
            Ok(conn) => {
                *connection = Some(conn);
                Some(ResolverEvent::LocalConnectResult { success: true, host })
            }
            Err(e) => {
                warn!(host = %host, error = %e, "local connection failed, falling back to relay");
                *last_error = Some(e);
                Some(ResolverEvent::LocalConnectResult { success: false, host })
            }
        },
        ResolverAction::ConnectRemote => match io.connect_remote(credentials).await {
            Ok(conn) => {
                *connection = Some(conn);
                Some(ResolverEvent::RemoteConnectResult {
                    success: true,
                    reason: None,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                *last_error = Some(e);
                Some(ResolverEvent::RemoteConnectResult {
                    success: false,
                    reason: Some(reason),
                })
            }
        },
        ResolverAction::PersistCachedIp { host } => {
            io.persist_cached_ip(credentials, &host).await;
            None
        }
    }
}

// ── Production I/O ───────────────────────────────────────────────────

/// Socket handle plus its inbound frame stream.
pub type LiveConnection = (TydomConnection, mpsc::Receiver<TydomRawMessage>);

/// `ResolverIo` over real sockets, the cloud, and a `CredentialStore`.
pub struct GatewayResolverIo {
    config: TydomConfig,
    store: Arc<dyn CredentialStore>,
    activity: ActivityFlag,
}

impl GatewayResolverIo {
    pub fn new(config: TydomConfig, store: Arc<dyn CredentialStore>, activity: ActivityFlag) -> Self {
        Self {
            config,
            store,
            activity,
        }
    }

    fn transport(&self, local: bool) -> TransportConfig {
        let tls = if local {
            self.config.tls.clone()
        } else {
            TlsMode::System
        };
        TransportConfig {
            tls,
            timeout: self.config.timeout,
        }
    }

    fn connection_config(&self, credentials: &GatewayCredentials, host: Option<&str>) -> ConnectionConfig {
        let mut config = match host {
            Some(host) => ConnectionConfig::local(host, &credentials.mac, credentials.password.clone()),
            None => ConnectionConfig::remote(&credentials.mac, credentials.password.clone()),
        };
        if host.is_some() {
            config.port = self.config.port;
        }
        config.transport = self.transport(host.is_some());
        config.use_tls = self.config.use_tls;
        config.keep_alive.clone_from(&self.config.keep_alive);
        config
    }

    fn cloud_client(&self) -> Result<CloudClient, CoreError> {
        Ok(CloudClient::new(self.config.cloud_endpoints.clone(), &self.transport(false))?)
    }

    async fn open(&self, config: ConnectionConfig) -> Result<LiveConnection, CoreError> {
        let host = config.host.clone();
        tokio::time::timeout(
            self.config.timeout,
            TydomConnection::connect(&config, self.activity.clone()),
        )
        .await
        .map_err(|_| CoreError::Timeout {
            timeout_secs: self.config.timeout.as_secs(),
        })?
        .map_err(|e| match CoreError::from(e) {
            CoreError::ConnectionFailed { reason, .. } => CoreError::ConnectionFailed { host, reason },
            other => other,
        })
    }
}

impl ResolverIo for GatewayResolverIo {
    type Connection = LiveConnection;

    async fn load_credentials(&self) -> Result<GatewayCredentials, CoreError> {
        let stored = self.store.load()?;
        let policy = self.config.credential_policy;
        let cloud = match (policy, &self.config.cloud) {
            (CredentialPolicy::AllowCloudLookup, Some(cloud)) => Some(cloud),
            _ => None,
        };

        let mut mac = self.config.mac.clone().or(stored.mac.clone());
        let mut password = self.config.password.clone().or(stored.password.clone());
        let mut fetched = false;

        if mac.is_none() {
            let Some(cloud) = cloud else {
                return Err(CoreError::MissingGatewayMac);
            };
            info!("no gateway MAC configured, asking the cloud");
            let gateway = self.cloud_client()?.first_gateway(cloud).await?;
            mac = Some(gateway.mac);
            if password.is_none() {
                password = gateway.password;
            }
            fetched = true;
        }
        let Some(mac) = mac else {
            return Err(CoreError::MissingGatewayMac);
        };

        let password = match password {
            Some(password) => password,
            None => {
                let Some(cloud) = cloud else {
                    return Err(CoreError::MissingPassword);
                };
                debug!(mac = %mac, "fetching gateway password from the cloud");
                fetched = true;
                self.cloud_client()?.gateway_password(cloud, &mac).await?
            }
        };

        let cached_local_ip = self.config.host.clone().or(stored.cached_local_ip.clone());
        let mut last_updated = stored.last_updated;

        if fetched {
            last_updated = Some(Utc::now());
            let record = StoredGateway {
                mac: Some(mac.clone()),
                password: Some(password.clone()),
                cached_local_ip: cached_local_ip.clone(),
                last_updated,
            };
            if let Err(e) = self.store.save(&record) {
                warn!(error = %e, "could not persist gateway credentials");
            }
        }

        Ok(GatewayCredentials {
            mac,
            password: PasswordSource::Direct(password),
            cached_local_ip,
            last_updated,
        })
    }

    async fn probe(&self, credentials: &GatewayCredentials, host: &str) -> bool {
        let mut config = self.connection_config(credentials, Some(host));
        config.keep_alive = None;
        let timeout = self.config.discovery.probe_timeout;

        let attempt = async {
            let (connection, _inbound) = TydomConnection::connect(&config, self.activity.clone()).await?;
            let result = connection.ping_and_wait_for_response(timeout, true).await;
            connection.disconnect();
            result
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(host, error = %e, "probe failed");
                false
            }
            Err(_) => {
                debug!(host, "probe timed out");
                false
            }
        }
    }

    async fn discover(&self, credentials: &GatewayCredentials) -> Vec<DiscoveryCandidate> {
        discovery::discover(
            &self.config.discovery,
            self.config.port.unwrap_or(DEFAULT_GATEWAY_PORT),
            credentials.cached_local_ip.as_deref(),
        )
        .await
    }

    async fn connect_local(
        &self,
        credentials: &GatewayCredentials,
        host: &str,
    ) -> Result<LiveConnection, CoreError> {
        self.open(self.connection_config(credentials, Some(host))).await
    }

    async fn connect_remote(&self, credentials: &GatewayCredentials) -> Result<LiveConnection, CoreError> {
        self.open(self.connection_config(credentials, None)).await
    }

    async fn persist_cached_ip(&self, credentials: &GatewayCredentials, host: &str) {
        let record = match self.store.load() {
            Ok(mut stored) => {
                stored.mac = Some(credentials.mac.clone());
                stored.cached_local_ip = Some(host.to_owned());
                stored.last_updated = Some(Utc::now());
                stored
            }
            Err(e) => {
                warn!(error = %e, "could not read credential store");
                return;
            }
        };
        match self.store.save(&record) {
            Ok(()) => debug!(host, "cached gateway IP updated"),
            Err(e) => warn!(host, error = %e, "could not persist gateway IP"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Scripted `ResolverIo`: hosts in `reachable` pass probes and local
    /// connects; the relay succeeds when `remote_ok` is set.
    #[derive(Default)]
    struct FakeIo {
        credentials: Option<GatewayCredentials>,
        candidates: Vec<DiscoveryCandidate>,
        reachable: HashSet<String>,
        remote_ok: bool,
        log: Mutex<Vec<String>>,
    }

    impl FakeIo {
        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl ResolverIo for FakeIo {
        type Connection = String;

        async fn load_credentials(&self) -> Result<GatewayCredentials, CoreError> {
            self.record("load".into());
            self.credentials.clone().ok_or(CoreError::MissingGatewayMac)
        }

        async fn probe(&self, _: &GatewayCredentials, host: &str) -> bool {
            self.record(format!("probe {host}"));
            self.reachable.contains(host)
        }

        async fn discover(&self, _: &GatewayCredentials) -> Vec<DiscoveryCandidate> {
            self.record("discover".into());
            self.candidates.clone()
        }

        async fn connect_local(&self, _: &GatewayCredentials, host: &str) -> Result<String, CoreError> {
            self.record(format!("local {host}"));
            if self.reachable.contains(host) {
                Ok(format!("local:{host}"))
            } else {
                Err(CoreError::ConnectionFailed {
                    host: host.into(),
                    reason: "refused".into(),
                })
            }
        }

        async fn connect_remote(&self, _: &GatewayCredentials) -> Result<String, CoreError> {
            self.record("remote".into());
            if self.remote_ok {
                Ok("remote".into())
            } else {
                Err(CoreError::AuthenticationFailed {
                    message: "bad digest".into(),
                })
            }
        }

        async fn persist_cached_ip(&self, _: &GatewayCredentials, host: &str) {
            self.record(format!("persist {host}"));
        }
    }

    fn credentials(cached: Option<&str>) -> GatewayCredentials {
        GatewayCredentials {
            mac: "001A25AABBCC".into(),
            password: PasswordSource::Direct(SecretString::from("pw")),
            cached_local_ip: cached.map(str::to_owned),
            last_updated: None,
        }
    }

    fn candidate(host: &str, method: DiscoveryMethod) -> DiscoveryCandidate {
        DiscoveryCandidate {
            host: host.into(),
            method,
        }
    }

    #[tokio::test]
    async fn cached_ip_wins_without_discovery() {
        let io = FakeIo {
            credentials: Some(credentials(Some("10.0.0.2"))),
            reachable: HashSet::from(["10.0.0.2".to_owned()]),
            ..FakeIo::default()
        };
        let resolved = resolve(&io, ConnectionOverride::None).await.unwrap();
        assert_eq!(resolved.connection, "local:10.0.0.2");
        assert_eq!(resolved.mode, ConnectionMode::Local);
        assert_eq!(io.log(), vec!["load", "probe 10.0.0.2", "local 10.0.0.2"]);
    }

    #[tokio::test]
    async fn discovery_skips_cached_candidate_and_persists_winner() {
        let io = FakeIo {
            credentials: Some(credentials(Some("10.0.0.2"))),
            candidates: vec![
                candidate("10.0.0.2", DiscoveryMethod::CachedIp),
                candidate("10.0.0.3", DiscoveryMethod::SubnetScan),
                candidate("10.0.0.4", DiscoveryMethod::Mdns),
            ],
            reachable: HashSet::from(["10.0.0.4".to_owned()]),
            ..FakeIo::default()
        };
        let resolved = resolve(&io, ConnectionOverride::ForceLocal).await.unwrap();
        assert_eq!(resolved.host, "10.0.0.4");
        assert_eq!(
            io.log(),
            vec![
                "load",
                "probe 10.0.0.2",
                "discover",
                "probe 10.0.0.3",
                "probe 10.0.0.4",
                "local 10.0.0.4",
                "persist 10.0.0.4",
            ]
        );
    }

    #[tokio::test]
    async fn nothing_local_falls_back_to_relay() {
        let io = FakeIo {
            credentials: Some(credentials(None)),
            remote_ok: true,
            ..FakeIo::default()
        };
        let resolved = resolve(&io, ConnectionOverride::None).await.unwrap();
        assert_eq!(resolved.mode, ConnectionMode::Remote);
        assert_eq!(resolved.host, tydom_api::connection::REMOTE_HOST);
        assert_eq!(io.log(), vec!["load", "discover", "remote"]);
    }

    #[tokio::test]
    async fn force_remote_never_touches_the_lan() {
        let io = FakeIo {
            credentials: Some(credentials(Some("10.0.0.2"))),
            reachable: HashSet::from(["10.0.0.2".to_owned()]),
            remote_ok: true,
            ..FakeIo::default()
        };
        let resolved = resolve(&io, ConnectionOverride::ForceRemote).await.unwrap();
        assert_eq!(resolved.connection, "remote");
        assert_eq!(io.log(), vec!["load", "remote"]);
    }

    #[tokio::test]
    async fn relay_failure_surfaces_its_error() {
        let io = FakeIo {
            credentials: Some(credentials(None)),
            ..FakeIo::default()
        };
        let err = resolve(&io, ConnectionOverride::ForceRemote).await.unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn credential_errors_are_returned_as_is() {
        let io = FakeIo::default();
        let err = resolve(&io, ConnectionOverride::None).await.unwrap_err();
        assert!(matches!(err, CoreError::MissingGatewayMac));
        assert_eq!(io.log(), vec!["load"]);
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryCredentialStore::default();
        store
            .save(&StoredGateway {
                mac: Some("AA".into()),
                cached_local_ip: Some("10.0.0.7".into()),
                ..StoredGateway::default()
            })
            .unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.cached_local_ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(loaded.mac.as_deref(), Some("AA"));
    }

    #[test]
    fn relay_connections_never_skip_certificate_checks() {
        let io = GatewayResolverIo::new(
            TydomConfig {
                tls: TlsMode::DangerAcceptInvalid,
                ..TydomConfig::default()
            },
            Arc::new(MemoryCredentialStore::default()),
            ActivityFlag::default(),
        );
        let creds = credentials(None);

        let local = io.connection_config(&creds, Some("10.0.0.2"));
        assert!(matches!(local.transport.tls, TlsMode::DangerAcceptInvalid));

        let remote = io.connection_config(&creds, None);
        assert!(matches!(remote.transport.tls, TlsMode::System));
    }

    #[test]
    fn preference_maps_to_override() {
        assert_eq!(ConnectionOverride::from(ConnectionPreference::Auto), ConnectionOverride::None);
        assert_eq!(
            ConnectionOverride::from(ConnectionPreference::Remote),
            ConnectionOverride::ForceRemote
        );
    }
}
