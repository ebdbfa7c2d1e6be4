// ── Resolution state machine ──
//
// Pure: `transition` maps (state, event) to (state, actions). The
// interpreter in `super` performs the actions and feeds results back as
// events. Nothing here touches the network.

use chrono::{DateTime, Utc};
use strum::Display;

use tydom_api::{ConnectionMode, PasswordSource};

/// Which transports the resolver may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ConnectionOverride {
    /// Local first, relay as fallback.
    #[default]
    None,
    ForceLocal,
    /// Skip every local phase.
    ForceRemote,
}

/// Credentials for one resolution attempt.
#[derive(Debug, Clone)]
pub struct GatewayCredentials {
    pub mac: String,
    pub password: PasswordSource,
    pub cached_local_ip: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ResolverPhase {
    Idle,
    LoadingCredentials,
    TryingCachedIp { host: String },
    DiscoveringLocal,
    ConnectingLocal { host: String },
    ConnectingRemote,
    Connected { mode: ConnectionMode, host: String },
    Failed { reason: String },
}

impl ResolverPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ResolverState {
    pub phase: ResolverPhase,
    pub connection_override: ConnectionOverride,
    pub credentials: Option<GatewayCredentials>,
}

impl ResolverState {
    pub fn new(connection_override: ConnectionOverride) -> Self {
        Self {
            phase: ResolverPhase::Idle,
            connection_override,
            credentials: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResolverEvent {
    Start,
    CredentialsLoaded(Option<GatewayCredentials>),
    CachedIpProbed { success: bool },
    LocalDiscovered(Option<String>),
    LocalConnectResult { success: bool, host: String },
    RemoteConnectResult { success: bool, reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverAction {
    LoadCredentials,
    ProbeCachedIp { host: String },
    DiscoverLocal,
    ConnectLocal { host: String },
    ConnectRemote,
    PersistCachedIp { host: String },
}

/// Advance the machine by one event.
///
/// Events that make no sense in the current phase leave the state as is
/// and produce no actions.
pub fn transition(
    mut state: ResolverState,
    event: ResolverEvent,
) -> (ResolverState, Vec<ResolverAction>) {
    use ResolverAction as A;
    use ResolverEvent as E;
    use ResolverPhase as P;

    let (phase, actions) = match (&state.phase, event) {
        (P::Idle, E::Start) => (P::LoadingCredentials, vec![A::LoadCredentials]),

        (P::LoadingCredentials, E::CredentialsLoaded(None)) => (
            P::Failed {
                reason: "gateway credentials unavailable".into(),
            },
            vec![],
        ),
        (P::LoadingCredentials, E::CredentialsLoaded(Some(credentials))) => {
            let cached = credentials.cached_local_ip.clone();
            state.credentials = Some(credentials);
            match (state.connection_override, cached) {
                (ConnectionOverride::ForceRemote, _) => (P::ConnectingRemote, vec![A::ConnectRemote]),
                (_, Some(host)) => (
                    P::TryingCachedIp { host: host.clone() },
                    vec![A::ProbeCachedIp { host }],
                ),
                (_, None) => (P::DiscoveringLocal, vec![A::DiscoverLocal]),
            }
        }

        (P::TryingCachedIp { host }, E::CachedIpProbed { success: true }) => {
            let host = host.clone();
            (P::ConnectingLocal { host: host.clone() }, vec![A::ConnectLocal { host }])
        }
        (P::TryingCachedIp { .. }, E::CachedIpProbed { success: false }) => {
            (P::DiscoveringLocal, vec![A::DiscoverLocal])
        }

        (P::DiscoveringLocal, E::LocalDiscovered(Some(host))) => {
            (P::ConnectingLocal { host: host.clone() }, vec![A::ConnectLocal { host }])
        }
        (P::DiscoveringLocal, E::LocalDiscovered(None)) => (P::ConnectingRemote, vec![A::ConnectRemote]),

        (P::ConnectingLocal { .. }, E::LocalConnectResult { success: true, host }) => {
            let known = state
                .credentials
                .as_ref()
                .and_then(|c| c.cached_local_ip.as_deref());
            let actions = if known == Some(host.as_str()) {
                vec![]
            } else {
                vec![A::PersistCachedIp { host: host.clone() }]
            };
            (
                P::Connected {
                    mode: ConnectionMode::Local,
                    host,
                },
                actions,
            )
        }
        (P::ConnectingLocal { .. }, E::LocalConnectResult { success: false, .. }) => {
            (P::ConnectingRemote, vec![A::ConnectRemote])
        }

        (P::ConnectingRemote, E::RemoteConnectResult { success: true, .. }) => (
            P::Connected {
                mode: ConnectionMode::Remote,
                host: tydom_api::connection::REMOTE_HOST.into(),
            },
            vec![],
        ),
        (P::ConnectingRemote, E::RemoteConnectResult { success: false, reason }) => (
            P::Failed {
                reason: reason.unwrap_or_else(|| "remote connection failed".into()),
            },
            vec![],
        ),

        (phase, _) => (phase.clone(), vec![]),
    };

    state.phase = phase;
    (state, actions)
}
