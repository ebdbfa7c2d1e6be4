// ── Controller facade ──
//
// Full lifecycle for one gateway: resolution, the inbound
// decode/hydrate pipeline, effect execution, background polling, and
// request/reply correlation.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use tydom_api::{ActivityFlag, ConnectionMode, TydomCommand, TydomConnection, TydomRawMessage};

use crate::cache::{DeviceMetadata, DeviceMetadataCache, ScenarioMetadataCache, SuppressionQuery};
use crate::config::TydomConfig;
use crate::decode::decode;
use crate::effects::{EffectContext, EffectExecutor};
use crate::error::CoreError;
use crate::hydrate::{HydratedMessage, Hydrator};
use crate::message::{ScenarioMetadata, TydomMessage, TydomMessageEffect};
use crate::resolver::{self, CredentialStore, GatewayResolverIo, MemoryCredentialStore, StoredGateway};
use crate::schedule::{CommandSink, PollScheduler, PostCommandPolling, ReplyAccumulator};
use crate::stream::MessageStream;

const MESSAGE_CHANNEL_SIZE: usize = 256;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Resolving,
    Connected { mode: ConnectionMode, host: String },
    Failed { reason: String },
}

// ── SharedConnection ─────────────────────────────────────────────────

/// The current socket, if any. Schedulers hold this rather than a
/// connection so they survive reconnects.
#[derive(Debug, Default)]
pub struct SharedConnection {
    current: RwLock<Option<TydomConnection>>,
}

impl SharedConnection {
    fn get(&self) -> Option<TydomConnection> {
        self.current.read().ok().and_then(|c| c.clone())
    }

    fn replace(&self, connection: Option<TydomConnection>) -> Option<TydomConnection> {
        match self.current.write() {
            Ok(mut current) => std::mem::replace(&mut *current, connection),
            Err(_) => None,
        }
    }
}

impl CommandSink for SharedConnection {
    async fn send_command(&self, command: &TydomCommand) -> Result<(), CoreError> {
        let connection = self.get().ok_or(CoreError::ControllerDisconnected)?;
        connection.send_command(command).await?;
        Ok(())
    }
}

// ── Tydom ────────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable. Does not connect until [`connect`](Self::connect).
#[derive(Clone)]
pub struct Tydom {
    inner: Arc<TydomInner>,
}

struct TydomInner {
    config: TydomConfig,
    credentials: Arc<dyn CredentialStore>,
    activity: ActivityFlag,
    connection: Arc<SharedConnection>,
    devices: Arc<DeviceMetadataCache>,
    scenarios: Arc<ScenarioMetadataCache>,
    polls: Arc<PollScheduler<SharedConnection>>,
    post_command: Arc<PostCommandPolling<SharedConnection>>,
    replies: Arc<ReplyAccumulator>,
    executor: RwLock<Option<EffectExecutor>>,
    connection_state: Arc<watch::Sender<ConnectionState>>,
    last_pong: Arc<watch::Sender<Option<DateTime<Utc>>>>,
    message_tx: broadcast::Sender<Arc<TydomMessage>>,
    session: RwLock<Option<CancellationToken>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Tydom {
    /// Controller with an in-memory credential store seeded from `config`.
    pub fn new(config: TydomConfig) -> Self {
        let seed = StoredGateway {
            mac: config.mac.clone(),
            password: config.password.clone(),
            cached_local_ip: config.host.clone(),
            last_updated: None,
        };
        Self::with_credential_store(config, Arc::new(MemoryCredentialStore::new(seed)))
    }

    pub fn with_credential_store(config: TydomConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        let activity = ActivityFlag::new(true);
        let connection = Arc::new(SharedConnection::default());
        let polls = Arc::new(PollScheduler::new(Arc::clone(&connection), activity.clone()));
        let post_command = Arc::new(PostCommandPolling::new(
            Arc::clone(&connection),
            activity.clone(),
            config.post_command.clone(),
        ));
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (last_pong, _) = watch::channel(None);
        let (message_tx, _) = broadcast::channel(MESSAGE_CHANNEL_SIZE);

        Self {
            inner: Arc::new(TydomInner {
                config,
                credentials,
                activity,
                connection,
                devices: Arc::new(DeviceMetadataCache::new()),
                scenarios: Arc::new(ScenarioMetadataCache::new()),
                polls,
                post_command,
                replies: Arc::new(ReplyAccumulator::new()),
                executor: RwLock::new(None),
                connection_state: Arc::new(connection_state),
                last_pong: Arc::new(last_pong),
                message_tx,
                session: RwLock::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &TydomConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Resolve the gateway, open the socket, start the pipeline, and
    /// request the initial state.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.inner.connection_state.send_replace(ConnectionState::Resolving);

        let io = GatewayResolverIo::new(
            self.inner.config.clone(),
            Arc::clone(&self.inner.credentials),
            self.inner.activity.clone(),
        );
        let resolved = match resolver::resolve(&io, self.inner.config.mode.into()).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.inner.connection_state.send_replace(ConnectionState::Failed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        let (connection, inbound) = resolved.connection;

        let state = Arc::clone(&self.inner.connection_state);
        connection.on_disconnect(move || {
            state.send_if_modified(|current| {
                if matches!(current, ConnectionState::Connected { .. }) {
                    *current = ConnectionState::Disconnected;
                    true
                } else {
                    false
                }
            });
        });
        if let Some(previous) = self.inner.connection.replace(Some(connection)) {
            previous.disconnect();
        }

        self.start_session(inbound).await;

        self.inner.connection_state.send_replace(ConnectionState::Connected {
            mode: resolved.mode,
            host: resolved.host.clone(),
        });
        info!(mode = ?resolved.mode, host = %resolved.host, "connected to gateway");

        for command in initial_sync() {
            self.inner.connection.send_command(&command).await?;
        }
        Ok(())
    }

    async fn start_session(&self, inbound: mpsc::Receiver<TydomRawMessage>) {
        let cancel = CancellationToken::new();
        let previous = self
            .inner
            .session
            .write()
            .ok()
            .and_then(|mut session| session.replace(cancel.clone()));
        if let Some(previous) = previous {
            previous.cancel();
        }

        let (executor, executor_handle) = EffectExecutor::spawn(
            EffectContext {
                sink: Arc::clone(&self.inner.connection),
                polls: Arc::clone(&self.inner.polls),
                replies: Arc::clone(&self.inner.replies),
                activity: self.inner.activity.clone(),
                last_pong: Arc::clone(&self.inner.last_pong),
                polling_enabled: self.inner.config.polling.enabled,
                poll_interval: self.inner.config.polling.interval,
            },
            cancel.clone(),
        );
        if let Ok(mut slot) = self.inner.executor.write() {
            *slot = Some(executor.clone());
        }

        let suppression: Arc<dyn SuppressionQuery> = self.inner.post_command.clone();
        let hydrator = Hydrator::new(
            self.inner.devices.clone(),
            self.inner.scenarios.clone(),
            suppression,
        );

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(executor_handle);
        handles.push(tokio::spawn(pipeline_task(
            inbound,
            hydrator,
            executor,
            self.inner.message_tx.clone(),
            cancel,
        )));
    }

    /// Close the socket and stop every background task.
    pub async fn disconnect(&self) {
        let session = self.inner.session.write().ok().and_then(|mut s| s.take());
        if let Some(cancel) = session {
            cancel.cancel();
        }
        self.inner.polls.stop_all();
        self.inner.post_command.stop_all();
        if let Ok(mut executor) = self.inner.executor.write() {
            *executor = None;
        }
        if let Some(connection) = self.inner.connection.replace(None) {
            connection.disconnect();
        }

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        self.inner.connection_state.send_replace(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    /// One-shot: connect, run closure, disconnect.
    ///
    /// Background polling and the keep-alive are disabled since only a
    /// few request/response cycles are needed.
    pub async fn oneshot<F, Fut, T, E>(
        config: TydomConfig,
        credentials: Arc<dyn CredentialStore>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Tydom) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: From<CoreError>,
    {
        let mut cfg = config;
        cfg.polling.enabled = false;
        cfg.keep_alive = None;

        let tydom = Tydom::with_credential_store(cfg, credentials);
        tydom.connect().await?;
        let result = f(tydom.clone()).await;
        tydom.disconnect().await;
        result
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Send a command. Writes to a device endpoint start post-command
    /// polling of that endpoint.
    ///
    /// Returns the command's transaction id.
    pub async fn send(&self, command: TydomCommand) -> Result<String, CoreError> {
        self.inner.connection.send_command(&command).await?;

        if let Some((device_id, endpoint_id)) = command.device_data_target() {
            self.inner.post_command.start(device_id, endpoint_id);
        }
        Ok(command.transaction_id)
    }

    /// Send a command and wait for the message carrying its transaction id.
    pub async fn request(&self, command: TydomCommand, timeout: Duration) -> Result<Arc<TydomMessage>, CoreError> {
        let mut messages = self.inner.message_tx.subscribe();
        let transaction_id = self.send(command).await?;

        let wait = async {
            loop {
                match messages.recv().await {
                    Ok(message) if message.transaction_id() == Some(transaction_id.as_str()) => {
                        return Ok(message);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "request waiter lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(CoreError::ControllerDisconnected);
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| CoreError::Timeout {
            timeout_secs: timeout.as_secs(),
        })?
    }

    /// Send a command whose acknowledgement arrives as cdata reply chunks
    /// (alarm commands) and collect the entries.
    pub async fn send_and_wait_reply(&self, command: TydomCommand, timeout: Duration) -> Result<Vec<Value>, CoreError> {
        let transaction_id = command.transaction_id.clone();
        let reply = self.inner.replies.register(&transaction_id);

        if let Err(e) = self.send(command).await {
            self.inner.replies.cancel(&transaction_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(entries)) => Ok(entries),
            Ok(Err(_)) => Err(CoreError::ControllerDisconnected),
            Err(_) => {
                self.inner.replies.cancel(&transaction_id);
                Err(CoreError::Timeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Ask the gateway to re-announce everything, then poll every
    /// scheduled cdata URL once.
    pub fn refresh_all(&self) -> Result<(), CoreError> {
        let executor = self
            .inner
            .executor
            .read()
            .ok()
            .and_then(|e| e.clone())
            .ok_or(CoreError::ControllerDisconnected)?;
        executor.enqueue([TydomMessageEffect::RefreshAll]);
        Ok(())
    }

    // ── Activity ─────────────────────────────────────────────────────

    /// Gate every periodic sender. While inactive, loops keep ticking but
    /// send nothing.
    pub fn set_active(&self, active: bool) {
        trace!(active, "activity changed");
        self.inner.activity.set_active(active);
    }

    pub fn is_active(&self) -> bool {
        self.inner.activity.is_active()
    }

    // ── State observation ────────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            *self.inner.connection_state.borrow(),
            ConnectionState::Connected { .. }
        )
    }

    /// When the gateway last answered a ping.
    pub fn last_pong(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_pong.borrow()
    }

    pub fn subscribe_pong(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.inner.last_pong.subscribe()
    }

    pub fn messages(&self) -> broadcast::Receiver<Arc<TydomMessage>> {
        self.inner.message_tx.subscribe()
    }

    pub fn message_stream(&self) -> MessageStream {
        MessageStream::new(self.inner.message_tx.subscribe())
    }

    // ── Snapshots ────────────────────────────────────────────────────

    pub fn device_metadata(&self) -> Vec<DeviceMetadata> {
        self.inner.devices.snapshot()
    }

    pub fn scenario_metadata(&self) -> Vec<ScenarioMetadata> {
        self.inner.scenarios.snapshot()
    }

    pub fn scheduled_polls(&self) -> Vec<String> {
        self.inner.polls.scheduled_urls()
    }

    pub fn post_command_targets(&self) -> Vec<String> {
        self.inner.post_command.active_targets()
    }
}

/// Requests sent right after connecting, in order.
pub fn initial_sync() -> Vec<TydomCommand> {
    vec![
        TydomCommand::info(),
        TydomCommand::configs_file(),
        TydomCommand::devices_meta(),
        TydomCommand::devices_cmeta(),
        TydomCommand::devices_data(),
        TydomCommand::scenarios_file(),
        TydomCommand::groups_file(),
        TydomCommand::moments_file(),
        TydomCommand::areas_data(),
    ]
}

// ── Background tasks ─────────────────────────────────────────────────

/// Decode, hydrate, enqueue effects, broadcast. Never waits on a send.
async fn pipeline_task(
    mut inbound: mpsc::Receiver<TydomRawMessage>,
    hydrator: Hydrator,
    executor: EffectExecutor,
    messages: broadcast::Sender<Arc<TydomMessage>>,
    cancel: CancellationToken,
) {
    loop {
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            raw = inbound.recv() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };

        trace!(
            uri = raw.uri_origin.as_deref().unwrap_or("-"),
            transaction_id = raw.transaction_id.as_deref().unwrap_or("-"),
            "inbound frame"
        );
        if let Some(error) = &raw.parse_error {
            debug!(error = %error, "unparseable frame passed through raw");
        }

        let HydratedMessage { message, effects } = hydrator.hydrate(decode(&raw));
        executor.enqueue(effects);
        // No subscribers is fine.
        let _ = messages.send(Arc::new(message));
    }
    debug!("message pipeline exiting");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn initial_sync_order() {
        let paths: Vec<String> = initial_sync().into_iter().map(|c| c.path).collect();
        assert_eq!(
            paths,
            vec![
                "/info",
                "/configs/file",
                "/devices/meta",
                "/devices/cmeta",
                "/devices/data",
                "/scenarios/file",
                "/groups/file",
                "/moments/file",
                "/areas/data",
            ]
        );
    }

    #[tokio::test]
    async fn commands_fail_while_disconnected() {
        let tydom = Tydom::new(TydomConfig::default());
        let err = tydom.send(TydomCommand::info()).await.unwrap_err();
        assert!(matches!(err, CoreError::ControllerDisconnected));
        assert!(matches!(tydom.refresh_all(), Err(CoreError::ControllerDisconnected)));
        assert!(!tydom.is_connected());
    }

    #[tokio::test]
    async fn missing_mac_fails_resolution() {
        let tydom = Tydom::new(TydomConfig::default());
        let err = tydom.connect().await.unwrap_err();
        assert!(matches!(err, CoreError::MissingGatewayMac));
        assert!(matches!(
            *tydom.connection_state().borrow(),
            ConnectionState::Failed { .. }
        ));
    }
}
