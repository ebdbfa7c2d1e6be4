//! Authenticated WebSocket session to a Tydom gateway.
//!
//! A connection is established in four steps:
//!
//! 1. Resolve the gateway password, either directly from configuration or
//!    through the cloud site lookup, on a throwaway HTTP session.
//! 2. Harvest a Digest challenge with an unauthenticated probe. The probe
//!    first carries WebSocket upgrade headers; some firmwares reject those,
//!    so it is retried once without them.
//! 3. Build the `Authorization` header with the realm forced to a fixed
//!    value per [`ConnectionMode`].
//! 4. Open the real WebSocket and spawn the reader, writer, and keep-alive
//!    tasks.
//!
//! In [`ConnectionMode::Remote`] every payload in either direction carries
//! a one-byte `0x02` relay prefix. Local sockets use no prefix.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::activity::ActivityFlag;
use crate::cloud::{CloudClient, CloudConfig, CloudCredentials};
use crate::command::TydomCommand;
use crate::digest::DigestChallenge;
use crate::error::Error;
use crate::http_frame::TydomRawMessage;
use crate::transport::{TlsMode, TransportConfig};

/// Cloud relay host used in [`ConnectionMode::Remote`].
pub const REMOTE_HOST: &str = "mediation.tydom.com";

/// Prefix byte carried by every relayed payload.
pub const RELAY_PREFIX: u8 = 0x02;

/// Capacity of the inbound frame queue.
///
/// The reader never blocks on it. When the consumer falls behind, the
/// newest frame is dropped, logged, and counted in
/// [`TydomConnection::dropped_frames`]; frames already queued keep their
/// order. Pong detection runs before queueing, so a dropped `/ping` reply
/// still completes [`TydomConnection::ping_and_wait_for_response`]. A
/// dropped transaction reply surfaces as a timeout at the caller.
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_PORT: u16 = 443;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Configuration ────────────────────────────────────────────────────

/// Which path the socket takes to reach the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionMode {
    /// Directly to the gateway on the LAN.
    Local,
    /// Through the vendor's cloud relay.
    Remote,
}

impl ConnectionMode {
    /// Realm substituted into the Digest challenge.
    ///
    /// The realm the gateway advertises is not the one it verifies.
    pub fn digest_realm(self) -> &'static str {
        match self {
            Self::Local => "protected area",
            Self::Remote => "ServiceMedia",
        }
    }

    fn frames_with_prefix(self) -> bool {
        matches!(self, Self::Remote)
    }
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Remote => "remote",
        })
    }
}

/// Where the gateway password comes from.
#[derive(Debug, Clone)]
pub enum PasswordSource {
    Direct(SecretString),
    Cloud {
        credentials: CloudCredentials,
        cloud: CloudConfig,
    },
}

/// Periodic ping settings.
#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    pub interval: Duration,
    /// Skip pings (but keep ticking) while the activity flag is false.
    pub only_when_active: bool,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            only_when_active: true,
        }
    }
}

/// Everything needed to open one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub mode: ConnectionMode,
    pub host: String,
    pub port: Option<u16>,
    /// Gateway MAC address; doubles as the Digest username.
    pub mac: String,
    pub password: PasswordSource,
    pub transport: TransportConfig,
    /// `false` switches to `http://`/`ws://` (test servers only).
    pub use_tls: bool,
    /// `None` disables the keep-alive loop.
    pub keep_alive: Option<KeepAliveConfig>,
}

impl ConnectionConfig {
    pub fn local(host: impl Into<String>, mac: impl Into<String>, password: PasswordSource) -> Self {
        Self {
            mode: ConnectionMode::Local,
            host: host.into(),
            port: None,
            mac: mac.into(),
            password,
            transport: TransportConfig::default(),
            use_tls: true,
            keep_alive: Some(KeepAliveConfig::default()),
        }
    }

    pub fn remote(mac: impl Into<String>, password: PasswordSource) -> Self {
        Self {
            mode: ConnectionMode::Remote,
            host: REMOTE_HOST.into(),
            ..Self::local(String::new(), mac, password)
        }
    }

    fn authority(&self) -> String {
        match self.port {
            Some(port) if port != DEFAULT_PORT || !self.use_tls => format!("{}:{port}", self.host),
            _ => self.host.clone(),
        }
    }

    /// Path and query shared by the probe, the Digest `uri`, and the socket.
    pub fn client_path(&self) -> String {
        format!("/mediation/client?mac={}&appli=1", self.mac)
    }

    fn http_url(&self) -> Result<Url, Error> {
        let scheme = if self.use_tls { "https" } else { "http" };
        Ok(Url::parse(&format!("{scheme}://{}{}", self.authority(), self.client_path()))?)
    }

    fn ws_url(&self) -> Result<Url, Error> {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        Ok(Url::parse(&format!("{scheme}://{}{}", self.authority(), self.client_path()))?)
    }
}

// ── TydomConnection ──────────────────────────────────────────────────

type DisconnectCallback = Box<dyn FnOnce() + Send>;

struct ConnectionInner {
    mode: ConnectionMode,
    host: String,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
    closed: AtomicBool,
    dropped_frames: AtomicU64,
    pong: Notify,
    on_disconnect: Mutex<Option<DisconnectCallback>>,
}

/// Live, authenticated socket to a gateway.
///
/// Cheaply cloneable. Frames read from the socket are delivered on the
/// receiver returned by [`connect`](Self::connect).
#[derive(Clone)]
pub struct TydomConnection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for TydomConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TydomConnection")
            .field("mode", &self.inner.mode)
            .field("host", &self.inner.host)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl TydomConnection {
    /// Authenticate and open the socket.
    ///
    /// Returns the connection handle and the inbound frame receiver.
    pub async fn connect(
        config: &ConnectionConfig,
        activity: ActivityFlag,
    ) -> Result<(Self, mpsc::Receiver<TydomRawMessage>), Error> {
        if config.mac.trim().is_empty() {
            return Err(Error::MissingCredentials);
        }

        let password = resolve_password(config).await?;
        let challenge = {
            let http = config.transport.build_client()?;
            fetch_challenge(&http, config).await?
        };

        let path = config.client_path();
        let authorization = challenge.with_realm(config.mode.digest_realm()).authorization(
            &config.mac,
            password.expose_secret(),
            "GET",
            &path,
            rand::random(),
        )?;

        let ws = open_websocket(config, &authorization).await?;
        info!(host = %config.host, mode = ?config.mode, "connected to gateway");

        Ok(Self::spawn(ws, config, activity))
    }

    fn spawn(
        ws: WsStream,
        config: &ConnectionConfig,
        activity: ActivityFlag,
    ) -> (Self, mpsc::Receiver<TydomRawMessage>) {
        let (sink, stream) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        let inner = Arc::new(ConnectionInner {
            mode: config.mode,
            host: config.host.clone(),
            outbound: outbound_tx,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            dropped_frames: AtomicU64::new(0),
            pong: Notify::new(),
            on_disconnect: Mutex::new(None),
        });

        tokio::spawn(write_loop(sink, outbound_rx, inner.cancel.clone()));
        tokio::spawn(read_loop(Arc::clone(&inner), stream, inbound_tx));
        if let Some(keep_alive) = config.keep_alive.clone() {
            tokio::spawn(keep_alive_loop(Arc::clone(&inner), keep_alive, activity));
        }

        (Self { inner }, inbound_rx)
    }

    pub fn mode(&self) -> ConnectionMode {
        self.inner.mode
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    /// Inbound frames dropped because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped_frames.load(Ordering::Relaxed)
    }

    /// Register the callback invoked once when the socket goes away.
    ///
    /// If the connection is already closed the callback runs immediately.
    pub fn on_disconnect(&self, callback: impl FnOnce() + Send + 'static) {
        if self.is_connected() {
            let mut slot = self
                .inner
                .on_disconnect
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *slot = Some(Box::new(callback));
            drop(slot);
            // Closed between the check and the store: run it now.
            if !self.is_connected() {
                self.inner.fire_disconnect_callback();
            }
        } else {
            callback();
        }
    }

    /// Send raw bytes as one binary frame.
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.inner.send(data.into()).await
    }

    /// Send text. The gateway only reads binary frames, so the text is
    /// framed the same way as [`send`](Self::send).
    pub async fn send_text(&self, text: &str) -> Result<(), Error> {
        self.inner.send(text.as_bytes().to_vec()).await
    }

    pub async fn send_command(&self, command: &TydomCommand) -> Result<(), Error> {
        debug!(command = %command, "sending command");
        self.inner.send(command.to_bytes()).await
    }

    /// Send a ping and wait for the `/ping` reply.
    ///
    /// With `close_on_success` the connection is torn down once the reply
    /// arrives, which turns this into a one-shot health probe.
    pub async fn ping_and_wait_for_response(
        &self,
        timeout: Duration,
        close_on_success: bool,
    ) -> Result<(), Error> {
        let notified = self.inner.pong.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        self.send_command(&TydomCommand::ping()).await?;

        tokio::time::timeout(timeout, notified)
            .await
            .map_err(|_| Error::ReceiveFailed(format!("no pong within {timeout:?}")))?;

        if close_on_success {
            self.disconnect();
        }
        Ok(())
    }

    /// Close the socket and stop every background task. Idempotent.
    pub fn disconnect(&self) {
        self.inner.close();
    }
}

impl ConnectionInner {
    async fn send(&self, mut data: Vec<u8>) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        if self.mode.frames_with_prefix() {
            data.insert(0, RELAY_PREFIX);
        }
        self.outbound
            .send(Message::binary(data))
            .await
            .map_err(|_| Error::NotConnected)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(host = %self.host, "disconnecting from gateway");
        self.cancel.cancel();
        self.fire_disconnect_callback();
    }

    fn fire_disconnect_callback(&self) {
        let callback = self
            .on_disconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Hand one inbound payload to the pipeline without ever blocking.
    fn dispatch(&self, mut data: Bytes, inbound: &mpsc::Sender<TydomRawMessage>) {
        if self.mode.frames_with_prefix() && data.first() == Some(&RELAY_PREFIX) {
            data = data.slice(1..);
        }

        let raw = TydomRawMessage::new(data);
        trace!(
            uri = raw.uri_origin.as_deref().unwrap_or("-"),
            transaction_id = raw.transaction_id.as_deref().unwrap_or("-"),
            "frame received"
        );

        if raw.uri_origin.as_deref() == Some("/ping") {
            self.pong.notify_waiters();
        }

        match inbound.try_send(raw) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(raw)) => {
                let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(uri = ?raw.uri_origin, dropped, "inbound queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("inbound receiver dropped");
            }
        }
    }
}

// ── Connect steps ────────────────────────────────────────────────────

async fn resolve_password(config: &ConnectionConfig) -> Result<SecretString, Error> {
    let password = match &config.password {
        PasswordSource::Direct(password) => password.clone(),
        PasswordSource::Cloud { credentials, cloud } => {
            // The cloud API has a real certificate, whatever the gateway has.
            let transport = TransportConfig {
                tls: TlsMode::System,
                timeout: config.transport.timeout,
            };
            let client = CloudClient::new(cloud.clone(), &transport)?;
            client.gateway_password(credentials, &config.mac).await?
        }
    };

    if password.expose_secret().is_empty() {
        return Err(Error::MissingPassword);
    }
    Ok(password)
}

/// Fetch the Digest challenge, retrying once without upgrade headers.
pub async fn fetch_challenge(
    http: &reqwest::Client,
    config: &ConnectionConfig,
) -> Result<DigestChallenge, Error> {
    let url = config.http_url()?;

    match request_challenge(http, &url, Some(&config.authority())).await {
        Ok(Some(header)) => return DigestChallenge::parse(&header),
        Ok(None) => debug!(url = %url, "no challenge with upgrade headers, retrying without"),
        Err(e) => debug!(url = %url, error = %e, "challenge probe with upgrade headers failed, retrying without"),
    }

    match request_challenge(http, &url, None).await {
        Ok(Some(header)) => DigestChallenge::parse(&header),
        Ok(None) => Err(Error::MissingChallenge),
        Err(e) => Err(Error::InvalidResponse(e.to_string())),
    }
}

async fn request_challenge(
    http: &reqwest::Client,
    url: &Url,
    upgrade_host: Option<&str>,
) -> Result<Option<String>, reqwest::Error> {
    let mut request = http.get(url.clone());
    if let Some(host) = upgrade_host {
        request = request
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13");
    }

    let response = request.send().await?;
    trace!(status = %response.status(), "challenge probe response");
    Ok(response
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned))
}

async fn open_websocket(config: &ConnectionConfig, authorization: &str) -> Result<WsStream, Error> {
    let url = config.ws_url()?;
    debug!(url = %url, "opening WebSocket");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;
    let request = ClientRequestBuilder::new(uri).with_header("Authorization", authorization);

    let connector = if config.use_tls {
        config.transport.websocket_connector()?
    } else {
        None
    };

    let connect = tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector);
    let (ws, _response) = tokio::time::timeout(config.transport.timeout, connect)
        .await
        .map_err(|_| Error::ReceiveFailed("timed out opening WebSocket".into()))?
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
    Ok(ws)
}

// ── Background tasks ─────────────────────────────────────────────────

async fn read_loop(
    inner: Arc<ConnectionInner>,
    mut stream: SplitStream<WsStream>,
    inbound: mpsc::Sender<TydomRawMessage>,
) {
    loop {
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Binary(data))) => inner.dispatch(data, &inbound),
                Some(Ok(Message::Text(text))) => {
                    inner.dispatch(Bytes::copy_from_slice(text.as_str().as_bytes()), &inbound);
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "gateway closed the socket");
                    break;
                }
                // Control frames are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket read error");
                    break;
                }
                None => break,
            }
        }
    }
    inner.close();
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        warn!(error = %e, "WebSocket write error");
                        cancel.cancel();
                        break;
                    }
                }
                None => break,
            }
        }
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "error closing WebSocket");
    }
}

async fn keep_alive_loop(inner: Arc<ConnectionInner>, config: KeepAliveConfig, activity: ActivityFlag) {
    loop {
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }

        if config.only_when_active && !activity.is_active() {
            trace!("inactive, skipping keep-alive ping");
            continue;
        }

        if let Err(e) = inner.send(TydomCommand::ping().to_bytes()).await {
            warn!(error = %e, "keep-alive ping failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn direct(password: &str) -> PasswordSource {
        PasswordSource::Direct(SecretString::from(password.to_owned()))
    }

    #[test]
    fn realm_is_fixed_per_mode() {
        assert_eq!(ConnectionMode::Local.digest_realm(), "protected area");
        assert_eq!(ConnectionMode::Remote.digest_realm(), "ServiceMedia");
    }

    #[test]
    fn remote_config_targets_relay() {
        let config = ConnectionConfig::remote("001A25010203", direct("pw"));
        assert_eq!(config.mode, ConnectionMode::Remote);
        assert_eq!(
            config.ws_url().unwrap().as_str(),
            "wss://mediation.tydom.com/mediation/client?mac=001A25010203&appli=1"
        );
    }

    #[test]
    fn plain_scheme_keeps_port() {
        let mut config = ConnectionConfig::local("127.0.0.1", "AA", direct("pw"));
        config.use_tls = false;
        config.port = Some(8080);
        assert_eq!(
            config.http_url().unwrap().as_str(),
            "http://127.0.0.1:8080/mediation/client?mac=AA&appli=1"
        );
        assert_eq!(
            config.ws_url().unwrap().as_str(),
            "ws://127.0.0.1:8080/mediation/client?mac=AA&appli=1"
        );
    }

    fn detached_inner(mode: ConnectionMode) -> ConnectionInner {
        let (outbound, _) = mpsc::channel(1);
        ConnectionInner {
            mode,
            host: "127.0.0.1".into(),
            outbound,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            dropped_frames: AtomicU64::new(0),
            pong: Notify::new(),
            on_disconnect: Mutex::new(None),
        }
    }

    fn response(uri: &str, transaction_id: &str) -> Bytes {
        Bytes::from(format!(
            "HTTP/1.1 200 OK\r\nUri-Origin: {uri}\r\nTransac-Id: {transaction_id}\r\nContent-Length: 0\r\n\r\n"
        ))
    }

    #[tokio::test]
    async fn full_inbound_queue_drops_newest_and_counts() {
        let inner = detached_inner(ConnectionMode::Remote);
        let (tx, mut rx) = mpsc::channel(2);

        let mut first = vec![RELAY_PREFIX];
        first.extend_from_slice(&response("/info", "1"));
        inner.dispatch(Bytes::from(first), &tx);
        inner.dispatch(response("/devices/data", "2"), &tx);
        inner.dispatch(response("/configs/file", "3"), &tx);
        inner.dispatch(response("/areas/data", "4"), &tx);

        assert_eq!(inner.dropped_frames.load(Ordering::Relaxed), 2);
        let kept: Vec<_> = [rx.recv().await.unwrap(), rx.recv().await.unwrap()]
            .into_iter()
            .map(|raw| raw.transaction_id.unwrap_or_default())
            .collect();
        assert_eq!(kept, vec!["1", "2"]);
        assert!(rx.try_recv().is_err());

        // Room again: the next frame goes through.
        inner.dispatch(response("/info", "5"), &tx);
        assert_eq!(rx.recv().await.unwrap().transaction_id.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn pong_is_seen_even_when_queue_is_full() {
        let inner = detached_inner(ConnectionMode::Local);
        let (tx, _rx) = mpsc::channel(1);
        inner.dispatch(response("/info", "1"), &tx);

        let notified = inner.pong.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        inner.dispatch(response("/ping", "2"), &tx);
        assert_eq!(inner.dropped_frames.load(Ordering::Relaxed), 1);
        tokio::time::timeout(Duration::from_secs(1), notified)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_password_is_rejected() {
        let config = ConnectionConfig::local("127.0.0.1", "AA", direct(""));
        assert!(matches!(resolve_password(&config).await, Err(Error::MissingPassword)));
    }

    #[tokio::test]
    async fn empty_mac_is_missing_credentials() {
        let config = ConnectionConfig::local("127.0.0.1", " ", direct("pw"));
        let result = TydomConnection::connect(&config, ActivityFlag::default()).await;
        assert!(matches!(result, Err(Error::MissingCredentials)));
    }
}
