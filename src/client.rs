//! GMScreen session client.
//!
//! This module owns the TCP session to one set-top box: the full handshake,
//! the silent (handshake-less) reconnect used to recover a dead socket, and
//! the lock-step request/response primitives everything else builds on.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::codec::{Command, StbCodec};
use crate::error::{Result, StbError};
use crate::types::{Endpoint, DEFAULT_PORT};

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 5;

/// Default read timeout backstop in seconds.
pub const DEFAULT_READ_TIMEOUT: u64 = 15;

/// Default channels requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Channel count assumed when the device does not report one.
pub const DEFAULT_FALLBACK_CHANNEL_COUNT: u32 = 3500;

/// Consecutive empty pages that end a channel load.
pub const DEFAULT_MAX_EMPTY_PAGES: u32 = 3;

/// Device model announced in the identify command.
pub const DEFAULT_DEVICE_MODEL: &str = "stb-gmscreen";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Device address
    pub endpoint: Endpoint,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Upper bound on any single wait for a response
    pub read_timeout: Duration,
    /// Pause after the identify command
    pub identify_delay: Duration,
    /// Pause after the status command
    pub status_delay: Duration,
    /// Wait for the handshake response that is read and discarded
    pub handshake_timeout: Duration,
    /// Pause between sending a request and reading its response
    pub command_pacing: Duration,
    /// Model string announced in the identify command
    pub device_model: String,
    /// Wait for the favorite group list
    pub favorites_timeout: Duration,
    /// Wait for device info
    pub info_timeout: Duration,
    /// Wait for one channel page
    pub page_timeout: Duration,
    /// Wait for the device clock
    pub time_timeout: Duration,
    /// Channels per page
    pub page_size: u32,
    /// Channel count used when device info has none
    pub fallback_channel_count: u32,
    /// Consecutive empty pages before the load stops
    pub max_empty_pages: u32,
    /// Cooldown after a zap before the next one is accepted
    pub zap_settle: Duration,
    /// Pause between favorite writes
    pub favorite_pacing: Duration,
}

impl ClientConfig {
    /// Create a new configuration for the given host, `host:port` accepted.
    pub fn new(address: &str) -> Self {
        Self {
            endpoint: Endpoint::from(address),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT),
            identify_delay: Duration::from_millis(200),
            status_delay: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(2),
            command_pacing: Duration::from_millis(300),
            device_model: DEFAULT_DEVICE_MODEL.to_string(),
            favorites_timeout: Duration::from_secs(5),
            info_timeout: Duration::from_secs(5),
            page_timeout: Duration::from_secs(8),
            time_timeout: Duration::from_secs(3),
            page_size: DEFAULT_PAGE_SIZE,
            fallback_channel_count: DEFAULT_FALLBACK_CHANNEL_COUNT,
            max_empty_pages: DEFAULT_MAX_EMPTY_PAGES,
            zap_settle: Duration::from_millis(400),
            favorite_pacing: Duration::from_millis(150),
        }
    }

    /// Set the device port.
    pub fn port(mut self, port: u16) -> Self {
        self.endpoint.port = port;
        self
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout backstop.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the model string announced during the handshake.
    pub fn device_model(mut self, model: impl Into<String>) -> Self {
        self.device_model = model.into();
        self
    }

    /// Set the pause between a request and its read.
    pub fn command_pacing(mut self, pacing: Duration) -> Self {
        self.command_pacing = pacing;
        self
    }

    /// Set both handshake pauses.
    pub fn handshake_delays(mut self, identify: Duration, status: Duration) -> Self {
        self.identify_delay = identify;
        self.status_delay = status;
        self
    }

    /// Set the wait for the discarded handshake response.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the wait for one channel page.
    pub fn page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    /// Set the waits for favorite groups and device info.
    pub fn lookup_timeouts(mut self, favorites: Duration, info: Duration) -> Self {
        self.favorites_timeout = favorites;
        self.info_timeout = info;
        self
    }

    /// Set the channels requested per page.
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Set the channel count assumed when device info has none.
    pub fn fallback_channel_count(mut self, count: u32) -> Self {
        self.fallback_channel_count = count;
        self
    }

    /// Set the consecutive empty pages that end a load.
    pub fn max_empty_pages(mut self, pages: u32) -> Self {
        self.max_empty_pages = pages.max(1);
        self
    }

    /// Set the zap cooldown.
    pub fn zap_settle(mut self, settle: Duration) -> Self {
        self.zap_settle = settle;
        self
    }

    /// Set the pause between favorite writes.
    pub fn favorite_pacing(mut self, pacing: Duration) -> Self {
        self.favorite_pacing = pacing;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(&format!("192.168.1.12:{DEFAULT_PORT}"))
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket
    Disconnected,
    /// Socket open and handshake completed
    Connected,
    /// Socket open without handshake (silent reconnect)
    SilentlyConnected,
}

impl ConnectionState {
    /// Whether a socket is open.
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

/// GMScreen session client.
///
/// Owns at most one socket. Opening a connection always tears down the
/// previous one, together with any buffered response bytes.
pub struct StbClient {
    config: ClientConfig,
    state: ConnectionState,
    framed: Option<Framed<TcpStream, StbCodec>>,
    instance_id: String,
}

impl StbClient {
    /// Create a new client. Nothing is opened until [`connect`](Self::connect).
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            framed: None,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a socket is open, with or without handshake.
    pub fn is_connected(&self) -> bool {
        self.state.is_open() && self.framed.is_some()
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Device endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    /// Point the client at another device. Takes effect on the next connect.
    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.config.endpoint = endpoint;
    }

    /// Random id announced during the handshake, stable for this client.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Connect with the full identify/status handshake.
    ///
    /// On failure the client is left disconnected.
    pub async fn connect(&mut self) -> Result<()> {
        self.disconnect();

        let address = self.config.endpoint.to_string();
        match self.handshake().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                info!(%address, "connected");
                Ok(())
            }
            Err(e) => {
                self.disconnect();
                warn!(%address, error = %e, "connection failed");
                Err(StbError::connect(address, e))
            }
        }
    }

    /// Open the socket without any handshake.
    ///
    /// Replaying the handshake mid-session puts the device into its
    /// initializing screen, so dead sockets are recovered this way.
    pub async fn reconnect_silent(&mut self) -> Result<()> {
        self.disconnect();

        let address = self.config.endpoint.to_string();
        match self.open_stream().await {
            Ok(stream) => {
                self.framed = Some(Framed::new(stream, StbCodec::new()));
                self.state = ConnectionState::SilentlyConnected;
                debug!(%address, "silent reconnect");
                Ok(())
            }
            Err(e) => {
                warn!(%address, error = %e, "silent reconnect failed");
                Err(StbError::connect(address, e))
            }
        }
    }

    /// Close the socket and drop buffered bytes. Always safe to call.
    pub fn disconnect(&mut self) {
        if self.framed.take().is_some() {
            debug!("socket closed");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Send one command.
    ///
    /// Returns false on any failure, after which the connection is treated
    /// as dead.
    pub async fn send(&mut self, command: &Command) -> bool {
        let Some(framed) = self.framed.as_mut() else {
            warn!(code = %command.code, "send without connection");
            return false;
        };

        match framed.send(command.clone()).await {
            Ok(()) => {
                debug!(code = %command.code, "sent");
                true
            }
            Err(e) => {
                warn!(code = %command.code, error = %e, "send failed");
                self.disconnect();
                false
            }
        }
    }

    /// Send a command, reconnecting silently and sending once more on failure.
    ///
    /// The second attempt's result is final.
    pub async fn send_with_retry(&mut self, command: &Command) -> bool {
        if self.send(command).await {
            return true;
        }

        warn!(code = %command.code, "command failed, forcing silent reconnect");
        if self.reconnect_silent().await.is_err() {
            return false;
        }
        self.send(command).await
    }

    /// Send a command and wait for its response.
    ///
    /// Returns the inflated response text, or `None` on send failure,
    /// timeout, closed connection or a corrupt payload.
    pub async fn send_and_await(&mut self, command: &Command, wait: Duration) -> Option<String> {
        self.discard_pending().await;

        if !self.send(command).await {
            return None;
        }
        if !self.config.command_pacing.is_zero() {
            sleep(self.config.command_pacing).await;
        }

        match self.recv_response(wait).await {
            Ok(text) => {
                trace!(code = %command.code, len = text.len(), "response");
                Some(text)
            }
            Err(e) => {
                warn!(code = %command.code, error = %e, "no usable response");
                None
            }
        }
    }

    /// Ensure a socket is open, running the full handshake if none is.
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.connect().await
    }

    /// Ensure a socket is open, reconnecting silently if none is.
    pub async fn ensure_silent_connection(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.reconnect_silent().await
    }

    // Internal methods

    async fn open_stream(&self) -> Result<TcpStream> {
        let target = self.config.endpoint.to_string();
        let connect = async {
            let addr = lookup_host(&target).await?.next().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "address did not resolve")
            })?;
            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            socket.set_keepalive(true)?;
            socket.connect(addr).await
        };

        let stream = timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| StbError::ConnectionTimeout)??;
        stream.set_nodelay(true).ok();
        Ok(stream)
    }

    async fn handshake(&mut self) -> Result<()> {
        let stream = self.open_stream().await?;
        self.framed = Some(Framed::new(stream, StbCodec::new()));

        let identify = Command::identify(&self.config.device_model, &self.instance_id);
        if !self.send(&identify).await {
            return Err(StbError::Send);
        }
        sleep(self.config.identify_delay).await;

        if !self.send(&Command::status()).await {
            return Err(StbError::Send);
        }
        sleep(self.config.status_delay).await;

        // Handshake responses carry nothing we use
        if let Err(e) = self.recv_response(self.config.handshake_timeout).await {
            trace!(error = %e, "no handshake response");
        }
        Ok(())
    }

    async fn recv_response(&mut self, wait: Duration) -> Result<String> {
        let wait = wait.min(self.config.read_timeout);
        let framed = self.framed.as_mut().ok_or(StbError::NotConnected)?;

        match timeout(wait, framed.next()).await {
            Ok(Some(Ok(envelope))) => envelope.inflate(),
            Ok(Some(Err(e))) => {
                self.disconnect();
                Err(e)
            }
            Ok(None) => {
                debug!("connection closed by device");
                self.disconnect();
                Err(StbError::NotConnected)
            }
            Err(_) => Err(StbError::NoResponse),
        }
    }

    /// Drop responses that are already readable, without waiting.
    ///
    /// Zap, favorite writes and the handshake leave their answers unread;
    /// they must not be taken for the answer to the next request.
    async fn discard_pending(&mut self) {
        let Some(framed) = self.framed.as_mut() else {
            return;
        };

        let mut discarded = 0usize;
        while let Ok(Some(Ok(_))) = timeout(Duration::ZERO, framed.next()).await {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(discarded, "dropped stale responses");
        }
    }
}
