/// Streaming transport to a remote inference service
///
/// A supervisor task owns the duplex channel: it connects, replays the
/// session handshake, pumps outbound messages and inbound events, and on an
/// unexpected close reconnects with linear backoff (attempt × base delay)
/// until the attempt cap, after which it reports a terminal failure and stops.

use crate::protocol::{ClientMessage, ServerMessage};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Transport closed")]
    Closed,
}

/// Reconnect policy and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportConfig {
    /// Reconnect attempts after a failure before giving up
    pub max_reconnect_attempts: u32,

    /// Base delay; attempt `n` waits `n * base`
    pub reconnect_base_delay_ms: u64,

    /// Upper bound on a single connection attempt
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            connect_timeout_ms: 5000,
        }
    }
}

impl TransportConfig {
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Delay before reconnect attempt `attempt` (1-based)
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    base * attempt
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect attempts exhausted; only a manual connect revives it
    Failed,
}

/// Events pushed to the transport's owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    Message(ServerMessage),
    /// Inbound payload that could not be parsed; it was dropped
    Malformed { error: String },
    /// Terminal: reconnect attempts exhausted
    Failed { attempts: u32 },
}

/// Bidirectional text channel to the inference peer
#[async_trait]
pub trait DuplexChannel: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound text payload; `None` once the peer has closed
    async fn recv_text(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the channel; never fails
    async fn close(&mut self);
}

/// Opens duplex channels
#[async_trait]
pub trait DuplexConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn DuplexChannel>, TransportError>;
}

/// WebSocket connector
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl DuplexConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn DuplexChannel>, TransportError> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Box::new(WsChannel { stream }))
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl DuplexChannel for WsChannel {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(
                        String::from_utf8(bytes).map_err(|e| TransportError::Receive(e.to_string())),
                    )
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue, // ping/pong
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("WebSocket close: {}", e);
        }
    }
}

struct Shared {
    state: Mutex<TransportState>,
    attempts: AtomicU32,
    handshake: Mutex<Vec<ClientMessage>>,
}

impl Shared {
    fn set_state(&self, state: TransportState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Transport state: {:?} -> {:?}", *current, state);
            *current = state;
        }
    }
}

struct Session {
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    task: JoinHandle<()>,
}

/// Reconnecting duplex transport
pub struct StreamingTransport {
    url: String,
    config: TransportConfig,
    connector: Arc<dyn DuplexConnector>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<TransportEvent>,
    session: Option<Session>,
}

impl StreamingTransport {
    /// Create a disconnected transport and the receiver for its events
    pub fn new(
        url: impl Into<String>,
        config: TransportConfig,
        connector: Arc<dyn DuplexConnector>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();

        let transport = Self {
            url: url.into(),
            config,
            connector,
            shared: Arc::new(Shared {
                state: Mutex::new(TransportState::Disconnected),
                attempts: AtomicU32::new(0),
                handshake: Mutex::new(Vec::new()),
            }),
            events,
            session: None,
        };

        (transport, events_rx)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> TransportState {
        *self.shared.state.lock()
    }

    /// Reconnect attempts made since the last successful connection
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Messages replayed after every successful (re)connect
    pub fn set_handshake(&self, messages: Vec<ClientMessage>) {
        *self.shared.handshake.lock() = messages;
    }

    fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.task.is_finished())
    }

    /// Start connecting in the background without waiting for the outcome
    pub fn open(&mut self) {
        if self.is_running() {
            return;
        }
        self.session = None;
        drop(self.spawn_supervisor());
    }

    /// Connect and wait for the first attempt to settle.
    ///
    /// A no-op when already connected. While a reconnect backoff is pending
    /// the old supervisor is replaced, so the attempt counter starts over. A
    /// failed attempt is returned to the caller and retried in the background
    /// per the backoff policy.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.is_running() && self.state() == TransportState::Connected {
            return Ok(());
        }

        self.shutdown_session().await;
        let first = self.spawn_supervisor();

        first.await.unwrap_or(Err(TransportError::Closed))
    }

    /// Queue a message for the peer
    pub fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        if self.state() != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }

        let session = self.session.as_ref().ok_or(TransportError::NotConnected)?;
        session
            .outbound
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    /// Tear down the connection and cancel any pending reconnect. Always safe.
    pub async fn disconnect(&mut self) {
        self.shutdown_session().await;
        self.shared.set_state(TransportState::Disconnected);
    }

    async fn shutdown_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            if let Err(e) = session.task.await {
                warn!("Transport task ended abnormally: {}", e);
            }
            info!(url = %self.url, "Transport disconnected");
        }
    }

    fn spawn_supervisor(&mut self) -> oneshot::Receiver<Result<(), TransportError>> {
        let (first_tx, first_rx) = oneshot::channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            url: self.url.clone(),
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            outbound_rx,
            cancel: cancel.clone(),
            first: Some(first_tx),
        };

        self.shared.attempts.store(0, Ordering::SeqCst);
        let task = tokio::spawn(supervisor.run());

        self.session = Some(Session {
            cancel,
            outbound,
            task,
        });

        first_rx
    }
}

impl Drop for StreamingTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
    }
}

enum SessionEnd {
    Cancelled,
    Closed(String),
}

struct Supervisor {
    url: String,
    config: TransportConfig,
    connector: Arc<dyn DuplexConnector>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound_rx: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: CancellationToken,
    first: Option<oneshot::Sender<Result<(), TransportError>>>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.shared.set_state(TransportState::Connecting);

            let timeout = self.config.connect_timeout();
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = tokio::time::timeout(timeout, self.connector.connect(&self.url)) => {
                    result.unwrap_or(Err(TransportError::Timeout(timeout)))
                }
            };

            match result {
                Ok(mut channel) => {
                    attempt = 0;
                    self.shared.attempts.store(0, Ordering::SeqCst);
                    while self.outbound_rx.try_recv().is_ok() {}

                    self.shared.set_state(TransportState::Connected);
                    info!(url = %self.url, "Transport connected");
                    self.settle_first(Ok(()));
                    self.emit(TransportEvent::Connected);

                    let end = self.run_session(channel.as_mut()).await;
                    channel.close().await;

                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Closed(reason) => {
                            warn!(url = %self.url, "Transport connection lost: {}", reason);
                            self.shared.set_state(TransportState::Disconnected);
                            self.emit(TransportEvent::Disconnected { reason });
                        }
                    }
                }
                Err(e) => {
                    warn!(url = %self.url, attempt, "Transport connection attempt failed: {}", e);
                    self.shared.set_state(TransportState::Disconnected);
                    self.settle_first(Err(e));
                }
            }

            attempt += 1;
            if attempt > self.config.max_reconnect_attempts {
                let attempts = attempt - 1;
                error!(url = %self.url, attempts, "Giving up on transport after reconnect attempts");
                self.shared.set_state(TransportState::Failed);
                self.emit(TransportEvent::Failed { attempts });
                return;
            }

            self.shared.attempts.store(attempt, Ordering::SeqCst);
            let delay = backoff_delay(attempt, self.config.reconnect_base_delay());
            debug!(attempt, ?delay, "Scheduling transport reconnect");
            self.emit(TransportEvent::Reconnecting { attempt, delay });

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.shared.set_state(TransportState::Disconnected);
    }

    async fn run_session(&mut self, channel: &mut dyn DuplexChannel) -> SessionEnd {
        let handshake = self.shared.handshake.lock().clone();
        for message in handshake {
            if let Err(reason) = send_message(channel, &message).await {
                return SessionEnd::Closed(reason);
            }
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    // Flush what was queued before the disconnect request
                    while let Ok(message) = self.outbound_rx.try_recv() {
                        if send_message(channel, &message).await.is_err() {
                            break;
                        }
                    }
                    return SessionEnd::Cancelled;
                }
                outbound = self.outbound_rx.recv() => match outbound {
                    Some(message) => {
                        if let Err(reason) = send_message(channel, &message).await {
                            return SessionEnd::Closed(reason);
                        }
                    }
                    None => return SessionEnd::Cancelled,
                },
                inbound = channel.recv_text() => match inbound {
                    None => return SessionEnd::Closed("peer closed the connection".to_string()),
                    Some(Err(e)) => return SessionEnd::Closed(e.to_string()),
                    Some(Ok(text)) => match ServerMessage::from_json(&text) {
                        Ok(message) => self.emit(TransportEvent::Message(message)),
                        Err(e) => {
                            warn!("Dropping malformed message from peer: {}", e);
                            self.emit(TransportEvent::Malformed { error: e.to_string() });
                        }
                    },
                },
            }
        }
    }

    fn settle_first(&mut self, result: Result<(), TransportError>) {
        if let Some(first) = self.first.take() {
            let _ = first.send(result);
        }
    }

    fn emit(&self, event: TransportEvent) {
        // Owner may already be gone during teardown
        let _ = self.events.send(event);
    }
}

async fn send_message(channel: &mut dyn DuplexChannel, message: &ClientMessage) -> Result<(), String> {
    let text = message.to_json().map_err(|e| e.to_string())?;
    channel.send_text(text).await.map_err(|e| e.to_string())
}
