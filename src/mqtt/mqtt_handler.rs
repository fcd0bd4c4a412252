//! # Bridge Connection Driver
//!
//! Runs the [`ConnectionManager`] against a real WebSocket. One tokio task owns
//! the socket, the reconnect timer and the heartbeat timer; everything else
//! talks to it through a [`ViewerHandle`].
//!
//! ```text
//! ViewerHandle ──commands──▶ MqttLink<Running> ──frames──▶ ConnectionManager
//!      ▲                          │
//!      └──── status watch ◀───────┴──── message feed (broadcast)
//! ```
//!
//! All transitions happen inside the task, one event at a time, so frames are
//! recorded in the order the socket delivers them.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use statum::{machine, state};
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{
    interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior, Sleep,
};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::LinkConfig;
use super::connection::{CloseOutcome, ConnectionManager, ConnectionState, FrameOutcome, LinkStats};
use super::envelope::OutboundEnvelope;
use super::message_manager::MessageRecord;
use crate::error::{LinkFault, ViewerError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const COMMAND_BUFFER: usize = 100;
const FEED_BUFFER: usize = 256;

#[derive(Debug)]
pub enum LinkCommand {
    Send(String),
}

#[state]
#[derive(Debug, Clone)]
pub enum LinkPhase {
    Configured,
    Running,
}

#[machine]
pub struct MqttLink<S: LinkPhase> {
    config: LinkConfig,
    manager: Arc<RwLock<ConnectionManager>>,
    status_tx: watch::Sender<ConnectionState>,
    feed_tx: broadcast::Sender<MessageRecord>,
    command_rx: mpsc::Receiver<LinkCommand>,
    cancel: CancellationToken,
}

// Owned IO resources. At most one of each is alive at a time.
#[derive(Default)]
struct LinkIo {
    socket: Option<WsStream>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
}

impl LinkIo {
    async fn close_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                debug!(error = %e, "Socket was already closed");
            }
        }
    }
}

async fn next_frame(socket: &mut Option<WsStream>) -> Option<Result<Message, WsError>> {
    match socket {
        Some(ws) => ws.next().await,
        None => pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn heartbeat_due(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

/// `wss://` endpoints need a process-wide rustls provider. Another component
/// may have installed one already, which is fine.
fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
}

impl MqttLink<Configured> {
    pub fn create(
        config: LinkConfig,
        manager: Arc<RwLock<ConnectionManager>>,
        status_tx: watch::Sender<ConnectionState>,
        feed_tx: broadcast::Sender<MessageRecord>,
        command_rx: mpsc::Receiver<LinkCommand>,
        cancel: CancellationToken,
    ) -> Self {
        debug!("Creating bridge link for {}", config.url);
        Self::new(config, manager, status_tx, feed_tx, command_rx, cancel)
    }

    pub fn start(self) -> MqttLink<Running> {
        info!(url = %self.config.url, "Starting bridge link");
        self.transition()
    }
}

impl MqttLink<Running> {
    /// Event loop. Returns after teardown, i.e. once the handle is disposed or dropped.
    pub async fn run(mut self) {
        let cancel = self.cancel.clone();
        let mut io = LinkIo::default();

        self.connect(&mut io).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = reconnect_due(&mut io.reconnect_timer) => {
                    io.reconnect_timer = None;
                    let attempt = self.manager.read().await.reconnect_attempts();
                    info!(
                        "Attempting to reconnect ({}/{})...",
                        attempt, self.config.reconnect.max_attempts
                    );
                    self.connect(&mut io).await;
                }

                _ = heartbeat_due(&mut io.heartbeat) => self.send_heartbeat(&mut io).await,

                command = self.command_rx.recv() => match command {
                    Some(LinkCommand::Send(text)) => self.transmit(&mut io, text).await,
                    None => {
                        debug!("All handles dropped");
                        break;
                    }
                },

                frame = next_frame(&mut io.socket) => self.on_frame(&mut io, frame).await,
            }
        }

        self.teardown(&mut io).await;
    }

    /// Applies one mutation to the manager and publishes the resulting status.
    async fn apply<R>(&self, f: impl FnOnce(&mut ConnectionManager) -> R) -> R {
        let mut manager = self.manager.write().await;
        let result = f(&mut *manager);
        let state = manager.state();
        self.status_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(from = %current, to = %state, "Connection state changed");
                *current = state;
                true
            }
        });
        result
    }

    async fn connect(&self, io: &mut LinkIo) {
        io.reconnect_timer = None;
        io.heartbeat = None;
        io.close_socket().await;

        if !self.apply(|m| m.begin_attempt()).await {
            return;
        }

        let request = match self.config.url.as_str().into_client_request() {
            Ok(request) => request,
            Err(e) => {
                self.construction_failed(e.to_string()).await;
                return;
            }
        };

        let limit = self.config.connect_timeout();
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = timeout(limit, connect_async(request)) => result,
        };

        let result = match result {
            Ok(result) => result,
            Err(_elapsed) => {
                let fault = LinkFault::HandshakeTimeout(limit);
                self.apply(|m| m.on_error(&fault)).await;
                self.on_close(io).await;
                return;
            }
        };

        match result {
            Ok((socket, _response)) => {
                io.socket = Some(socket);
                self.apply(|m| m.on_open()).await;

                let period = self.config.heartbeat_interval();
                let mut heartbeat = interval_at(Instant::now() + period, period);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
                io.heartbeat = Some(heartbeat);
            }
            Err(WsError::Url(e)) => self.construction_failed(e.to_string()).await,
            Err(e) => {
                let fault = LinkFault::Transport(e.to_string());
                self.apply(|m| m.on_error(&fault)).await;
                self.on_close(io).await;
            }
        }
    }

    async fn construction_failed(&self, reason: String) {
        let fault = LinkFault::Construction {
            url: self.config.url.clone(),
            reason,
        };
        self.apply(|m| m.on_construction_failure(&fault)).await;
    }

    async fn on_close(&self, io: &mut LinkIo) {
        io.socket = None;
        io.heartbeat = None;

        match self.apply(|m| m.on_close()).await {
            CloseOutcome::Reconnect { attempt, delay } => {
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
                io.reconnect_timer = Some(Box::pin(sleep(delay)));
            }
            CloseOutcome::Exhausted | CloseOutcome::Ignored => {
                io.reconnect_timer = None;
            }
        }
    }

    async fn on_frame(&self, io: &mut LinkIo, frame: Option<Result<Message, WsError>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.ingest(text.as_str()).await,
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => self.ingest(text).await,
                Err(_) => {
                    self.apply(|m| m.report_malformed(&LinkFault::NonUtf8Frame))
                        .await
                }
            },
            Some(Ok(Message::Close(close_frame))) => {
                debug!(?close_frame, "Close frame received");
            }
            // Protocol pings are answered by tungstenite itself.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let fault = LinkFault::Transport(e.to_string());
                self.apply(|m| m.on_error(&fault)).await;
                self.on_close(io).await;
            }
            None => self.on_close(io).await,
        }
    }

    async fn ingest(&self, raw: &str) {
        if let FrameOutcome::Recorded(record) = self.apply(|m| m.handle_frame(raw)).await {
            // Nobody listening is fine.
            let _ = self.feed_tx.send(record);
        }
    }

    async fn transmit(&self, io: &mut LinkIo, text: String) {
        let connected = self.manager.read().await.can_send();
        let Some(socket) = io.socket.as_mut().filter(|_| connected) else {
            warn!(error = %LinkFault::NotConnected, "Dropping outbound message");
            return;
        };

        match socket.send(Message::Text(text.into())).await {
            Ok(()) => self.apply(|m| m.note_sent()).await,
            Err(e) => warn!(error = %e, "Failed to send message"),
        }
    }

    async fn send_heartbeat(&self, io: &mut LinkIo) {
        match serde_json::to_string(&OutboundEnvelope::Ping) {
            Ok(text) => {
                debug!("Sending heartbeat");
                self.transmit(io, text).await;
            }
            Err(e) => warn!(error = %e, "Failed to encode heartbeat"),
        }
    }

    async fn teardown(&self, io: &mut LinkIo) {
        io.reconnect_timer = None;
        io.heartbeat = None;
        io.close_socket().await;
        self.apply(|m| m.shutdown()).await;
        info!(url = %self.config.url, "Bridge link torn down");
    }
}

/// Read side and operations exposed to the presentation layer.
///
/// Dropping the handle tears the connection down, same as [`ViewerHandle::dispose`].
pub struct ViewerHandle {
    manager: Arc<RwLock<ConnectionManager>>,
    status_rx: watch::Receiver<ConnectionState>,
    command_tx: mpsc::Sender<LinkCommand>,
    feed_tx: broadcast::Sender<MessageRecord>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ViewerHandle {
    /// Validates `config` and starts the connection task on the current tokio runtime.
    pub fn spawn(config: LinkConfig) -> Result<Self, ViewerError> {
        config.validate()?;
        install_crypto_provider();

        let manager = Arc::new(RwLock::new(ConnectionManager::new(
            config.reconnect,
            config.history_capacity,
        )));
        let (status_tx, status_rx) = watch::channel(ConnectionState::Connecting);
        let (feed_tx, _) = broadcast::channel(FEED_BUFFER);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let cancel = CancellationToken::new();

        let link = MqttLink::<Configured>::create(
            config,
            manager.clone(),
            status_tx,
            feed_tx.clone(),
            command_rx,
            cancel.clone(),
        );
        let task = tokio::spawn(link.start().run());

        Ok(Self {
            manager,
            status_rx,
            command_tx,
            feed_tx,
            cancel,
            task: Some(task),
        })
    }

    pub fn connection_status(&self) -> ConnectionState {
        *self.status_rx.borrow()
    }

    pub fn status_watch(&self) -> watch::Receiver<ConnectionState> {
        self.status_rx.clone()
    }

    /// History, newest first.
    pub async fn messages(&self) -> Vec<MessageRecord> {
        self.manager.read().await.messages()
    }

    pub async fn last_message(&self) -> Option<MessageRecord> {
        self.manager.read().await.last_message().cloned()
    }

    pub async fn stats(&self) -> LinkStats {
        self.manager.read().await.stats().clone()
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        self.manager.read().await.reconnect_attempts()
    }

    /// Feed of records as they are added to the history.
    pub fn subscribe(&self) -> broadcast::Receiver<MessageRecord> {
        self.feed_tx.subscribe()
    }

    /// Serializes `payload` and queues it for the socket. Does nothing but log
    /// when the connection is not open.
    pub fn send_message<T: Serialize + ?Sized>(&self, payload: &T) {
        if self.connection_status() != ConnectionState::Connected {
            warn!(error = %LinkFault::NotConnected, "Dropping outbound message");
            return;
        }

        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize outbound message");
                return;
            }
        };

        if let Err(e) = self.command_tx.try_send(LinkCommand::Send(text)) {
            warn!(error = %e, "Failed to queue outbound message");
        }
    }

    pub async fn clear_messages(&self) {
        self.manager.write().await.clear_messages();
    }

    /// Cancels timers and closes the socket. Idempotent.
    pub fn dispose(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Disposing bridge link");
            self.cancel.cancel();
        }
    }

    /// Disposes and waits for the connection task to finish its teardown.
    pub async fn shutdown(mut self) -> Result<(), ViewerError> {
        self.dispose();
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }
}

impl Drop for ViewerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
