//! Native OHLCV stream client: `tokio-tungstenite`.
//!
//! - One background tokio task per connection, driven over an mpsc channel
//! - Lazy connect on first subscribe
//! - Application-level ping/pong health check
//! - Exponential backoff reconnection with jitter
//! - Subscription tracking + auto-resubscribe on reconnect
//! - Messages queued while disconnected are flushed on reconnect
//! - Candles routed to the sink of their subscription; lifecycle via `events()`

use std::pin::Pin;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::datafeed::{CandleSink, StreamParams};
use crate::error::WsError;
use crate::shared::SubscriptionId;
use crate::ws::{MessageIn, MessageOut, ReadyState, SinkRegistry, SubscriptionBook, WsConfig, WsEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

// ─── Commands from public API to background task ─────────────────────────────

enum Command {
    Send(MessageOut),
    Disconnect,
}

// ─── Disconnect reasons for reconnection decision ────────────────────────────

enum DisconnectReason {
    UserRequested,
    NormalClose,
    PongTimeout,
    RateLimited,
    Error(String),
}

// ─── Background task state ───────────────────────────────────────────────────

struct TaskState {
    config: WsConfig,
    event_tx: mpsc::Sender<WsEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    sinks: SinkRegistry,
    subscriptions: SubscriptionBook,
    pending_messages: Vec<MessageOut>,
    reconnect_attempts: u32,
    ready_state: Arc<AtomicU16>,
}

impl TaskState {
    fn emit(&self, event: WsEvent) {
        let _ = self.event_tx.try_send(event);
    }

    fn should_reconnect(&self) -> bool {
        self.config.reconnect && self.reconnect_attempts < self.config.max_reconnect_attempts
    }

    fn set_ready_state(&self, state: ReadyState) {
        self.ready_state.store(state as u16, Ordering::SeqCst);
    }
}

struct Connection {
    cmd_tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

// ─── Public StreamClient ─────────────────────────────────────────────────────

/// OHLCV stream client.
///
/// All methods take `&self`; the connection handle sits behind an async lock
/// so one client can be shared by every datafeed of an application.
pub struct StreamClient {
    config: WsConfig,
    connection: async_lock::Mutex<Option<Connection>>,
    sinks: SinkRegistry,
    event_rx: tokio::sync::Mutex<mpsc::Receiver<WsEvent>>,
    event_tx: mpsc::Sender<WsEvent>,
    ready_state: Arc<AtomicU16>,
}

impl StreamClient {
    /// Create a new client. Does not connect yet.
    pub fn new(config: WsConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            config,
            connection: async_lock::Mutex::new(None),
            sinks: SinkRegistry::new(),
            event_rx: tokio::sync::Mutex::new(event_rx),
            event_tx,
            ready_state: Arc::new(AtomicU16::new(ReadyState::Closed as u16)),
        }
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Spawn the background connection task if none is running.
    ///
    /// A task that gave up after `max_reconnect_attempts` is replaced; the new
    /// one resubscribes every stream whose sink is still registered.
    pub async fn connect(&self) -> Result<(), WsError> {
        let mut connection = self.connection.lock().await;
        if connection.as_ref().is_some_and(|c| !c.task.is_finished()) {
            return Ok(());
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        self.ready_state
            .store(ReadyState::Connecting as u16, Ordering::SeqCst);

        let state = TaskState {
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
            cmd_rx,
            sinks: self.sinks.clone(),
            subscriptions: self.sinks.streams().into_iter().collect(),
            pending_messages: Vec::new(),
            reconnect_attempts: 0,
            ready_state: Arc::clone(&self.ready_state),
        };

        let task = tokio::spawn(run_task(state));
        *connection = Some(Connection { cmd_tx, task });
        Ok(())
    }

    /// Close the connection and drop every sink.
    pub async fn disconnect(&self) -> Result<(), WsError> {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            let _ = connection.cmd_tx.send(Command::Disconnect).await;
            let _ = tokio::time::timeout(Duration::from_secs(5), connection.task).await;
        }

        self.sinks.clear();
        self.ready_state
            .store(ReadyState::Closed as u16, Ordering::SeqCst);
        Ok(())
    }

    /// Open an OHLCV stream. Connects lazily.
    ///
    /// The returned id is generated client-side and echoed by the server on
    /// every candle of this stream.
    pub async fn subscribe(&self, params: StreamParams, sink: CandleSink) -> Result<SubscriptionId, WsError> {
        self.connect().await?;

        let id = SubscriptionId::random();
        self.sinks.insert(id.clone(), params.clone(), sink);

        let msg = MessageOut::ohlcv(self.config.api_key.clone(), id.clone(), params);
        if let Err(e) = self.send(msg).await {
            self.sinks.remove(&id);
            return Err(e);
        }

        tracing::debug!(id = %id, "ohlcv subscribe sent");
        Ok(id)
    }

    /// Close an OHLCV stream. No candle reaches its sink afterwards.
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), WsError> {
        if !self.sinks.remove(id) {
            return Err(WsError::UnknownSubscription(id.to_string()));
        }

        let msg = MessageOut::unsubscribe(self.config.api_key.clone(), id.clone());
        match self.send(msg).await {
            // Nothing to tell a server we are not connected to.
            Ok(()) | Err(WsError::NotConnected) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Hand a message to the background task.
    ///
    /// While the task is reconnecting the message is queued and flushed once
    /// the socket is back.
    async fn send(&self, msg: MessageOut) -> Result<(), WsError> {
        let connection = self.connection.lock().await;
        match connection.as_ref() {
            Some(c) if !c.task.is_finished() => {
                c.cmd_tx.try_send(Command::Send(msg)).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => {
                        WsError::SendFailed("Command channel full".into())
                    }
                    mpsc::error::TrySendError::Closed(_) => WsError::NotConnected,
                })
            }
            _ => Err(WsError::NotConnected),
        }
    }

    /// Whether the socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from(self.ready_state.load(Ordering::SeqCst))
    }

    /// Number of streams with a live sink.
    pub fn subscription_count(&self) -> usize {
        self.sinks.len()
    }

    /// Lifecycle events of the connection.
    ///
    /// The returned stream borrows `self`; only one consumer reads at a time.
    pub fn events(&self) -> Pin<Box<dyn Stream<Item = WsEvent> + Send + '_>> {
        Box::pin(futures_util::stream::unfold(&self.event_rx, |rx| async move {
            let mut guard = rx.lock().await;
            guard.recv().await.map(|event| (event, rx))
        }))
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.task.abort();
        }
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

async fn run_task(mut state: TaskState) {
    loop {
        let (sink, stream) = match attempt_connect(&state.config.url).await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(url = %state.config.url, "stream connection failed: {}", e);
                state.emit(WsEvent::Error(format!("Connection failed: {}", e)));

                if state.should_reconnect() {
                    backoff_sleep(&mut state, false).await;
                    if drain_commands_to_pending(&mut state) {
                        state.set_ready_state(ReadyState::Closed);
                        return;
                    }
                    continue;
                }
                state.set_ready_state(ReadyState::Closed);
                state.emit(WsEvent::MaxReconnectReached);
                return;
            }
        };

        state.reconnect_attempts = 0;
        state.set_ready_state(ReadyState::Open);
        state.emit(WsEvent::Connected);
        tracing::info!(url = %state.config.url, "stream connected");

        // Queued messages are already tracked, so resubscribe first and skip
        // queued subscribes the book already restored.
        let mut sink = sink;
        resubscribe_all(&mut sink, &state).await;
        flush_pending(&mut sink, &mut state).await;

        let reason = run_connected(&mut state, sink, stream).await;
        state.set_ready_state(ReadyState::Closed);

        let Some(rate_limited) = reconnect_plan(&reason) else {
            return;
        };

        if !state.should_reconnect() {
            state.emit(WsEvent::MaxReconnectReached);
            return;
        }
        state.set_ready_state(ReadyState::Connecting);
        backoff_sleep(&mut state, rate_limited).await;
        if drain_commands_to_pending(&mut state) {
            state.set_ready_state(ReadyState::Closed);
            return;
        }
    }
}

/// Whether to reconnect after `reason`, and if so whether the server asked
/// us to slow down.
fn reconnect_plan(reason: &DisconnectReason) -> Option<bool> {
    match reason {
        DisconnectReason::UserRequested | DisconnectReason::NormalClose => None,
        DisconnectReason::RateLimited => {
            tracing::warn!("stream closed by server rate limit");
            Some(true)
        }
        DisconnectReason::PongTimeout => Some(false),
        DisconnectReason::Error(reason) => {
            tracing::warn!(reason = %reason, "stream lost");
            Some(false)
        }
    }
}

/// The inner connected loop: runs until the connection breaks.
async fn run_connected(state: &mut TaskState, mut sink: WsSink, mut stream: SplitStream<WsStream>) -> DisconnectReason {
    let ping_dur = Duration::from_millis(state.config.ping_interval_ms);
    let pong_dur = Duration::from_millis(state.config.pong_timeout_ms);

    let mut ping_interval = tokio::time::interval(ping_dur);
    ping_interval.reset(); // skip immediate first tick

    let mut pong_deadline: Option<tokio::time::Instant> = None;

    // Parked far in the future while no pong is awaited.
    let far_future = tokio::time::Instant::now() + Duration::from_secs(86400);
    let pong_sleep = tokio::time::sleep_until(far_future);
    tokio::pin!(pong_sleep);

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if handle_text(state, text.as_ref()) {
                            pong_deadline = None;
                            pong_sleep.as_mut().reset(far_future);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = extract_close(frame.as_ref());
                        state.emit(WsEvent::Disconnected {
                            code: Some(code),
                            reason: reason.clone(),
                        });
                        return match code {
                            1000 => DisconnectReason::NormalClose,
                            1008 => DisconnectReason::RateLimited,
                            _ => DisconnectReason::Error(reason),
                        };
                    }
                    Some(Ok(_)) => {} // Binary, Pong, Frame
                    Some(Err(e)) => {
                        let reason = e.to_string();
                        tracing::error!("stream error: {}", reason);
                        state.emit(WsEvent::Disconnected {
                            code: None,
                            reason: reason.clone(),
                        });
                        return DisconnectReason::Error(reason);
                    }
                    None => {
                        state.emit(WsEvent::Disconnected {
                            code: None,
                            reason: "Stream ended".into(),
                        });
                        return DisconnectReason::Error("Stream ended".into());
                    }
                }
            }

            cmd = state.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(msg_out)) => {
                        state.subscriptions.track(&msg_out);
                        if let Err(e) = send_msg(&mut sink, &msg_out).await {
                            tracing::warn!("send failed: {}", e);
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Client disconnect".into(),
                        }))).await;
                        return DisconnectReason::UserRequested;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = send_msg(&mut sink, &MessageOut::Ping).await {
                    tracing::warn!("failed to send ping: {}", e);
                } else if pong_deadline.is_none() {
                    let deadline = tokio::time::Instant::now() + pong_dur;
                    pong_deadline = Some(deadline);
                    pong_sleep.as_mut().reset(deadline);
                }
            }

            () = &mut pong_sleep, if pong_deadline.is_some() => {
                tracing::warn!(
                    "pong timeout, no response within {}ms",
                    state.config.pong_timeout_ms
                );
                state.emit(WsEvent::Disconnected {
                    code: None,
                    reason: "Pong timeout".into(),
                });
                let _ = sink.close().await;
                return DisconnectReason::PongTimeout;
            }
        }
    }
}

/// Route one text frame. Returns `true` for a pong.
fn handle_text(state: &TaskState, text: &str) -> bool {
    match serde_json::from_str::<MessageIn>(text) {
        Ok(MessageIn::Candle(msg)) => {
            if !state.sinks.dispatch(&msg.subscription_id, msg.candle) {
                tracing::trace!(id = %msg.subscription_id, "candle for closed subscription");
            }
            false
        }
        Ok(MessageIn::Error(msg)) => {
            tracing::warn!(id = ?msg.subscription_id, "server error: {}", msg.error);
            state.emit(WsEvent::Error(msg.error));
            false
        }
        Ok(MessageIn::Event(msg)) => msg.is_pong(),
        Err(e) => {
            tracing::warn!("undecodable stream frame: {} (raw: {})", e, text);
            state.emit(WsEvent::Error(format!("Deserialization error: {}", e)));
            false
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn attempt_connect(url: &str) -> Result<(WsSink, SplitStream<WsStream>), String> {
    let (ws_stream, _) = tokio::time::timeout(Duration::from_secs(30), connect_async(url))
        .await
        .map_err(|_| "Connection timeout".to_string())?
        .map_err(|e| e.to_string())?;

    Ok(ws_stream.split())
}

async fn send_msg(sink: &mut WsSink, msg: &MessageOut) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| e.to_string())
}

fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "No close frame".into()),
    }
}

async fn resubscribe_all(sink: &mut WsSink, state: &TaskState) {
    if state.subscriptions.is_empty() {
        return;
    }
    tracing::info!("resubscribing {} stream(s)", state.subscriptions.len());
    for msg in state
        .subscriptions
        .resubscribe_messages(state.config.api_key.as_deref())
    {
        if let Err(e) = send_msg(sink, &msg).await {
            tracing::warn!("failed to resubscribe: {}", e);
        }
    }
}

// ─── Message queue ───────────────────────────────────────────────────────────

async fn flush_pending(sink: &mut WsSink, state: &mut TaskState) {
    let messages = std::mem::take(&mut state.pending_messages);
    let unsent: Vec<_> = messages
        .into_iter()
        .filter(|m| !matches!(m, MessageOut::Ohlcv { .. }))
        .collect();
    if unsent.is_empty() {
        return;
    }
    tracing::info!("flushing {} pending message(s)", unsent.len());
    for msg in &unsent {
        if let Err(e) = send_msg(sink, msg).await {
            tracing::warn!("failed to flush pending message: {}", e);
        }
    }
}

/// Move commands that arrived while offline into the queue.
/// Returns `true` if a disconnect was requested.
fn drain_commands_to_pending(state: &mut TaskState) -> bool {
    while let Ok(cmd) = state.cmd_rx.try_recv() {
        match cmd {
            Command::Send(msg) => {
                state.subscriptions.track(&msg);
                state.pending_messages.push(msg);
            }
            Command::Disconnect => return true,
        }
    }
    false
}

// ─── Reconnection backoff ────────────────────────────────────────────────────

fn backoff_delay_ms(base_ms: u32, attempt: u32, rate_limited: bool, jitter_seed: u32) -> u32 {
    let exp = attempt.saturating_sub(1).min(10);
    let base = base_ms.saturating_mul(1u32 << exp);

    let (jitter_max, cap) = if rate_limited {
        (1000u32, 300_000u32)
    } else {
        (500u32, 60_000u32)
    };

    base.saturating_add(jitter_seed % jitter_max).min(cap)
}

async fn backoff_sleep(state: &mut TaskState, rate_limited: bool) {
    state.reconnect_attempts += 1;
    let delay = backoff_delay_ms(
        state.config.base_reconnect_delay_ms,
        state.reconnect_attempts,
        rate_limited,
        rand::random::<u32>(),
    );

    tracing::info!(
        "reconnect attempt {}/{} in {}ms{}",
        state.reconnect_attempts,
        state.config.max_reconnect_attempts,
        delay,
        if rate_limited { " (rate-limited)" } else { "" }
    );

    tokio::time::sleep(Duration::from_millis(delay as u64)).await;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
