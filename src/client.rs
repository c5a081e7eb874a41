//! The stream connection manager and public client surface.
//!
//! One [`SseClient`] owns one logical subscription. All connection state
//! (resume id, retry counters, the in-flight body stream, timers) lives in
//! a single worker task; the client and subscription handles talk to it
//! over a command channel, so no locking is needed and every mutation is
//! serialized.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::dispatch::{AnyEvent, Dispatcher, Lifecycle, SubscriberId};
use crate::error::StreamError;
use crate::frame::{EventRecord, FrameParser};
use crate::heartbeat::Heartbeat;
use crate::retry::{Backoff, ConnState};

/// Close reason reported when the retry ceiling is exhausted.
pub const MAX_RETRIES_REACHED: &str = "max_retries_reached";

/// Commands sent from client/subscription handles to the worker.
enum Command {
    Connect,
    Close,
    Reconfigure(Box<StreamConfig>),
    Subscribe {
        id: SubscriberId,
        event: String,
        tx: mpsc::UnboundedSender<EventRecord>,
    },
    SubscribeAny {
        id: SubscriberId,
        tx: mpsc::UnboundedSender<AnyEvent>,
    },
    SubscribeLifecycle {
        id: SubscriberId,
        tx: mpsc::UnboundedSender<Lifecycle>,
    },
    Unsubscribe(SubscriberId),
}

/// A registered subscriber: receive events, then hand the token back.
///
/// Dropping the handle also ends delivery (the worker prunes dead
/// receivers), but explicit [`unsubscribe`](Subscription::unsubscribe)
/// removes the registration immediately.
pub struct Subscription<T> {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<T>,
    command_tx: mpsc::UnboundedSender<Command>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receive the next item, or `None` once the worker is gone and the
    /// channel has drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Deregister from the worker.
    pub fn unsubscribe(self) {
        let _ = self.command_tx.send(Command::Unsubscribe(self.id));
    }
}

/// Client for one server-push event stream.
pub struct SseClient {
    command_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnState>,
    next_subscriber: Arc<AtomicU64>,
}

impl SseClient {
    /// Create the client and spawn its worker. No connection is attempted
    /// until [`connect`](SseClient::connect).
    pub fn new(config: StreamConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnState::Idle);

        let worker = Worker {
            config,
            http: reqwest::Client::new(),
            dispatcher: Dispatcher::new(),
            parser: FrameParser::new(),
            backoff: Backoff::new(),
            closed: false,
            state_tx,
        };
        tokio::spawn(worker.run(command_rx));

        Self {
            command_tx,
            state_rx,
            next_subscriber: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Begin connecting. Resets the retry counter and clears any previous
    /// explicit close, starting a fresh logical session.
    pub fn connect(&self) {
        let _ = self.command_tx.send(Command::Connect);
    }

    /// Explicitly close: cancels the in-flight request and any pending
    /// reconnect timer, and guarantees no further attempts. The only
    /// signal emitted is `Closed { intentional: true }`. Idempotent.
    pub fn close(&self) {
        let _ = self.command_tx.send(Command::Close);
    }

    /// Replace the configuration. Applies from the next connection attempt
    /// onward; an already-computed reconnect delay keeps running.
    pub fn reconfigure(&self, config: StreamConfig) {
        let _ = self.command_tx.send(Command::Reconfigure(Box::new(config)));
    }

    /// Subscribe to records with one event name. Use `"message"` for
    /// frames that carry no `event:` line.
    pub fn subscribe(&self, event: impl Into<String>) -> Subscription<EventRecord> {
        let id = self.allocate();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.command_tx.send(Command::Subscribe {
            id,
            event: event.into(),
            tx,
        });
        self.subscription(id, rx)
    }

    /// Subscribe to every record with a non-default event name.
    pub fn subscribe_any(&self) -> Subscription<AnyEvent> {
        let id = self.allocate();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.command_tx.send(Command::SubscribeAny { id, tx });
        self.subscription(id, rx)
    }

    /// Subscribe to lifecycle signals (open/error/warning/reconnecting/
    /// close).
    pub fn lifecycle(&self) -> Subscription<Lifecycle> {
        let id = self.allocate();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.command_tx.send(Command::SubscribeLifecycle { id, tx });
        self.subscription(id, rx)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnState {
        self.state_rx.borrow().clone()
    }

    /// Watch receiver for connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnState> {
        self.state_rx.clone()
    }

    fn allocate(&self) -> SubscriberId {
        self.next_subscriber.fetch_add(1, Ordering::Relaxed)
    }

    fn subscription<T>(&self, id: SubscriberId, rx: mpsc::UnboundedReceiver<T>) -> Subscription<T> {
        Subscription {
            id,
            rx,
            command_tx: self.command_tx.clone(),
        }
    }
}

impl Drop for SseClient {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Close);
    }
}

/// How one connection attempt ended.
enum SessionEnd {
    /// Explicit close or client teardown; everything already handled.
    Shutdown,
    /// Non-intentional termination; the caller emits the error and routes
    /// to reconnection.
    Failure(StreamError),
}

/// What the read loop saw next.
enum Next {
    Chunk(bytes::Bytes),
    TransportError(String),
    Eof,
    IdleTimeout,
}

/// The single task owning all connection state.
struct Worker {
    config: StreamConfig,
    http: reqwest::Client,
    dispatcher: Dispatcher,
    parser: FrameParser,
    backoff: Backoff,
    /// Sticky explicit-close flag. Set only by `Command::Close`; cleared
    /// by a fresh `Command::Connect`.
    closed: bool,
    state_tx: watch::Sender<ConnState>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Connect => {
                    self.closed = false;
                    self.backoff.reset();
                    self.session(&mut commands).await;
                }
                Command::Close => self.handle_close(),
                Command::Reconfigure(config) => self.config = *config,
                other => self.apply_registry(other),
            }
        }
        debug!("all client handles dropped; worker exiting");
    }

    /// Registry commands are valid in every state.
    fn apply_registry(&mut self, command: Command) {
        match command {
            Command::Subscribe { id, event, tx } => self.dispatcher.register(id, event, tx),
            Command::SubscribeAny { id, tx } => self.dispatcher.register_any(id, tx),
            Command::SubscribeLifecycle { id, tx } => self.dispatcher.register_lifecycle(id, tx),
            Command::Unsubscribe(id) => self.dispatcher.unsubscribe(id),
            // Connect/Close/Reconfigure are handled by the callers.
            _ => {}
        }
    }

    fn set_state(&self, state: ConnState) {
        self.state_tx.send_replace(state);
    }

    fn handle_close(&mut self) {
        if self.closed {
            return;
        }
        info!("stream closed by caller");
        self.closed = true;
        self.backoff.reset();
        self.dispatcher.emit(Lifecycle::Closed {
            intentional: true,
            reason: None,
        });
        self.set_state(ConnState::Closed);
    }

    /// One logical session: attempt, and on failure keep rescheduling
    /// until explicit close or the retry ceiling.
    async fn session(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) {
        loop {
            if self.closed {
                return;
            }
            self.set_state(ConnState::Connecting);
            match self.attempt(commands).await {
                SessionEnd::Shutdown => return,
                SessionEnd::Failure(err) => {
                    warn!(code = err.error_code(), %err, "stream attempt failed");
                    self.dispatcher.emit(Lifecycle::Error(err));
                }
            }

            let Some((attempt, delay)) = self.backoff.next(&self.config.retry) else {
                warn!(
                    max_retries = self.config.retry.max_retries,
                    "retry ceiling reached; giving up"
                );
                self.dispatcher.emit(Lifecycle::Closed {
                    intentional: false,
                    reason: Some(MAX_RETRIES_REACHED.to_string()),
                });
                self.set_state(ConnState::Closed);
                return;
            };

            info!(attempt, ?delay, "scheduling reconnect");
            self.dispatcher
                .emit(Lifecycle::Reconnecting { attempt, delay });
            self.set_state(ConnState::Scheduling { attempt });

            // The delay is fixed once computed: commands arriving during
            // the wait (including Reconfigure) never change the deadline.
            let deadline = Instant::now() + delay;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    command = commands.recv() => match command {
                        Some(Command::Close) => {
                            self.handle_close();
                            return;
                        }
                        Some(Command::Connect) => {
                            // Fresh explicit connect: skip the remaining
                            // delay and restart the attempt curve.
                            self.backoff.reset();
                            break;
                        }
                        Some(Command::Reconfigure(config)) => self.config = *config,
                        Some(other) => self.apply_registry(other),
                        None => return,
                    },
                }
            }
        }
    }

    /// One streamed request: headers, status/content-type gating, then
    /// incremental body consumption bounded by the heartbeat.
    ///
    /// The whole connect phase races the command channel, so a `Close`
    /// lands even against a server that accepts but never responds.
    async fn attempt(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) -> SessionEnd {
        let connect = connect_stream(
            self.http.clone(),
            self.config.clone(),
            self.parser.last_event_id().map(str::to_string),
        );
        tokio::pin!(connect);
        let response = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok(response) => break response,
                    Err(err) => return SessionEnd::Failure(err),
                },
                command = commands.recv() => match command {
                    Some(Command::Close) => {
                        // Dropping the connect future aborts the request.
                        self.handle_close();
                        return SessionEnd::Shutdown;
                    }
                    Some(Command::Connect) => self.backoff.reset(),
                    // Takes effect from the next attempt; the in-flight
                    // request keeps its snapshot.
                    Some(Command::Reconfigure(config)) => self.config = *config,
                    Some(other) => self.apply_registry(other),
                    None => {
                        self.closed = true;
                        return SessionEnd::Shutdown;
                    }
                },
            }
        };

        // Confirmed open: reset the attempt curve and start consuming.
        info!(url = %self.config.url, "stream open");
        self.backoff.reset();
        self.parser.reset();
        self.dispatcher.emit(Lifecycle::Open);
        self.set_state(ConnState::Open);

        let mut heartbeat = Heartbeat::new(self.config.heartbeat_interval);
        heartbeat.start();
        let mut body = response.bytes_stream();

        loop {
            let next = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close) => {
                        // User-initiated abort: dropping the body cancels
                        // the request; nothing further is emitted.
                        self.handle_close();
                        return SessionEnd::Shutdown;
                    }
                    Some(Command::Connect) => {
                        // Already connected; just restart the retry curve.
                        self.backoff.reset();
                        continue;
                    }
                    Some(Command::Reconfigure(config)) => {
                        self.config = *config;
                        continue;
                    }
                    Some(other) => {
                        self.apply_registry(other);
                        continue;
                    }
                    None => {
                        self.closed = true;
                        return SessionEnd::Shutdown;
                    }
                },
                next = bounded_next(&mut body, &heartbeat) => next,
            };

            match next {
                Next::Chunk(bytes) => {
                    let outcome = self.parser.feed(&bytes);
                    if outcome.liveness {
                        heartbeat.reset();
                    }
                    if let Some(millis) = outcome.retry {
                        debug!(millis, "server retry hint");
                        self.backoff.record_server_hint(millis);
                    }
                    for record in outcome.records {
                        self.dispatcher.enqueue(record);
                    }
                    self.dispatcher.drain();
                }
                Next::TransportError(message) => {
                    heartbeat.stop();
                    return SessionEnd::Failure(StreamError::Transport { message });
                }
                Next::Eof => {
                    heartbeat.stop();
                    return SessionEnd::Failure(StreamError::Transport {
                        message: "server closed the stream".to_string(),
                    });
                }
                Next::IdleTimeout => {
                    let idle = heartbeat.interval();
                    warn!(?idle, "heartbeat timeout; forcing reconnect");
                    self.dispatcher.emit(Lifecycle::Warning {
                        message: format!("heartbeat timeout: no frames for {:?}", idle),
                    });
                    return SessionEnd::Failure(StreamError::Timeout { idle });
                }
            }
        }
    }
}

/// Send the streamed GET and vet the response before it counts as open.
///
/// Owns its inputs so the worker can race it against the command channel
/// and cancel the request by dropping the future.
async fn connect_stream(
    http: reqwest::Client,
    config: StreamConfig,
    last_event_id: Option<String>,
) -> Result<reqwest::Response, StreamError> {
    let mut request = http
        .get(&config.url)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache");
    for (name, value) in &config.headers {
        request = request.header(name, value);
    }
    if let Some(id) = last_event_id {
        request = request.header("Last-Event-ID", id);
    }
    if let Some(auth) = &config.auth {
        request = request.header(AUTHORIZATION, auth.header_value().await?);
    }
    let response = request.send().await.map_err(|e| StreamError::Transport {
        message: e.to_string(),
    })?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let body = response.text().await.ok().filter(|b| !b.is_empty());
        return Err(StreamError::Auth {
            status: status.as_u16(),
            body,
        });
    }
    if !status.is_success() {
        let message = response
            .text()
            .await
            .ok()
            .filter(|b| !b.is_empty())
            .map(|b| error_message(&b))
            .unwrap_or_else(|| "unexpected status".to_string());
        return Err(StreamError::Protocol {
            status: Some(status.as_u16()),
            message,
        });
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.starts_with("text/event-stream") {
        return Err(StreamError::Protocol {
            status: Some(status.as_u16()),
            message: format!("unexpected content type: {:?}", content_type),
        });
    }
    Ok(response)
}

/// Prefer the `message`/`error` field of a JSON error body, raw text
/// otherwise.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Await the next body chunk, bounded by the heartbeat window when armed.
async fn bounded_next<S>(body: &mut S, heartbeat: &Heartbeat) -> Next
where
    S: futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    let chunk = match heartbeat.remaining() {
        Some(window) => match tokio::time::timeout(window, body.next()).await {
            Ok(chunk) => chunk,
            Err(_) => return Next::IdleTimeout,
        },
        None => body.next().await,
    };
    match chunk {
        Some(Ok(bytes)) => Next::Chunk(bytes),
        Some(Err(e)) => Next::TransportError(e.to_string()),
        None => Next::Eof,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::RetryPolicy;

    fn idle_client() -> SseClient {
        // Port 9 (discard) is near-guaranteed closed; attempts fail fast.
        SseClient::new(
            StreamConfig::new("http://127.0.0.1:9/events")
                .with_retry(RetryPolicy::default().with_max_retries(0)),
        )
    }

    #[tokio::test]
    async fn test_new_client_is_idle() {
        let client = idle_client();
        assert_eq!(client.state(), ConnState::Idle);
    }

    #[tokio::test]
    async fn test_close_without_connect_emits_intentional_close() {
        let client = idle_client();
        let mut lifecycle = client.lifecycle();
        client.close();
        let signal = lifecycle.recv().await.unwrap();
        assert_eq!(
            signal,
            Lifecycle::Closed {
                intentional: true,
                reason: None
            }
        );
        assert_eq!(client.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let client = idle_client();
        let mut lifecycle = client.lifecycle();
        client.close();
        client.close();
        assert!(lifecycle.recv().await.is_some());
        // Give the worker time to process the second close.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lifecycle.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_reaches_terminal_close_with_zero_retries() {
        let client = idle_client();
        let mut lifecycle = client.lifecycle();
        client.connect();

        let signal = lifecycle.recv().await.unwrap();
        assert!(matches!(
            signal,
            Lifecycle::Error(StreamError::Transport { .. })
        ));

        let signal = lifecycle.recv().await.unwrap();
        assert_eq!(
            signal,
            Lifecycle::Closed {
                intentional: false,
                reason: Some(MAX_RETRIES_REACHED.to_string())
            }
        );
        assert_eq!(client.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn test_unsubscribe_via_handle() {
        let client = idle_client();
        let subscription = client.subscribe("tick");
        let id = subscription.id();
        assert!(id > 0);
        subscription.unsubscribe();
        // The command is fire-and-forget; the worker prunes the entry.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_state_receiver_observes_transitions() {
        let client = idle_client();
        let mut state_rx = client.state_receiver();
        client.connect();
        // Terminal state for this config is Closed (zero retries).
        loop {
            state_rx.changed().await.unwrap();
            if *state_rx.borrow() == ConnState::Closed {
                break;
            }
        }
    }
}
