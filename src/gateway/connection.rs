//! Connection lifecycle manager.
//!
//! Owns the single WebSocket to the gateway and walks it through
//!
//! ```text
//! Idle ─► Connecting ─► AwaitingChallenge ─► Handshaking ─► Authenticated
//!   ▲                                                            │
//!   └──────────── teardown (error, close, timeout, disconnect) ◄─┘
//! ```
//!
//! Every transition happens inside one short critical section on the state
//! mutex, triggered by an inbound frame, a transport event, or a timer.
//! A connect attempt runs as its own task and publishes its outcome through
//! a `watch` channel, so any number of callers can share one attempt and a
//! caller going away does not abandon the handshake for the others.
//!
//! Each attempt gets a fresh generation number. Reader and writer tasks tag
//! their teardown requests with it, so a task belonging to a dead socket can
//! never tear down its successor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{GatewayConfig, TimeoutConfig};
use crate::gateway::frame::{self, EventFrame, Frame};
use crate::gateway::pending::PendingTable;
use crate::{AppError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Shared outcome slot of one connect attempt. `None` while in flight.
type AttemptOutcome = Option<Result<()>>;

/// Longest prefix of a frame written to debug logs.
const LOG_PREVIEW_CHARS: usize = 300;

/// Capacity of the gateway event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Error delivered to requests still pending when the socket goes away.
const CONNECTION_CLOSED: &str = "Connection closed";

/// Lifecycle phase of the gateway connection.
///
/// There is no stored failure phase: a failure runs teardown, which lands
/// back in [`Phase::Idle`] so the next caller can retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No socket.
    Idle,
    /// Socket dialing.
    Connecting,
    /// Socket open, waiting for the gateway's challenge event.
    AwaitingChallenge,
    /// `connect` request sent, waiting for its response.
    Handshaking,
    /// Application requests may flow.
    Authenticated,
}

/// Counters for traffic that is deliberately dropped rather than surfaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Connect attempts started.
    pub connect_attempts: u64,
    /// Inbound frames discarded because they could not be decoded.
    pub malformed_frames: u64,
    /// Responses whose id matched no pending request.
    pub unmatched_responses: u64,
}

struct ConnState {
    phase: Phase,
    generation: u64,
    /// Writer-task queue for the live socket.
    outbound: Option<mpsc::UnboundedSender<String>>,
    /// Fires once when the challenge event arrives.
    challenge: Option<oneshot::Sender<()>>,
    /// In-flight connect marker.
    attempt: Option<watch::Receiver<AttemptOutcome>>,
    /// Stops the attempt and socket tasks of the current generation.
    cancel: Option<CancellationToken>,
}

impl ConnState {
    fn is_open(&self) -> bool {
        self.phase == Phase::Authenticated
            && self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
            && self.outbound.is_none()
            && self.attempt.is_none()
            && self.cancel.is_none()
    }
}

struct Inner {
    config: GatewayConfig,
    timeouts: TimeoutConfig,
    pending: PendingTable,
    state: Mutex<ConnState>,
    events: broadcast::Sender<EventFrame>,
    connect_attempts: AtomicU64,
    malformed_frames: AtomicU64,
    unmatched_responses: AtomicU64,
}

/// Owner of the single gateway socket.
///
/// Cheap to clone; clones share the socket. Callers never see the socket
/// itself, only [`ensure_connected`](Self::ensure_connected),
/// [`send`](Self::send), [`subscribe`](Self::subscribe) and
/// [`teardown`](Self::teardown).
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create an idle manager. No socket is opened until
    /// [`ensure_connected`](Self::ensure_connected) is called.
    #[must_use]
    pub fn new(config: GatewayConfig, timeouts: TimeoutConfig, pending: PendingTable) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                timeouts,
                pending,
                state: Mutex::new(ConnState {
                    phase: Phase::Idle,
                    generation: 0,
                    outbound: None,
                    challenge: None,
                    attempt: None,
                    cancel: None,
                }),
                events,
                connect_attempts: AtomicU64::new(0),
                malformed_frames: AtomicU64::new(0),
                unmatched_responses: AtomicU64::new(0),
            }),
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Whether the socket is open and the handshake has succeeded.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock().is_open()
    }

    /// Snapshot of the dropped-traffic counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connect_attempts: self.inner.connect_attempts.load(Ordering::Relaxed),
            malformed_frames: self.inner.malformed_frames.load(Ordering::Relaxed),
            unmatched_responses: self.inner.unmatched_responses.load(Ordering::Relaxed),
        }
    }

    /// Receive gateway events other than the handshake challenge.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventFrame> {
        self.inner.events.subscribe()
    }

    /// Return once the connection is authenticated, connecting first if
    /// needed. Concurrent callers share a single attempt.
    ///
    /// # Errors
    ///
    /// - [`AppError::Connection`] if the socket cannot be opened, closes
    ///   during setup, or the gateway rejects the handshake.
    /// - [`AppError::HandshakeTimeout`] if the challenge/connect round trip
    ///   or the whole attempt exceeds its bound.
    pub async fn ensure_connected(&self) -> Result<()> {
        let Some(mut outcome_rx) = self.join_or_start() else {
            return Ok(());
        };

        let outcome: AttemptOutcome = match outcome_rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };

        outcome.unwrap_or_else(|| Err(AppError::Connection("connect attempt abandoned".into())))
    }

    /// Queue an application frame on the authenticated socket.
    ///
    /// Frames are written in the order `send` is called.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Connection`]`("not connected")` unless the
    /// connection is authenticated and its socket is open.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        let text = frame::encode(frame)?;
        let state = self.lock();
        if !state.is_open() {
            return Err(AppError::Connection("not connected".into()));
        }
        Self::enqueue(&state, text)
    }

    /// Tear the connection down, whatever its phase.
    ///
    /// Fails every pending request with a connection-closed error, stops the
    /// socket tasks, and clears the in-flight connect marker. Idempotent.
    pub fn teardown(&self) {
        let mut state = self.lock();
        self.teardown_locked(&mut state, "disconnect requested");
    }

    // ── Connect attempt ───────────────────────────────────────────────────────

    /// Return `None` if already authenticated, otherwise a receiver for the
    /// in-flight attempt, starting one if there is none.
    fn join_or_start(&self) -> Option<watch::Receiver<AttemptOutcome>> {
        let mut state = self.lock();
        if state.is_open() {
            return None;
        }
        if let Some(rx) = &state.attempt {
            return Some(rx.clone());
        }

        // Authenticated but the writer is gone, or leftovers from a task that
        // has not reported yet.
        self.teardown_locked(&mut state, "stale connection replaced");

        state.generation += 1;
        let generation = state.generation;
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        state.phase = Phase::Connecting;
        state.cancel = Some(cancel.clone());
        state.attempt = Some(outcome_rx.clone());
        drop(state);

        self.inner.connect_attempts.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(self.clone().run_attempt(generation, cancel, outcome_tx));
        Some(outcome_rx)
    }

    async fn run_attempt(
        self,
        generation: u64,
        cancel: CancellationToken,
        outcome_tx: watch::Sender<AttemptOutcome>,
    ) {
        let connect_timeout = self.inner.timeouts.connect();

        let mut result = tokio::select! {
            biased;

            () = cancel.cancelled() => Err(AppError::Connection(CONNECTION_CLOSED.into())),

            res = tokio::time::timeout(connect_timeout, self.establish(generation, &cancel)) => {
                res.unwrap_or_else(|_| {
                    Err(AppError::HandshakeTimeout(format!(
                        "connection timeout after {}ms",
                        connect_timeout.as_millis()
                    )))
                })
            }
        };

        if result.is_ok() {
            let mut state = self.lock();
            if state.generation == generation && state.phase == Phase::Handshaking {
                state.phase = Phase::Authenticated;
                state.attempt = None;
                info!(url = %self.inner.config.url, "gateway authenticated");
            } else {
                result = Err(AppError::Connection(CONNECTION_CLOSED.into()));
            }
        }

        if let Err(ref err) = result {
            warn!(url = %self.inner.config.url, %err, "gateway connect attempt failed");
            self.teardown_generation(generation, "connect attempt failed");
        }

        // Receivers may all be gone; the outcome is then simply unobserved.
        let _ = outcome_tx.send(Some(result));
    }

    /// Dial, wait for the challenge, send `connect`, wait for its response.
    async fn establish(&self, generation: u64, cancel: &CancellationToken) -> Result<()> {
        let url = self.inner.config.url.as_str();
        info!(url, "connecting to gateway");

        let (ws, _response) = connect_async(url).await?;
        let (sink, stream) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (challenge_tx, challenge_rx) = oneshot::channel();

        {
            let mut state = self.lock();
            if state.generation != generation || cancel.is_cancelled() {
                return Err(AppError::Connection(CONNECTION_CLOSED.into()));
            }
            state.phase = Phase::AwaitingChallenge;
            state.outbound = Some(outbound_tx);
            state.challenge = Some(challenge_tx);
        }

        tokio::spawn(run_writer(
            self.clone(),
            generation,
            sink,
            outbound_rx,
            cancel.clone(),
        ));
        tokio::spawn(run_reader(self.clone(), generation, stream, cancel.clone()));
        debug!(url, "socket open, waiting for challenge");

        let handshake_timeout = self.inner.timeouts.handshake();
        let deadline = Instant::now() + handshake_timeout;

        match tokio::time::timeout_at(deadline, challenge_rx).await {
            Err(_) => {
                return Err(AppError::HandshakeTimeout(format!(
                    "no challenge within {}ms",
                    handshake_timeout.as_millis()
                )));
            }
            Ok(Err(_)) => {
                return Err(AppError::Connection(
                    "connection closed before challenge".into(),
                ));
            }
            Ok(Ok(())) => {}
        }

        let connect_id = Uuid::new_v4().to_string();
        let completion = self.inner.pending.register(
            connect_id.clone(),
            deadline.saturating_duration_since(Instant::now()),
            AppError::HandshakeTimeout("connect auth timeout".into()),
        );
        let text = frame::encode(&Frame::connect(connect_id, &self.inner.config))?;
        {
            let state = self.lock();
            if state.generation != generation || state.phase != Phase::Handshaking {
                return Err(AppError::Connection(CONNECTION_CLOSED.into()));
            }
            Self::enqueue(&state, text)?;
        }
        debug!("connect request sent");

        completion.wait().await.map_err(|err| match err {
            AppError::Gateway(msg) => AppError::Connection(format!("handshake rejected: {msg}")),
            other => other,
        })?;
        Ok(())
    }

    // ── Inbound dispatch ──────────────────────────────────────────────────────

    fn dispatch(&self, generation: u64, text: &str) {
        debug!(frame = preview(text), "recv");

        let frame = match frame::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                self.inner.malformed_frames.fetch_add(1, Ordering::Relaxed);
                debug!(%err, "dropping undecodable frame");
                return;
            }
        };

        match frame {
            ref challenge if challenge.is_challenge() => self.on_challenge(generation),
            Frame::Event(ev) => {
                // No subscribers is fine.
                let _ = self.inner.events.send(ev);
            }
            Frame::Response(res) => {
                let id = res.id.clone();
                if !self.inner.pending.resolve(&id, res.into_outcome()) {
                    self.inner.unmatched_responses.fetch_add(1, Ordering::Relaxed);
                    debug!(%id, "response matches no pending request, dropping");
                }
            }
            Frame::Request(req) => {
                debug!(method = %req.method, "ignoring request frame from gateway");
            }
        }
    }

    fn on_challenge(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        match state.challenge.take() {
            Some(tx) => {
                state.phase = Phase::Handshaking;
                let _ = tx.send(());
                debug!("challenge received, sending connect");
            }
            None => debug!("repeated challenge ignored"),
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Tear down only if `generation` is still the live one.
    fn teardown_generation(&self, generation: u64, reason: &str) {
        let mut state = self.lock();
        if state.generation == generation {
            self.teardown_locked(&mut state, reason);
        }
    }

    fn teardown_locked(&self, state: &mut ConnState, reason: &str) {
        if state.is_idle() {
            return;
        }

        state.phase = Phase::Idle;
        state.outbound = None;
        state.challenge = None;
        state.attempt = None;
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }

        let failed = self
            .inner
            .pending
            .fail_all(&AppError::Connection(CONNECTION_CLOSED.into()));
        info!(reason, failed, "gateway connection torn down");
    }

    fn enqueue(state: &ConnState, text: String) -> Result<()> {
        let Some(tx) = state.outbound.as_ref() else {
            return Err(AppError::Connection("not connected".into()));
        };
        tx.send(text)
            .map_err(|_| AppError::Connection("not connected".into()))
    }

    fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Socket tasks ──────────────────────────────────────────────────────────────

/// Drain the outbound queue into the socket until cancelled.
async fn run_writer(
    conn: ConnectionManager,
    generation: u64,
    mut sink: SplitSink<WsStream, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                // Best effort close frame.
                let _ = sink.close().await;
                break;
            }

            next = outbound_rx.recv() => {
                let Some(text) = next else {
                    break;
                };
                if let Err(err) = sink.send(Message::Text(text.into())).await {
                    warn!(%err, "gateway write failed");
                    conn.teardown_generation(generation, "write failed");
                    break;
                }
            }
        }
    }
    debug!(generation, "gateway writer stopped");
}

/// Feed inbound text frames to the dispatcher until the socket ends.
async fn run_reader(
    conn: ConnectionManager,
    generation: u64,
    mut stream: SplitStream<WsStream>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            item = stream.next() => {
                match item {
                    Some(Ok(Message::Text(text))) => conn.dispatch(generation, text.as_str()),
                    Some(Ok(Message::Close(close))) => {
                        debug!(?close, "gateway sent close frame");
                        conn.teardown_generation(generation, "closed by gateway");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong is answered by tungstenite; binary is not part of the protocol.
                    }
                    Some(Err(err)) => {
                        warn!(%err, "gateway socket error");
                        conn.teardown_generation(generation, "socket error");
                        break;
                    }
                    None => {
                        conn.teardown_generation(generation, "socket closed");
                        break;
                    }
                }
            }
        }
    }
    debug!(generation, "gateway reader stopped");
}

fn preview(text: &str) -> &str {
    text.char_indices()
        .nth(LOG_PREVIEW_CHARS)
        .map_or(text, |(idx, _)| &text[..idx])
}
