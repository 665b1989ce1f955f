//! The session orchestrator.
//!
//! [`SessionCore`] owns one conversation with the remote service. `start`
//! spawns a single event loop that selects over capture frames, user text,
//! interrupt requests, inbound transport events, a pending connection
//! attempt and the reconnect timer. All session state lives in that loop;
//! the [`SessionHandle`] only sends it signals.

mod backoff;

use crate::audio::{AudioCaptureSource, AudioSink, Frame};
use crate::buffer::OutboundBuffer;
use crate::config::SessionConfig;
use crate::credentials::{Credential, CredentialSource};
use crate::error::{AuthFailure, SessionError};
use crate::stats::SessionStats;
use crate::transport::{ConversationHandle, InboundEvent, Outbound, StreamTransport, TransportFactory};
use backoff::Backoff;
use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Reconnecting,
    Interrupted,
    /// Terminal.
    Stopped,
}

/// What the session reports to its front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Transcript(String),
    /// Inbound audio, only when enabled with [`SessionCore::with_audio_events`].
    Audio(Frame),
    TurnComplete,
    /// The remote cut the current response short.
    Interrupted,
    /// A recoverable error the session is already handling.
    Recovering(SessionError),
    /// Capture or playback failed. The network session carries on.
    DeviceError(SessionError),
    /// The session ended because of this error.
    Fatal(SessionError),
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub factor: f32,
    pub max_delay: Duration,
    /// Consecutive protocol failures tolerated before the session gives up.
    pub max_consecutive_protocol_failures: u32,
    /// Captured frames kept while there is no connection.
    pub capture_ring_capacity: usize,
    /// Text turns kept while there is no connection.
    pub pending_text_capacity: usize,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_consecutive_protocol_failures: 3,
            // 64 frames of 64 ms, about four seconds of speech.
            capture_ring_capacity: 64,
            pending_text_capacity: 16,
        }
    }
}

/// A session waiting to be started, holding its injected collaborators.
pub struct SessionCore {
    credentials: Arc<dyn CredentialSource>,
    factory: Arc<dyn TransportFactory>,
    capture: Box<dyn AudioCaptureSource>,
    sink: Box<dyn AudioSink>,
    policy: ReconnectPolicy,
    audio_events: bool,
}

impl SessionCore {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        factory: Arc<dyn TransportFactory>,
        capture: Box<dyn AudioCaptureSource>,
        sink: Box<dyn AudioSink>,
    ) -> Self {
        Self {
            credentials,
            factory,
            capture,
            sink,
            policy: ReconnectPolicy::default(),
            audio_events: false,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Also publish inbound audio as [`SessionEvent::Audio`], for front-ends
    /// that render audio themselves.
    pub fn with_audio_events(mut self, enabled: bool) -> Self {
        self.audio_events = enabled;
        self
    }

    /// Spawns the event loop on the current tokio runtime and begins
    /// connecting. The returned receiver sees every event from the start.
    pub fn start(self, config: SessionConfig) -> (SessionHandle, broadcast::Receiver<SessionEvent>) {
        let (events, events_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        // The loop owns the only sender, so receivers close once it finishes.
        let subscriber = events_rx.resubscribe();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Mutex::new(SessionStats::new()));
        let cancel = CancellationToken::new();

        let mut capture = self.capture;
        let capture_errors = capture.take_errors();
        let mut sink = self.sink;
        let sink_errors = sink.take_errors();

        let event_loop = SessionLoop {
            credentials: self.credentials,
            factory: self.factory,
            capture,
            sink,
            config,
            audio_events: self.audio_events,
            max_protocol_failures: self.policy.max_consecutive_protocol_failures,
            backoff: Backoff::new(
                self.policy.base_delay,
                self.policy.factor,
                self.policy.max_delay,
            ),
            ring: OutboundBuffer::new(self.policy.capture_ring_capacity),
            pending_text: OutboundBuffer::new(self.policy.pending_text_capacity),
            events,
            state: state_tx,
            stats: stats.clone(),
            cancel: cancel.clone(),
            text_rx,
            interrupt_rx,
            credential: None,
            handle: None,
            transport: None,
            pending_open: None,
            retry_timer: None,
            capture_rx: None,
            capture_started: false,
            capture_errors,
            sink_errors,
            muted: false,
            turn_in_progress: false,
            protocol_failures: 0,
            finished: false,
        };
        let join = tokio::spawn(event_loop.run());

        let handle = SessionHandle {
            text_tx,
            interrupt_tx,
            cancel,
            state: state_rx,
            events: subscriber,
            stats,
            join: tokio::sync::Mutex::new(Some(join)),
        };
        (handle, events_rx)
    }
}

/// Front-end side of a running session. Dropping it stops the session.
pub struct SessionHandle {
    text_tx: mpsc::UnboundedSender<String>,
    interrupt_tx: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
    events: broadcast::Receiver<SessionEvent>,
    stats: Arc<Mutex<SessionStats>>,
    join: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    /// Queues a user text turn. Empty text is sent as ".".
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        if self.is_stopped() {
            return Err(SessionError::Stopped);
        }
        self.text_tx
            .send(text.into())
            .map_err(|_| SessionError::Stopped)
    }

    /// Cuts the current response short. Takes effect before any further
    /// captured audio is forwarded.
    pub fn interrupt(&self) -> Result<(), SessionError> {
        if self.is_stopped() {
            return Err(SessionError::Stopped);
        }
        self.interrupt_tx.send(()).map_err(|_| SessionError::Stopped)
    }

    /// Stops the session and waits for every resource to be released.
    /// Idempotent; concurrent callers all return after teardown finished.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut join = self.join.lock().await;
        if let Some(task) = join.take() {
            if let Err(e) = task.await {
                tracing::error!("session task failed: {e}");
            }
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == SessionState::Stopped
    }

    /// Watches state transitions. Momentary states may be coalesced; use
    /// [`SessionHandle::subscribe`] to see every transition.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Sees events from now on. Closed once the session has stopped.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.resubscribe()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

type OpenFuture = Pin<Box<dyn Future<Output = Result<Box<dyn StreamTransport>, SessionError>> + Send>>;

struct SessionLoop {
    credentials: Arc<dyn CredentialSource>,
    factory: Arc<dyn TransportFactory>,
    capture: Box<dyn AudioCaptureSource>,
    sink: Box<dyn AudioSink>,
    config: SessionConfig,
    audio_events: bool,
    max_protocol_failures: u32,
    backoff: Backoff,
    /// Captured frames waiting for a connection.
    ring: OutboundBuffer<Frame>,
    pending_text: OutboundBuffer<String>,

    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<SessionState>,
    stats: Arc<Mutex<SessionStats>>,
    cancel: CancellationToken,
    text_rx: mpsc::UnboundedReceiver<String>,
    interrupt_rx: mpsc::UnboundedReceiver<()>,

    credential: Option<Credential>,
    handle: Option<ConversationHandle>,
    transport: Option<Box<dyn StreamTransport>>,
    pending_open: Option<OpenFuture>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    capture_rx: Option<mpsc::Receiver<Frame>>,
    capture_started: bool,
    capture_errors: Option<mpsc::UnboundedReceiver<SessionError>>,
    sink_errors: Option<mpsc::UnboundedReceiver<SessionError>>,

    /// Drop inbound output until the interrupted turn ends.
    muted: bool,
    turn_in_progress: bool,
    protocol_failures: u32,
    finished: bool,
}

async fn poll_open(open: &mut Option<OpenFuture>) -> Result<Box<dyn StreamTransport>, SessionError> {
    match open {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn poll_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.await,
        None => pending().await,
    }
}

async fn next_inbound(transport: &mut Option<Box<dyn StreamTransport>>) -> Option<InboundEvent> {
    match transport {
        Some(t) => t.next_event().await,
        None => pending().await,
    }
}

async fn next_frame(capture: &mut Option<mpsc::Receiver<Frame>>) -> Option<Frame> {
    match capture {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn next_device_error(errors: &mut Option<mpsc::UnboundedReceiver<SessionError>>) -> Option<SessionError> {
    match errors {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

impl SessionLoop {
    async fn run(mut self) {
        self.set_state(SessionState::Connecting);
        self.begin_attempt();

        loop {
            self.drain_interrupts();
            if self.finished {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("session stop requested");
                    break;
                }
                Some(()) = self.interrupt_rx.recv() => self.on_interrupt(),
                result = poll_open(&mut self.pending_open) => {
                    self.pending_open = None;
                    self.on_open(result);
                }
                () = poll_timer(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.begin_attempt();
                }
                event = next_inbound(&mut self.transport) => self.on_inbound(event).await,
                frame = next_frame(&mut self.capture_rx) => self.on_capture(frame),
                Some(text) = self.text_rx.recv() => self.on_text(text),
                error = next_device_error(&mut self.capture_errors) => self.on_capture_error(error),
                error = next_device_error(&mut self.sink_errors) => self.on_sink_error(error),
            }
        }

        self.shutdown().await;
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn with_stats(&self, f: impl FnOnce(&mut SessionStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *stats);
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&mut self, next: SessionState) {
        let current = self.current_state();
        if current == next || current == SessionState::Stopped {
            return;
        }
        tracing::info!(from = ?current, to = ?next, "session state");
        self.state.send_replace(next);
        self.emit(SessionEvent::StateChanged(next));
    }

    fn is_live(&self) -> bool {
        matches!(
            self.current_state(),
            SessionState::Active | SessionState::Interrupted
        )
    }

    fn fail(&mut self, error: SessionError) {
        tracing::error!("session failed: {error}");
        self.emit(SessionEvent::Fatal(error));
        self.finished = true;
    }

    /// Starts one connection attempt with the current credential, taking the
    /// next one from the source when there is none.
    fn begin_attempt(&mut self) {
        let credential = match &self.credential {
            Some(c) => c.clone(),
            None => match self.credentials.next() {
                Ok(c) => {
                    self.credential = Some(c.clone());
                    c
                }
                Err(e) => {
                    self.fail(e);
                    return;
                }
            },
        };
        tracing::info!(
            credential = credential.index(),
            resume = self.handle.is_some(),
            "opening transport"
        );

        let factory = self.factory.clone();
        let config = self.config.clone();
        let handle = self.handle.clone();
        self.pending_open = Some(Box::pin(async move {
            factory.open(&credential, &config, handle.as_ref()).await
        }));
    }

    fn schedule_retry(&mut self) {
        let delay = self.backoff.next_delay();
        self.with_stats(SessionStats::reconnect_attempted);
        tracing::info!(?delay, "reconnect scheduled");
        self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
    }

    fn on_open(&mut self, result: Result<Box<dyn StreamTransport>, SessionError>) {
        match result {
            Ok(transport) => {
                let resumed = self.current_state() == SessionState::Reconnecting;
                self.transport = Some(transport);
                self.protocol_failures = 0;
                self.backoff.reset();
                if resumed {
                    self.with_stats(SessionStats::reconnected);
                }
                tracing::info!(resumed, "transport open");
                self.set_state(SessionState::Active);
                self.ensure_capture();
                self.forward_buffered();
            }
            Err(SessionError::Auth { kind, message }) => {
                self.rotate_credential(kind, SessionError::Auth { kind, message });
            }
            Err(error) if error.wants_reconnect() => self.retry_after(error),
            Err(error) => self.fail(error),
        }
    }

    /// Retires the current credential and immediately tries the next one.
    fn rotate_credential(&mut self, kind: AuthFailure, error: SessionError) {
        if let Some(credential) = self.credential.take() {
            tracing::warn!(credential = credential.index(), "{error}");
            match kind {
                AuthFailure::Invalid => self.credentials.mark_invalid(&credential),
                AuthFailure::Exhausted => self.credentials.mark_exhausted(&credential),
            }
        }
        self.with_stats(SessionStats::credential_rotated);
        self.emit(SessionEvent::Recovering(error));
        if self.is_live() {
            self.set_state(SessionState::Reconnecting);
        }
        self.begin_attempt();
    }

    /// Handles a failed or lost connection that a later attempt may get past.
    fn retry_after(&mut self, error: SessionError) {
        if let SessionError::Protocol(_) = error {
            self.protocol_failures += 1;
            if self.protocol_failures > self.max_protocol_failures {
                tracing::error!(failures = self.protocol_failures, "too many protocol failures");
                self.fail(error);
                return;
            }
        }
        tracing::warn!("recoverable error: {error}");
        self.emit(SessionEvent::Recovering(error));
        if self.is_live() {
            self.set_state(SessionState::Reconnecting);
        }
        self.schedule_retry();
    }

    async fn drop_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.muted = false;
        self.turn_in_progress = false;
    }

    async fn on_inbound(&mut self, event: Option<InboundEvent>) {
        let Some(event) = event else {
            tracing::info!("inbound stream ended");
            self.drop_transport().await;
            self.retry_after(SessionError::IdleTimeout("connection closed".into()));
            return;
        };

        match event {
            InboundEvent::AudioChunk(frame) => {
                if self.muted {
                    tracing::trace!("dropping audio from interrupted turn");
                    return;
                }
                self.turn_in_progress = true;
                self.with_stats(SessionStats::audio_received);
                if self.audio_events {
                    self.emit(SessionEvent::Audio(frame.clone()));
                }
                self.sink.enqueue(frame);
            }
            InboundEvent::TextChunk(text) => {
                if self.muted {
                    return;
                }
                self.turn_in_progress = true;
                self.emit(SessionEvent::Transcript(text));
            }
            InboundEvent::TurnComplete => {
                tracing::debug!("turn complete");
                self.turn_in_progress = false;
                self.muted = false;
                if self.current_state() == SessionState::Interrupted {
                    self.set_state(SessionState::Active);
                }
                self.emit(SessionEvent::TurnComplete);
            }
            InboundEvent::Interrupted => {
                let flushed = self.sink.flush();
                let discarded = self.ring.clear();
                tracing::debug!(flushed, discarded, "remote interrupted the turn");
                self.with_stats(|s| s.flushed(flushed));
                self.turn_in_progress = false;
                self.muted = false;
                if self.current_state() == SessionState::Interrupted {
                    self.set_state(SessionState::Active);
                }
                self.emit(SessionEvent::Interrupted);
            }
            InboundEvent::Resumption(handle) => {
                tracing::debug!(?handle, "conversation handle updated");
                self.handle = Some(handle);
            }
            InboundEvent::Error(SessionError::Auth { kind, message }) => {
                self.drop_transport().await;
                self.rotate_credential(kind, SessionError::Auth { kind, message });
            }
            InboundEvent::Error(error) if error.wants_reconnect() => {
                self.drop_transport().await;
                self.retry_after(error);
            }
            InboundEvent::Error(error) => {
                self.drop_transport().await;
                self.fail(error);
            }
        }
    }

    fn drain_interrupts(&mut self) {
        while let Ok(()) = self.interrupt_rx.try_recv() {
            self.on_interrupt();
        }
    }

    fn on_interrupt(&mut self) {
        let previous = self.current_state();
        let flushed = self.sink.flush();
        let discarded = self.ring.clear();
        self.with_stats(|s| s.flushed(flushed));
        self.muted = self.turn_in_progress;
        tracing::info!(flushed, discarded, muted = self.muted, "interrupt");

        self.set_state(SessionState::Interrupted);
        let acknowledged = self
            .transport
            .as_mut()
            .is_some_and(|t| t.signal_interrupt());
        if !acknowledged {
            let back = match previous {
                SessionState::Interrupted => SessionState::Active,
                other => other,
            };
            self.set_state(back);
        }
    }

    fn ensure_capture(&mut self) {
        if self.capture_started {
            return;
        }
        self.capture_started = true;
        match self.capture.start() {
            Ok(rx) => {
                tracing::info!("capture started");
                self.capture_rx = Some(rx);
            }
            Err(error) => {
                tracing::error!("capture unavailable: {error}");
                self.emit(SessionEvent::DeviceError(error));
            }
        }
    }

    fn on_capture(&mut self, frame: Option<Frame>) {
        let Some(frame) = frame else {
            self.capture_rx = None;
            let error = SessionError::Device("capture stream ended".into());
            tracing::error!("{error}");
            self.emit(SessionEvent::DeviceError(error));
            return;
        };
        // Interrupts queued before this frame win.
        self.drain_interrupts();
        self.forward_audio(frame);
    }

    fn forward_audio(&mut self, frame: Frame) {
        if self.transport.is_some() {
            self.send(Outbound::Audio(frame));
        } else if self.ring.push(frame).is_err() {
            self.with_stats(SessionStats::ring_overflowed);
        }
    }

    fn on_text(&mut self, text: String) {
        let text = if text.trim().is_empty() {
            ".".to_string()
        } else {
            text
        };
        if self.transport.is_some() {
            self.send(Outbound::Text(text));
        } else if let Err(error) = self.pending_text.push(text) {
            tracing::warn!("oldest pending text dropped: {error}");
            self.with_stats(SessionStats::send_failed);
        }
    }

    fn send(&mut self, message: Outbound) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let is_audio = matches!(message, Outbound::Audio(_));
        match transport.send(message) {
            Ok(()) if is_audio => self.with_stats(SessionStats::frame_sent),
            Ok(()) => self.with_stats(SessionStats::text_sent),
            Err(error) => {
                tracing::warn!("send failed: {error}");
                self.with_stats(SessionStats::send_failed);
            }
        }
    }

    /// Forwards what was captured or typed while disconnected, oldest first.
    fn forward_buffered(&mut self) {
        let frames = self.ring.drain();
        let texts = self.pending_text.drain();
        if !frames.is_empty() || !texts.is_empty() {
            tracing::info!(frames = frames.len(), texts = texts.len(), "forwarding buffered input");
        }
        for frame in frames {
            self.send(Outbound::Audio(frame));
        }
        for text in texts {
            self.send(Outbound::Text(text));
        }
    }

    fn on_capture_error(&mut self, error: Option<SessionError>) {
        match error {
            Some(error) => {
                tracing::error!("capture error: {error}");
                self.emit(SessionEvent::DeviceError(error));
            }
            None => self.capture_errors = None,
        }
    }

    fn on_sink_error(&mut self, error: Option<SessionError>) {
        match error {
            Some(error) => {
                tracing::error!("playback error: {error}");
                self.emit(SessionEvent::DeviceError(error));
            }
            None => self.sink_errors = None,
        }
    }

    async fn shutdown(&mut self) {
        self.retry_timer = None;
        self.pending_open = None;
        self.capture.stop();
        self.capture_rx = None;
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        let flushed = self.sink.flush();
        self.sink.close();
        self.with_stats(|s| s.flushed(flushed));
        self.ring.clear();
        self.pending_text.clear();
        self.handle = None;
        if let Some(credential) = self.credential.take() {
            self.credentials.release(&credential);
        }
        self.set_state(SessionState::Stopped);
        tracing::info!("session stopped");
    }
}
