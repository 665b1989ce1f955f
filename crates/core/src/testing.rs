//! Scripted collaborators for driving a session in tests.

use crate::audio::{AudioCaptureSource, AudioSink, Frame};
use crate::config::SessionConfig;
use crate::credentials::Credential;
use crate::error::SessionError;
use crate::playback::PlaybackQueue;
use crate::transport::{
    ConnectionState, ConversationHandle, InboundEvent, Outbound, StreamTransport, TransportFactory,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Shared record of side effects, in the order they happened across doubles.
pub(crate) type Journal = Arc<Mutex<Vec<&'static str>>>;

fn note(journal: &Option<Journal>, entry: &'static str) {
    if let Some(journal) = journal {
        journal.lock().unwrap().push(entry);
    }
}

pub(crate) enum Outcome {
    Connect(ScriptedTransport),
    Fail(SessionError),
}

#[derive(Debug, Clone)]
pub(crate) struct OpenCall {
    pub credential: usize,
    pub handle: Option<ConversationHandle>,
    pub at: Instant,
}

/// Answers `open` calls from a script. Once the script runs out, `open`
/// never completes.
#[derive(Default)]
pub(crate) struct ScriptedFactory {
    outcomes: Mutex<VecDeque<Outcome>>,
    calls: Mutex<Vec<OpenCall>>,
}

impl ScriptedFactory {
    pub fn new(outcomes: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, outcome: Outcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<OpenCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn open(
        &self,
        credential: &Credential,
        _config: &SessionConfig,
        handle: Option<&ConversationHandle>,
    ) -> Result<Box<dyn StreamTransport>, SessionError> {
        self.calls.lock().unwrap().push(OpenCall {
            credential: credential.index(),
            handle: handle.cloned(),
            at: Instant::now(),
        });
        let next = self.outcomes.lock().unwrap().pop_front();
        match next {
            Some(Outcome::Connect(transport)) => Ok(Box::new(transport)),
            Some(Outcome::Fail(error)) => Err(error),
            None => std::future::pending().await,
        }
    }
}

/// Test-side view of a [`ScriptedTransport`].
#[derive(Clone)]
pub(crate) struct TransportProbe {
    feed: mpsc::UnboundedSender<Option<InboundEvent>>,
    sent: Arc<Mutex<Vec<Outbound>>>,
    closed: Arc<AtomicBool>,
    interrupt_signals: Arc<AtomicUsize>,
}

impl TransportProbe {
    pub fn emit(&self, event: InboundEvent) {
        let _ = self.feed.send(Some(event));
    }

    /// Ends the inbound stream, as a remote close would.
    pub fn end(&self) {
        let _ = self.feed.send(None);
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_audio(&self) -> Vec<Frame> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Outbound::Audio(frame) => Some(frame),
                Outbound::Text(_) => None,
            })
            .collect()
    }

    pub fn sent_text(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Outbound::Text(text) => Some(text),
                Outbound::Audio(_) => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn interrupt_signals(&self) -> usize {
        self.interrupt_signals.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScriptedTransport {
    events: mpsc::UnboundedReceiver<Option<InboundEvent>>,
    probe: TransportProbe,
    acknowledges_interrupts: bool,
    ended: bool,
    journal: Option<Journal>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, TransportProbe) {
        let (feed, events) = mpsc::unbounded_channel();
        let probe = TransportProbe {
            feed,
            sent: Arc::default(),
            closed: Arc::default(),
            interrupt_signals: Arc::default(),
        };
        let transport = Self {
            events,
            probe: probe.clone(),
            acknowledges_interrupts: false,
            ended: false,
            journal: None,
        };
        (transport, probe)
    }

    pub fn acknowledging_interrupts(mut self) -> Self {
        self.acknowledges_interrupts = true;
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    fn send(&mut self, message: Outbound) -> Result<(), SessionError> {
        if self.probe.is_closed() {
            return Err(SessionError::NotConnected);
        }
        note(
            &self.journal,
            match message {
                Outbound::Audio(_) => "send audio",
                Outbound::Text(_) => "send text",
            },
        );
        self.probe.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<InboundEvent> {
        if self.ended || self.probe.is_closed() {
            return None;
        }
        match self.events.recv().await {
            Some(Some(event)) => Some(event),
            _ => {
                self.ended = true;
                None
            }
        }
    }

    async fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }

    fn state(&self) -> ConnectionState {
        if self.probe.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    fn signal_interrupt(&mut self) -> bool {
        self.probe.interrupt_signals.fetch_add(1, Ordering::SeqCst);
        self.acknowledges_interrupts
    }
}

#[derive(Clone, Default)]
pub(crate) struct CaptureProbe {
    feed: Arc<Mutex<Option<mpsc::Sender<Frame>>>>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    errors: Arc<Mutex<Option<mpsc::UnboundedSender<SessionError>>>>,
}

impl CaptureProbe {
    /// Delivers one frame if capture is running. Returns whether it was delivered.
    pub fn push(&self, frame: Frame) -> bool {
        let feed = self.feed.lock().unwrap().clone();
        feed.is_some_and(|tx| tx.try_send(frame).is_ok())
    }

    /// Simulates the device going away.
    pub fn unplug(&self) {
        self.feed.lock().unwrap().take();
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.feed.lock().unwrap().is_some()
    }

    /// Reports a failure of the running stream without ending it.
    pub fn report(&self, error: SessionError) {
        if let Some(tx) = self.errors.lock().unwrap().as_ref() {
            let _ = tx.send(error);
        }
    }
}

pub(crate) struct ScriptedCapture {
    probe: CaptureProbe,
    open_error: Option<SessionError>,
    errors: Option<mpsc::UnboundedReceiver<SessionError>>,
}

impl ScriptedCapture {
    pub fn new() -> (Self, CaptureProbe) {
        let probe = CaptureProbe::default();
        let (tx, rx) = mpsc::unbounded_channel();
        *probe.errors.lock().unwrap() = Some(tx);
        (
            Self {
                probe: probe.clone(),
                open_error: None,
                errors: Some(rx),
            },
            probe,
        )
    }

    pub fn failing(error: SessionError) -> (Self, CaptureProbe) {
        let (mut capture, probe) = Self::new();
        capture.open_error = Some(error);
        (capture, probe)
    }
}

impl AudioCaptureSource for ScriptedCapture {
    fn start(&mut self) -> Result<mpsc::Receiver<Frame>, SessionError> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.open_error.clone() {
            return Err(error);
        }
        let (tx, rx) = mpsc::channel(256);
        *self.probe.feed.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<SessionError>> {
        self.errors.take()
    }

    fn stop(&mut self) {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        self.probe.feed.lock().unwrap().take();
    }
}

#[derive(Clone, Default)]
pub(crate) struct SinkProbe {
    queue: PlaybackQueue,
    enqueued: Arc<Mutex<Vec<Frame>>>,
    flushes: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    errors: Arc<Mutex<Option<mpsc::UnboundedSender<SessionError>>>>,
}

impl SinkProbe {
    pub fn enqueued(&self) -> Vec<Frame> {
        self.enqueued.lock().unwrap().clone()
    }

    /// Frames still waiting to be played.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn report(&self, error: SessionError) {
        if let Some(tx) = self.errors.lock().unwrap().as_ref() {
            let _ = tx.send(error);
        }
    }
}

/// Records every frame and keeps an unplayed queue, as a device that never
/// consumes anything would.
pub(crate) struct RecordingSink {
    probe: SinkProbe,
    errors: Option<mpsc::UnboundedReceiver<SessionError>>,
    journal: Option<Journal>,
}

impl RecordingSink {
    pub fn new() -> (Self, SinkProbe) {
        let probe = SinkProbe::default();
        let (tx, rx) = mpsc::unbounded_channel();
        *probe.errors.lock().unwrap() = Some(tx);
        (
            Self {
                probe: probe.clone(),
                errors: Some(rx),
                journal: None,
            },
            probe,
        )
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }
}

impl AudioSink for RecordingSink {
    fn enqueue(&self, frame: Frame) {
        self.probe.enqueued.lock().unwrap().push(frame.clone());
        self.probe.queue.enqueue(frame);
    }

    fn flush(&self) -> usize {
        note(&self.journal, "flush");
        self.probe.flushes.fetch_add(1, Ordering::SeqCst);
        self.probe.queue.flush()
    }

    fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<SessionError>> {
        self.errors.take()
    }

    fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}

/// Yields to the runtime until `cond` holds, failing after a generous
/// amount of (virtual) time.
pub(crate) async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(300);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
