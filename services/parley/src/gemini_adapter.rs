//! Gemini Live implementation of the session's transport seam.

use async_trait::async_trait;
use gemini_live::types::{GenerationConfig, Modality, ServerMessage, Setup};
use gemini_live::{Client, ClientError, FailureClass};
use parley_core::buffer::OutboundBuffer;
use parley_core::{
    ConnectionState, ConnectionStateCell, ConversationHandle, Credential, Frame, InboundEvent,
    Outbound, ResponseMode, SessionConfig, SessionError, StreamTransport, TransportFactory,
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Messages waiting for the socket writer.
const OUTBOUND_CAPACITY: usize = 128;
const INBOUND_CAPACITY: usize = 256;
/// Upper bound on a graceful websocket shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub base_url: String,
    pub model: String,
    pub setup_timeout: Duration,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            base_url: gemini_live::consts::BASE_URL.to_string(),
            model: gemini_live::consts::DEFAULT_MODEL.to_string(),
            setup_timeout: Duration::from_secs(gemini_live::consts::DEFAULT_SETUP_TIMEOUT_SECS),
        }
    }
}

/// Opens one Live websocket per connection attempt.
pub struct GeminiFactory {
    settings: GeminiSettings,
}

impl GeminiFactory {
    pub fn new(settings: GeminiSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TransportFactory for GeminiFactory {
    async fn open(
        &self,
        credential: &Credential,
        config: &SessionConfig,
        handle: Option<&ConversationHandle>,
    ) -> Result<Box<dyn StreamTransport>, SessionError> {
        let client_config = gemini_live::Config::builder()
            .with_base_url(&self.settings.base_url)
            .with_model(&self.settings.model)
            .with_setup_timeout(self.settings.setup_timeout)
            .with_api_key(SecretString::from(
                credential.secret().expose_secret().to_string(),
            ))
            .build();
        let setup = build_setup(&self.settings.model, config, handle);

        tracing::debug!(credential = credential.index(), resume = handle.is_some(), "connecting to Gemini Live");
        let client = gemini_live::connect(&client_config, setup)
            .await
            .map_err(into_session_error)?;
        Ok(Box::new(GeminiTransport::spawn(
            client,
            config.output_sample_rate(),
        )))
    }
}

/// The setup message for one connection. The voice is only sent when the
/// model answers with audio; resumption is always requested so the server
/// issues handles.
pub fn build_setup(
    model: &str,
    config: &SessionConfig,
    handle: Option<&ConversationHandle>,
) -> Setup {
    let generation = match config.response_mode() {
        ResponseMode::Audio => GenerationConfig::new(Modality::Audio).with_voice(config.voice().as_str()),
        ResponseMode::Text => GenerationConfig::new(Modality::Text),
    };
    Setup::new(model)
        .with_generation_config(generation)
        .with_system_instruction(config.system_instruction())
        .with_session_resumption(handle.map(ConversationHandle::as_str))
}

pub fn into_session_error(e: ClientError) -> SessionError {
    let message = e.to_string();
    match e.class() {
        FailureClass::InvalidCredential => SessionError::auth_invalid(message),
        FailureClass::ExhaustedCredential => SessionError::auth_exhausted(message),
        FailureClass::Transient => SessionError::TransientNetwork(message),
        FailureClass::IdleTimeout => SessionError::IdleTimeout(message),
        FailureClass::Protocol => SessionError::Protocol(message),
    }
}

/// Turns one server message into session events, in wire order.
pub fn translate(msg: ServerMessage, output_rate: u32) -> Vec<InboundEvent> {
    let mut events = Vec::new();

    if let Some(content) = msg.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.into_parts() {
                if let Some(text) = part.text_value() {
                    events.push(InboundEvent::TextChunk(text.to_string()));
                }
                let Some(blob) = part.blob().filter(|b| b.is_audio()) else {
                    continue;
                };
                match parley_native_utils::audio::decode_i16(blob.data()) {
                    Ok(samples) => events.push(InboundEvent::AudioChunk(Frame::received(
                        blob.sample_rate().unwrap_or(output_rate),
                        samples,
                    ))),
                    Err(e) => {
                        tracing::warn!("Dropping undecodable audio chunk: {e}");
                    }
                }
            }
        }
        if let Some(transcription) = content.output_transcription {
            events.push(InboundEvent::TextChunk(transcription.text));
        }
        if let Some(transcription) = content.input_transcription {
            tracing::debug!("User said: {:?}", transcription.text);
        }
        if content.interrupted {
            events.push(InboundEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(InboundEvent::TurnComplete);
        }
    }

    if let Some(update) = msg.session_resumption_update {
        if let Some(handle) = update.usable_handle() {
            events.push(InboundEvent::Resumption(ConversationHandle::new(handle)));
        }
    }

    if let Some(go_away) = msg.go_away {
        let time_left = go_away.time_left.unwrap_or_else(|| "unknown".to_string());
        tracing::info!(%time_left, "server announced disconnect");
        events.push(InboundEvent::Error(SessionError::IdleTimeout(format!(
            "goAway, time left {time_left}"
        ))));
    }

    events
}

type SharedOutbound = Arc<Mutex<OutboundBuffer<Outbound>>>;

/// A live connection. A driver task owns the websocket; `send` only queues.
pub struct GeminiTransport {
    outbound: SharedOutbound,
    wake: Arc<Notify>,
    events: mpsc::Receiver<InboundEvent>,
    state: ConnectionStateCell,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl GeminiTransport {
    fn spawn(client: Client, output_rate: u32) -> Self {
        let outbound: SharedOutbound = Arc::new(Mutex::new(OutboundBuffer::new(OUTBOUND_CAPACITY)));
        let wake = Arc::new(Notify::new());
        let (events_tx, events) = mpsc::channel(INBOUND_CAPACITY);
        let state = ConnectionStateCell::new();
        state.advance(ConnectionState::Open);
        let cancel = CancellationToken::new();

        let driver = Driver {
            client,
            outbound: outbound.clone(),
            wake: wake.clone(),
            events: events_tx,
            state: state.clone(),
            cancel: cancel.clone(),
            output_rate,
        };
        Self {
            outbound,
            wake,
            events,
            state,
            cancel,
            driver: Some(tokio::spawn(driver.run())),
        }
    }
}

#[async_trait]
impl StreamTransport for GeminiTransport {
    fn send(&mut self, message: Outbound) -> Result<(), SessionError> {
        if self.state.get() != ConnectionState::Open {
            return Err(SessionError::NotConnected);
        }
        let pushed = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        self.wake.notify_one();
        pushed
    }

    async fn next_event(&mut self) -> Option<InboundEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) {
        self.state.begin_close();
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            // The driver closes the socket itself and is bounded by the same limit.
            join_driver(driver, CLOSE_TIMEOUT * 2).await;
        }
        self.state.advance(ConnectionState::Closed);
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }
}

impl Drop for GeminiTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Waits for the driver to finish, aborting it if it overruns `limit`.
async fn join_driver(mut driver: JoinHandle<()>, limit: Duration) {
    match tokio::time::timeout(limit, &mut driver).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Gemini driver task failed: {e}"),
        Err(_) => {
            tracing::warn!(?limit, "Gemini driver did not stop in time, aborting");
            driver.abort();
        }
    }
}

struct Driver {
    client: Client,
    outbound: SharedOutbound,
    wake: Arc<Notify>,
    events: mpsc::Sender<InboundEvent>,
    state: ConnectionStateCell,
    cancel: CancellationToken,
    output_rate: u32,
}

impl Driver {
    async fn run(mut self) {
        if let Err(error) = self.pump().await {
            tracing::warn!("Gemini connection lost: {error}");
            // The receiver may already be gone if the session closed us.
            let _ = self.events.send(InboundEvent::Error(error)).await;
        }
        self.state.begin_close();
        if tokio::time::timeout(CLOSE_TIMEOUT, self.client.close()).await.is_err() {
            tracing::warn!("Gemini websocket close timed out");
        }
        self.state.advance(ConnectionState::Closed);
        tracing::debug!("Gemini driver finished");
    }

    /// Runs until cancelled or the server ends the stream. `Err` carries the
    /// classified reason the connection failed.
    async fn pump(&mut self) -> Result<(), SessionError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = self.wake.notified() => self.flush_outbound().await?,
                msg = self.client.next_event() => {
                    let Some(msg) = msg.map_err(into_session_error)? else {
                        tracing::info!("Gemini stream ended");
                        return Ok(());
                    };
                    for event in translate(msg, self.output_rate) {
                        if self.events.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn flush_outbound(&mut self) -> Result<(), SessionError> {
        let pending = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain();
        for message in pending {
            let sent = match message {
                Outbound::Audio(frame) => {
                    let data = parley_native_utils::audio::encode_i16(frame.samples());
                    self.client.send_audio(frame.sample_rate(), data).await
                }
                Outbound::Text(text) => self.client.send_text(&text).await,
            };
            sent.map_err(into_session_error)?;
        }
        Ok(())
    }
}
