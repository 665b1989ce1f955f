use crate::error::ClientError;
use crate::types::{Blob, ClientContent, ClientMessage, RealtimeInput, ServerMessage, Setup};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

pub(crate) mod config;
pub mod consts;
mod utils;

type WsWriter =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One established Live session: the setup handshake has completed.
pub struct Client {
    write: WsWriter,
    read: WsReader,
    closed: bool,
}

/// Opens the websocket, sends `setup` and waits for `setupComplete`.
///
/// The whole exchange is bounded by the configured setup timeout. A server
/// that rejects the key usually accepts the upgrade and then closes with a
/// policy-violation frame, so that close is reported as [`ClientError::Closed`].
pub async fn connect(config: &config::Config, setup: Setup) -> Result<Client, ClientError> {
    let url = utils::build_url(config)?;
    let handshake = async move {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(ClientError::from_handshake)?;
        tracing::debug!(model = setup.model(), "websocket upgraded, sending setup");

        let (write, read) = ws_stream.split();
        let mut client = Client {
            write,
            read,
            closed: false,
        };
        client.send(&ClientMessage::Setup(setup)).await?;
        client.await_setup_complete().await?;
        Ok(client)
    };

    match tokio::time::timeout(config.setup_timeout(), handshake).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout("setupComplete")),
    }
}

impl Client {
    async fn await_setup_complete(&mut self) -> Result<(), ClientError> {
        match self.next_event().await? {
            Some(msg) if msg.setup_complete.is_some() => {
                tracing::info!("Live session setup complete.");
                Ok(())
            }
            Some(msg) => Err(ClientError::UnexpectedMessage(format!("{msg:?}"))),
            None => Err(ClientError::Closed {
                code: 1006,
                reason: "stream ended during setup".to_string(),
            }),
        }
    }

    /// Serializes and writes one client message.
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        let json = serde_json::to_string(msg)?;
        self.write.send(Message::Text(json)).await?;
        Ok(())
    }

    /// Sends one chunk of base64 encoded 16-bit PCM.
    pub async fn send_audio(&mut self, sample_rate: u32, pcm_base64: String) -> Result<(), ClientError> {
        let input = RealtimeInput::audio(Blob::pcm(sample_rate, pcm_base64));
        self.send(&ClientMessage::RealtimeInput(input)).await
    }

    /// Sends a complete user text turn.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.send(&ClientMessage::ClientContent(ClientContent::user_turn(text)))
            .await
    }

    /// Reads the next server message.
    ///
    /// Returns `Ok(None)` when the stream ends without a close frame. Close
    /// frames surface as [`ClientError::Closed`] so the caller can classify
    /// the code. Cancel safe: dropping the future loses no message.
    pub async fn next_event(&mut self) -> Result<Option<ServerMessage>, ClientError> {
        while let Some(msg) = self.read.next().await {
            match msg? {
                Message::Text(text) => return Ok(Some(serde_json::from_str(&text)?)),
                // The service frames its JSON as binary messages.
                Message::Binary(bytes) => return Ok(Some(serde_json::from_slice(&bytes)?)),
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((1005, String::new()));
                    tracing::info!(code, %reason, "Live websocket closed by server.");
                    self.closed = true;
                    return Err(ClientError::Closed { code, reason });
                }
                _ => { /* Ignore Ping/Pong */ }
            }
        }
        Ok(None)
    }

    /// Sends a close frame and shuts the writer. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.write.send(Message::Close(None)).await {
            tracing::debug!("close frame not sent: {}", e);
        }
        if let Err(e) = self.write.close().await {
            tracing::debug!("websocket close failed: {}", e);
        }
    }
}
