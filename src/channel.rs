use crate::correlation::CorrelationBroker;
use crate::error::{LightingError, Result};
use crate::protocol::{self, CorrelationKey, Envelope, Packet, PING_FRAME, PONG_FRAME};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Open duplex channel to one bridge
///
/// Outbound frames go through an unbounded queue drained by a writer task;
/// inbound `message` events are handed to the [`CorrelationBroker`].
pub struct Channel {
    url: String,
    ws_tx: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl Channel {
    /// Connect to a bridge and complete the Engine.IO / Socket.IO handshake
    ///
    /// The channel is returned only once the server has confirmed the
    /// namespace connection.
    pub async fn connect(
        url: impl Into<String>,
        broker: Arc<CorrelationBroker>,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let url = url.into();
        tracing::info!("Opening channel {}", url);

        let (ws_stream, _) = tokio::time::timeout(handshake_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| LightingError::channel(&url, "connect timed out"))?
            .map_err(|e| LightingError::channel(&url, e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let ping_interval = tokio::time::timeout(handshake_timeout, handshake(&url, &mut read))
            .await
            .map_err(|_| LightingError::channel(&url, "handshake timed out"))??;

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();

        // Forward outgoing frames to the socket
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send frame: {}", e);
                    break;
                }
            }
        });

        let heartbeat_tx = ws_tx.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if heartbeat_tx.send(Message::Text(PING_FRAME.to_string())).is_err() {
                    break;
                }
            }
        });

        let reader = tokio::spawn(read_loop(url.clone(), read, ws_tx.clone(), broker));

        tracing::info!("Channel {} open", url);
        Ok(Self {
            url,
            ws_tx,
            reader,
            heartbeat,
        })
    }

    /// Channel URL; also the channel half of every correlation key
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Queue an envelope for sending
    pub fn write(&self, envelope: &Envelope) -> Result<()> {
        let frame = protocol::encode_message(envelope)?;
        tracing::debug!("Sending on {}: {}", self.url, frame);
        self.ws_tx
            .send(Message::Text(frame))
            .map_err(|_| LightingError::ConnectionClosed)
    }

    /// Disconnect the namespace and close the socket
    pub fn close(&self) {
        tracing::info!("Closing channel {}", self.url);
        self.heartbeat.abort();
        let _ = self.ws_tx.send(Message::Text("41".to_string()));
        let _ = self.ws_tx.send(Message::Close(None));
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.heartbeat.abort();
        self.reader.abort();
    }
}

/// Read frames until the namespace is connected; returns the ping interval
async fn handshake(url: &str, read: &mut WsReader) -> Result<Duration> {
    let mut ping_interval = Duration::from_millis(25_000);

    while let Some(frame) = read.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match protocol::decode(&text)? {
            Packet::Open(info) => {
                tracing::debug!("Engine.IO session {} on {}", info.sid, url);
                ping_interval = Duration::from_millis(info.ping_interval.max(1));
            }
            Packet::Connected => return Ok(ping_interval),
            Packet::Error(detail) => return Err(LightingError::channel(url, detail)),
            Packet::Close | Packet::Disconnected => break,
            other => tracing::debug!("Ignoring {:?} during handshake", other),
        }
    }

    Err(LightingError::channel(url, "closed during handshake"))
}

async fn read_loop(
    url: String,
    mut read: WsReader,
    ws_tx: mpsc::UnboundedSender<Message>,
    broker: Arc<CorrelationBroker>,
) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                tracing::debug!("Received on {}: {}", url, text);
                match protocol::decode(&text) {
                    Ok(Packet::Message(envelope)) => {
                        let key = CorrelationKey::new(url.as_str(), envelope.msg.clone());
                        broker.resolve(&key, *envelope).await;
                    }
                    Ok(Packet::Ping) => {
                        let _ = ws_tx.send(Message::Text(PONG_FRAME.to_string()));
                    }
                    Ok(Packet::Close | Packet::Disconnected) => {
                        tracing::info!("Bridge closed channel {}", url);
                        break;
                    }
                    Ok(Packet::Error(detail)) => {
                        tracing::warn!("Bridge error on {}: {}", url, detail);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Unreadable frame on {}: {}", url, e),
                }
            }
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket connection {} closed", url);
                break;
            }
            Err(e) => {
                tracing::error!("WebSocket error on {}: {}", url, e);
                break;
            }
            _ => {}
        }
    }

    broker.fail_channel(&url).await;
}
