//! Duplex WebSocket channel
//!
//! One persistent connection to the negotiated terminal endpoint. The
//! initial dial retries indefinitely: an attended interactive session
//! is expected to wait out transient network blips rather than abort.
//! Once connected, a dropped socket ends the session; mid-session
//! reconnection is deliberately out of scope.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Frames buffered between the socket reader and the consumer.
///
/// A slow consumer blocks the reader here instead of losing output;
/// backpressure over silent drops.
const RECEIVE_QUEUE_CAPACITY: usize = 256;

/// Wait between dial attempts
const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(1);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Transport-level channel errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// The configuration carries no endpoint to dial
    #[error("websocket: must provide an address to connect to")]
    MissingUrl,

    /// Writing a frame failed; the connection is gone
    #[error("Send failed: {0}")]
    Send(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connection lifecycle of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// Channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint to dial
    pub url: String,
    /// Sleep between failed dial attempts
    pub retry_wait: Duration,
    /// Capacity of the inbound frame queue
    pub queue_capacity: usize,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry_wait: DEFAULT_RETRY_WAIT,
            queue_capacity: RECEIVE_QUEUE_CAPACITY,
        }
    }

    fn validate(&self) -> Result<(), TransportError> {
        if self.url.is_empty() {
            return Err(TransportError::MissingUrl);
        }
        Ok(())
    }
}

/// Sending half of a channel; one frame per `send` call
#[derive(Debug)]
pub struct ChannelSender {
    sink: WsSink,
}

impl ChannelSender {
    /// Write one discrete frame.
    ///
    /// Caller-supplied boundaries are preserved: each call becomes
    /// exactly one WebSocket message, so keystroke-granularity input
    /// is never coalesced. The wire carries terminal input as text
    /// frames.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let text = String::from_utf8_lossy(data).into_owned();
        self.sink.send(Message::Text(text)).await?;
        Ok(())
    }
}

/// Receiving half of a channel
#[derive(Debug)]
pub struct ChannelReceiver {
    inbound: mpsc::Receiver<Bytes>,
}

impl ChannelReceiver {
    /// Next inbound frame, in arrival order. `None` means the remote
    /// stream has ended.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }
}

/// A connected duplex channel
#[derive(Debug)]
pub struct DuplexChannel {
    sender: ChannelSender,
    receiver: ChannelReceiver,
    state: Arc<Mutex<ChannelState>>,
}

impl DuplexChannel {
    /// Dial the endpoint until it accepts.
    ///
    /// There is no retry cap; each failure is logged and followed by a
    /// `retry_wait` sleep. Returns once connected, with the background
    /// reader already running.
    pub async fn connect(config: ChannelConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let state = Arc::new(Mutex::new(ChannelState::Connecting));

        let ws = loop {
            match connect_async(config.url.as_str()).await {
                Ok((ws, _response)) => break ws,
                Err(e) => {
                    tracing::warn!(url = %config.url, error = %e, "Failed to connect, retrying");
                    tokio::time::sleep(config.retry_wait).await;
                }
            }
        };
        tracing::info!(url = %config.url, "Connected");
        *state.lock().unwrap() = ChannelState::Connected;

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        tokio::spawn(read_loop(stream, tx, Arc::clone(&state)));

        Ok(Self {
            sender: ChannelSender { sink },
            receiver: ChannelReceiver { inbound: rx },
            state,
        })
    }

    /// Write one discrete frame
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.sender.send(data).await
    }

    /// Next inbound frame; `None` once the remote stream has ended
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    /// Split into halves so independent tasks can pump each direction
    pub fn into_split(self) -> (ChannelSender, ChannelReceiver) {
        (self.sender, self.receiver)
    }
}

/// Background reader: decodes frames into the bounded queue until the
/// socket errors or closes, then drops the sender to signal
/// end-of-stream.
async fn read_loop(mut stream: WsStream, tx: mpsc::Sender<Bytes>, state: Arc<Mutex<ChannelState>>) {
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if tx.send(Bytes::from(text.into_bytes())).await.is_err() {
                    break;
                }
            }
            Ok(Message::Binary(data)) => {
                if tx.send(Bytes::from(data)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                tracing::info!("Remote closed the connection");
                break;
            }
            // Ping/pong are answered by the protocol layer
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Read failed, closing channel");
                break;
            }
        }
    }

    *state.lock().unwrap() = ChannelState::Closed;
}
