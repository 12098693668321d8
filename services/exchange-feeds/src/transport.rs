//! Transport boundary
//!
//! A session never touches a socket directly. It writes through the
//! [`Transport`] trait and receives inbound frames from whatever drives it.
//! [`WsTransport`] is the production implementation over tokio-tungstenite;
//! [`MemoryTransport`] records outbound frames for tests and replay.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::FeedError;

/// Sink half of a WebSocket connection.
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Stream half of a WebSocket connection.
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A single data frame as seen by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn text(s: impl Into<String>) -> Self {
        Frame::Text(s.into())
    }

    /// Convert a tungstenite message. Control frames yield `None`.
    pub fn from_message(msg: Message) -> Option<Frame> {
        match msg {
            Message::Text(text) => Some(Frame::Text(text)),
            Message::Binary(bytes) => Some(Frame::Binary(bytes)),
            _ => None,
        }
    }

    fn into_message(self) -> Message {
        match self {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

/// Outbound half of a connection, owned by exactly one session.
pub trait Transport: Send {
    /// Queue a frame for sending.
    fn send(&mut self, frame: Frame) -> Result<(), FeedError>;

    /// Begin closing the connection. Calling it again has no effect.
    fn close(&mut self);
}

/// Commands consumed by the socket writer task.
enum WriterCommand {
    Send(Message),
    Close,
}

/// Channel-backed transport whose writer task owns the WebSocket sink.
pub struct WsTransport {
    tx: mpsc::UnboundedSender<WriterCommand>,
    closed: bool,
}

impl WsTransport {
    /// Spawn the writer task for `sink` and return the transport handle.
    pub fn spawn(mut sink: WsSink) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriterCommand>();
        let writer = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    WriterCommand::Send(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            warn!(error = %e, "WebSocket write failed");
                            break;
                        }
                    }
                    WriterCommand::Close => {
                        if let Err(e) = sink.send(Message::Close(None)).await {
                            debug!(error = %e, "close frame not delivered");
                        }
                        break;
                    }
                }
            }
            let _ = sink.close().await;
        });
        (Self { tx, closed: false }, writer)
    }
}

impl Transport for WsTransport {
    fn send(&mut self, frame: Frame) -> Result<(), FeedError> {
        if self.closed {
            return Err(FeedError::Transport("transport already closed".to_string()));
        }
        self.tx
            .send(WriterCommand::Send(frame.into_message()))
            .map_err(|_| FeedError::Transport("socket writer has stopped".to_string()))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.tx.send(WriterCommand::Close);
    }
}

/// Connect to `url` and split the socket into a transport and inbound stream.
pub async fn connect(url: &str) -> Result<(WsTransport, WsStream, JoinHandle<()>), FeedError> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| FeedError::Transport(format!("connection to {url} failed: {e}")))?;
    let (sink, stream) = ws_stream.split();
    let (transport, writer) = WsTransport::spawn(sink);
    Ok((transport, stream, writer))
}

/// In-memory transport recording every frame the session sends.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    pub sent: Vec<Frame>,
    pub close_calls: usize,
    /// When set, `send` fails as if the socket had gone away.
    pub fail_sends: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outbound text frames parsed as JSON; non-JSON text is returned as a string value.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .iter()
            .filter_map(|f| match f {
                Frame::Text(t) => Some(
                    serde_json::from_str(t)
                        .unwrap_or_else(|_| serde_json::Value::String(t.clone())),
                ),
                Frame::Binary(_) => None,
            })
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: Frame) -> Result<(), FeedError> {
        if self.fail_sends {
            return Err(FeedError::Transport("memory transport send failure".to_string()));
        }
        self.sent.push(frame);
        Ok(())
    }

    fn close(&mut self) {
        self.close_calls += 1;
    }
}
