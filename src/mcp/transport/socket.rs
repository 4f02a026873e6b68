//! WebSocket transport
//!
//! [`WebSocketTransport`] carries one JSON-RPC message per text frame over a
//! persistent WebSocket connection. It comes in two flavours that share the
//! same reader/writer machinery:
//!
//! - [`WebSocketTransport::new`] dials a `ws://` URL with `tokio-tungstenite`
//!   when `connect` is called; `connect` resolves once the opening handshake
//!   completes or fails with [`McpError::Transport`].
//! - [`WebSocketTransport::accepted`] wraps a socket already upgraded by an
//!   axum handler; `connect` only starts the reader.
//!
//! Binary frames are accepted when they hold valid UTF-8. Ping and pong
//! frames are handled by the WebSocket layer and never surface as events. A
//! close frame, a read error, or the end of the stream marks the transport
//! disconnected.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, Result};
use crate::mcp::transport::{EventQueue, Transport, TransportEvent};

/// Outbound half: accepts serialized messages.
type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;

/// Inbound half: yields decoded frames.
type FrameStream = Pin<Box<dyn Stream<Item = Frame> + Send>>;

/// A WebSocket frame reduced to what the transport cares about.
#[derive(Debug)]
enum Frame {
    Text(String),
    Close,
    Error(String),
}

/// WebSocket-backed MCP transport.
///
/// # Examples
///
/// ```no_run
/// use mcp_engine::mcp::transport::socket::WebSocketTransport;
/// use mcp_engine::mcp::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = WebSocketTransport::new("ws://127.0.0.1:8080/");
/// transport.connect().await?;
/// # Ok(())
/// # }
/// ```
pub struct WebSocketTransport {
    /// Remote address for dialed transports.
    url: Option<String>,
    /// Server-side socket waiting for `connect`.
    accepted: std::sync::Mutex<Option<axum::extract::ws::WebSocket>>,
    /// Writer half; `None` until connected and after disconnect.
    sink: Mutex<Option<FrameSink>>,
    connected: Arc<AtomicBool>,
    events: EventQueue,
    /// Stops the reader task of the current connection.
    cancel: Mutex<CancellationToken>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Transport that dials `url` on `connect`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_parts(Some(url.into()), None)
    }

    /// Transport over a socket accepted by an axum `WebSocketUpgrade`.
    pub fn accepted(socket: axum::extract::ws::WebSocket) -> Self {
        Self::with_parts(None, Some(socket))
    }

    fn with_parts(url: Option<String>, socket: Option<axum::extract::ws::WebSocket>) -> Self {
        Self {
            url,
            accepted: std::sync::Mutex::new(socket),
            sink: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            events: EventQueue::new(),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Remote address this transport dials, if it is a client transport.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    async fn open(&self) -> Result<(FrameSink, FrameStream)> {
        let socket = self
            .accepted
            .lock()
            .map_err(|_| McpError::Transport("websocket lock poisoned".to_string()))?
            .take();
        if let Some(socket) = socket {
            return Ok(split_accepted(socket));
        }

        let url = self
            .url
            .as_deref()
            .ok_or_else(|| McpError::Transport("accepted websocket cannot reconnect".to_string()))?;

        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| McpError::Transport(format!("failed to connect to {}: {}", url, e)))?;

        tracing::debug!(
            target: "mcp_engine::mcp::transport::socket",
            "websocket handshake with {} complete",
            url
        );

        Ok(split_dialed(stream))
    }
}

fn split_accepted(socket: axum::extract::ws::WebSocket) -> (FrameSink, FrameStream) {
    use axum::extract::ws::Message;

    let (sink, stream) = socket.split();
    let sink = sink
        .with(|text: String| futures::future::ready(Ok::<_, axum::Error>(Message::Text(text.into()))))
        .sink_map_err(anyhow::Error::new);
    let stream = stream.filter_map(|frame| {
        futures::future::ready(match frame {
            Ok(Message::Text(text)) => Some(Frame::Text(text.to_string())),
            Ok(Message::Binary(bytes)) => Some(binary_frame(bytes.to_vec())),
            Ok(Message::Close(_)) => Some(Frame::Close),
            Ok(_) => None,
            Err(e) => Some(Frame::Error(e.to_string())),
        })
    });
    (Box::pin(sink), Box::pin(stream))
}

fn split_dialed<S>(socket: tokio_tungstenite::WebSocketStream<S>) -> (FrameSink, FrameStream)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    use tokio_tungstenite::tungstenite::Message;

    let (sink, stream) = socket.split();
    let sink = sink
        .with(|text: String| {
            futures::future::ready(Ok::<_, tokio_tungstenite::tungstenite::Error>(
                Message::Text(text.into()),
            ))
        })
        .sink_map_err(anyhow::Error::new);
    let stream = stream.filter_map(|frame| {
        futures::future::ready(match frame {
            Ok(Message::Text(text)) => Some(Frame::Text(text.to_string())),
            Ok(Message::Binary(bytes)) => Some(binary_frame(bytes.to_vec())),
            Ok(Message::Close(_)) => Some(Frame::Close),
            Ok(_) => None,
            Err(e) => Some(Frame::Error(e.to_string())),
        })
    });
    (Box::pin(sink), Box::pin(stream))
}

fn binary_frame(bytes: Vec<u8>) -> Frame {
    match String::from_utf8(bytes) {
        Ok(text) => Frame::Text(text),
        Err(_) => Frame::Error("binary frame is not valid UTF-8".to_string()),
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    /// Complete the handshake (dialed) or adopt the socket (accepted), then
    /// start the reader task.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Transport`] if the handshake fails or the
    /// transport was already used and cannot reconnect.
    async fn connect(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (sink, mut stream) = self.open().await?;
        *self.sink.lock().await = Some(sink);
        self.connected.store(true, Ordering::SeqCst);
        self.events.emit(TransportEvent::Connected);

        let connected = Arc::clone(&self.connected);
        let events = self.events.sender();
        let cancel = CancellationToken::new();
        *self.cancel.lock().await = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    frame = stream.next() => match frame {
                        Some(Frame::Text(text)) => {
                            if events.send(TransportEvent::Message(text)).is_err() {
                                break;
                            }
                        }
                        Some(Frame::Error(e)) => {
                            tracing::warn!(
                                target: "mcp_engine::mcp::transport::socket",
                                "websocket read failed: {}",
                                e
                            );
                            break;
                        }
                        Some(Frame::Close) | None => {
                            tracing::debug!(
                                target: "mcp_engine::mcp::transport::socket",
                                "websocket closed by peer"
                            );
                            break;
                        }
                    },
                }
            }

            if connected.swap(false, Ordering::SeqCst) {
                let _ = events.send(TransportEvent::Disconnected);
            }
        });

        Ok(())
    }

    /// Send `message` as a single text frame.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::NotConnected`] when not connected and
    /// [`McpError::Transport`] if the frame cannot be written.
    async fn send(&self, message: String) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(McpError::NotConnected.into());
        }
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(McpError::NotConnected)?;
        sink.send(message)
            .await
            .map_err(|e| McpError::Transport(format!("websocket send failed: {}", e)).into())
    }

    /// Send a close frame and stop the reader.
    async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.lock().await.cancel();

        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!(
                    target: "mcp_engine::mcp::transport::socket",
                    "websocket close failed: {}",
                    e
                );
            }
        }

        self.events.emit(TransportEvent::Disconnected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>> {
        self.events.stream()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.cancel.get_mut().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::extract::ws::WebSocketUpgrade;
    use axum::routing::get;
    use axum::Router;

    async fn next_event(transport: &WebSocketTransport) -> TransportEvent {
        let mut events = transport.events();
        tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .expect("timed out")
            .expect("stream ended")
    }

    /// Start an axum listener that echoes every text frame back.
    async fn echo_server() -> String {
        async fn upgrade(ws: WebSocketUpgrade) -> axum::response::Response {
            ws.on_upgrade(|socket| async move {
                let transport = WebSocketTransport::accepted(socket);
                if transport.connect().await.is_err() {
                    return;
                }
                let mut events = transport.events();
                while let Some(event) = events.next().await {
                    match event {
                        TransportEvent::Message(text) => {
                            if transport.send(text).await.is_err() {
                                break;
                            }
                        }
                        TransportEvent::Disconnected => break,
                        TransportEvent::Connected => {}
                    }
                }
            })
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", get(upgrade));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("ws://{}/", addr)
    }

    /// Connecting to a closed port fails with a transport error.
    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WebSocketTransport::new(format!("ws://{}/", addr));
        let err = transport.connect().await.unwrap_err();
        assert!(err.to_string().contains("failed to connect"), "{err}");
        assert!(!transport.is_connected());
    }

    /// Frames sent by the client come back through the echo server.
    #[tokio::test]
    async fn test_round_trip_through_axum_listener() {
        let url = echo_server().await;
        let transport = WebSocketTransport::new(url);
        transport.connect().await.unwrap();
        assert_eq!(next_event(&transport).await, TransportEvent::Connected);

        transport.send("{\"n\":1}".to_string()).await.unwrap();
        transport.send("{\"n\":2}".to_string()).await.unwrap();

        assert_eq!(
            next_event(&transport).await,
            TransportEvent::Message("{\"n\":1}".into())
        );
        assert_eq!(
            next_event(&transport).await,
            TransportEvent::Message("{\"n\":2}".into())
        );

        transport.disconnect().await.unwrap();
        assert_eq!(next_event(&transport).await, TransportEvent::Disconnected);
        assert!(transport.send("{}".to_string()).await.is_err());
    }

    /// `send` before `connect` is rejected without dialing.
    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let transport = WebSocketTransport::new("ws://127.0.0.1:9/");
        let err = transport.send("{}".to_string()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpError>(),
            Some(McpError::NotConnected)
        ));
    }
}
