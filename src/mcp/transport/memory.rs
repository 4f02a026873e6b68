//! Paired in-process transport
//!
//! [`MemoryTransport::pair`] returns two endpoints wired to each other
//! through unbounded Tokio channels:
//!
//! ```text
//! left.send()  -----> right event queue -----> right.events()
//! right.send() -----> left event queue  -----> left.events()
//! ```
//!
//! `send` only enqueues; the receiving side observes the payload when its
//! event stream is next polled, so sender and receiver never share a call
//! stack. Channels are FIFO, so per-direction order is preserved.
//!
//! Disconnecting either endpoint marks both sides disconnected and queues a
//! [`TransportEvent::Disconnected`] on each.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::{McpError, Result};
use crate::mcp::transport::{EventQueue, Transport, TransportEvent};

/// One endpoint of an in-process transport pair.
///
/// # Examples
///
/// ```
/// use futures::StreamExt;
/// use mcp_engine::mcp::transport::memory::MemoryTransport;
/// use mcp_engine::mcp::transport::{Transport, TransportEvent};
///
/// # #[tokio::main]
/// # async fn main() {
/// let (left, right) = MemoryTransport::pair();
/// left.connect().await.unwrap();
/// right.connect().await.unwrap();
///
/// left.send("hello".to_string()).await.unwrap();
///
/// let mut events = right.events();
/// assert_eq!(events.next().await, Some(TransportEvent::Connected));
/// assert_eq!(events.next().await, Some(TransportEvent::Message("hello".into())));
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryTransport {
    /// This endpoint's readiness flag.
    connected: Arc<AtomicBool>,
    /// The peer's readiness flag; cleared when this side disconnects.
    peer_connected: Arc<AtomicBool>,
    /// Inbound events for this endpoint.
    events: EventQueue,
    /// Feeds the peer's inbound queue.
    peer_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryTransport {
    /// Create two endpoints that reference each other.
    ///
    /// Both start disconnected; call [`Transport::connect`] on each.
    pub fn pair() -> (Self, Self) {
        let left_flag = Arc::new(AtomicBool::new(false));
        let right_flag = Arc::new(AtomicBool::new(false));
        let left_events = EventQueue::new();
        let right_events = EventQueue::new();

        let left = Self {
            connected: Arc::clone(&left_flag),
            peer_connected: Arc::clone(&right_flag),
            peer_tx: right_events.sender(),
            events: left_events.clone(),
        };
        let right = Self {
            connected: right_flag,
            peer_connected: left_flag,
            peer_tx: left_events.sender(),
            events: right_events,
        };

        (left, right)
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.events.emit(TransportEvent::Connected);
        }
        Ok(())
    }

    /// Queue `message` on the peer's event stream.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::NotConnected`] when this endpoint is not
    /// connected and [`McpError::Transport`] when the peer was dropped.
    async fn send(&self, message: String) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(McpError::NotConnected.into());
        }
        self.peer_tx
            .send(TransportEvent::Message(message))
            .map_err(|_| McpError::Transport("memory peer dropped".to_string()).into())
    }

    async fn disconnect(&self) -> Result<()> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let peer_was_connected = self.peer_connected.swap(false, Ordering::SeqCst);

        if was_connected {
            self.events.emit(TransportEvent::Disconnected);
        }
        if peer_was_connected {
            // The peer may already be gone; nothing to notify then.
            let _ = self.peer_tx.send(TransportEvent::Disconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>> {
        self.events.stream()
    }
}
