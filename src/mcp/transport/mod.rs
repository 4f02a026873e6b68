//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that every channel carrying
//! engine traffic must satisfy. Concrete implementations live in
//! submodules:
//!
//! - [`memory::MemoryTransport`] -- two in-process endpoints created as a
//!   pair; delivery is asynchronous and order-preserving.
//! - [`socket::WebSocketTransport`] -- a persistent WebSocket connection,
//!   either dialed from a URL or wrapping a socket accepted by a listener.
//! - [`stdio::StdioTransport`] -- newline-delimited JSON over an input and
//!   output stream (process stdio, a child process, or any async pipe).
//!
//! The [`connector`] submodule binds an engine to a transport so engine code
//! never touches transport internals.
//!
//! # Canonical Import Path
//!
//! ```no_run
//! use mcp_engine::mcp::transport::Transport;
//! ```

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::Result;

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport became ready.
    Connected,
    /// A complete inbound payload.
    Message(String),
    /// The transport was closed, locally or by the peer.
    Disconnected,
}

/// Abstraction over MCP transport implementations.
///
/// All methods are `async` or return pinned [`Stream`]s so that transport
/// implementations can drive I/O without blocking the Tokio executor.
///
/// # Examples
///
/// ```no_run
/// use mcp_engine::mcp::transport::memory::MemoryTransport;
/// use mcp_engine::mcp::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let (left, right) = MemoryTransport::pair();
/// left.connect().await?;
/// right.connect().await?;
/// left.send(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#.to_string()).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Establish readiness.
    ///
    /// Calling `connect` on an already connected transport is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::McpError::Transport`] if the underlying
    /// connection cannot be established.
    async fn connect(&self) -> Result<()>;

    /// Send one complete JSON-RPC message string to the peer.
    ///
    /// The transport is responsible for any framing required by the
    /// underlying medium.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::McpError::NotConnected`] before `connect` or
    /// after `disconnect`, and [`crate::error::McpError::Transport`] if the
    /// underlying write fails.
    async fn send(&self, message: String) -> Result<()>;

    /// Release resources and notify the peer where the medium allows it.
    ///
    /// Disconnecting an already disconnected transport is a no-op.
    async fn disconnect(&self) -> Result<()>;

    /// Whether `send` would currently be accepted.
    fn is_connected(&self) -> bool;

    /// Returns the stream of transport events.
    ///
    /// There is a single underlying queue per transport; concurrent streams
    /// compete for items.
    fn events(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>>;
}

/// Unbounded, shareable queue of [`TransportEvent`]s backing
/// [`Transport::events`].
#[derive(Debug, Clone)]
pub(crate) struct EventQueue {
    tx: mpsc::UnboundedSender<TransportEvent>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// A sender that feeds this queue; used by peers and background tasks.
    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<TransportEvent> {
        self.tx.clone()
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        // The receiver lives as long as `self`, so this cannot fail.
        let _ = self.tx.send(event);
    }

    pub(crate) fn stream(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>> {
        let rx = Arc::clone(&self.rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }
}

pub mod connector;
pub mod memory;
pub mod socket;
pub mod stdio;

pub use connector::{Connector, Dispatcher, MessageHandler, PairedConnector};
