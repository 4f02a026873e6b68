//! Binding engines to transports
//!
//! Engines never see a transport. Each engine implements [`Dispatcher`]: it
//! accepts raw inbound payloads through [`MessageHandler`] and hands out the
//! receiving end of its outbound queue once. A [`Connector`] owns two pump
//! tasks:
//!
//! ```text
//! engine outbound queue --(outbound pump)--> transport.send()
//! transport.events()    --(inbound pump)---> engine.handle_message()
//!                                            engine.on_disconnect()
//! ```
//!
//! [`PairedConnector`] wires a server and a client in-process through a
//! [`MemoryTransport`] pair.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, Result};
use crate::mcp::transport::memory::MemoryTransport;
use crate::mcp::transport::{Transport, TransportEvent};

/// Entry points a transport drives on an engine.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one raw inbound payload.
    ///
    /// Must not fail: decode and dispatch problems are answered on the wire
    /// or logged.
    async fn handle_message(&self, raw: String);

    /// The transport became ready.
    async fn on_connect(&self) {}

    /// The transport closed.
    async fn on_disconnect(&self) {}
}

/// An engine that can be bound to a transport.
pub trait Dispatcher: MessageHandler {
    /// Take the receiving end of the engine's outbound queue.
    ///
    /// Returns `None` once the queue has been taken.
    fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<String>>;
}

/// A live binding between one engine and one transport.
///
/// Dropping the connector stops both pumps without closing the transport.
#[derive(Debug)]
pub struct Connector {
    transport: Arc<dyn Transport>,
    engine_disconnect: Arc<dyn DisconnectHook>,
    shutdown: CancellationToken,
    closed: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Object-safe view of [`MessageHandler::on_disconnect`] kept by the
/// connector for explicit disconnects.
#[async_trait::async_trait]
trait DisconnectHook: Send + Sync + std::fmt::Debug {
    async fn fire(&self);
}

struct EngineHook<E: ?Sized>(Arc<E>);

impl<E: ?Sized> std::fmt::Debug for EngineHook<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EngineHook")
    }
}

#[async_trait::async_trait]
impl<E: Dispatcher + ?Sized + 'static> DisconnectHook for EngineHook<E> {
    async fn fire(&self) {
        self.0.on_disconnect().await;
    }
}

impl Connector {
    /// Bind `engine` to `transport`, connect the transport, and start
    /// pumping messages.
    ///
    /// The engine's [`MessageHandler::on_connect`] runs before this returns,
    /// so the engine is usable as soon as the connector exists.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Transport`] if the engine is already bound
    /// elsewhere or the transport fails to connect. A failed connect leaves
    /// the engine unbound.
    pub async fn connect<E>(engine: Arc<E>, transport: Arc<dyn Transport>) -> Result<Self>
    where
        E: Dispatcher + ?Sized + 'static,
    {
        // Connect first: a failed dial must leave the engine bindable.
        transport.connect().await?;
        let Some(mut outbound) = engine.take_outbound() else {
            if let Err(e) = transport.disconnect().await {
                tracing::debug!(
                    target: "mcp_engine::mcp::transport::connector",
                    "failed to release transport: {}",
                    e
                );
            }
            return Err(
                McpError::Transport("engine outbound queue is already bound".to_string()).into(),
            );
        };
        engine.on_connect().await;

        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();

        let inbound_task = {
            let engine = Arc::clone(&engine);
            let transport = Arc::clone(&transport);
            let shutdown = shutdown.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                let mut events = transport.events();
                loop {
                    tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => break,

                        event = events.next() => match event {
                            Some(TransportEvent::Message(raw)) => engine.handle_message(raw).await,
                            Some(TransportEvent::Connected) => {
                                tracing::debug!(
                                    target: "mcp_engine::mcp::transport::connector",
                                    "transport connected"
                                );
                            }
                            Some(TransportEvent::Disconnected) | None => {
                                tracing::info!(
                                    target: "mcp_engine::mcp::transport::connector",
                                    "transport disconnected"
                                );
                                engine.on_disconnect().await;
                                closed.cancel();
                                break;
                            }
                        },
                    }
                }
            })
        };

        let outbound_task = {
            let transport = Arc::clone(&transport);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => break,

                        next = outbound.recv() => {
                            let Some(message) = next else { break };
                            tracing::debug!(
                                target: "mcp_engine::mcp::transport::connector",
                                "-> {}",
                                message
                            );
                            if let Err(e) = transport.send(message).await {
                                tracing::warn!(
                                    target: "mcp_engine::mcp::transport::connector",
                                    "dropping outbound message: {}",
                                    e
                                );
                            }
                        }
                    }
                }
            })
        };

        Ok(Self {
            transport,
            engine_disconnect: Arc::new(EngineHook(engine)),
            shutdown,
            closed,
            tasks: vec![inbound_task, outbound_task],
        })
    }

    /// The bound transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Resolves once the transport reports a disconnect.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Disconnect the transport and notify the engine.
    ///
    /// The engine observes the disconnect before this returns.
    pub async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect().await?;
        self.engine_disconnect.fire().await;
        self.closed.cancel();
        self.shutdown.cancel();
        Ok(())
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// A server engine and a client engine talking through an in-process
/// transport pair.
#[derive(Debug)]
pub struct PairedConnector {
    /// Binding of the server engine.
    pub server: Connector,
    /// Binding of the client engine.
    pub client: Connector,
}

impl PairedConnector {
    /// Create a [`MemoryTransport`] pair and bind `server` and `client` to
    /// its two ends.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use mcp_engine::mcp::client::McpClient;
    /// use mcp_engine::mcp::server::McpServer;
    /// use mcp_engine::mcp::transport::PairedConnector;
    /// use mcp_engine::mcp::types::Implementation;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> anyhow::Result<()> {
    /// let server = Arc::new(McpServer::new(Implementation::new("srv", "1.0")));
    /// let client = Arc::new(McpClient::new(Implementation::new("cli", "1.0")));
    /// let link = PairedConnector::connect(server, Arc::clone(&client)).await?;
    /// client.initialize().await?;
    /// link.disconnect().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect<S, C>(server: Arc<S>, client: Arc<C>) -> Result<Self>
    where
        S: Dispatcher + ?Sized + 'static,
        C: Dispatcher + ?Sized + 'static,
    {
        let (server_side, client_side) = MemoryTransport::pair();
        let server = Connector::connect(server, Arc::new(server_side)).await?;
        let client = Connector::connect(client, Arc::new(client_side)).await?;
        Ok(Self { server, client })
    }

    /// Disconnect both ends.
    pub async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        self.server.disconnect().await
    }
}
