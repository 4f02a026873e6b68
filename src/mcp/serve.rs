//! Hosting a server engine on a real transport
//!
//! [`serve_stdio`] binds one server to the process's stdin/stdout.
//! [`serve_websocket`] accepts any number of WebSocket connections on a
//! listener and gives each its own server built by a [`ServerFactory`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, Result};
use crate::mcp::server::{BoxFuture, McpServer};
use crate::mcp::transport::socket::WebSocketTransport;
use crate::mcp::transport::stdio::StdioTransport;
use crate::mcp::transport::{Connector, Transport};

/// Builds a fresh server for each accepted connection.
pub type ServerFactory = Arc<dyn Fn() -> BoxFuture<'static, McpServer> + Send + Sync>;

/// Serve `server` over stdin/stdout until the peer closes the stream.
pub async fn serve_stdio(server: McpServer) -> Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(StdioTransport::stdio());
    serve_transport(server, transport).await
}

/// Bind `server` to `transport` and run until the connection ends.
pub async fn serve_transport(server: McpServer, transport: Arc<dyn Transport>) -> Result<()> {
    let connector = Connector::connect(Arc::new(server.clone()), transport).await?;
    tracing::info!(
        target: "mcp_engine::mcp::serve",
        "serving {} {}",
        server.info().name,
        server.info().version
    );
    connector.closed().await;
    server.stop().await;
    Ok(())
}

/// Accept WebSocket connections on `listener` until `shutdown` fires.
///
/// Every connection gets an independent server from `factory`; state is
/// never shared between peers.
pub async fn serve_websocket(
    listener: TcpListener,
    factory: ServerFactory,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(target: "mcp_engine::mcp::serve", "websocket server listening on ws://{}/", addr);

    let app = Router::new()
        .route("/", get(ws_upgrade))
        .with_state(factory);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|e| McpError::Transport(format!("websocket server failed: {}", e)))?;

    tracing::info!(target: "mcp_engine::mcp::serve", "websocket server on {} stopped", addr);
    Ok(())
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(factory): State<ServerFactory>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, factory))
}

async fn handle_socket(socket: WebSocket, peer: SocketAddr, factory: ServerFactory) {
    tracing::info!(target: "mcp_engine::mcp::serve", "client connected: {}", peer);

    let server = factory().await;
    let transport: Arc<dyn Transport> = Arc::new(WebSocketTransport::accepted(socket));
    if let Err(e) = serve_transport(server, transport).await {
        tracing::warn!(target: "mcp_engine::mcp::serve", "connection from {} failed: {}", peer, e);
        return;
    }

    tracing::info!(target: "mcp_engine::mcp::serve", "client disconnected: {}", peer);
}
