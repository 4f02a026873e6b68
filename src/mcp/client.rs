//! MCP client engine
//!
//! [`McpClient`] drives the handshake, issues requests, and routes server
//! notifications to subscribers. Like the server it never touches a
//! transport directly; bind it with a
//! [`Connector`](crate::mcp::transport::Connector).
//!
//! # Design
//!
//! - Request ids are monotonically increasing integers starting at 1.
//! - In-flight requests live in a `pending` map keyed by [`RequestId`]. The
//!   entry is inserted before the request is queued, so a response can never
//!   arrive ahead of its slot.
//! - Whichever of response, timeout, or disconnect removes the entry first
//!   decides the outcome. A response for an id with no entry is logged and
//!   dropped.
//! - Disconnecting drops every pending sender, so each waiting caller gets
//!   [`McpError::ConnectionClosed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::error::{McpError, Result};
use crate::mcp::transport::{Dispatcher, MessageHandler};
use crate::mcp::types::*;

/// Default timeout applied to every request when the caller does not specify one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_CAPACITY: usize = 64;

/// The pending-response map type: maps request ID to the oneshot sender.
type PendingMap = HashMap<RequestId, oneshot::Sender<std::result::Result<Value, JsonRpcError>>>;

/// Something the client observed that the embedding application may care
/// about.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The transport became ready.
    Connected,
    /// The transport closed; all pending requests were rejected.
    Disconnected,
    /// `notifications/message`.
    ServerLog(LoggingMessageParams),
    ToolsListChanged,
    ResourcesListChanged,
    PromptsListChanged,
    /// A subscribed resource changed.
    ResourceUpdated {
        uri: String,
    },
    /// Any notification the client has no dedicated event for.
    Unknown {
        method: String,
        params: Option<Value>,
    },
}

/// Tunables for [`McpClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Applied when a request does not carry its own timeout.
    pub request_timeout: Duration,
    /// Upper bound on in-flight requests; `None` is unbounded.
    pub max_pending: Option<usize>,
    /// Advertised during `initialize`.
    pub capabilities: ClientCapabilities,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_pending: None,
            capabilities: ClientCapabilities::default(),
        }
    }
}

/// Client side of the protocol.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use mcp_engine::mcp::client::McpClient;
/// use mcp_engine::mcp::transport::socket::WebSocketTransport;
/// use mcp_engine::mcp::transport::Connector;
/// use mcp_engine::mcp::types::Implementation;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let client = Arc::new(McpClient::new(Implementation::new("cli", "1.0.0")));
/// let transport = Arc::new(WebSocketTransport::new("ws://127.0.0.1:8080"));
/// let link = Connector::connect(Arc::clone(&client), transport).await?;
///
/// client.initialize().await?;
/// for tool in client.list_tools().await? {
///     println!("{}", tool.name);
/// }
/// link.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct McpClient {
    info: Implementation,
    options: ClientOptions,
    /// Monotonically increasing request ID counter.
    next_id: AtomicU64,
    /// In-flight requests waiting for a response.
    pending: Mutex<PendingMap>,
    state: watch::Sender<ConnectionState>,
    /// Result of the last successful handshake.
    session: watch::Sender<Option<Arc<InitializeResponse>>>,
    events: broadcast::Sender<ClientEvent>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("info", &self.info)
            .field("state", &self.state())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl McpClient {
    pub fn new(info: Implementation) -> Self {
        Self::with_options(info, ClientOptions::default())
    }

    pub fn with_options(info: Implementation, options: ClientOptions) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            info,
            options,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            state: watch::channel(ConnectionState::Disconnected).0,
            session: watch::channel(None).0,
            events: broadcast::channel(EVENT_CAPACITY).0,
            outbound_tx,
            outbound_rx: std::sync::Mutex::new(Some(outbound_rx)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Identity the server reported during the last handshake.
    pub fn server_info(&self) -> Option<Implementation> {
        self.session.borrow().as_ref().map(|s| s.server_info.clone())
    }

    /// Capabilities the server advertised during the last handshake.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.session.borrow().as_ref().map(|s| s.capabilities.clone())
    }

    /// Whether the server advertised `flag`. `false` before the handshake.
    pub fn has_capability(&self, flag: ServerCapabilityFlag) -> bool {
        self.session
            .borrow()
            .as_ref()
            .is_some_and(|s| s.capabilities.has(flag))
    }

    /// Receive every [`ClientEvent`] emitted from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// [`ClientEvent`]s as a stream. Events missed by a slow consumer are
    /// skipped with a warning.
    pub fn event_stream(&self) -> impl Stream<Item = ClientEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                tracing::warn!(target: "mcp_engine::mcp::client", "event stream lagged by {} events", n);
                None
            }
        })
    }

    /// Number of requests waiting for a response.
    pub async fn pending_requests(&self) -> usize {
        self.pending.lock().await.len()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Mark the client connected. Called by the connector once the
    /// transport is ready.
    pub async fn connect(&self) {
        let connected = self.state.send_if_modified(|state| {
            if matches!(state, ConnectionState::Disconnected | ConnectionState::Closed) {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if connected {
            tracing::info!(target: "mcp_engine::mcp::client", "connected");
            self.emit(ClientEvent::Connected);
        }
    }

    /// Mark the client disconnected and reject every pending request with
    /// [`McpError::ConnectionClosed`].
    ///
    /// Does not close the transport; use
    /// [`Connector::disconnect`](crate::mcp::transport::Connector::disconnect)
    /// for that.
    pub async fn disconnect(&self) {
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        let rejected = {
            let mut pending = self.pending.lock().await;
            let count = pending.len();
            // Dropping the senders wakes every waiter with a closed channel.
            pending.clear();
            count
        };
        self.session.send_replace(None);

        if previous != ConnectionState::Disconnected {
            tracing::info!(target: "mcp_engine::mcp::client", rejected, "disconnected");
            self.emit(ClientEvent::Disconnected);
        }
    }

    /// Run the handshake.
    ///
    /// Sends `initialize`, checks the negotiated protocol version, records
    /// the server's identity and capabilities, then sends `initialized`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::NotConnected`] before `connect`,
    /// [`McpError::HandshakeInProgress`] if another handshake is running,
    /// and [`McpError::ProtocolVersion`] if the server picked a version this
    /// client does not speak. Request failures propagate unchanged. On any
    /// error the state reverts to what it was before the call.
    pub async fn initialize(&self) -> Result<InitializeResponse> {
        let previous = self.state();
        match previous {
            ConnectionState::Connected | ConnectionState::Initialized => {}
            ConnectionState::Initializing => return Err(McpError::HandshakeInProgress.into()),
            ConnectionState::Disconnected | ConnectionState::Closed => {
                return Err(McpError::NotConnected.into())
            }
        }
        self.state.send_replace(ConnectionState::Initializing);

        match self.handshake().await {
            Ok(response) => {
                self.session.send_replace(Some(Arc::new(response.clone())));
                self.state.send_if_modified(|state| {
                    let initializing = *state == ConnectionState::Initializing;
                    if initializing {
                        *state = ConnectionState::Initialized;
                    }
                    initializing
                });
                self.notify(METHOD_INITIALIZED, None)?;
                tracing::info!(
                    target: "mcp_engine::mcp::client",
                    server = %response.server_info.name,
                    version = %response.server_info.version,
                    protocol = %response.protocol_version,
                    "initialized"
                );
                Ok(response)
            }
            Err(e) => {
                self.state.send_if_modified(|state| {
                    let initializing = *state == ConnectionState::Initializing;
                    if initializing {
                        *state = previous;
                    }
                    initializing
                });
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<InitializeResponse> {
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: self.options.capabilities.clone(),
            client_info: self.info.clone(),
        };
        let params = serde_json::to_value(params).map_err(McpError::from)?;
        let result = self.send_request(METHOD_INITIALIZE, Some(params), None).await?;
        let response: InitializeResponse = serde_json::from_value(result).map_err(McpError::from)?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(McpError::ProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS.join(", "),
                got: response.protocol_version,
            }
            .into());
        }
        Ok(response)
    }

    // -----------------------------------------------------------------------
    // Raw requests
    // -----------------------------------------------------------------------

    /// Send a request and wait for its result.
    ///
    /// # Arguments
    ///
    /// * `method` - The JSON-RPC method name.
    /// * `params` - Raw `params` value, omitted from the wire when `None`.
    /// * `timeout` - Overrides the configured request timeout.
    ///
    /// # Errors
    ///
    /// - [`McpError::NotConnected`] when not connected; nothing is sent.
    /// - [`McpError::TooManyPending`] when the configured bound is reached.
    /// - [`McpError::Timeout`] when the deadline elapses first.
    /// - [`McpError::ConnectionClosed`] when the client disconnects first.
    /// - [`McpError::Rpc`] carrying the server's error object.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.require_connected()?;

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst) as i64);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if let Some(limit) = self.options.max_pending {
                if pending.len() >= limit {
                    return Err(McpError::TooManyPending { limit }.into());
                }
            }
            pending.insert(id.clone(), tx);
        }

        let request = JsonRpcRequest::new(method, params, Some(id.clone()));
        let sent = Message::from(request)
            .encode()
            .map_err(McpError::from)
            .and_then(|raw| {
                self.outbound_tx
                    .send(raw)
                    .map_err(|_| McpError::Transport("outbound queue closed".to_string()))
            });
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }
        tracing::debug!(target: "mcp_engine::mcp::client", %id, method, "request sent");

        let deadline = timeout.unwrap_or(self.options.request_timeout);
        match tokio::time::timeout(deadline, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::warn!(
                    target: "mcp_engine::mcp::client",
                    %id,
                    method,
                    timeout_ms = deadline.as_millis() as u64,
                    "request timed out"
                );
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                }
                .into())
            }
            Ok(Err(_)) => Err(McpError::ConnectionClosed.into()),
            Ok(Ok(Err(error))) => Err(McpError::Rpc(error).into()),
            Ok(Ok(Ok(result))) => Ok(result),
        }
    }

    /// Send a notification.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.require_connected()?;
        let raw = Message::from(JsonRpcNotification::new(method, params))
            .encode()
            .map_err(McpError::from)?;
        self.outbound_tx
            .send(raw)
            .map_err(|_| McpError::Transport("outbound queue closed".to_string()))?;
        Ok(())
    }

    fn require_connected(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected
            | ConnectionState::Initializing
            | ConnectionState::Initialized => Ok(()),
            ConnectionState::Disconnected | ConnectionState::Closed => {
                Err(McpError::NotConnected.into())
            }
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        if self.state() != ConnectionState::Initialized {
            return Err(McpError::NotInitialized.into());
        }
        let result = self.send_request(method, params, None).await?;
        serde_json::from_value(result).map_err(|e| McpError::Serialization(e).into())
    }

    // -----------------------------------------------------------------------
    // Typed operations
    // -----------------------------------------------------------------------

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let response: ListToolsResponse = self.call(METHOD_TOOLS_LIST, None).await?;
        Ok(response.tools)
    }

    /// Invoke a tool. `arguments` should be a JSON object.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResponse> {
        let params = json!({ "name": name, "arguments": arguments });
        self.call(METHOD_TOOLS_CALL, Some(params)).await
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        let response: ListResourcesResponse = self.call(METHOD_RESOURCES_LIST, None).await?;
        Ok(response.resources)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResponse> {
        self.call(METHOD_RESOURCES_READ, Some(json!({ "uri": uri })))
            .await
    }

    /// Ask for `notifications/resources/updated` when `uri` changes.
    pub async fn subscribe_resource(&self, uri: &str) -> Result<()> {
        let _: Value = self
            .call(METHOD_RESOURCES_SUBSCRIBE, Some(json!({ "uri": uri })))
            .await?;
        Ok(())
    }

    pub async fn unsubscribe_resource(&self, uri: &str) -> Result<()> {
        let _: Value = self
            .call(METHOD_RESOURCES_UNSUBSCRIBE, Some(json!({ "uri": uri })))
            .await?;
        Ok(())
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let response: ListPromptsResponse = self.call(METHOD_PROMPTS_LIST, None).await?;
        Ok(response.prompts)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<GetPromptResponse> {
        let params = json!({ "name": name, "arguments": arguments });
        self.call(METHOD_PROMPTS_GET, Some(params)).await
    }

    /// Set the minimum level of log notifications the server pushes.
    pub async fn set_log_level(&self, level: LoggingLevel) -> Result<()> {
        let _: Value = self
            .call(METHOD_LOGGING_SET_LEVEL, Some(json!({ "level": level })))
            .await?;
        Ok(())
    }

    /// Liveness check. Works before the handshake.
    pub async fn ping(&self) -> Result<()> {
        self.send_request(METHOD_PING, None, None).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    async fn handle_response(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.clone() else {
            let error = response.into_result().err();
            tracing::warn!(target: "mcp_engine::mcp::client", ?error, "error response without id; dropping");
            return;
        };

        let tx = self.pending.lock().await.remove(&id);
        let Some(tx) = tx else {
            tracing::warn!(target: "mcp_engine::mcp::client", %id, "response for unknown id; dropping");
            return;
        };

        if tx.send(response.into_result()).is_err() {
            tracing::debug!(target: "mcp_engine::mcp::client", %id, "caller stopped waiting; dropping response");
        }
    }

    fn handle_notification(&self, notification: JsonRpcNotification) {
        let JsonRpcNotification { method, params, .. } = notification;
        let event = match method.as_str() {
            NOTIF_MESSAGE => {
                match serde_json::from_value::<LoggingMessageParams>(params.unwrap_or(Value::Null)) {
                    Ok(log) => ClientEvent::ServerLog(log),
                    Err(e) => {
                        tracing::warn!(target: "mcp_engine::mcp::client", "malformed log notification: {}", e);
                        return;
                    }
                }
            }
            NOTIF_TOOLS_LIST_CHANGED => ClientEvent::ToolsListChanged,
            NOTIF_RESOURCES_LIST_CHANGED => ClientEvent::ResourcesListChanged,
            NOTIF_PROMPTS_LIST_CHANGED => ClientEvent::PromptsListChanged,
            NOTIF_RESOURCES_UPDATED => {
                let uri = params
                    .as_ref()
                    .and_then(|p| p.get("uri"))
                    .and_then(Value::as_str);
                match uri {
                    Some(uri) => ClientEvent::ResourceUpdated {
                        uri: uri.to_string(),
                    },
                    None => {
                        tracing::warn!(target: "mcp_engine::mcp::client", "resource update without uri");
                        return;
                    }
                }
            }
            _ => {
                tracing::debug!(target: "mcp_engine::mcp::client", method = %method, "unrecognized notification");
                ClientEvent::Unknown { method, params }
            }
        };
        self.emit(event);
    }

    /// Answer a server-initiated request. Only `ping` is supported.
    fn handle_server_request(&self, request: JsonRpcRequest) {
        let response = if request.method == METHOD_PING {
            JsonRpcResponse::success(request.id, json!({}))
        } else {
            JsonRpcResponse::failure(
                Some(request.id),
                JsonRpcError::method_not_found(&request.method),
            )
        };
        match Message::from(response).encode() {
            Ok(raw) => {
                if self.outbound_tx.send(raw).is_err() {
                    tracing::debug!(target: "mcp_engine::mcp::client", "outbound queue closed");
                }
            }
            Err(e) => tracing::error!(target: "mcp_engine::mcp::client", "failed to encode response: {}", e),
        }
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait::async_trait]
impl MessageHandler for McpClient {
    async fn handle_message(&self, raw: String) {
        tracing::debug!(target: "mcp_engine::mcp::client", "<- {}", raw);
        match Message::decode(&raw) {
            Ok(Message::Response(response)) => self.handle_response(response).await,
            Ok(Message::Notification(notification)) => self.handle_notification(notification),
            Ok(Message::Request(request)) => self.handle_server_request(request),
            Err(e) => {
                tracing::warn!(target: "mcp_engine::mcp::client", "dropping undecodable message: {}", e);
            }
        }
    }

    async fn on_connect(&self) {
        self.connect().await;
    }

    async fn on_disconnect(&self) {
        self.disconnect().await;
    }
}

impl Dispatcher for McpClient {
    fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.outbound_rx.lock().ok()?.take()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{codes, error_code};

    /// Build a connected client with the outbound queue exposed.
    async fn make_client(options: ClientOptions) -> (Arc<McpClient>, mpsc::UnboundedReceiver<String>) {
        let client = Arc::new(McpClient::with_options(Implementation::new("t", "1"), options));
        let rx = client.take_outbound().unwrap();
        client.connect().await;
        (client, rx)
    }

    async fn next_sent(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("nothing was sent")
            .expect("queue closed");
        serde_json::from_str(&raw).unwrap()
    }

    fn respond(id: &Value, result: Value) -> String {
        json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
    }

    #[tokio::test]
    async fn test_request_resolves_with_matching_result() {
        let (client, mut rx) = make_client(ClientOptions::default()).await;

        let caller = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_request("ping", None, None).await })
        };
        let sent = next_sent(&mut rx).await;
        assert_eq!(sent["id"], 1);
        assert!(sent.get("params").is_none());
        client.handle_message(respond(&sent["id"], json!({"ok": true}))).await;

        let result = caller.await.unwrap().unwrap();
        assert_eq!(result, json!({"ok": true}));
        assert_eq!(client.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn test_ids_increase_monotonically() {
        let (client, mut rx) = make_client(ClientOptions::default()).await;
        client.notify("x", None).unwrap();
        let _ = next_sent(&mut rx).await;

        for expected in 1..=3 {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let _ = client.send_request("ping", None, Some(Duration::from_millis(200))).await;
            });
            assert_eq!(next_sent(&mut rx).await["id"], expected);
        }
    }

    /// A late response after a timeout is dropped, not double-resolved.
    #[tokio::test]
    async fn test_timeout_then_late_response() {
        let (client, mut rx) = make_client(ClientOptions::default()).await;

        let err = client
            .send_request("slow", None, Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpError>(),
            Some(McpError::Timeout { timeout_ms: 30, .. })
        ));
        assert_eq!(error_code(&err), Some(codes::TIMEOUT));
        assert_eq!(client.pending_requests().await, 0);

        let sent = next_sent(&mut rx).await;
        client.handle_message(respond(&sent["id"], json!("late"))).await;
        assert_eq!(client.pending_requests().await, 0);

        // Still usable afterwards.
        let caller = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_request("ping", None, None).await })
        };
        let sent = next_sent(&mut rx).await;
        client.handle_message(respond(&sent["id"], json!({}))).await;
        assert!(caller.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_remote_error_keeps_code_message_and_data() {
        let (client, mut rx) = make_client(ClientOptions::default()).await;
        let caller = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_request("tools/call", None, None).await })
        };
        let sent = next_sent(&mut rx).await;
        client
            .handle_message(
                json!({
                    "jsonrpc": "2.0",
                    "id": sent["id"],
                    "error": {"code": -32002, "message": "Tool execution failed: x", "data": {"k": 1}}
                })
                .to_string(),
            )
            .await;

        let err = caller.await.unwrap().unwrap_err();
        match err.downcast_ref::<McpError>() {
            Some(McpError::Rpc(e)) => {
                assert_eq!(e.code, codes::TOOL_EXECUTION_ERROR);
                assert_eq!(e.message, "Tool execution failed: x");
                assert_eq!(e.data, Some(json!({"k": 1})));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_rejects_all_pending() {
        let (client, mut rx) = make_client(ClientOptions::default()).await;
        let mut events = client.subscribe_events();

        let callers: Vec<_> = (0..3)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.send_request("ping", None, None).await })
            })
            .collect();
        for _ in 0..3 {
            next_sent(&mut rx).await;
        }
        assert_eq!(client.pending_requests().await, 3);

        client.disconnect().await;

        for caller in callers {
            let err = caller.await.unwrap().unwrap_err();
            assert!(matches!(
                err.downcast_ref::<McpError>(),
                Some(McpError::ConnectionClosed)
            ));
        }
        assert_eq!(client.pending_requests().await, 0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_requests_fail_fast_when_not_connected() {
        let client = McpClient::new(Implementation::new("t", "1"));
        let mut rx = client.take_outbound().unwrap();

        let err = client.send_request("ping", None, None).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<McpError>(), Some(McpError::NotConnected)));
        assert!(rx.try_recv().is_err(), "nothing may be sent");
    }

    #[tokio::test]
    async fn test_typed_calls_require_initialized() {
        let (client, mut rx) = make_client(ClientOptions::default()).await;
        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<McpError>(), Some(McpError::NotInitialized)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_max_pending_bound() {
        let options = ClientOptions {
            max_pending: Some(1),
            ..ClientOptions::default()
        };
        let (client, mut rx) = make_client(options).await;
        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_request("ping", None, None).await })
        };
        let sent = next_sent(&mut rx).await;

        let err = client.send_request("ping", None, None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpError>(),
            Some(McpError::TooManyPending { limit: 1 })
        ));

        client.handle_message(respond(&sent["id"], json!({}))).await;
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_initialize_rejects_unsupported_version() {
        let (client, mut rx) = make_client(ClientOptions::default()).await;
        let caller = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.initialize().await })
        };
        let sent = next_sent(&mut rx).await;
        assert_eq!(sent["method"], METHOD_INITIALIZE);
        assert_eq!(sent["params"]["protocolVersion"], LATEST_PROTOCOL_VERSION);
        assert_eq!(sent["params"]["clientInfo"]["name"], "t");

        client
            .handle_message(respond(
                &sent["id"],
                json!({
                    "protocolVersion": "1999-01-01",
                    "capabilities": {},
                    "serverInfo": {"name": "s", "version": "1"}
                }),
            ))
            .await;

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpError>(),
            Some(McpError::ProtocolVersion { .. })
        ));
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(client.server_info().is_none());
        assert!(rx.try_recv().is_err(), "no initialized notification after failure");
    }

    #[tokio::test]
    async fn test_initialize_records_session_and_confirms() {
        let (client, mut rx) = make_client(ClientOptions::default()).await;
        let caller = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.initialize().await })
        };
        let sent = next_sent(&mut rx).await;
        assert_eq!(client.state(), ConnectionState::Initializing);
        client
            .handle_message(respond(
                &sent["id"],
                json!({
                    "protocolVersion": LATEST_PROTOCOL_VERSION,
                    "capabilities": {"tools": {}, "resources": {"subscribe": true}},
                    "serverInfo": {"name": "s", "version": "2"}
                }),
            ))
            .await;
        caller.await.unwrap().unwrap();

        assert_eq!(client.state(), ConnectionState::Initialized);
        assert_eq!(client.server_info(), Some(Implementation::new("s", "2")));
        assert!(client.has_capability(ServerCapabilityFlag::ResourceSubscribe));
        assert!(!client.has_capability(ServerCapabilityFlag::Prompts));

        let confirm = next_sent(&mut rx).await;
        assert_eq!(confirm["method"], METHOD_INITIALIZED);
        assert!(confirm.get("id").is_none());
    }

    #[tokio::test]
    async fn test_notifications_become_events() {
        let (client, _rx) = make_client(ClientOptions::default()).await;
        let mut events = client.subscribe_events();

        let notifications = [
            json!({"jsonrpc": "2.0", "method": NOTIF_TOOLS_LIST_CHANGED}),
            json!({"jsonrpc": "2.0", "method": NOTIF_RESOURCES_UPDATED, "params": {"uri": "a://b"}}),
            json!({"jsonrpc": "2.0", "method": NOTIF_MESSAGE, "params": {"level": "error", "data": "x"}}),
            json!({"jsonrpc": "2.0", "method": "custom/thing", "params": [1]}),
        ];
        for n in notifications {
            client.handle_message(n.to_string()).await;
        }

        assert_eq!(events.recv().await.unwrap(), ClientEvent::ToolsListChanged);
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::ResourceUpdated {
                uri: "a://b".to_string()
            }
        );
        match events.recv().await.unwrap() {
            ClientEvent::ServerLog(log) => {
                assert_eq!(log.level, LoggingLevel::Error);
                assert_eq!(log.data, json!("x"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::Unknown {
                method: "custom/thing".to_string(),
                params: Some(json!([1]))
            }
        );
    }

    #[tokio::test]
    async fn test_event_stream_yields_disconnect() {
        let (client, _rx) = make_client(ClientOptions::default()).await;
        let stream = client.event_stream();
        tokio::pin!(stream);

        client
            .handle_message(json!({"jsonrpc": "2.0", "method": NOTIF_PROMPTS_LIST_CHANGED}).to_string())
            .await;
        client.disconnect().await;

        assert_eq!(stream.next().await, Some(ClientEvent::PromptsListChanged));
        assert_eq!(stream.next().await, Some(ClientEvent::Disconnected));
    }

    #[tokio::test]
    async fn test_unknown_response_id_is_ignored() {
        let (client, _rx) = make_client(ClientOptions::default()).await;
        client.handle_message(respond(&json!(999), json!({}))).await;
        client.handle_message("not json".to_string()).await;
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_server_ping_is_answered() {
        let (client, mut rx) = make_client(ClientOptions::default()).await;
        client
            .handle_message(json!({"jsonrpc": "2.0", "id": "p1", "method": "ping"}).to_string())
            .await;
        let sent = next_sent(&mut rx).await;
        assert_eq!(sent["id"], "p1");
        assert_eq!(sent["result"], json!({}));
    }
}
