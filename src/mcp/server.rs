//! MCP server engine
//!
//! [`McpServer`] owns the tool, resource, and prompt registries, answers
//! requests from a connected client, and pushes notifications back. It is
//! transport-agnostic: a [`Connector`](crate::mcp::transport::Connector)
//! feeds it raw payloads through [`MessageHandler`] and drains the outbound
//! queue exposed through [`Dispatcher`].
//!
//! # Concurrency
//!
//! Each inbound request is dispatched on its own Tokio task, so a slow tool
//! does not hold up the next request. Responses are correlated by id only
//! and may leave in a different order than the requests arrived.
//! Notifications are handled inline, in arrival order.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --start--> Connected --initialized--> Initialized
//!       ^                     |                           |
//!       +----- disconnect ----+---------------------------+
//! any state --stop--> Closed
//! ```
//!
//! List-changed, resource-updated, and log notifications are only pushed
//! while `Initialized`.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, watch, RwLock};

use crate::error::{codes, Result};
use crate::mcp::transport::{Dispatcher, MessageHandler};
use crate::mcp::types::*;

/// Convenience alias for a boxed, `Send`-safe async future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Invoked with the call's `arguments` object.
///
/// A `Value::String` result becomes the text content verbatim; anything
/// else is pretty-printed JSON.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Invoked with the requested URI.
pub type ResourceHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<Vec<ResourceContents>>> + Send + Sync>;

/// Invoked with the prompt arguments (an empty map when none were sent).
pub type PromptHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<GetPromptResponse>> + Send + Sync>;

type DispatchResult = std::result::Result<Value, JsonRpcError>;

struct Registered<D, H> {
    descriptor: D,
    handler: H,
}

/// One server log entry, as handed to a [`LogSink`] and embedded in
/// `notifications/message`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub level: LoggingLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Destination for server log entries.
pub trait LogSink: Send + Sync {
    fn record(&self, logger: &str, entry: &LogEntry);
}

/// Forwards log entries to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn record(&self, logger: &str, entry: &LogEntry) {
        let data = entry.data.as_ref().map(Value::to_string).unwrap_or_default();
        match entry.level {
            LoggingLevel::Debug => {
                tracing::debug!(target: "mcp_engine::mcp::server", logger = %logger, data = %data, "{}", entry.message)
            }
            LoggingLevel::Info | LoggingLevel::Notice => {
                tracing::info!(target: "mcp_engine::mcp::server", logger = %logger, data = %data, "{}", entry.message)
            }
            LoggingLevel::Warning => {
                tracing::warn!(target: "mcp_engine::mcp::server", logger = %logger, data = %data, "{}", entry.message)
            }
            _ => {
                tracing::error!(target: "mcp_engine::mcp::server", logger = %logger, data = %data, "{}", entry.message)
            }
        }
    }
}

struct ServerInner {
    info: Implementation,
    instructions: RwLock<Option<String>>,
    capabilities: RwLock<ServerCapabilities>,
    tools: RwLock<HashMap<String, Registered<Tool, ToolHandler>>>,
    resources: RwLock<HashMap<String, Registered<Resource, ResourceHandler>>>,
    prompts: RwLock<HashMap<String, Registered<Prompt, PromptHandler>>>,
    subscriptions: RwLock<HashSet<String>>,
    state: watch::Sender<ConnectionState>,
    initialize_answered: AtomicBool,
    peer_log_level: RwLock<LoggingLevel>,
    log_sink: Arc<dyn LogSink>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

/// Server side of the protocol.
///
/// Cheap to clone; clones share registries and state.
///
/// # Examples
///
/// ```
/// use mcp_engine::mcp::server::McpServer;
/// use mcp_engine::mcp::types::{Implementation, Tool};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let server = McpServer::new(Implementation::new("demo", "1.0.0"));
/// server
///     .register_tool(
///         Tool::new("echo", "Echo input", json!({"type": "object"})),
///         |args| async move { Ok(json!(format!("Echo: {}", args["message"]))) },
///     )
///     .await;
/// assert_eq!(server.tools().await.len(), 1);
/// # }
/// ```
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("info", &self.inner.info)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl McpServer {
    /// Create a server that logs through [`TracingLogSink`].
    pub fn new(info: Implementation) -> Self {
        Self::with_log_sink(info, Arc::new(TracingLogSink))
    }

    /// Create a server with an injected log sink.
    pub fn with_log_sink(info: Implementation, log_sink: Arc<dyn LogSink>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let mut capabilities = ServerCapabilities::default();
        capabilities.merge(ServerCapabilities {
            tools: Some(json!({ "listChanged": true })),
            prompts: Some(json!({ "listChanged": true })),
            resources: Some(json!({ "subscribe": true, "listChanged": true })),
            ..ServerCapabilities::none()
        });

        Self {
            inner: Arc::new(ServerInner {
                info,
                instructions: RwLock::new(None),
                capabilities: RwLock::new(capabilities),
                tools: RwLock::new(HashMap::new()),
                resources: RwLock::new(HashMap::new()),
                prompts: RwLock::new(HashMap::new()),
                subscriptions: RwLock::new(HashSet::new()),
                state: watch::channel(ConnectionState::Disconnected).0,
                initialize_answered: AtomicBool::new(false),
                peer_log_level: RwLock::new(LoggingLevel::Info),
                log_sink,
                outbound_tx,
                outbound_rx: std::sync::Mutex::new(Some(outbound_rx)),
            }),
        }
    }

    pub fn info(&self) -> &Implementation {
        &self.inner.info
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// The capability set that `initialize` will advertise.
    pub async fn capabilities(&self) -> ServerCapabilities {
        self.inner.capabilities.read().await.clone()
    }

    /// Merge `capabilities` into the advertised set.
    ///
    /// Takes effect for the next `initialize`; a client that already
    /// completed the handshake keeps what it was sent.
    pub async fn set_capabilities(&self, capabilities: ServerCapabilities) {
        if self.state() == ConnectionState::Initialized {
            tracing::warn!(
                target: "mcp_engine::mcp::server",
                "capabilities changed after handshake; the current peer will not see them"
            );
        }
        self.inner.capabilities.write().await.merge(capabilities);
    }

    /// Instructions returned to the client in the initialize response.
    pub async fn set_instructions(&self, instructions: impl Into<String>) {
        *self.inner.instructions.write().await = Some(instructions.into());
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register (or replace) a tool by name.
    pub async fn register_tool<F, Fut>(&self, tool: Tool, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args| Box::pin(handler(args)));
        let name = tool.name.clone();
        let replaced = self
            .inner
            .tools
            .write()
            .await
            .insert(
                name.clone(),
                Registered {
                    descriptor: tool,
                    handler,
                },
            )
            .is_some();
        tracing::debug!(target: "mcp_engine::mcp::server", tool = %name, replaced, "registered tool");
        self.notify(NOTIF_TOOLS_LIST_CHANGED, None);
    }

    /// Register (or replace) a resource by URI.
    pub async fn register_resource<F, Fut>(&self, resource: Resource, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<ResourceContents>>> + Send + 'static,
    {
        let handler: ResourceHandler = Arc::new(move |uri| Box::pin(handler(uri)));
        let uri = resource.uri.clone();
        let replaced = self
            .inner
            .resources
            .write()
            .await
            .insert(
                uri.clone(),
                Registered {
                    descriptor: resource,
                    handler,
                },
            )
            .is_some();
        tracing::debug!(target: "mcp_engine::mcp::server", uri = %uri, replaced, "registered resource");
        self.notify(NOTIF_RESOURCES_LIST_CHANGED, None);
    }

    /// Register (or replace) a prompt by name.
    pub async fn register_prompt<F, Fut>(&self, prompt: Prompt, handler: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GetPromptResponse>> + Send + 'static,
    {
        let handler: PromptHandler = Arc::new(move |args| Box::pin(handler(args)));
        let name = prompt.name.clone();
        let replaced = self
            .inner
            .prompts
            .write()
            .await
            .insert(
                name.clone(),
                Registered {
                    descriptor: prompt,
                    handler,
                },
            )
            .is_some();
        tracing::debug!(target: "mcp_engine::mcp::server", prompt = %name, replaced, "registered prompt");
        self.notify(NOTIF_PROMPTS_LIST_CHANGED, None);
    }

    /// Registered tools, sorted by name.
    pub async fn tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .inner
            .tools
            .read()
            .await
            .values()
            .map(|r| r.descriptor.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Registered resources, sorted by URI.
    pub async fn resources(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> = self
            .inner
            .resources
            .read()
            .await
            .values()
            .map(|r| r.descriptor.clone())
            .collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    /// Registered prompts, sorted by name.
    pub async fn prompts(&self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self
            .inner
            .prompts
            .read()
            .await
            .values()
            .map(|r| r.descriptor.clone())
            .collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Mark the server ready to talk to a peer.
    pub async fn start(&self) {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if started {
            self.log(LoggingLevel::Info, "Server started", None).await;
        }
    }

    /// Stop the server for good.
    pub async fn stop(&self) {
        let previous = self.inner.state.send_replace(ConnectionState::Closed);
        if previous != ConnectionState::Closed {
            self.inner.initialize_answered.store(false, Ordering::SeqCst);
            self.inner.subscriptions.write().await.clear();
            self.log(LoggingLevel::Info, "Server stopped", None).await;
        }
    }

    // -----------------------------------------------------------------------
    // Outbound notifications
    // -----------------------------------------------------------------------

    /// Record a log entry and, when the peer asked for this level, push it
    /// as `notifications/message`.
    pub async fn log(&self, level: LoggingLevel, message: impl Into<String>, data: Option<Value>) {
        let entry = LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            message: message.into(),
            data,
        };
        self.inner.log_sink.record(&self.inner.info.name, &entry);

        if self.state() != ConnectionState::Initialized
            || level < *self.inner.peer_log_level.read().await
        {
            return;
        }
        let params = LoggingMessageParams {
            level,
            logger: Some(self.inner.info.name.clone()),
            data: serde_json::to_value(&entry).unwrap_or(Value::Null),
        };
        match serde_json::to_value(params) {
            Ok(params) => self.notify(NOTIF_MESSAGE, Some(params)),
            Err(e) => tracing::error!(target: "mcp_engine::mcp::server", "failed to encode log entry: {}", e),
        }
    }

    /// Push `notifications/resources/updated` if the peer subscribed to
    /// `uri`.
    pub async fn notify_resource_updated(&self, uri: &str) {
        if self.inner.subscriptions.read().await.contains(uri) {
            self.notify(NOTIF_RESOURCES_UPDATED, Some(json!({ "uri": uri })));
        } else {
            tracing::debug!(target: "mcp_engine::mcp::server", uri, "no subscriber for resource update");
        }
    }

    fn notify(&self, method: &str, params: Option<Value>) {
        if self.state() != ConnectionState::Initialized {
            tracing::debug!(target: "mcp_engine::mcp::server", method, "suppressed notification before handshake");
            return;
        }
        self.send(JsonRpcNotification::new(method, params));
    }

    fn send(&self, message: impl Into<Message>) {
        let raw = match message.into().encode() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(target: "mcp_engine::mcp::server", "failed to encode outbound message: {}", e);
                return;
            }
        };
        if self.inner.outbound_tx.send(raw).is_err() {
            tracing::debug!(target: "mcp_engine::mcp::server", "outbound queue closed; message dropped");
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Answer one request.
    ///
    /// Always produces a response addressed to the request id; failures
    /// become error responses.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        let outcome = match method.as_str() {
            METHOD_INITIALIZE => self.on_initialize(params).await,
            METHOD_PING => Ok(json!({})),
            METHOD_TOOLS_LIST => to_result(&ListToolsResponse {
                tools: self.tools().await,
            }),
            METHOD_TOOLS_CALL => self.on_call_tool(params).await,
            METHOD_RESOURCES_LIST => to_result(&ListResourcesResponse {
                resources: self.resources().await,
            }),
            METHOD_RESOURCES_READ => self.on_read_resource(params).await,
            METHOD_RESOURCES_SUBSCRIBE => self.on_subscribe(params, true).await,
            METHOD_RESOURCES_UNSUBSCRIBE => self.on_subscribe(params, false).await,
            METHOD_PROMPTS_LIST => to_result(&ListPromptsResponse {
                prompts: self.prompts().await,
            }),
            METHOD_PROMPTS_GET => self.on_get_prompt(params).await,
            METHOD_LOGGING_SET_LEVEL => self.on_set_level(params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => {
                tracing::debug!(
                    target: "mcp_engine::mcp::server",
                    method = %method,
                    code = error.code,
                    "request failed: {}",
                    error.message
                );
                JsonRpcResponse::failure(Some(id), error)
            }
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            METHOD_INITIALIZED | METHOD_INITIALIZED_ALIAS => {
                if !self.inner.initialize_answered.load(Ordering::SeqCst) {
                    tracing::warn!(
                        target: "mcp_engine::mcp::server",
                        "received initialized before initialize; ignoring"
                    );
                    return;
                }
                let changed = self.inner.state.send_if_modified(|state| {
                    if *state == ConnectionState::Connected {
                        *state = ConnectionState::Initialized;
                        true
                    } else {
                        false
                    }
                });
                if changed {
                    self.log(LoggingLevel::Info, "Client initialized", None).await;
                }
            }
            METHOD_LOGGING_SET_LEVEL => {
                match parse_params::<SetLevelParams>(notification.params) {
                    Ok(SetLevelParams { level }) => self.set_peer_log_level(level).await,
                    Err(e) => tracing::warn!(
                        target: "mcp_engine::mcp::server",
                        "ignoring logging/setLevel notification: {}",
                        e.message
                    ),
                }
            }
            other => {
                tracing::warn!(target: "mcp_engine::mcp::server", method = other, "unknown notification; ignoring");
            }
        }
    }

    async fn on_set_level(&self, params: Option<Value>) -> DispatchResult {
        let SetLevelParams { level } = parse_params(params)?;
        self.set_peer_log_level(level).await;
        Ok(json!({}))
    }

    async fn set_peer_log_level(&self, level: LoggingLevel) {
        *self.inner.peer_log_level.write().await = level;
        tracing::debug!(target: "mcp_engine::mcp::server", %level, "peer log level set");
    }

    async fn on_initialize(&self, params: Option<Value>) -> DispatchResult {
        let params: InitializeParams = parse_params(params)?;
        let protocol_version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            params.protocol_version
        } else {
            tracing::info!(
                target: "mcp_engine::mcp::server",
                requested = %params.protocol_version,
                "unsupported protocol version requested; offering {}",
                LATEST_PROTOCOL_VERSION
            );
            LATEST_PROTOCOL_VERSION.to_string()
        };

        let response = InitializeResponse {
            protocol_version,
            capabilities: self.capabilities().await,
            server_info: self.inner.info.clone(),
            instructions: self.inner.instructions.read().await.clone(),
        };
        self.inner.initialize_answered.store(true, Ordering::SeqCst);
        tracing::info!(
            target: "mcp_engine::mcp::server",
            client = %params.client_info.name,
            version = %params.client_info.version,
            "initialize"
        );
        to_result(&response)
    }

    async fn on_call_tool(&self, params: Option<Value>) -> DispatchResult {
        let CallToolParams { name, arguments } = parse_params(params)?;
        let handler = self
            .inner
            .tools
            .read()
            .await
            .get(&name)
            .map(|r| Arc::clone(&r.handler))
            .ok_or_else(|| JsonRpcError::new(codes::UNKNOWN_TOOL, format!("Unknown tool: {}", name)))?;

        let arguments = arguments.filter(|a| !a.is_null()).unwrap_or_else(|| json!({}));
        let outcome = AssertUnwindSafe(handler(arguments)).catch_unwind().await;
        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::error!(target: "mcp_engine::mcp::server", tool = %name, "tool failed: {:#}", e);
                return Err(JsonRpcError::new(
                    codes::TOOL_EXECUTION_ERROR,
                    format!("Tool execution failed: {}", e),
                ));
            }
            Err(_) => {
                tracing::error!(target: "mcp_engine::mcp::server", tool = %name, "tool handler panicked");
                return Err(JsonRpcError::new(
                    codes::TOOL_EXECUTION_ERROR,
                    "Tool execution failed: handler panicked",
                ));
            }
        };

        let text = match value {
            Value::String(text) => text,
            other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
        };
        to_result(&CallToolResponse {
            content: vec![ToolResponseContent::Text { text }],
            is_error: None,
        })
    }

    async fn on_read_resource(&self, params: Option<Value>) -> DispatchResult {
        let ResourceUriParams { uri } = parse_params(params)?;
        let handler = self
            .inner
            .resources
            .read()
            .await
            .get(&uri)
            .map(|r| Arc::clone(&r.handler))
            .ok_or_else(|| unknown_resource(&uri))?;

        match AssertUnwindSafe(handler(uri.clone())).catch_unwind().await {
            Ok(Ok(contents)) => to_result(&ReadResourceResponse { contents }),
            Ok(Err(e)) => {
                tracing::error!(target: "mcp_engine::mcp::server", uri = %uri, "resource read failed: {:#}", e);
                Err(JsonRpcError::new(
                    codes::RESOURCE_ACCESS_ERROR,
                    format!("Resource access failed: {}", e),
                ))
            }
            Err(_) => {
                tracing::error!(target: "mcp_engine::mcp::server", uri = %uri, "resource handler panicked");
                Err(JsonRpcError::new(
                    codes::RESOURCE_ACCESS_ERROR,
                    "Resource access failed: handler panicked",
                ))
            }
        }
    }

    async fn on_subscribe(&self, params: Option<Value>, subscribe: bool) -> DispatchResult {
        let ResourceUriParams { uri } = parse_params(params)?;
        if !self.inner.resources.read().await.contains_key(&uri) {
            return Err(unknown_resource(&uri));
        }
        let mut subscriptions = self.inner.subscriptions.write().await;
        if subscribe {
            subscriptions.insert(uri);
        } else {
            subscriptions.remove(&uri);
        }
        Ok(json!({}))
    }

    async fn on_get_prompt(&self, params: Option<Value>) -> DispatchResult {
        let GetPromptParams { name, arguments } = parse_params(params)?;
        let (prompt, handler) = self
            .inner
            .prompts
            .read()
            .await
            .get(&name)
            .map(|r| (r.descriptor.clone(), Arc::clone(&r.handler)))
            .ok_or_else(|| {
                JsonRpcError::new(codes::UNKNOWN_RESOURCE, format!("Unknown prompt: {}", name))
            })?;

        let arguments = arguments.unwrap_or_default();
        if let Some(missing) = prompt
            .arguments
            .iter()
            .find(|a| a.required && !arguments.contains_key(&a.name))
        {
            return Err(JsonRpcError::invalid_params(format!(
                "Missing required argument: {}",
                missing.name
            )));
        }

        match AssertUnwindSafe(handler(arguments)).catch_unwind().await {
            Ok(Ok(response)) => to_result(&response),
            Ok(Err(e)) => {
                tracing::error!(target: "mcp_engine::mcp::server", prompt = %name, "prompt failed: {:#}", e);
                Err(JsonRpcError::internal_error(format!(
                    "Prompt generation failed: {}",
                    e
                )))
            }
            Err(_) => {
                tracing::error!(target: "mcp_engine::mcp::server", prompt = %name, "prompt handler panicked");
                Err(JsonRpcError::internal_error(
                    "Prompt generation failed: handler panicked",
                ))
            }
        }
    }
}

fn unknown_resource(uri: &str) -> JsonRpcError {
    JsonRpcError::new(codes::UNKNOWN_RESOURCE, format!("Unknown resource: {}", uri))
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))
}

fn to_result<T: Serialize>(value: &T) -> DispatchResult {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

#[async_trait::async_trait]
impl MessageHandler for McpServer {
    async fn handle_message(&self, raw: String) {
        tracing::debug!(target: "mcp_engine::mcp::server", "<- {}", raw);
        match Message::decode(&raw) {
            Ok(Message::Request(request)) => {
                let server = self.clone();
                tokio::spawn(async move {
                    let response = server.handle_request(request).await;
                    server.send(response);
                });
            }
            Ok(Message::Notification(notification)) => self.handle_notification(notification).await,
            Ok(Message::Response(response)) => {
                tracing::debug!(
                    target: "mcp_engine::mcp::server",
                    id = ?response.id,
                    "server issued no requests; ignoring response"
                );
            }
            Err(e) => {
                tracing::warn!(target: "mcp_engine::mcp::server", "rejecting inbound message: {}", e);
                self.send(e.to_response());
            }
        }
    }

    async fn on_connect(&self) {
        self.start().await;
    }

    async fn on_disconnect(&self) {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == ConnectionState::Disconnected {
                false
            } else {
                *state = ConnectionState::Disconnected;
                true
            }
        });
        if changed {
            self.inner.initialize_answered.store(false, Ordering::SeqCst);
            self.inner.subscriptions.write().await.clear();
            tracing::info!(target: "mcp_engine::mcp::server", "peer disconnected");
        }
    }
}

impl Dispatcher for McpServer {
    fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.inner.outbound_rx.lock().ok()?.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn server() -> McpServer {
        McpServer::new(Implementation::new("test-server", "0.1.0"))
    }

    fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(method, Some(params), Some(RequestId::Number(id)))
    }

    fn error_of(response: JsonRpcResponse) -> JsonRpcError {
        response.into_result().expect_err("expected an error response")
    }

    /// Drive the server through the handshake without a transport.
    async fn initialized(server: &McpServer) {
        server.start().await;
        let resp = server
            .handle_request(request(
                1,
                METHOD_INITIALIZE,
                json!({
                    "protocolVersion": LATEST_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "t", "version": "1"}
                }),
            ))
            .await;
        assert!(!resp.is_error());
        server
            .handle_notification(JsonRpcNotification::new(METHOD_INITIALIZED, None))
            .await;
        assert_eq!(server.state(), ConnectionState::Initialized);
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            out.push(serde_json::from_str(&raw).unwrap());
        }
        out
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_initialize_echoes_supported_version() {
        let server = server();
        server.start().await;
        let resp = server
            .handle_request(request(
                1,
                METHOD_INITIALIZE,
                json!({
                    "protocolVersion": PROTOCOL_VERSION_2025_03_26,
                    "clientInfo": {"name": "t", "version": "1"}
                }),
            ))
            .await;
        let result = resp.into_result().unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION_2025_03_26);
        assert_eq!(result["serverInfo"]["name"], "test-server");
        assert_eq!(result["capabilities"]["resources"]["subscribe"], true);
    }

    #[tokio::test]
    async fn test_initialize_offers_latest_for_unknown_version() {
        let server = server();
        let resp = server
            .handle_request(request(
                1,
                METHOD_INITIALIZE,
                json!({
                    "protocolVersion": "1999-01-01",
                    "clientInfo": {"name": "t", "version": "1"}
                }),
            ))
            .await;
        assert_eq!(
            resp.into_result().unwrap()["protocolVersion"],
            LATEST_PROTOCOL_VERSION
        );
    }

    /// `initialized` without a preceding `initialize` leaves the state alone.
    #[tokio::test]
    async fn test_initialized_requires_initialize() {
        let server = server();
        server.start().await;
        server
            .handle_notification(JsonRpcNotification::new(METHOD_INITIALIZED_ALIAS, None))
            .await;
        assert_eq!(server.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_stop_closes_and_disconnect_does_not_reopen() {
        let server = server();
        initialized(&server).await;
        server.stop().await;
        assert_eq!(server.state(), ConnectionState::Closed);
        server.on_disconnect().await;
        assert_eq!(server.state(), ConnectionState::Closed);
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_unknown_method_is_method_not_found() {
        let resp = server().handle_request(request(4, "tools/destroy", json!({}))).await;
        assert_eq!(resp.id, Some(RequestId::Number(4)));
        let err = error_of(resp);
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
        assert!(err.message.contains("tools/destroy"));
    }

    #[tokio::test]
    async fn test_call_tool_wraps_string_and_structured_results() {
        let server = server();
        server
            .register_tool(Tool::new("say", "", json!({})), |_| async { Ok(json!("plain")) })
            .await;
        server
            .register_tool(Tool::new("obj", "", json!({})), |args| async move {
                Ok(json!({ "got": args }))
            })
            .await;

        let plain = server
            .handle_request(request(1, METHOD_TOOLS_CALL, json!({"name": "say"})))
            .await
            .into_result()
            .unwrap();
        assert_eq!(plain, json!({"content": [{"type": "text", "text": "plain"}]}));

        let structured = server
            .handle_request(request(2, METHOD_TOOLS_CALL, json!({"name": "obj"})))
            .await
            .into_result()
            .unwrap();
        let text = structured["content"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed, json!({"got": {}}));
    }

    #[tokio::test]
    async fn test_call_tool_errors() {
        let server = server();
        server
            .register_tool(Tool::new("fail", "", json!({})), |_| async {
                Err(anyhow::anyhow!("disk on fire"))
            })
            .await;

        let unknown = error_of(
            server
                .handle_request(request(1, METHOD_TOOLS_CALL, json!({"name": "ghost"})))
                .await,
        );
        assert_eq!(unknown.code, codes::UNKNOWN_TOOL);
        assert_eq!(unknown.message, "Unknown tool: ghost");

        let failed = error_of(
            server
                .handle_request(request(2, METHOD_TOOLS_CALL, json!({"name": "fail"})))
                .await,
        );
        assert_eq!(failed.code, codes::TOOL_EXECUTION_ERROR);
        assert!(failed.message.contains("disk on fire"));

        let missing_name = error_of(server.handle_request(request(3, METHOD_TOOLS_CALL, json!({}))).await);
        assert_eq!(missing_name.code, codes::INVALID_PARAMS);
    }

    /// A panicking tool becomes an error response instead of a lost request.
    #[tokio::test]
    async fn test_call_tool_survives_panicking_handler() {
        let server = server();
        server
            .register_tool(Tool::new("boom", "", json!({})), |_| async {
                if true {
                    panic!("boom");
                }
                Ok(Value::Null)
            })
            .await;
        let err = error_of(
            server
                .handle_request(request(1, METHOD_TOOLS_CALL, json!({"name": "boom"})))
                .await,
        );
        assert_eq!(err.code, codes::TOOL_EXECUTION_ERROR);
    }

    #[tokio::test]
    async fn test_read_resource_survives_panicking_handler() {
        let server = server();
        server
            .register_resource(Resource::new("test://boom", "boom", "", "text/plain"), |_| async {
                if true {
                    panic!("boom");
                }
                Ok(vec![])
            })
            .await;
        let err = error_of(
            server
                .handle_request(request(1, METHOD_RESOURCES_READ, json!({"uri": "test://boom"})))
                .await,
        );
        assert_eq!(err.code, codes::RESOURCE_ACCESS_ERROR);
        assert_eq!(err.message, "Resource access failed: handler panicked");
    }

    #[tokio::test]
    async fn test_get_prompt_survives_panicking_handler() {
        let server = server();
        server
            .register_prompt(Prompt::new("boom", "", vec![]), |_| async {
                if true {
                    panic!("boom");
                }
                Ok(GetPromptResponse {
                    description: None,
                    messages: vec![],
                })
            })
            .await;
        let err = error_of(
            server
                .handle_request(request(1, METHOD_PROMPTS_GET, json!({"name": "boom"})))
                .await,
        );
        assert_eq!(err.code, codes::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_register_tool_replaces_by_name() {
        let server = server();
        server
            .register_tool(Tool::new("t", "first", json!({})), |_| async { Ok(json!("1")) })
            .await;
        server
            .register_tool(Tool::new("t", "second", json!({})), |_| async { Ok(json!("2")) })
            .await;

        let tools = server.tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description.as_deref(), Some("second"));
        let result = server
            .handle_request(request(1, METHOD_TOOLS_CALL, json!({"name": "t"})))
            .await
            .into_result()
            .unwrap();
        assert_eq!(result["content"][0]["text"], "2");
    }

    #[tokio::test]
    async fn test_read_resource_paths() {
        let server = server();
        server
            .register_resource(
                Resource::new("test://data", "data", "", "application/json"),
                |uri| async move { Ok(vec![ResourceContents::text(uri, "application/json", "{\"a\":1}")]) },
            )
            .await;
        server
            .register_resource(Resource::new("test://broken", "broken", "", "text/plain"), |_| async {
                Err(anyhow::anyhow!("permission denied"))
            })
            .await;

        let ok = server
            .handle_request(request(1, METHOD_RESOURCES_READ, json!({"uri": "test://data"})))
            .await
            .into_result()
            .unwrap();
        assert_eq!(ok["contents"][0]["uri"], "test://data");
        assert_eq!(ok["contents"][0]["mimeType"], "application/json");

        let unknown = error_of(
            server
                .handle_request(request(2, METHOD_RESOURCES_READ, json!({"uri": "test://nope"})))
                .await,
        );
        assert_eq!(unknown.code, codes::UNKNOWN_RESOURCE);

        let broken = error_of(
            server
                .handle_request(request(3, METHOD_RESOURCES_READ, json!({"uri": "test://broken"})))
                .await,
        );
        assert_eq!(broken.code, codes::RESOURCE_ACCESS_ERROR);
        assert!(broken.message.contains("permission denied"));
    }

    #[tokio::test]
    async fn test_get_prompt_paths() {
        let server = server();
        server
            .register_prompt(
                Prompt::new(
                    "greet",
                    "Greets",
                    vec![PromptArgument::new("who", "Name", true)],
                ),
                |args| async move {
                    let who = args.get("who").and_then(Value::as_str).unwrap_or_default().to_string();
                    Ok(GetPromptResponse {
                        description: Some("greeting".to_string()),
                        messages: vec![PromptMessage::text(Role::User, format!("Hello {}", who))],
                    })
                },
            )
            .await;

        let ok = server
            .handle_request(request(
                1,
                METHOD_PROMPTS_GET,
                json!({"name": "greet", "arguments": {"who": "Ada"}}),
            ))
            .await
            .into_result()
            .unwrap();
        assert_eq!(ok["messages"][0]["content"]["text"], "Hello Ada");

        let missing = error_of(
            server
                .handle_request(request(2, METHOD_PROMPTS_GET, json!({"name": "greet"})))
                .await,
        );
        assert_eq!(missing.code, codes::INVALID_PARAMS);

        let unknown = error_of(
            server
                .handle_request(request(3, METHOD_PROMPTS_GET, json!({"name": "nope"})))
                .await,
        );
        assert_eq!(unknown.code, codes::UNKNOWN_RESOURCE);
        assert_eq!(unknown.message, "Unknown prompt: nope");
    }

    #[tokio::test]
    async fn test_set_level_request_validates_level() {
        let server = server();
        let ok = server
            .handle_request(request(1, METHOD_LOGGING_SET_LEVEL, json!({"level": "error"})))
            .await;
        assert!(!ok.is_error());
        let bad = error_of(
            server
                .handle_request(request(2, METHOD_LOGGING_SET_LEVEL, json!({"level": "loud"})))
                .await,
        );
        assert_eq!(bad.code, codes::INVALID_PARAMS);
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_list_changed_only_after_handshake() {
        let server = server();
        let mut rx = server.take_outbound().unwrap();

        server
            .register_tool(Tool::new("early", "", json!({})), |_| async { Ok(Value::Null) })
            .await;
        assert!(drain(&mut rx).is_empty());

        initialized(&server).await;
        drain(&mut rx);

        server
            .register_prompt(Prompt::new("late", "", vec![]), |_| async {
                Ok(GetPromptResponse {
                    description: None,
                    messages: vec![],
                })
            })
            .await;
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["method"], NOTIF_PROMPTS_LIST_CHANGED);
        assert!(sent[0].get("id").is_none());
    }

    #[tokio::test]
    async fn test_resource_updated_only_for_subscribers() {
        let server = server();
        let mut rx = server.take_outbound().unwrap();
        server
            .register_resource(Resource::new("test://a", "a", "", "text/plain"), |uri| async move {
                Ok(vec![ResourceContents::text(uri, "text/plain", "a")])
            })
            .await;
        initialized(&server).await;
        drain(&mut rx);

        server.notify_resource_updated("test://a").await;
        assert!(drain(&mut rx).is_empty());

        let resp = server
            .handle_request(request(5, METHOD_RESOURCES_SUBSCRIBE, json!({"uri": "test://a"})))
            .await;
        assert!(!resp.is_error());
        server.notify_resource_updated("test://a").await;
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["params"]["uri"], "test://a");

        server
            .handle_request(request(6, METHOD_RESOURCES_UNSUBSCRIBE, json!({"uri": "test://a"})))
            .await;
        server.notify_resource_updated("test://a").await;
        assert!(drain(&mut rx).is_empty());
    }

    #[derive(Default)]
    struct CapturingSink(StdMutex<Vec<LogEntry>>);

    impl LogSink for CapturingSink {
        fn record(&self, _logger: &str, entry: &LogEntry) {
            self.0.lock().unwrap().push(entry.clone());
        }
    }

    #[tokio::test]
    async fn test_log_goes_to_sink_and_respects_peer_level() {
        let sink = Arc::new(CapturingSink::default());
        let server = McpServer::with_log_sink(Implementation::new("logger", "1"), sink.clone());
        let mut rx = server.take_outbound().unwrap();
        initialized(&server).await;
        drain(&mut rx);

        server
            .handle_notification(JsonRpcNotification::new(
                METHOD_LOGGING_SET_LEVEL,
                Some(json!({"level": "warning"})),
            ))
            .await;

        server.log(LoggingLevel::Info, "quiet", None).await;
        server
            .log(LoggingLevel::Error, "loud", Some(json!({"k": 1})))
            .await;

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["method"], NOTIF_MESSAGE);
        assert_eq!(sent[0]["params"]["level"], "error");
        assert_eq!(sent[0]["params"]["logger"], "logger");
        assert_eq!(sent[0]["params"]["data"]["message"], "loud");
        assert_eq!(sent[0]["params"]["data"]["data"]["k"], 1);
        assert!(sent[0]["params"]["data"]["timestamp"].is_string());

        let recorded: Vec<String> = sink.0.lock().unwrap().iter().map(|e| e.message.clone()).collect();
        assert!(recorded.contains(&"Server started".to_string()));
        assert!(recorded.contains(&"quiet".to_string()));
        assert!(recorded.contains(&"loud".to_string()));
    }

    #[tokio::test]
    async fn test_malformed_message_gets_null_id_parse_error() {
        let server = server();
        let mut rx = server.take_outbound().unwrap();
        server.handle_message("{oops".to_string()).await;
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert!(sent[0]["id"].is_null());
        assert_eq!(sent[0]["error"]["code"], codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_notification_produces_no_response() {
        let server = server();
        let mut rx = server.take_outbound().unwrap();
        server
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/whatever"}"#.to_string())
            .await;
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_outbound_can_only_be_taken_once() {
        let server = server();
        assert!(server.take_outbound().is_some());
        assert!(server.take_outbound().is_none());
    }
}
