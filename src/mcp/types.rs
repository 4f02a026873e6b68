//! MCP protocol types and JSON-RPC 2.0 primitives
//!
//! This module defines the wire model shared by the client and server
//! engines. Raw payloads are decoded exactly once by [`Message::decode`] into
//! a tagged [`Message`] so dispatch code matches on variants instead of
//! probing for optional fields.
//!
//! Struct fields are `camelCase` on the wire via
//! `#[serde(rename_all = "camelCase")]`. All `Option<>` fields omit their key
//! from JSON when `None` via `#[serde(skip_serializing_if = "Option::is_none")]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::codes;

// ---------------------------------------------------------------------------
// Protocol version constants
// ---------------------------------------------------------------------------

/// JSON-RPC envelope version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// The protocol revision this engine speaks by default.
pub const LATEST_PROTOCOL_VERSION: &str = "2024-11-05";

/// Later revision accepted during negotiation.
pub const PROTOCOL_VERSION_2025_03_26: &str = "2025-03-26";

/// All protocol versions accepted during negotiation.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &[LATEST_PROTOCOL_VERSION, PROTOCOL_VERSION_2025_03_26];

// ---------------------------------------------------------------------------
// JSON-RPC method constants
// ---------------------------------------------------------------------------

/// Lifecycle: client sends `initialize` to open a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Lifecycle: client confirms the handshake.
pub const METHOD_INITIALIZED: &str = "initialized";
/// Namespaced spelling of [`METHOD_INITIALIZED`] used by newer clients.
pub const METHOD_INITIALIZED_ALIAS: &str = "notifications/initialized";
/// Liveness check.
pub const METHOD_PING: &str = "ping";
/// List registered tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// List registered resources.
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
/// Read a resource by URI.
pub const METHOD_RESOURCES_READ: &str = "resources/read";
/// Subscribe to update notifications for a resource.
pub const METHOD_RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
/// Cancel a resource subscription.
pub const METHOD_RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
/// List registered prompts.
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
/// Render a prompt.
pub const METHOD_PROMPTS_GET: &str = "prompts/get";
/// Set the minimum level of log notifications the server pushes.
pub const METHOD_LOGGING_SET_LEVEL: &str = "logging/setLevel";

// ---------------------------------------------------------------------------
// Notification method constants
// ---------------------------------------------------------------------------

/// Server log message.
pub const NOTIF_MESSAGE: &str = "notifications/message";
/// Server tool list changed.
pub const NOTIF_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
/// Server resource list changed.
pub const NOTIF_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
/// A subscribed resource was updated.
pub const NOTIF_RESOURCES_UPDATED: &str = "notifications/resources/updated";
/// Server prompt list changed.
pub const NOTIF_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire types
// ---------------------------------------------------------------------------

/// A JSON-RPC request identifier: either a number or a string.
///
/// # Examples
///
/// ```
/// use mcp_engine::mcp::types::RequestId;
///
/// let id: RequestId = serde_json::from_str("7").unwrap();
/// assert_eq!(id, RequestId::Number(7));
/// assert_eq!(RequestId::from("abc").to_string(), "abc");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric identifier.
    Number(i64),
    /// String identifier.
    String(String),
}

impl RequestId {
    /// Generate a collision-resistant identifier (UUID v4).
    pub fn generate() -> Self {
        RequestId::String(uuid::Uuid::new_v4().to_string())
    }

    fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(RequestId::Number),
            serde_json::Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

/// A JSON-RPC 2.0 request object.
///
/// # Examples
///
/// ```
/// use mcp_engine::mcp::types::JsonRpcRequest;
///
/// let req = JsonRpcRequest::new("ping", None, None);
/// assert_eq!(req.jsonrpc, "2.0");
/// assert_eq!(req.method, "ping");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Request correlation identifier.
    pub id: RequestId,
    /// The method name to invoke.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request, generating an id when none is supplied.
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: Option<RequestId>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.unwrap_or_else(RequestId::generate),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (a request with no `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// The notification method name.
    pub method: String,
    /// Optional notification parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Build a notification.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
///
/// Implements `Display` as `"JSON-RPC error {code}: {message}"`.
///
/// # Examples
///
/// ```
/// use mcp_engine::mcp::types::JsonRpcError;
///
/// let e = JsonRpcError::new(-32600, "Invalid Request");
/// assert_eq!(e.to_string(), "JSON-RPC error -32600: Invalid Request");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code as defined by JSON-RPC 2.0 or the MCP extensions.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// Build an error object without `data`.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(codes::PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// The outcome carried by a response: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Successful result value.
    #[serde(rename = "result")]
    Result(serde_json::Value),
    /// Error object.
    #[serde(rename = "error")]
    Error(JsonRpcError),
}

/// A JSON-RPC 2.0 response object.
///
/// The payload enum makes "both result and error" and "neither" impossible
/// to construct. `id` is `None` only for errors answering a payload whose id
/// could not be recovered; it serializes as `null`.
///
/// # Examples
///
/// ```
/// use mcp_engine::mcp::types::{JsonRpcResponse, RequestId};
///
/// let resp = JsonRpcResponse::success(RequestId::Number(1), serde_json::json!({}));
/// let json = serde_json::to_value(&resp).unwrap();
/// assert_eq!(json["id"], 1);
/// assert!(json.get("error").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Mirrors the `id` from the corresponding request.
    pub id: Option<RequestId>,
    /// Result or error.
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    /// Build a successful response.
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            payload: ResponsePayload::Result(result),
        }
    }

    /// Build an error response.
    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    /// Returns `true` when the payload is an error.
    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }

    /// Convert into the standard `Result` shape.
    pub fn into_result(self) -> std::result::Result<serde_json::Value, JsonRpcError> {
        match self.payload {
            ResponsePayload::Result(v) => Ok(v),
            ResponsePayload::Error(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoded envelope
// ---------------------------------------------------------------------------

/// Failure to turn a raw payload into a [`Message`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not valid JSON.
    #[error("Parse error: {0}")]
    Parse(String),
    /// Valid JSON that is not a JSON-RPC 2.0 message.
    #[error("Invalid request: {reason}")]
    InvalidRequest {
        /// The id, when one could be recovered from the payload.
        id: Option<RequestId>,
        /// What was wrong with the shape.
        reason: String,
    },
}

impl DecodeError {
    /// The id to address an error response to, if known.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            DecodeError::Parse(_) => None,
            DecodeError::InvalidRequest { id, .. } => id.clone(),
        }
    }

    /// The error object to send back to the peer.
    pub fn to_error(&self) -> JsonRpcError {
        match self {
            DecodeError::Parse(detail) => {
                JsonRpcError::parse_error("Parse error").with_data(serde_json::json!(detail))
            }
            DecodeError::InvalidRequest { reason, .. } => JsonRpcError::invalid_request(reason.clone()),
        }
    }

    /// Convenience: the full error response for this failure.
    pub fn to_response(&self) -> JsonRpcResponse {
        JsonRpcResponse::failure(self.id(), self.to_error())
    }
}

/// A decoded wire message.
///
/// # Examples
///
/// ```
/// use mcp_engine::mcp::types::Message;
///
/// let msg = Message::decode(r#"{"jsonrpc":"2.0","method":"initialized"}"#).unwrap();
/// assert!(matches!(msg, Message::Notification(_)));
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// A call expecting a response.
    Request(JsonRpcRequest),
    /// A one-way message.
    Notification(JsonRpcNotification),
    /// The answer to an earlier request.
    Response(JsonRpcResponse),
}

impl Message {
    /// Decode a raw payload, classifying it by shape.
    ///
    /// - `method` without `id` is a notification.
    /// - `method` with `id` is a request.
    /// - `result` or `error` with no `method` is a response.
    ///
    /// A `null` id counts as absent.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Parse`] when the payload is not JSON and
    /// [`DecodeError::InvalidRequest`] for any other shape.
    pub fn decode(raw: &str) -> std::result::Result<Self, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| DecodeError::Parse(e.to_string()))?;

        let obj = value.as_object().ok_or_else(|| DecodeError::InvalidRequest {
            id: None,
            reason: "message must be a JSON object".to_string(),
        })?;

        let id = obj.get("id").filter(|v| !v.is_null());
        let parsed_id = id.and_then(RequestId::from_value);
        let invalid = |reason: &str| DecodeError::InvalidRequest {
            id: parsed_id.clone(),
            reason: reason.to_string(),
        };

        if obj.get("jsonrpc").and_then(|v| v.as_str()) != Some(JSONRPC_VERSION) {
            return Err(invalid("jsonrpc must be \"2.0\""));
        }
        if id.is_some() && parsed_id.is_none() {
            return Err(invalid("id must be a string or an integer"));
        }

        let params = obj.get("params").cloned();

        if let Some(method) = obj.get("method") {
            let method = method
                .as_str()
                .ok_or_else(|| invalid("method must be a string"))?
                .to_string();
            return Ok(match parsed_id {
                Some(id) => Message::Request(JsonRpcRequest {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id,
                    method,
                    params,
                }),
                None => Message::Notification(JsonRpcNotification {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    method,
                    params,
                }),
            });
        }

        let payload = match (obj.get("result"), obj.get("error")) {
            (Some(_), Some(_)) => return Err(invalid("response has both result and error")),
            (Some(result), None) => ResponsePayload::Result(result.clone()),
            (None, Some(error)) => ResponsePayload::Error(
                serde_json::from_value::<JsonRpcError>(error.clone()).unwrap_or_else(|_| {
                    JsonRpcError::internal_error(format!("malformed error object: {}", error))
                }),
            ),
            (None, None) => return Err(invalid("message has no method, result, or error")),
        };

        Ok(Message::Response(JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: parsed_id,
            payload,
        }))
    }

    /// Serialize to a single-line JSON string.
    pub fn encode(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<JsonRpcRequest> for Message {
    fn from(r: JsonRpcRequest) -> Self {
        Message::Request(r)
    }
}

impl From<JsonRpcNotification> for Message {
    fn from(n: JsonRpcNotification) -> Self {
        Message::Notification(n)
    }
}

impl From<JsonRpcResponse> for Message {
    fn from(r: JsonRpcResponse) -> Self {
        Message::Response(r)
    }
}

// ---------------------------------------------------------------------------
// Core identity types
// ---------------------------------------------------------------------------

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Short name of the implementation.
    pub name: String,
    /// Version string.
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Capabilities a client advertises during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Experimental capability extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
    /// Filesystem root capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<serde_json::Value>,
    /// LLM sampling capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Value>,
}

/// The set of capabilities a server advertises to a client.
///
/// # Examples
///
/// ```
/// use mcp_engine::mcp::types::ServerCapabilities;
///
/// let mut caps = ServerCapabilities::default();
/// caps.merge(ServerCapabilities {
///     resources: Some(serde_json::json!({ "subscribe": true })),
///     ..Default::default()
/// });
/// assert_eq!(caps.resources.unwrap()["subscribe"], true);
/// assert!(caps.tools.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Experimental capability extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
    /// Server supports `logging/setLevel` and log notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_json::Value>,
    /// Server exposes prompts via `prompts/list` and `prompts/get`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<serde_json::Value>,
    /// Server exposes resources via `resources/list` and `resources/read`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    /// Server exposes tools via `tools/list` and `tools/call`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        let empty = || Some(serde_json::json!({}));
        Self {
            experimental: None,
            logging: empty(),
            prompts: empty(),
            resources: empty(),
            tools: empty(),
        }
    }
}

impl ServerCapabilities {
    /// An empty capability set with nothing advertised.
    pub fn none() -> Self {
        Self {
            experimental: None,
            logging: None,
            prompts: None,
            resources: None,
            tools: None,
        }
    }

    /// Overwrite every field that `other` sets.
    pub fn merge(&mut self, other: ServerCapabilities) {
        if other.experimental.is_some() {
            self.experimental = other.experimental;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
        if other.prompts.is_some() {
            self.prompts = other.prompts;
        }
        if other.resources.is_some() {
            self.resources = other.resources;
        }
        if other.tools.is_some() {
            self.tools = other.tools;
        }
    }
}

/// Names a single server capability for presence checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCapabilityFlag {
    /// `tools/list` and `tools/call`.
    Tools,
    /// `resources/list` and `resources/read`.
    Resources,
    /// Resource update subscriptions (`resources.subscribe == true`).
    ResourceSubscribe,
    /// `prompts/list` and `prompts/get`.
    Prompts,
    /// `logging/setLevel` and log notifications.
    Logging,
    /// Experimental extensions.
    Experimental,
}

impl ServerCapabilities {
    /// Check whether a capability is advertised.
    pub fn has(&self, flag: ServerCapabilityFlag) -> bool {
        match flag {
            ServerCapabilityFlag::Tools => self.tools.is_some(),
            ServerCapabilityFlag::Resources => self.resources.is_some(),
            ServerCapabilityFlag::ResourceSubscribe => self
                .resources
                .as_ref()
                .and_then(|r| r.get("subscribe"))
                .and_then(|s| s.as_bool())
                .unwrap_or(false),
            ServerCapabilityFlag::Prompts => self.prompts.is_some(),
            ServerCapabilityFlag::Logging => self.logging.is_some(),
            ServerCapabilityFlag::Experimental => self.experimental.is_some(),
        }
    }
}

// ---------------------------------------------------------------------------
// Initialize types
// ---------------------------------------------------------------------------

/// Parameters sent by the client in the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// The protocol version the client wishes to use.
    pub protocol_version: String,
    /// Capabilities advertised by this client.
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    /// Information identifying this client implementation.
    pub client_info: Implementation,
}

/// Response returned by the server to an `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// The protocol version the server has selected for this session.
    pub protocol_version: String,
    /// Capabilities advertised by this server.
    pub capabilities: ServerCapabilities,
    /// Information identifying this server implementation.
    pub server_info: Implementation,
    /// Optional human-readable instructions for the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// Tool types
// ---------------------------------------------------------------------------

/// Descriptor of a tool exposed by a server.
///
/// # Examples
///
/// ```
/// use mcp_engine::mcp::types::Tool;
///
/// let tool = Tool::new("echo", "Echo the input", serde_json::json!({ "type": "object" }));
/// let json = serde_json::to_value(&tool).unwrap();
/// assert_eq!(json["inputSchema"]["type"], "object");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique name of the tool within the server.
    pub name: String,
    /// Human-readable description of the tool's purpose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the tool's input parameters.
    pub input_schema: serde_json::Value,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }
}

/// Response to a `tools/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResponse {
    /// All registered tools.
    pub tools: Vec<Tool>,
}

/// Parameters for a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolParams {
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments to pass to the tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

/// Response from a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResponse {
    /// The content items produced by the tool.
    pub content: Vec<ToolResponseContent>,
    /// When `true`, the tool signalled an error condition within its content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResponse {
    /// Concatenate all text items, separated by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolResponseContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A single content item in a tool response.
///
/// Discriminated by the `"type"` field on the wire.
///
/// # Examples
///
/// ```
/// use mcp_engine::mcp::types::ToolResponseContent;
///
/// let c = ToolResponseContent::Text { text: "hello".to_string() };
/// let json = serde_json::to_value(&c).unwrap();
/// assert_eq!(json["type"], "text");
/// assert_eq!(json["text"], "hello");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResponseContent {
    /// Plain text output.
    Text {
        /// The text content.
        text: String,
    },
    /// A base64-encoded image.
    Image {
        /// Base64-encoded image bytes.
        data: String,
        /// MIME type of the image (e.g. `"image/png"`).
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource.
    Resource {
        /// The resource contents.
        resource: ResourceContents,
    },
}

// ---------------------------------------------------------------------------
// Resource types
// ---------------------------------------------------------------------------

/// Text-based resource contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextResourceContents {
    /// Canonical URI that identifies this resource.
    pub uri: String,
    /// MIME type of the text (e.g. `"text/plain"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// The text content of the resource.
    pub text: String,
}

/// Binary (blob) resource contents, base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlobResourceContents {
    /// Canonical URI that identifies this resource.
    pub uri: String,
    /// MIME type of the binary data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64-encoded binary data.
    pub blob: String,
}

/// Either text or binary resource contents.
///
/// Uses `#[serde(untagged)]` so the discriminator is presence of `"text"` vs
/// `"blob"` in the JSON object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResourceContents {
    /// UTF-8 text resource.
    Text(TextResourceContents),
    /// Binary resource (base64-encoded blob).
    Blob(BlobResourceContents),
}

impl ResourceContents {
    /// Text content block.
    pub fn text(
        uri: impl Into<String>,
        mime_type: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        ResourceContents::Text(TextResourceContents {
            uri: uri.into(),
            mime_type: Some(mime_type.into()),
            text: text.into(),
        })
    }

    /// The URI this block belongs to.
    pub fn uri(&self) -> &str {
        match self {
            ResourceContents::Text(t) => &t.uri,
            ResourceContents::Blob(b) => &b.uri,
        }
    }
}

/// Metadata describing a resource exposed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Canonical URI for this resource.
    pub uri: String,
    /// Human-readable resource name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Resource {
    pub fn new(
        uri: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: Some(description.into()),
            mime_type: Some(mime_type.into()),
        }
    }
}

/// Response to a `resources/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResponse {
    /// All registered resources.
    pub resources: Vec<Resource>,
}

/// Parameters for `resources/read`, `resources/subscribe`, and
/// `resources/unsubscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUriParams {
    /// URI of the resource.
    pub uri: String,
}

/// Response to a `resources/read` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResourceResponse {
    /// One or more content objects representing the resource's current state.
    pub contents: Vec<ResourceContents>,
}

// ---------------------------------------------------------------------------
// Prompt types
// ---------------------------------------------------------------------------

/// Conversation participant role.
///
/// # Examples
///
/// ```
/// use mcp_engine::mcp::types::Role;
///
/// let r: Role = serde_json::from_str("\"user\"").unwrap();
/// assert_eq!(r, Role::User);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A message from the human user.
    User,
    /// A message from the AI assistant.
    Assistant,
}

/// Content within a prompt message, discriminated by `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    /// Plain text.
    Text {
        /// The text body.
        text: String,
    },
    /// An embedded resource.
    Resource {
        /// The embedded resource contents.
        resource: ResourceContents,
    },
}

/// A single message in a prompt conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptMessage {
    /// Who authored this message.
    pub role: Role,
    /// The message body.
    pub content: MessageContent,
}

impl PromptMessage {
    /// A plain-text message from `role`.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text { text: text.into() },
        }
    }
}

/// Describes a single argument accepted by a prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptArgument {
    /// Argument name (used as a key when calling `prompts/get`).
    pub name: String,
    /// Human-readable description of what this argument controls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When `true`, this argument must be supplied by the caller.
    #[serde(default)]
    pub required: bool,
}

impl PromptArgument {
    pub fn new(name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            required,
        }
    }
}

/// Metadata describing a prompt template exposed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// Unique name of this prompt.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered argument descriptors for this template.
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

impl Prompt {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        arguments: Vec<PromptArgument>,
    ) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            arguments,
        }
    }
}

/// Response to a `prompts/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResponse {
    /// All registered prompts.
    pub prompts: Vec<Prompt>,
}

/// Parameters for `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPromptParams {
    /// Name of the prompt to retrieve.
    pub name: String,
    /// Template argument values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Response to a `prompts/get` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPromptResponse {
    /// Human-readable description of what this prompt does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The rendered prompt messages.
    pub messages: Vec<PromptMessage>,
}

// ---------------------------------------------------------------------------
// Logging types
// ---------------------------------------------------------------------------

/// Syslog-inspired severity levels for MCP log messages.
///
/// # Examples
///
/// ```
/// use mcp_engine::mcp::types::LoggingLevel;
///
/// let level: LoggingLevel = "warning".parse().unwrap();
/// assert!(level > LoggingLevel::Info);
/// assert_eq!(level.to_string(), "warning");
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    /// Verbose diagnostic information.
    Debug,
    /// General operational information.
    Info,
    /// Normal but significant events.
    Notice,
    /// Potential problems that don't prevent operation.
    Warning,
    /// Error conditions that affect a specific operation.
    Error,
    /// Severe conditions that affect broad functionality.
    Critical,
    /// Immediate action required.
    Alert,
    /// System is unusable.
    Emergency,
}

impl LoggingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoggingLevel::Debug => "debug",
            LoggingLevel::Info => "info",
            LoggingLevel::Notice => "notice",
            LoggingLevel::Warning => "warning",
            LoggingLevel::Error => "error",
            LoggingLevel::Critical => "critical",
            LoggingLevel::Alert => "alert",
            LoggingLevel::Emergency => "emergency",
        }
    }
}

impl fmt::Display for LoggingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoggingLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LoggingLevel::Debug),
            "info" => Ok(LoggingLevel::Info),
            "notice" => Ok(LoggingLevel::Notice),
            "warning" | "warn" => Ok(LoggingLevel::Warning),
            "error" => Ok(LoggingLevel::Error),
            "critical" => Ok(LoggingLevel::Critical),
            "alert" => Ok(LoggingLevel::Alert),
            "emergency" => Ok(LoggingLevel::Emergency),
            other => Err(format!("unknown logging level: {}", other)),
        }
    }
}

/// Parameters for `logging/setLevel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLevelParams {
    /// Minimum level the peer wants to receive.
    pub level: LoggingLevel,
}

/// Parameters of a `notifications/message` log notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingMessageParams {
    /// Severity of the entry.
    pub level: LoggingLevel,
    /// Name of the emitting logger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// Arbitrary structured payload.
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Engine lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a client or server engine.
///
/// The server never passes through `Initializing`; it moves from
/// `Connected` straight to `Initialized` when the peer confirms the
/// handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport is bound or the transport closed.
    Disconnected,
    /// The transport is ready; no handshake yet.
    Connected,
    /// `initialize` sent, response not yet received.
    Initializing,
    /// Handshake complete.
    Initialized,
    /// Stopped for good.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Initialized => "initialized",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
