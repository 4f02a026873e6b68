//! Error types for the MCP engine
//!
//! This module defines the crate-wide [`McpError`] enum, using `thiserror`
//! for ergonomic error handling, together with the numeric error-code
//! taxonomy shared by both protocol roles.

use thiserror::Error;

use crate::mcp::types::JsonRpcError;

/// Numeric codes carried in JSON-RPC error objects.
///
/// The set is closed for dispatch purposes but callers may still receive
/// arbitrary codes from a remote peer; those surface unchanged through
/// [`McpError::Rpc`].
pub mod codes {
    /// Payload did not decode.
    pub const PARSE_ERROR: i64 = -32700;
    /// Payload decoded but is not a valid JSON-RPC message.
    pub const INVALID_REQUEST: i64 = -32600;
    /// No handler for the requested method.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Required parameter missing or malformed.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Unexpected failure inside the engine.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// `tools/call` named a tool that is not registered.
    pub const UNKNOWN_TOOL: i64 = -32000;
    /// `resources/read` or `prompts/get` named an unregistered entity.
    pub const UNKNOWN_RESOURCE: i64 = -32001;
    /// A tool handler failed.
    pub const TOOL_EXECUTION_ERROR: i64 = -32002;
    /// A resource handler failed.
    pub const RESOURCE_ACCESS_ERROR: i64 = -32003;
    /// The connection closed while a request was pending.
    pub const CONNECTION_CLOSED: i64 = -32004;
    /// No response arrived before the request deadline.
    pub const TIMEOUT: i64 = -32005;
}

/// Main error type for MCP engine operations
#[derive(Error, Debug)]
pub enum McpError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport I/O or framing failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// An operation required a connected engine
    #[error("Not connected")]
    NotConnected,

    /// An operation required a completed handshake
    #[error("Not initialized: call initialize() first")]
    NotInitialized,

    /// `initialize` was called while another handshake was in flight
    #[error("Handshake already in progress")]
    HandshakeInProgress,

    /// The connection closed before a pending request resolved
    #[error("Connection closed")]
    ConnectionClosed,

    /// A request did not receive a response before its deadline
    #[error("Request timed out after {timeout_ms}ms: {method}")]
    Timeout {
        /// Method of the request that timed out
        method: String,
        /// Deadline that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// The pending-request table is at capacity
    #[error("Too many pending requests: limit={limit}")]
    TooManyPending {
        /// The configured bound
        limit: usize,
    },

    /// The remote peer answered with a JSON-RPC error object
    #[error("{0}")]
    Rpc(JsonRpcError),

    /// Handshake returned a protocol version this engine does not speak
    #[error("Unsupported protocol version: expected one of {expected}, got {got}")]
    ProtocolVersion {
        /// Comma-separated list of accepted versions
        expected: String,
        /// The version the peer announced
        got: String,
    },

    /// Command text could not be turned into an invocation
    #[error("Command parse error: {0}")]
    CommandParse(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl McpError {
    /// Returns the wire error code associated with this error, if any.
    ///
    /// Remote errors report the code the peer sent. Local failures with a
    /// transport-level meaning map onto the shared taxonomy in [`codes`].
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_engine::error::{codes, McpError};
    ///
    /// assert_eq!(McpError::ConnectionClosed.code(), Some(codes::CONNECTION_CLOSED));
    /// assert_eq!(McpError::NotInitialized.code(), None);
    /// ```
    pub fn code(&self) -> Option<i64> {
        match self {
            McpError::Rpc(e) => Some(e.code),
            McpError::ConnectionClosed => Some(codes::CONNECTION_CLOSED),
            McpError::Timeout { .. } => Some(codes::TIMEOUT),
            McpError::Serialization(_) => Some(codes::PARSE_ERROR),
            _ => None,
        }
    }
}

impl From<JsonRpcError> for McpError {
    fn from(e: JsonRpcError) -> Self {
        McpError::Rpc(e)
    }
}

/// Result type alias for MCP engine operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Extract the wire error code from an `anyhow::Error`, if it wraps an
/// [`McpError`] that carries one.
pub fn error_code(err: &anyhow::Error) -> Option<i64> {
    err.downcast_ref::<McpError>().and_then(McpError::code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = McpError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_timeout_error_display() {
        let error = McpError::Timeout {
            method: "tools/call".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(error.to_string(), "Request timed out after 250ms: tools/call");
        assert_eq!(error.code(), Some(codes::TIMEOUT));
    }

    #[test]
    fn test_rpc_error_keeps_remote_code() {
        let error = McpError::Rpc(JsonRpcError {
            code: codes::UNKNOWN_TOOL,
            message: "Unknown tool: ghost".to_string(),
            data: None,
        });
        assert_eq!(error.code(), Some(-32000));
        assert_eq!(error.to_string(), "JSON-RPC error -32000: Unknown tool: ghost");
    }

    #[test]
    fn test_precondition_errors_have_no_code() {
        assert_eq!(McpError::NotConnected.code(), None);
        assert_eq!(McpError::NotInitialized.code(), None);
    }

    #[test]
    fn test_error_code_through_anyhow() {
        let err: anyhow::Error = McpError::ConnectionClosed.into();
        assert_eq!(error_code(&err), Some(codes::CONNECTION_CLOSED));

        let plain = anyhow::anyhow!("boom");
        assert_eq!(error_code(&plain), None);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: McpError = io_error.into();
        assert!(matches!(error, McpError::Io(_)));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<McpError>();
        assert_sync::<McpError>();
    }
}
