//! mcp-engine - bidirectional Model Context Protocol engine
//!
//! This library implements both roles of the Model Context Protocol over
//! JSON-RPC 2.0: a server that exposes tools, resources, and prompts, and a
//! client that discovers and invokes them. Either role runs over any
//! [`mcp::Transport`].
//!
//! # Architecture
//!
//! - `mcp`: message model, transports, server and client engines, command
//!   parser
//! - `commands`: handlers behind the binary's subcommands
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli`: command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_engine::mcp::{Implementation, McpClient, McpServer, PairedConnector, Tool};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServer::new(Implementation::new("demo", "1.0.0"));
//!     server
//!         .register_tool(Tool::new("echo", "Echo", json!({"type": "object"})), |args| async move {
//!             Ok(args["text"].clone())
//!         })
//!         .await;
//!
//!     let client = Arc::new(McpClient::new(Implementation::new("demo-client", "1.0.0")));
//!     let link = PairedConnector::connect(Arc::new(server), Arc::clone(&client)).await?;
//!     client.initialize().await?;
//!     let result = client.call_tool("echo", json!({"text": "hi"})).await?;
//!     assert_eq!(result.text(), "hi");
//!     link.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;

// Re-export commonly used types
pub use config::Config;
pub use error::{McpError, Result};
pub use mcp::{McpClient, McpServer};
