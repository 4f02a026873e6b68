//! Bidirectional MCP (Model Context Protocol) engine
//!
//! Both protocol roles share one message model and one transport
//! abstraction. The protocol revision spoken by default is **2024-11-05**,
//! with **2025-03-26** accepted during the handshake.
//!
//! # Module Layout
//!
//! - `types`     -- JSON-RPC 2.0 envelopes and MCP payload types
//! - `transport` -- `Transport` trait, in-memory, stdio and WebSocket
//!   transports, and the `Connector` that binds an engine to one
//! - `server`    -- Server engine: registries, dispatch, notifications
//! - `client`    -- Client engine: request correlation, handshake, events
//! - `command`   -- Free-text command parsing and suggestions
//! - `demo`      -- Sample tools, resources and prompts
//! - `serve`     -- Hosting a server on stdio or a WebSocket listener

pub mod client;
pub mod command;
pub mod demo;
pub mod serve;
pub mod server;
pub mod transport;
pub mod types;

pub use client::{ClientEvent, ClientOptions, McpClient};
pub use command::{generate_suggestions, parse_command, CommandKind, ParsedCommand, Suggestion};
pub use server::{LogEntry, LogSink, McpServer, TracingLogSink};
pub use transport::{Connector, Dispatcher, MessageHandler, PairedConnector, Transport};
pub use types::*;
