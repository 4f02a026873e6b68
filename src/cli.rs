//! Command-line interface definition for the MCP engine
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to serve the demo server and to drive a remote one.

use clap::{Parser, Subcommand};

/// mcp-engine - bidirectional Model Context Protocol engine
///
/// Serve tools, resources, and prompts over stdio or WebSocket, or
/// connect to a running server and invoke them.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-engine")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the demo server
    Serve {
        /// Transport to serve on (stdio, websocket)
        #[arg(short, long)]
        transport: Option<String>,

        /// Listen address for the websocket transport
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Invoke a tool, resource, or prompt on a websocket server
    ///
    /// The command text follows the command parser rules, for example
    /// `calculator 2+3*4`, `echo text="hello world"`, or
    /// `resource:system://info`.
    Call {
        /// Server URL (ws://host:port/)
        #[arg(short, long)]
        url: Option<String>,

        /// Kind hint when the text has no `resource:` or `prompt:` prefix
        /// (tool, resource, prompt, or custom)
        #[arg(short, long, default_value = "tool")]
        kind: String,

        /// Command text
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        text: Vec<String>,
    },

    /// List tools, resources, and prompts on a websocket server
    List {
        /// Server URL (ws://host:port/)
        #[arg(short, long)]
        url: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["mcp-engine", "serve"]).unwrap();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
        if let Commands::Serve { transport, bind } = cli.command {
            assert!(transport.is_none());
            assert!(bind.is_none());
        } else {
            panic!("Expected Serve command");
        }
    }

    #[test]
    fn test_cli_parse_serve_websocket() {
        let cli = Cli::try_parse_from([
            "mcp-engine",
            "serve",
            "--transport",
            "websocket",
            "--bind",
            "0.0.0.0:9001",
        ])
        .unwrap();
        if let Commands::Serve { transport, bind } = cli.command {
            assert_eq!(transport.as_deref(), Some("websocket"));
            assert_eq!(bind.as_deref(), Some("0.0.0.0:9001"));
        } else {
            panic!("Expected Serve command");
        }
    }

    #[test]
    fn test_cli_parse_call_joins_text() {
        let cli = Cli::try_parse_from([
            "mcp-engine",
            "call",
            "--url",
            "ws://127.0.0.1:9/",
            "echo",
            "text=hi",
        ])
        .unwrap();
        if let Commands::Call { url, kind, text } = cli.command {
            assert_eq!(url.as_deref(), Some("ws://127.0.0.1:9/"));
            assert_eq!(kind, "tool");
            assert_eq!(text, vec!["echo", "text=hi"]);
        } else {
            panic!("Expected Call command");
        }
    }

    #[test]
    fn test_cli_call_requires_text() {
        assert!(Cli::try_parse_from(["mcp-engine", "call"]).is_err());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["mcp-engine", "-v", "list"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::List { url: None }));
    }
}
