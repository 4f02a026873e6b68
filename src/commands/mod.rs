/*!
Command handlers for the CLI

- `serve` -- run the demo server on stdio or a WebSocket listener
- `call`  -- parse command text and invoke it on a remote server
- `list`  -- print a remote server's tools, resources, and prompts
*/

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{McpError, Result};
use crate::mcp::client::{ClientOptions, McpClient};
use crate::mcp::command::{parse_command, CommandKind, ParsedCommand};
use crate::mcp::serve::{serve_stdio, serve_websocket, ServerFactory};
use crate::mcp::server::{BoxFuture, McpServer};
use crate::mcp::transport::socket::WebSocketTransport;
use crate::mcp::transport::{Connector, Transport};
use crate::mcp::types::Implementation;

/// Build a server carrying the demo entities.
pub async fn build_demo_server(config: &Config) -> Result<McpServer> {
    let server = McpServer::new(Implementation::new(
        config.server.name.clone(),
        config.server.version.clone(),
    ));
    if let Some(instructions) = &config.server.instructions {
        server.set_instructions(instructions.clone()).await;
    }
    let root = std::env::current_dir()?;
    crate::mcp::demo::register_demo(&server, root).await;
    Ok(server)
}

pub mod serve {
    //! Serve handler.

    use super::*;

    /// Run the demo server on the configured transport until the peer
    /// disconnects (stdio) or ctrl-c (websocket).
    pub async fn run_serve(config: Config) -> Result<()> {
        match config.transport.kind.as_str() {
            "stdio" => {
                tracing::info!("Serving on stdio");
                let server = build_demo_server(&config).await?;
                serve_stdio(server).await
            }
            "websocket" => {
                let listener = TcpListener::bind(&config.transport.bind).await.map_err(|e| {
                    McpError::Transport(format!("failed to bind {}: {}", config.transport.bind, e))
                })?;

                let shared = Arc::new(config);
                let factory: ServerFactory = Arc::new(move || -> BoxFuture<'static, McpServer> {
                    let config = Arc::clone(&shared);
                    Box::pin(async move {
                        match build_demo_server(&config).await {
                            Ok(server) => server,
                            Err(e) => {
                                tracing::error!("demo registration failed: {}", e);
                                McpServer::new(Implementation::new(
                                    config.server.name.clone(),
                                    config.server.version.clone(),
                                ))
                            }
                        }
                    })
                });

                let shutdown = CancellationToken::new();
                let signal = shutdown.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Shutdown requested");
                    }
                    signal.cancel();
                });

                serve_websocket(listener, factory, shutdown).await
            }
            other => Err(McpError::Config(format!("Invalid transport kind: {}", other)).into()),
        }
    }
}

pub mod call {
    //! Call handler.

    use super::*;

    /// Parse `text` and run it against the server at `config.transport.url`.
    pub async fn run_call(config: Config, text: String, kind: String) -> Result<()> {
        let parsed = parse_command(&text, CommandKind::from(kind.as_str()))?;
        tracing::debug!("Parsed command: {:?}", parsed);

        let (client, connector) = connect(&config).await?;
        let outcome = execute(&client, parsed).await;
        connector.disconnect().await?;

        println!("{}", serde_json::to_string_pretty(&outcome?)?);
        Ok(())
    }

    /// Run one parsed command and return its result as JSON.
    pub async fn execute(client: &McpClient, parsed: ParsedCommand) -> Result<Value> {
        match parsed {
            ParsedCommand::Tool { tool, arguments } => {
                Ok(serde_json::to_value(client.call_tool(&tool, arguments).await?)?)
            }
            ParsedCommand::Resource { uri } => {
                Ok(serde_json::to_value(client.read_resource(&uri).await?)?)
            }
            ParsedCommand::Prompt { prompt, arguments } => {
                let arguments = match arguments {
                    Value::Object(map) => map,
                    other => {
                        let mut map = serde_json::Map::new();
                        map.insert("input".to_string(), other);
                        map
                    }
                };
                Ok(serde_json::to_value(client.get_prompt(&prompt, arguments).await?)?)
            }
            ParsedCommand::Custom { raw } => {
                // `<method> [json params]`
                let (method, rest) = match raw.split_once(char::is_whitespace) {
                    Some((method, rest)) => (method, rest.trim()),
                    None => (raw.as_str(), ""),
                };
                let params = if rest.is_empty() {
                    None
                } else {
                    Some(serde_json::from_str(rest).map_err(|e| {
                        McpError::CommandParse(format!("custom params are not JSON: {}", e))
                    })?)
                };
                client.send_request(method, params, None).await
            }
        }
    }
}

pub mod list {
    //! List handler.

    use super::*;

    /// Print the remote server's catalog as pretty JSON.
    pub async fn run_list(config: Config) -> Result<()> {
        let (client, connector) = connect(&config).await?;
        let catalog = async {
            Ok::<_, anyhow::Error>(json!({
                "server": client.server_info(),
                "tools": client.list_tools().await?,
                "resources": client.list_resources().await?,
                "prompts": client.list_prompts().await?,
            }))
        }
        .await;
        connector.disconnect().await?;

        println!("{}", serde_json::to_string_pretty(&catalog?)?);
        Ok(())
    }
}

/// Dial the configured URL and complete the handshake.
async fn connect(config: &Config) -> Result<(Arc<McpClient>, Connector)> {
    let client = Arc::new(McpClient::with_options(
        Implementation::new(config.client.name.clone(), config.client.version.clone()),
        ClientOptions {
            request_timeout: config.client.request_timeout(),
            max_pending: config.client.max_pending_requests,
            ..ClientOptions::default()
        },
    ));

    tracing::info!("Connecting to {}", config.transport.url);
    let transport: Arc<dyn Transport> = Arc::new(WebSocketTransport::new(config.transport.url.clone()));
    let connector = Connector::connect(Arc::clone(&client), transport).await?;

    let session = client.initialize().await?;
    tracing::info!(
        "Connected to {} {} (protocol {})",
        session.server_info.name,
        session.server_info.version,
        session.protocol_version
    );
    Ok((client, connector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::PairedConnector;

    async fn demo_pair() -> (Arc<McpClient>, PairedConnector) {
        let server = build_demo_server(&Config::default()).await.unwrap();
        let client = Arc::new(McpClient::new(Implementation::new("cli-test", "1")));
        let paired = PairedConnector::connect(Arc::new(server), Arc::clone(&client))
            .await
            .unwrap();
        client.initialize().await.unwrap();
        (client, paired)
    }

    #[tokio::test]
    async fn test_execute_tool_command() {
        let (client, paired) = demo_pair().await;
        let parsed = parse_command("calculator 2+3*4", CommandKind::Tool).unwrap();
        let result = call::execute(&client, parsed).await.unwrap();
        assert_eq!(result["content"][0]["text"], "Result: 2+3*4 = 14");
        paired.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_prompt_command() {
        let (client, paired) = demo_pair().await;
        let parsed = parse_command(r#"prompt:problem-solver problem="leaky tap""#, CommandKind::Tool).unwrap();
        let result = call::execute(&client, parsed).await.unwrap();
        let text = result["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains("leaky tap"));
        paired.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_custom_ping() {
        let (client, paired) = demo_pair().await;
        let parsed = parse_command("ping", CommandKind::Custom).unwrap();
        let result = call::execute(&client, parsed).await.unwrap();
        assert_eq!(result, json!({}));
        paired.disconnect().await.unwrap();
    }
}
