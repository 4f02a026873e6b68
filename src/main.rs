//! mcp-engine - bidirectional Model Context Protocol engine
//!
#![doc = "Main entry point for the mcp-engine binary."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_engine::cli::{Cli, Commands};
use mcp_engine::commands;
use mcp_engine::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Logging options live in the config file, so peek at it before the
    // subscriber exists; load() warnings are emitted on the second pass.
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let json_logs = Config::load(config_path, &cli)
        .map(|c| c.logging.json)
        .unwrap_or(false);
    init_tracing(cli.verbose, json_logs);

    let config = Config::load(config_path, &cli)?;
    config.validate()?;

    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!("Starting server on {} transport", config.transport.kind);
            commands::serve::run_serve(config).await?;
            Ok(())
        }
        Commands::Call { text, kind, .. } => {
            let text = text.join(" ");
            tracing::debug!("Calling: {}", text);
            commands::call::run_call(config, text, kind).await?;
            Ok(())
        }
        Commands::List { .. } => {
            commands::list::run_list(config).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Output goes to stderr so the stdio transport owns stdout.
fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "mcp_engine=debug"
    } else {
        "mcp_engine=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
