use std::sync::Arc;

use clap::Parser;

use mcp_opensearch::adapters::clusters_yaml::YamlClusterDirectory;
use mcp_opensearch::adapters::mcp::{serve_http, serve_stdio, McpHandler};
use mcp_opensearch::adapters::opensearch_http::{connection_from_env, OpenSearchConnector};
use mcp_opensearch::adapters::spec_http::HttpSpecSource;
use mcp_opensearch::app::ports::ClusterDirectoryPort;
use mcp_opensearch::app::startup::{build_dispatcher, StartupOptions};
use mcp_opensearch::app::tool_filter::EnvPolicyInputs;
use mcp_opensearch::cli::{split_tool_overrides, Cli, Transport};
use mcp_opensearch::domain::types::ServerMode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = if std::env::var("OPENSEARCH_MCP_LOG").is_ok() {
        tracing_subscriber::EnvFilter::from_env("OPENSEARCH_MCP_LOG")
    } else {
        tracing_subscriber::EnvFilter::new("mcp_opensearch=info")
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr) // log to stderr so stdout stays clean for MCP
        .with_env_filter(env_filter)
        .init();

    let split = split_tool_overrides(std::env::args());
    let cli = Cli::parse_from(split.rest);
    let mode = ServerMode::from(cli.mode);

    let mut default_connection = connection_from_env();
    if !cli.profile.trim().is_empty() {
        default_connection.profile = Some(cli.profile.trim().to_string());
    }

    let directory: Option<Arc<dyn ClusterDirectoryPort>> = match (&cli.config, mode) {
        (Some(path), ServerMode::Multi) => match YamlClusterDirectory::load(path) {
            Ok(directory) => Some(Arc::new(directory)),
            Err(e) => {
                tracing::error!("failed to load clusters from {}: {}", path.display(), e);
                None
            }
        },
        _ => None,
    };

    let spec_source =
        HttpSpecSource::published(default_connection.verify_ssl).map_err(anyhow::Error::new)?;
    let connector = Arc::new(OpenSearchConnector::new(default_connection, directory));

    let options = StartupOptions {
        mode,
        config_file: cli.config.clone(),
        env_policy: EnvPolicyInputs::from_env(),
        cli_overrides: split.overrides,
    };
    let dispatcher = build_dispatcher(connector, &spec_source, &options).await;
    tracing::info!("enabled tools: {:?}", dispatcher.registry().ids());
    let handler = McpHandler::new(Arc::new(dispatcher));

    match cli.transport {
        Transport::Stdio => serve_stdio(handler).await?,
        Transport::Stream | Transport::Sse => serve_http(handler, &cli.host, cli.port).await?,
    }

    Ok(())
}
