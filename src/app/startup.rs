use std::path::PathBuf;
use std::sync::Arc;

use crate::app::builtin_tools::builtin_tools;
use crate::app::dispatch::ToolDispatcher;
use crate::app::ports::{BackendConnectorPort, SpecSourcePort};
use crate::app::tool_config::apply_overrides;
use crate::app::tool_filter::{get_enabled_tools, EnvPolicyInputs, PolicySource};
use crate::app::tool_generator::generate_tools;
use crate::domain::types::ServerMode;

/// Everything the startup pipeline needs besides its ports.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    pub mode: ServerMode,
    /// Shared config file: filter policy, `tools:` overrides and clusters.
    pub config_file: Option<PathBuf>,
    pub env_policy: EnvPolicyInputs,
    pub cli_overrides: Vec<(String, String)>,
}

/// Built-ins plus generated tools, filtered, then overridden. Runs once
/// before serving; the result is never mutated afterwards.
pub async fn build_dispatcher(
    connector: Arc<dyn BackendConnectorPort>,
    spec_source: &dyn SpecSourcePort,
    options: &StartupOptions,
) -> ToolDispatcher {
    let mut registry = builtin_tools(connector.clone());
    let generated = generate_tools(spec_source, connector.clone()).await;
    tracing::info!("generated {} tools from the API specification", generated.len());
    registry.extend(generated.iter().cloned());

    let source = PolicySource {
        file: options.config_file.clone(),
        env: options.env_policy.clone(),
    };
    let filtered = get_enabled_tools(&registry, options.mode, &source, connector.as_ref()).await;
    let customized = apply_overrides(
        &filtered.registry,
        options.config_file.as_deref(),
        &options.cli_overrides,
    );
    tracing::info!(
        "serving {} tools in {} mode",
        customized.registry.len(),
        options.mode
    );
    ToolDispatcher::new(customized.registry)
}
