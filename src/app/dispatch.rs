use serde_json::Value;

use crate::app::registry::{ToolListing, ToolRegistry};
use crate::domain::{
    errors::{DomainError, Result},
    types::ContentBlock,
};

/// Read-only view over the final tool set served to clients.
#[derive(Debug, Clone, Default)]
pub struct ToolDispatcher {
    tools: ToolRegistry,
}

impl ToolDispatcher {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn list_tools(&self) -> Vec<ToolListing> {
        self.tools.iter().map(|tool| tool.listing()).collect()
    }

    /// Lookup and validation failures are returned as errors; anything the
    /// handler runs into comes back as text.
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Vec<ContentBlock>> {
        let tool = self
            .tools
            .find_by_name(name)
            .ok_or_else(|| DomainError::UnknownTool(name.to_string()))?;
        let args = tool.args_model.validate(arguments)?;
        tracing::debug!("calling tool {}", tool.id);
        Ok(tool.handler.call(args).await)
    }
}
