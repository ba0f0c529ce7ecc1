use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::app::ports::SearchBackendPort;
use crate::domain::{
    errors::{DomainError, Result},
    models::{ArgsModel, ToolArgs},
    types::{ContentBlock, HttpMethod, VersionRange},
};

/// Executes a validated tool call. Implementations report their own failures
/// as text blocks and never return an error.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: ToolArgs) -> Vec<ContentBlock>;
}

#[derive(Clone)]
pub struct ToolDescriptor {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub input_schema: Value,
    pub args_model: ArgsModel,
    pub handler: Arc<dyn ToolHandler>,
    pub versions: VersionRange,
    pub http_methods: BTreeSet<HttpMethod>,
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("versions", &self.versions)
            .field("http_methods", &self.http_methods)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    /// Schema is derived from the model; display name starts as the id.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        args_model: ArgsModel,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            description: description.into(),
            input_schema: args_model.json_schema(),
            args_model,
            handler,
            versions: VersionRange::default(),
            http_methods: BTreeSet::from([HttpMethod::Get]),
        }
    }

    pub fn with_versions(mut self, versions: VersionRange) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_http_methods(mut self, methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        self.http_methods = methods.into_iter().collect();
        self
    }

    pub fn is_read_only_capable(&self) -> bool {
        self.http_methods.contains(&HttpMethod::Get)
    }

    pub fn listing(&self) -> ToolListing {
        ToolListing {
            name: self.display_name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// What a client sees for one tool in `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolListing {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

// ── ToolRegistry ──────────────────────────────────────────────────────────────

/// Ordered set of tools keyed by id. Listing order is insertion order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tool; an existing tool with the same id is replaced in place.
    pub fn insert(&mut self, tool: ToolDescriptor) {
        match self.tools.iter_mut().find(|t| t.id == tool.id) {
            Some(existing) => *existing = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn extend(&mut self, tools: impl IntoIterator<Item = ToolDescriptor>) {
        for tool in tools {
            self.insert(tool);
        }
    }

    pub fn get(&self, id: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ToolDescriptor> {
        self.tools.iter_mut().find(|t| t.id == id)
    }

    /// Lookup by externally visible name, falling back to the id.
    pub fn find_by_name(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools
            .iter()
            .find(|t| t.display_name == name)
            .or_else(|| self.get(name))
    }

    pub fn retain(&mut self, keep: impl FnMut(&ToolDescriptor) -> bool) {
        self.tools.retain(keep);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ToolDescriptor> {
        self.tools.iter_mut()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl FromIterator<ToolDescriptor> for ToolRegistry {
    fn from_iter<I: IntoIterator<Item = ToolDescriptor>>(iter: I) -> Self {
        let mut registry = Self::new();
        registry.extend(iter);
        registry
    }
}

/// Call-time version gate. Serverless backends are never asked for a version.
pub async fn check_tool_compatibility(
    tool_id: &str,
    versions: &VersionRange,
    backend: &dyn SearchBackendPort,
) -> Result<()> {
    if backend.is_serverless() {
        return Ok(());
    }
    let info = backend.info().await?;
    if versions.contains(&info.version)? {
        return Ok(());
    }
    Err(DomainError::VersionIncompatible {
        tool: tool_id.to_string(),
        current: info.version.to_string(),
        min: versions.min.clone(),
        max: versions.max.clone(),
    })
}
