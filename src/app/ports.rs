use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::domain::{
    errors::Result,
    models::BaseArgs,
    types::{HttpMethod, Version},
};

// ── Ports ─────────────────────────────────────────────────────────────────────

/// One live connection to an OpenSearch cluster (or serverless collection).
#[async_trait]
pub trait SearchBackendPort: Send + Sync {
    /// Serverless collections skip every version check.
    fn is_serverless(&self) -> bool;
    async fn info(&self) -> Result<ClusterInfo>;
    async fn cat_indices(&self) -> Result<Vec<IndexSummary>>;
    async fn get_mapping(&self, index: &str) -> Result<Value>;
    async fn search(&self, index: &str, body: &Value, options: &SearchOptions) -> Result<Value>;
    async fn cat_shards(&self, index: &str) -> Result<Vec<ShardRow>>;
    async fn raw_request(&self, request: RawRequest) -> Result<Value>;
}

/// Turns per-call base args into a backend handle.
#[async_trait]
pub trait BackendConnectorPort: Send + Sync {
    async fn connect(&self, base: &BaseArgs) -> Result<Arc<dyn SearchBackendPort>>;
}

/// Maps a cluster name to its connection settings.
pub trait ClusterDirectoryPort: Send + Sync {
    fn resolve_cluster_name(&self, name: &str) -> Option<ConnectionInfo>;
}

/// Source of API specification documents used for tool generation.
#[async_trait]
pub trait SpecSourcePort: Send + Sync {
    async fn fetch_spec(&self, file_name: &str) -> Result<String>;
}

// ── Transfer objects ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub version: Version,
    pub distribution: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub index: String,
    #[serde(default)]
    pub health: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "docs.count", default)]
    pub docs_count: Option<String>,
}

/// One row of `_cat/shards?format=json`. Unassigned shards report nulls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRow {
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub shard: Option<String>,
    #[serde(default)]
    pub prirep: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub docs: Option<String>,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

/// Request-level flags sent as `_search` query parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub request_cache: Option<bool>,
    pub allow_partial_search_results: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    /// Newline-delimited JSON, already terminated by `\n`.
    Ndjson(String),
}

/// A request addressed by path segments. Segments are sent percent-encoded,
/// so a `/`, `?` or `#` inside a value never changes the route.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRequest {
    pub method: HttpMethod,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl RawRequest {
    /// Unencoded `/a/b` form, for logs and assertions.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub is_serverless: bool,
    pub verify_ssl: bool,
    pub iam_arn: Option<String>,
    pub aws_region: Option<String>,
    pub profile: Option<String>,
}
