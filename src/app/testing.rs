//! In-memory backend doubles shared by the unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::app::ports::{
    BackendConnectorPort, ClusterInfo, IndexSummary, RawRequest, SearchBackendPort,
    SearchOptions, ShardRow, SpecSourcePort,
};
use crate::app::registry::ToolHandler;
use crate::domain::{
    errors::{DomainError, Result},
    models::{BaseArgs, ToolArgs},
    types::{ContentBlock, Version},
};

pub(crate) struct NoopHandler;

#[async_trait]
impl ToolHandler for NoopHandler {
    async fn call(&self, _args: ToolArgs) -> Vec<ContentBlock> {
        vec![ContentBlock::text("ok")]
    }
}

#[derive(Default)]
pub(crate) struct MockBackend {
    pub serverless: bool,
    pub version: Option<Version>,
    pub failure: Option<String>,
    pub indices: Vec<IndexSummary>,
    pub mapping: Value,
    pub search_response: Value,
    pub shards: Vec<ShardRow>,
    pub raw_response: Value,
    pub info_calls: Mutex<usize>,
    pub searches: Mutex<Vec<(String, Value, SearchOptions)>>,
    pub raw_requests: Mutex<Vec<RawRequest>>,
}

impl MockBackend {
    pub fn versioned(version: Version) -> Self {
        Self {
            version: Some(version),
            ..Self::default()
        }
    }

    pub fn serverless() -> Self {
        Self {
            serverless: true,
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            version: Some(Version::new(2, 19, 0)),
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn info_calls(&self) -> usize {
        *self.info_calls.lock().unwrap()
    }

    pub fn searches(&self) -> Vec<(String, Value, SearchOptions)> {
        self.searches.lock().unwrap().clone()
    }

    pub fn raw_requests(&self) -> Vec<RawRequest> {
        self.raw_requests.lock().unwrap().clone()
    }

    fn fail_if_configured(&self) -> Result<()> {
        match &self.failure {
            Some(message) => Err(DomainError::Backend(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SearchBackendPort for MockBackend {
    fn is_serverless(&self) -> bool {
        self.serverless
    }

    async fn info(&self) -> Result<ClusterInfo> {
        *self.info_calls.lock().unwrap() += 1;
        let version = self
            .version
            .ok_or_else(|| DomainError::Backend("no version configured".into()))?;
        Ok(ClusterInfo {
            version,
            distribution: Some("opensearch".into()),
        })
    }

    async fn cat_indices(&self) -> Result<Vec<IndexSummary>> {
        self.fail_if_configured()?;
        Ok(self.indices.clone())
    }

    async fn get_mapping(&self, _index: &str) -> Result<Value> {
        self.fail_if_configured()?;
        Ok(self.mapping.clone())
    }

    async fn search(&self, index: &str, body: &Value, options: &SearchOptions) -> Result<Value> {
        self.searches
            .lock()
            .unwrap()
            .push((index.to_string(), body.clone(), *options));
        self.fail_if_configured()?;
        Ok(self.search_response.clone())
    }

    async fn cat_shards(&self, _index: &str) -> Result<Vec<ShardRow>> {
        self.fail_if_configured()?;
        Ok(self.shards.clone())
    }

    async fn raw_request(&self, request: RawRequest) -> Result<Value> {
        self.raw_requests.lock().unwrap().push(request);
        self.fail_if_configured()?;
        Ok(self.raw_response.clone())
    }
}

pub(crate) struct MockConnector {
    pub backend: Arc<MockBackend>,
    pub failure: Option<String>,
    pub connects: Mutex<Vec<BaseArgs>>,
}

impl MockConnector {
    pub fn new(backend: MockBackend) -> Self {
        Self {
            backend: Arc::new(backend),
            failure: None,
            connects: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new(MockBackend::default())
        }
    }
}

#[async_trait]
impl BackendConnectorPort for MockConnector {
    async fn connect(&self, base: &BaseArgs) -> Result<Arc<dyn SearchBackendPort>> {
        self.connects.lock().unwrap().push(base.clone());
        if let Some(message) = &self.failure {
            return Err(DomainError::Backend(message.clone()));
        }
        Ok(self.backend.clone())
    }
}

/// Serves documents from memory; unknown names fail like a 404 would.
pub(crate) struct StaticSpecSource {
    pub documents: Vec<(String, String)>,
}

#[async_trait]
impl SpecSourcePort for StaticSpecSource {
    async fn fetch_spec(&self, file_name: &str) -> Result<String> {
        self.documents
            .iter()
            .find(|(name, _)| name == file_name)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| DomainError::SpecFetch(format!("404 Not Found for {}", file_name)))
    }
}
