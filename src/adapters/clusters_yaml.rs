use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::app::ports::{ClusterDirectoryPort, ConnectionInfo};
use crate::domain::errors::{DomainError, Result};

#[derive(Debug, Default, Deserialize)]
struct ClustersFile {
    #[serde(default)]
    clusters: Option<BTreeMap<String, ClusterEntry>>,
}

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    #[serde(default)]
    opensearch_url: Option<String>,
    #[serde(default)]
    opensearch_username: Option<String>,
    #[serde(default)]
    opensearch_password: Option<String>,
    #[serde(default)]
    is_serverless: Option<bool>,
    #[serde(default)]
    iam_arn: Option<String>,
    #[serde(default)]
    aws_region: Option<String>,
    #[serde(default)]
    profile: Option<String>,
}

/// Named clusters loaded from the `clusters:` section of the config file.
#[derive(Debug, Default, Clone)]
pub struct YamlClusterDirectory {
    clusters: BTreeMap<String, ConnectionInfo>,
}

impl YamlClusterDirectory {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DomainError::NotFound(format!(
                "cluster config file {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw).map_err(|e| {
            DomainError::ConfigParse(format!("invalid YAML in {}: {}", path.display(), e))
        })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: Option<ClustersFile> = serde_yaml::from_str(raw)?;
        let entries = file.and_then(|f| f.clusters).unwrap_or_default();
        tracing::info!("Total clusters found in config file: {}", entries.len());

        let mut clusters = BTreeMap::new();
        let mut errors = Vec::new();
        for (name, entry) in entries {
            let Some(url) = entry.opensearch_url.filter(|u| !u.trim().is_empty()) else {
                errors.push(format!("Missing opensearch_url for cluster: {}", name));
                continue;
            };
            let info = ConnectionInfo {
                url: url.trim().to_string(),
                username: entry.opensearch_username,
                password: entry.opensearch_password,
                is_serverless: entry.is_serverless.unwrap_or(false),
                verify_ssl: true,
                iam_arn: entry.iam_arn,
                aws_region: entry.aws_region,
                profile: entry.profile,
            };
            clusters.insert(name, info);
        }

        if !errors.is_empty() {
            tracing::error!("Loading errors: {:?}", errors);
        }
        tracing::info!("Loaded clusters: {:?}", clusters.keys().collect::<Vec<_>>());
        Ok(Self { clusters })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clusters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

impl ClusterDirectoryPort for YamlClusterDirectory {
    fn resolve_cluster_name(&self, name: &str) -> Option<ConnectionInfo> {
        self.clusters.get(name).cloned()
    }
}
