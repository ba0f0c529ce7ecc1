use regex::RegexBuilder;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crate::app::ports::{BackendConnectorPort, SearchBackendPort};
use crate::app::registry::ToolRegistry;
use crate::domain::{
    errors::{DomainError, Result},
    models::{BaseArgs, FilterPolicy},
    types::{ClusterCompat, ServerMode},
};

pub const ENV_DISABLED_TOOLS: &str = "OPENSEARCH_DISABLED_TOOLS";
pub const ENV_TOOL_CATEGORIES: &str = "OPENSEARCH_TOOL_CATEGORIES";
pub const ENV_DISABLED_CATEGORIES: &str = "OPENSEARCH_DISABLED_CATEGORIES";
pub const ENV_DISABLED_TOOLS_REGEX: &str = "OPENSEARCH_DISABLED_TOOLS_REGEX";
pub const ENV_ALLOW_WRITE: &str = "OPENSEARCH_SETTINGS_ALLOW_WRITE";

// ── Policy sources ────────────────────────────────────────────────────────────

/// Raw filter settings as read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvPolicyInputs {
    pub disabled_tools: String,
    pub tool_categories: String,
    pub disabled_categories: String,
    pub disabled_tools_regex: String,
    pub allow_write: Option<String>,
}

impl EnvPolicyInputs {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            disabled_tools: lookup(ENV_DISABLED_TOOLS).unwrap_or_default(),
            tool_categories: lookup(ENV_TOOL_CATEGORIES).unwrap_or_default(),
            disabled_categories: lookup(ENV_DISABLED_CATEGORIES).unwrap_or_default(),
            disabled_tools_regex: lookup(ENV_DISABLED_TOOLS_REGEX).unwrap_or_default(),
            allow_write: lookup(ENV_ALLOW_WRITE),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn is_empty(&self) -> bool {
        self.disabled_tools.trim().is_empty()
            && self.tool_categories.trim().is_empty()
            && self.disabled_categories.trim().is_empty()
            && self.disabled_tools_regex.trim().is_empty()
            && self.allow_write.as_deref().map_or(true, |v| v.trim().is_empty())
    }

    fn to_policy(&self, warnings: &mut Vec<String>) -> FilterPolicy {
        let mut category_to_tools = BTreeMap::new();
        if !self.tool_categories.trim().is_empty() {
            match serde_json::from_str::<BTreeMap<String, Vec<String>>>(&self.tool_categories) {
                Ok(parsed) => category_to_tools = parsed,
                Err(_) => warn(
                    warnings,
                    format!("Invalid JSON in tool_categories: {}", self.tool_categories),
                ),
            }
        }
        FilterPolicy {
            disabled_tools: parse_comma_separated(&self.disabled_tools),
            disabled_categories: parse_comma_separated(&self.disabled_categories),
            disabled_tool_regexes: parse_comma_separated(&self.disabled_tools_regex),
            category_to_tools,
            allow_write: self
                .allow_write
                .as_deref()
                .map_or(true, |v| v.trim().eq_ignore_ascii_case("true")),
        }
    }
}

/// Where the single-mode filter policy comes from. A file, when given, is
/// used exclusively.
#[derive(Debug, Clone, Default)]
pub struct PolicySource {
    pub file: Option<PathBuf>,
    pub env: EnvPolicyInputs,
}

pub fn parse_comma_separated(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    tool_category: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    tool_filters: Option<ToolFiltersSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolFiltersSection {
    #[serde(default)]
    disabled_tools: Option<Vec<String>>,
    #[serde(default)]
    disabled_categories: Option<Vec<String>>,
    #[serde(default)]
    disabled_tools_regex: Option<Vec<String>>,
    #[serde(default)]
    settings: Option<FilterSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct FilterSettings {
    #[serde(default)]
    allow_write: Option<bool>,
}

pub fn load_policy_file(path: &Path) -> Result<FilterPolicy> {
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Err(DomainError::ConfigParse(format!(
            "{} is empty",
            path.display()
        )));
    }
    let file: PolicyFile = serde_yaml::from_str(&text)?;
    let filters = file.tool_filters.unwrap_or_default();
    Ok(FilterPolicy {
        disabled_tools: filters.disabled_tools.unwrap_or_default(),
        disabled_categories: filters.disabled_categories.unwrap_or_default(),
        disabled_tool_regexes: filters.disabled_tools_regex.unwrap_or_default(),
        category_to_tools: file.tool_category.unwrap_or_default(),
        allow_write: filters
            .settings
            .and_then(|s| s.allow_write)
            .unwrap_or(true),
    })
}

/// Resolves the effective policy. An unreadable file counts as absent.
pub fn build_policy(source: &PolicySource) -> (FilterPolicy, Vec<String>) {
    let mut warnings = Vec::new();
    if let Some(path) = &source.file {
        if !source.env.is_empty() {
            warn(
                &mut warnings,
                "Both config file and environment variables are set. Using config file.".into(),
            );
        }
        match load_policy_file(path) {
            Ok(policy) => {
                tracing::info!("Applied tool filter from {}", path.display());
                return (policy, warnings);
            }
            Err(e) => tracing::error!("Error loading filter config {}: {}", path.display(), e),
        }
    }
    let policy = source.env.to_policy(&mut warnings);
    tracing::info!("Applied tool filter from environment variables");
    (policy, warnings)
}

// ── Filtering ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub registry: ToolRegistry,
    pub warnings: Vec<String>,
}

fn warn(warnings: &mut Vec<String>, message: String) {
    tracing::warn!("{}", message);
    warnings.push(message);
}

pub async fn detect_compatibility(backend: &dyn SearchBackendPort) -> Result<ClusterCompat> {
    if backend.is_serverless() {
        return Ok(ClusterCompat::Serverless);
    }
    let info = backend.info().await?;
    Ok(ClusterCompat::Versioned(info.version))
}

fn full_match_regex(pattern: &str, warnings: &mut Vec<String>) -> Option<regex::Regex> {
    match RegexBuilder::new(&format!("^(?:{})$", pattern))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            warn(warnings, format!("Ignoring invalid tool regex '{}': {}", pattern, e));
            None
        }
    }
}

fn validate_tools(
    names: &[String],
    index: &HashSet<String>,
    source_name: &str,
    warnings: &mut Vec<String>,
) -> BTreeSet<String> {
    let mut valid = BTreeSet::new();
    for name in names {
        let lower = name.to_lowercase();
        if index.contains(&lower) {
            valid.insert(lower);
        } else {
            warn(
                warnings,
                format!("Ignoring invalid tool from '{}': '{}'", source_name, name),
            );
        }
    }
    valid
}

/// Applies mode, policy and version gating to a copy of `registry`.
///
/// `compat` is `None` when the cluster version could not be determined; no
/// version gating happens then.
pub fn filter_tools(
    registry: &ToolRegistry,
    mode: ServerMode,
    policy: &FilterPolicy,
    compat: Option<ClusterCompat>,
) -> FilterOutcome {
    let mut warnings = Vec::new();
    let mut filtered = registry.clone();
    if mode == ServerMode::Multi {
        return FilterOutcome {
            registry: filtered,
            warnings,
        };
    }

    // Names validate against the whole registry, write tools included.
    let index: HashSet<String> = registry.ids().into_iter().map(str::to_lowercase).collect();

    if !policy.allow_write {
        filtered.retain(|tool| tool.is_read_only_capable());
    }

    let mut from_categories = Vec::new();
    for category in &policy.disabled_categories {
        match policy.category_to_tools.get(category) {
            Some(tools) => from_categories.extend(tools.iter().cloned()),
            None => warn(
                &mut warnings,
                format!("Category '{}' not found in tool categories", category),
            ),
        }
    }

    let current_ids: Vec<String> = filtered.ids().into_iter().map(str::to_string).collect();
    let mut from_regex = Vec::new();
    for pattern in &policy.disabled_tool_regexes {
        if let Some(re) = full_match_regex(pattern, &mut warnings) {
            from_regex.extend(current_ids.iter().filter(|id| re.is_match(id)).cloned());
        }
    }

    let mut disabled = BTreeSet::new();
    disabled.extend(validate_tools(&policy.disabled_tools, &index, "disabled_tools", &mut warnings));
    disabled.extend(validate_tools(&from_categories, &index, "disabled_categories", &mut warnings));
    disabled.extend(validate_tools(&from_regex, &index, "disabled_tools_regex", &mut warnings));
    filtered.retain(|tool| !disabled.contains(&tool.id.to_lowercase()));

    if let Some(ClusterCompat::Versioned(version)) = compat {
        let mut incompatible = Vec::new();
        filtered.retain(|tool| match tool.versions.contains(&version) {
            Ok(true) => true,
            Ok(false) => false,
            Err(e) => {
                incompatible.push(format!("Dropping tool {} with invalid version bounds: {}", tool.id, e));
                false
            }
        });
        for message in incompatible {
            warn(&mut warnings, message);
        }
    }

    for tool in filtered.iter_mut() {
        strip_base_fields(&mut tool.input_schema);
    }

    FilterOutcome {
        registry: filtered,
        warnings,
    }
}

fn strip_base_fields(schema: &mut serde_json::Value) {
    if let Some(properties) = schema.get_mut("properties").and_then(|p| p.as_object_mut()) {
        for field in BaseArgs::FIELDS {
            properties.remove(field);
        }
    }
    if let Some(required) = schema.get_mut("required").and_then(|r| r.as_array_mut()) {
        required.retain(|name| !BaseArgs::FIELDS.iter().any(|f| name.as_str() == Some(*f)));
    }
}

/// Startup entry point: detects the cluster (single mode only), resolves the
/// policy and filters the registry.
pub async fn get_enabled_tools(
    registry: &ToolRegistry,
    mode: ServerMode,
    source: &PolicySource,
    connector: &dyn BackendConnectorPort,
) -> FilterOutcome {
    if mode == ServerMode::Multi {
        return filter_tools(registry, mode, &FilterPolicy::default(), None);
    }

    let compat = match connector.connect(&BaseArgs::default()).await {
        Ok(backend) => detect_compatibility(backend.as_ref()).await,
        Err(e) => Err(e),
    };
    let compat = match compat {
        Ok(compat) => {
            match compat {
                ClusterCompat::Serverless => tracing::info!("Connected to OpenSearch Serverless"),
                ClusterCompat::Versioned(v) => tracing::info!("Connected OpenSearch version: {}", v),
            }
            Some(compat)
        }
        Err(e) => {
            tracing::warn!("Could not determine OpenSearch version, skipping version filtering: {}", e);
            None
        }
    };

    let (policy, mut warnings) = build_policy(source);
    let outcome = filter_tools(registry, mode, &policy, compat);
    warnings.extend(outcome.warnings);
    tracing::info!("Available tools after filtering: {:?}", outcome.registry.ids());
    FilterOutcome {
        registry: outcome.registry,
        warnings,
    }
}
