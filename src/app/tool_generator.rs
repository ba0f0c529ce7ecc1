use async_trait::async_trait;
use serde_json::{Map, Value};
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::app::json_text::{spaced, to_ndjson};
use crate::app::ports::{BackendConnectorPort, RawRequest, RequestBody, SpecSourcePort};
use crate::app::registry::{check_tool_compatibility, ToolDescriptor, ToolHandler, ToolRegistry};
use crate::domain::{
    errors::{DomainError, Result},
    models::{
        ArgsModel, Endpoint, OperationGroup, ParamDecl, ParamKind, ParamSpec, ToolArgs,
    },
    types::{ContentBlock, HttpMethod, VersionRange, DEFAULT_MAX_VERSION, DEFAULT_MIN_VERSION},
};

pub const SPEC_BASE_URL: &str = "https://raw.githubusercontent.com/opensearch-project/opensearch-api-specification/refs/heads/main/spec/namespaces";
pub const SPEC_FILES: [&str; 2] = ["cluster.yaml", "_core.yaml"];
pub const SUPPORTED_OPERATIONS: [&str; 4] = ["msearch", "explain", "count", "cluster.health"];

const BODY_FIELD: &str = "body";
const MSEARCH_GROUP: &str = "msearch";
const BODY_REQUIRED_GROUPS: [&str; 2] = ["explain", "msearch"];
const LOCAL_PARAMETER_REF: &str = "#/components/parameters/";

fn body_description(group: &str) -> &'static str {
    match group {
        "msearch" => {
            "Request body as NDJSON format: alternating lines of header and query objects ending \
             with \\n. Alternatively, pass a JSON array [header, query, header, query, ...] and the \
             tool will convert it to NDJSON for you."
        }
        "explain" => "Request body containing the query to explain.",
        _ => "Request body",
    }
}

// ── Naming ────────────────────────────────────────────────────────────────────

/// Capitalizes the first letter of every alphabetic run and lowercases the
/// rest, so `put_mapping` becomes `Put_Mapping`.
fn title_case(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut prev_alpha = false;
    for ch in segment.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

fn group_base_name(group: &str) -> String {
    group.split('.').map(title_case).collect()
}

/// `cluster.health` → `ClusterHealthTool`.
pub fn tool_name_for_group(group: &str) -> String {
    format!("{}Tool", group_base_name(group).replace('_', ""))
}

// ── Specification parsing ─────────────────────────────────────────────────────

fn yaml_scalar(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn yaml_str<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a str> {
    mapping.get(key).and_then(YamlValue::as_str)
}

fn resolve_parameter<'a>(raw: &'a YamlValue, components: Option<&'a Mapping>) -> Option<&'a Mapping> {
    let mapping = raw.as_mapping()?;
    let Some(reference) = yaml_str(mapping, "$ref") else {
        return Some(mapping);
    };
    let Some(name) = reference.strip_prefix(LOCAL_PARAMETER_REF) else {
        tracing::debug!("skipping non-local parameter reference {}", reference);
        return None;
    };
    let resolved = components?.get(name).and_then(YamlValue::as_mapping);
    if resolved.is_none() {
        tracing::debug!("unresolved parameter reference {}", reference);
    }
    resolved
}

fn parameter_decls(details: &Mapping, components: Option<&Mapping>) -> Vec<ParamDecl> {
    let Some(list) = details.get("parameters").and_then(YamlValue::as_sequence) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|raw| resolve_parameter(raw, components))
        .filter_map(|param| {
            let name = yaml_str(param, "name")?.to_string();
            Some(ParamDecl {
                name,
                location: yaml_str(param, "in").map(str::to_string),
                description: yaml_str(param, "description").unwrap_or_default().to_string(),
                required: param
                    .get("required")
                    .and_then(YamlValue::as_bool)
                    .unwrap_or(false),
            })
        })
        .collect()
}

/// Walks `paths → method → operation` and groups allow-listed operations by
/// `x-operation-group`, in document order.
pub fn group_endpoints_by_operation(document: &YamlValue) -> Vec<OperationGroup> {
    let components = document
        .get("components")
        .and_then(|c| c.get("parameters"))
        .and_then(YamlValue::as_mapping);
    let Some(paths) = document.get("paths").and_then(YamlValue::as_mapping) else {
        return Vec::new();
    };

    let mut groups: Vec<OperationGroup> = Vec::new();
    for (path, methods) in paths {
        let (Some(path), Some(methods)) = (path.as_str(), methods.as_mapping()) else {
            continue;
        };
        for (method, details) in methods {
            let (Some(method), Some(details)) = (method.as_str(), details.as_mapping()) else {
                continue;
            };
            let Some(group) = yaml_str(details, "x-operation-group") else {
                continue;
            };
            if !SUPPORTED_OPERATIONS.contains(&group) {
                continue;
            }
            let Ok(method) = method.parse::<HttpMethod>() else {
                tracing::debug!("skipping unsupported method {} on {}", method, path);
                continue;
            };

            let endpoint = Endpoint {
                path: path.to_string(),
                method,
                operation_group: group.to_string(),
                description: yaml_str(details, "description").unwrap_or_default().to_string(),
                parameters: parameter_decls(details, components),
                has_request_body: details.contains_key("requestBody"),
                version_added: details.get("x-version-added").and_then(yaml_scalar),
                version_deprecated: details.get("x-version-deprecated").and_then(yaml_scalar),
            };
            match groups.iter_mut().find(|g| g.name == group) {
                Some(existing) => existing.endpoints.push(endpoint),
                None => groups.push(OperationGroup {
                    name: group.to_string(),
                    endpoints: vec![endpoint],
                }),
            }
        }
    }
    groups
}

pub fn parse_spec_document(text: &str) -> Result<Vec<OperationGroup>> {
    let document: YamlValue = serde_yaml::from_str(text)
        .map_err(|e| DomainError::SpecFetch(format!("invalid YAML: {}", e)))?;
    Ok(group_endpoints_by_operation(&document))
}

// ── Parameters ────────────────────────────────────────────────────────────────

/// Builds the argument model for a group plus the ordered list of every path
/// placeholder seen across its endpoints.
pub fn extract_parameters(group: &OperationGroup) -> (ArgsModel, Vec<String>) {
    let mut model = ArgsModel::new(format!("{}Args", group_base_name(&group.name)));
    let mut path_params: Vec<String> = Vec::new();
    let mut declared_required: BTreeSet<String> = BTreeSet::new();
    let mut has_body = false;

    for endpoint in &group.endpoints {
        for name in endpoint.path_params() {
            if !path_params.iter().any(|p| p == name) {
                path_params.push(name.to_string());
            }
            if model.field(name).is_none() {
                model.push_field(ParamSpec::new(name, ParamKind::String));
            }
        }
        for decl in &endpoint.parameters {
            if model.field(&decl.name).is_some() {
                continue;
            }
            model.push_field(
                ParamSpec::new(&decl.name, ParamKind::String).with_description(&decl.description),
            );
            if decl.required {
                declared_required.insert(decl.name.clone());
            }
        }
        has_body |= endpoint.has_request_body;
    }

    if has_body {
        model.push_field(
            ParamSpec::new(BODY_FIELD, ParamKind::Any)
                .with_description(body_description(&group.name)),
        );
    }

    let in_every_endpoint = |name: &str| {
        group
            .endpoints
            .iter()
            .all(|e| e.path_params().contains(&name))
    };
    for field in model.fields.iter_mut() {
        let is_path = path_params.contains(&field.name);
        if (is_path && in_every_endpoint(field.name.as_str()))
            || declared_required.contains(&field.name)
            || (field.name == BODY_FIELD && BODY_REQUIRED_GROUPS.contains(&group.name.as_str()))
        {
            field.required = true;
        }
    }

    (model, path_params)
}

// ── Call-time helpers ─────────────────────────────────────────────────────────

/// Converts the `body` argument into what the backend expects.
///
/// Multi-search bodies become NDJSON; any other string must hold JSON.
pub fn normalize_body(body: Option<Value>, is_msearch: bool) -> Result<Option<RequestBody>> {
    let Some(body) = body.filter(|b| !b.is_null()) else {
        return Ok(None);
    };
    match body {
        Value::String(text) if is_msearch => {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&text) {
                return Ok(Some(RequestBody::Ndjson(to_ndjson(&items))));
            }
            if text.ends_with('\n') {
                Ok(Some(RequestBody::Ndjson(text)))
            } else {
                Ok(Some(RequestBody::Ndjson(text + "\n")))
            }
        }
        Value::String(text) => {
            if text.trim().is_empty() {
                return Ok(None);
            }
            serde_json::from_str::<Value>(&text)
                .map(|parsed| Some(RequestBody::Json(parsed)))
                .map_err(|_| {
                    let preview: String = text.chars().take(100).collect();
                    DomainError::InvalidData(format!(
                        "Invalid JSON in body parameter: {}...",
                        preview
                    ))
                })
        }
        Value::Array(items) if is_msearch => Ok(Some(RequestBody::Ndjson(to_ndjson(&items)))),
        other => Ok(Some(RequestBody::Json(other))),
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Picks the endpoint whose placeholders are best satisfied by `params`.
///
/// Ties keep declaration order. Falls back to the first endpoint without
/// placeholders, then to the first endpoint.
pub fn select_endpoint<'a>(endpoints: &'a [Endpoint], params: &Map<String, Value>) -> Option<&'a Endpoint> {
    let satisfied = |name: &str| params.get(name).is_some_and(is_present);

    let mut ranked: Vec<&Endpoint> = endpoints.iter().collect();
    ranked.sort_by_key(|e| {
        std::cmp::Reverse(e.path_params().into_iter().filter(|p| satisfied(*p)).count())
    });

    ranked
        .into_iter()
        .find(|e| e.path_params().into_iter().all(satisfied))
        .or_else(|| endpoints.iter().find(|e| !e.path.split('/').any(|s| s.contains('{'))))
        .or_else(|| endpoints.first())
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => spaced(other),
    }
}

// ── Handler ───────────────────────────────────────────────────────────────────

struct GeneratedToolHandler {
    tool_id: String,
    group: OperationGroup,
    path_params: Vec<String>,
    versions: VersionRange,
    connector: Arc<dyn BackendConnectorPort>,
}

#[async_trait]
impl ToolHandler for GeneratedToolHandler {
    async fn call(&self, args: ToolArgs) -> Vec<ContentBlock> {
        let backend = match self.connector.connect(&args.base).await {
            Ok(backend) => backend,
            Err(e) => {
                return vec![ContentBlock::text(format!(
                    "Error initializing OpenSearch client: {}",
                    e
                ))]
            }
        };
        let result: Result<Value> = async {
            check_tool_compatibility(&self.tool_id, &self.versions, backend.as_ref()).await?;
            let request = self.build_request(args.values)?;
            backend.raw_request(request).await
        }
        .await;

        match result {
            Ok(Value::String(text)) => vec![ContentBlock::text(text)],
            Ok(response) => vec![ContentBlock::text(spaced(&response))],
            Err(e) => {
                tracing::debug!("{} failed: {}", self.tool_id, e);
                vec![ContentBlock::text(format!("Error: {}", e))]
            }
        }
    }
}

impl GeneratedToolHandler {
    fn build_request(&self, mut values: Map<String, Value>) -> Result<RawRequest> {
        let body = normalize_body(
            values.remove(BODY_FIELD),
            self.group.name == MSEARCH_GROUP,
        )?;
        let endpoint = select_endpoint(&self.group.endpoints, &values).ok_or_else(|| {
            DomainError::InvalidData(format!("no endpoints for {}", self.tool_id))
        })?;

        let mut path_values = Map::new();
        for name in &self.path_params {
            if let Some(value) = values.remove(name) {
                path_values.insert(name.clone(), value);
            }
        }
        let segments = endpoint
            .path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                    .and_then(|name| path_values.get(name))
                    .map(param_text)
                    .unwrap_or_else(|| segment.to_string())
            })
            .collect();

        let query = values
            .iter()
            .filter(|(_, v)| !matches!(v, Value::Null) && v.as_str() != Some(""))
            .map(|(k, v)| (k.clone(), param_text(v)))
            .collect();

        Ok(RawRequest {
            method: endpoint.method,
            segments,
            query,
            body,
        })
    }
}

// ── Generation ────────────────────────────────────────────────────────────────

pub fn generate_tool_from_group(
    group: OperationGroup,
    connector: Arc<dyn BackendConnectorPort>,
) -> ToolDescriptor {
    let tool_id = tool_name_for_group(&group.name);
    let first = group.endpoints.first();
    let description = first.map(|e| e.description.clone()).unwrap_or_default();
    let versions = VersionRange::new(
        first
            .and_then(|e| e.version_added.clone())
            .unwrap_or_else(|| DEFAULT_MIN_VERSION.to_string()),
        first
            .and_then(|e| e.version_deprecated.clone())
            .unwrap_or_else(|| DEFAULT_MAX_VERSION.to_string()),
    );
    let methods: BTreeSet<HttpMethod> = group.endpoints.iter().map(|e| e.method).collect();
    let (args_model, path_params) = extract_parameters(&group);

    let handler = Arc::new(GeneratedToolHandler {
        tool_id: tool_id.clone(),
        group,
        path_params,
        versions: versions.clone(),
        connector,
    });
    ToolDescriptor::new(tool_id, description, args_model, handler)
        .with_versions(versions)
        .with_http_methods(methods)
}

/// Fetches every specification document and builds one tool per operation
/// group. Failures are logged per document; whatever was built is returned.
pub async fn generate_tools(
    source: &dyn SpecSourcePort,
    connector: Arc<dyn BackendConnectorPort>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for file in SPEC_FILES {
        let groups = match source.fetch_spec(file).await {
            Ok(text) => parse_spec_document(&text),
            Err(e) => Err(e),
        };
        match groups {
            Ok(groups) => {
                tracing::debug!("{}: {} operation groups", file, groups.len());
                registry.extend(
                    groups
                        .into_iter()
                        .map(|g| generate_tool_from_group(g, connector.clone())),
                );
            }
            Err(e) => tracing::error!("Error generating tools from {}: {}", file, e),
        }
    }
    registry
}
