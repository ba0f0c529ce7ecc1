use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::errors::{DomainError, Result};
use super::types::HttpMethod;

/// Connection-context field injected into every tool call.
pub const CLUSTER_NAME_FIELD: &str = "opensearch_cluster_name";

pub const MAX_DESCRIPTION_CHARS: usize = 1024;

// ── BaseArgs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseArgs {
    /// Empty means "use the default connection from the environment".
    pub cluster_name: String,
}

impl BaseArgs {
    pub const FIELDS: [&'static str; 1] = [CLUSTER_NAME_FIELD];

    pub fn for_cluster(name: impl Into<String>) -> Self {
        Self {
            cluster_name: name.into(),
        }
    }

    pub fn field_specs() -> Vec<ParamSpec> {
        vec![ParamSpec::new(CLUSTER_NAME_FIELD, ParamKind::String)
            .with_default(json!(""))
            .with_description("The name of the OpenSearch cluster")]
    }

    fn from_values(values: &mut Map<String, Value>) -> Self {
        let cluster_name = values
            .remove(CLUSTER_NAME_FIELD)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Self { cluster_name }
    }

    pub fn has_cluster(&self) -> bool {
        !self.cluster_name.trim().is_empty()
    }
}

// ── ParamSpec ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Object,
    Array,
    /// Opaque payload, accepted as-is.
    Any,
}

impl ParamKind {
    fn schema_type(&self) -> Option<&'static str> {
        match self {
            Self::String => Some("string"),
            Self::Integer => Some("integer"),
            Self::Object => Some("object"),
            Self::Array => Some("array"),
            Self::Any => None,
        }
    }

    /// The value as the field stores it, or `None` when it does not fit.
    /// Integers also accept numeric strings (`"10"`) and whole floats (`10.0`).
    fn coerce(&self, value: &Value) -> Option<Value> {
        let fits = match self {
            Self::String => value.is_string(),
            Self::Integer => return coerce_integer(value),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        };
        fits.then(|| value.clone())
    }
}

fn coerce_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| Value::from(f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("title".into(), Value::String(field_title(&self.name)));
        if let Some(kind) = self.kind.schema_type() {
            schema.insert("type".into(), Value::String(kind.to_string()));
        }
        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            schema.insert("description".into(), Value::String(description.to_string()));
        }
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.clone());
        }
        Value::Object(schema)
    }
}

fn field_title(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ── ArgsModel ─────────────────────────────────────────────────────────────────

/// Field-level description of a tool's arguments. Produces the advertised
/// JSON schema and validates raw call arguments against the same fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgsModel {
    pub title: String,
    pub fields: Vec<ParamSpec>,
}

impl ArgsModel {
    /// A model that already carries the base connection fields.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: BaseArgs::field_specs(),
        }
    }

    /// Adds a field, replacing an existing one with the same name in place.
    pub fn with_field(mut self, spec: ParamSpec) -> Self {
        self.push_field(spec);
        self
    }

    pub fn push_field(&mut self, spec: ParamSpec) {
        match self.fields.iter_mut().find(|f| f.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.fields.push(spec),
        }
    }

    pub fn field(&self, name: &str) -> Option<&ParamSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.schema()))
            .collect();
        let mut schema = json!({
            "type": "object",
            "title": self.title,
            "properties": properties,
        });
        let required = self.required_fields();
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }

    /// Converts raw call arguments into [`ToolArgs`].
    ///
    /// Missing optional fields take their default (or stay absent), `null`
    /// counts as missing, keys the model does not know are dropped.
    pub fn validate(&self, raw: &Value) -> Result<ToolArgs> {
        let input = match raw {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(DomainError::Validation(format!(
                    "{}: arguments must be an object, got {}",
                    self.title,
                    value_kind(other)
                )))
            }
        };

        let mut values = Map::new();
        for field in &self.fields {
            match input.get(&field.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    let Some(coerced) = field.kind.coerce(value) else {
                        return Err(DomainError::Validation(format!(
                            "{}: '{}' must be {}, got {}",
                            self.title,
                            field.name,
                            field.kind.schema_type().unwrap_or("any value"),
                            value_kind(value)
                        )));
                    };
                    values.insert(field.name.clone(), coerced);
                }
                None if field.required => {
                    return Err(DomainError::Validation(format!(
                        "{}: '{}' is required",
                        self.title, field.name
                    )));
                }
                None => {
                    if let Some(default) = &field.default {
                        values.insert(field.name.clone(), default.clone());
                    }
                }
            }
        }

        let base = BaseArgs::from_values(&mut values);
        Ok(ToolArgs { base, values })
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── ToolArgs ──────────────────────────────────────────────────────────────────

/// Validated call arguments with the base connection fields split out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    pub base: BaseArgs,
    pub values: Map<String, Value>,
}

impl ToolArgs {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn str_opt(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn req_str(&self, key: &str) -> Result<&str> {
        self.str_opt(key)
            .ok_or_else(|| DomainError::Validation(format!("'{}' is required", key)))
    }
}

// ── Endpoint / OperationGroup ─────────────────────────────────────────────────

/// A parameter declared by an API specification operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: String,
    pub location: Option<String>,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub path: String,
    pub method: HttpMethod,
    pub operation_group: String,
    pub description: String,
    pub parameters: Vec<ParamDecl>,
    pub has_request_body: bool,
    pub version_added: Option<String>,
    pub version_deprecated: Option<String>,
}

impl Endpoint {
    /// Placeholder names in path order, e.g. `["index", "shard"]`.
    pub fn path_params(&self) -> Vec<&str> {
        path_placeholders(&self.path)
    }
}

pub fn path_placeholders(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|segment| segment.len() >= 2 && segment.starts_with('{') && segment.ends_with('}'))
        .map(|segment| &segment[1..segment.len() - 1])
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationGroup {
    pub name: String,
    pub endpoints: Vec<Endpoint>,
}

// ── FilterPolicy ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPolicy {
    pub disabled_tools: Vec<String>,
    pub disabled_categories: Vec<String>,
    pub disabled_tool_regexes: Vec<String>,
    pub category_to_tools: BTreeMap<String, Vec<String>>,
    pub allow_write: bool,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            disabled_tools: Vec::new(),
            disabled_categories: Vec::new(),
            disabled_tool_regexes: Vec::new(),
            category_to_tools: BTreeMap::new(),
            allow_write: true,
        }
    }
}

// ── Display overrides ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideField {
    DisplayName,
    Description,
}

impl OverrideField {
    /// Case-insensitive alias lookup.
    pub fn from_alias(alias: &str) -> Option<Self> {
        match alias.trim().to_ascii_lowercase().as_str() {
            "name" | "displayname" | "display_name" | "customname" | "custom_name" => {
                Some(Self::DisplayName)
            }
            "desc" | "description" | "customdescription" | "custom_description" => {
                Some(Self::Description)
            }
            _ => None,
        }
    }
}

/// An override as written by the administrator, before alias resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOverride {
    pub tool_id: String,
    pub alias: String,
    pub value: String,
}
