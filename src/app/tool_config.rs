use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value as YamlValue;
use std::path::Path;

use crate::app::registry::ToolRegistry;
use crate::domain::{
    errors::{DomainError, Result},
    models::{OverrideField, RawOverride, MAX_DESCRIPTION_CHARS},
};

static CLI_OVERRIDE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^tool\.(\w+)\.(\w+)$").expect("override key regex must compile")
});

/// Picks `tool.<id>.<alias>` keys out of command-line overrides, keeping
/// their order. Keys with an unrecognised alias are not collected.
pub fn parse_cli_overrides(overrides: &[(String, String)]) -> Vec<RawOverride> {
    overrides
        .iter()
        .filter_map(|(key, value)| {
            let caps = CLI_OVERRIDE_KEY.captures(key)?;
            let alias = caps.get(2)?.as_str();
            OverrideField::from_alias(alias)?;
            Some(RawOverride {
                tool_id: caps.get(1)?.as_str().to_string(),
                alias: alias.to_string(),
                value: value.clone(),
            })
        })
        .collect()
}

fn scalar_text(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Reads the `tools:` section of a config file, one override per declared
/// field, in file order.
pub fn load_file_overrides(path: &Path) -> Result<Vec<RawOverride>> {
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let document: YamlValue = serde_yaml::from_str(&text)?;
    if !document.is_mapping() {
        return Err(DomainError::ConfigParse(format!(
            "{}: top level must be a mapping",
            path.display()
        )));
    }
    let Some(tools) = document.get("tools").and_then(YamlValue::as_mapping) else {
        return Ok(Vec::new());
    };

    let mut overrides = Vec::new();
    for (tool_id, fields) in tools {
        let (Some(tool_id), Some(fields)) = (tool_id.as_str(), fields.as_mapping()) else {
            continue;
        };
        for (alias, value) in fields {
            let (Some(alias), Some(value)) = (alias.as_str(), scalar_text(value)) else {
                continue;
            };
            overrides.push(RawOverride {
                tool_id: tool_id.to_string(),
                alias: alias.to_string(),
                value,
            });
        }
    }
    Ok(overrides)
}

#[derive(Debug, Clone)]
pub struct OverrideOutcome {
    pub registry: ToolRegistry,
    pub warnings: Vec<String>,
}

/// Applies file overrides, then CLI overrides, to a copy of `registry`.
pub fn apply_overrides(
    registry: &ToolRegistry,
    config_file: Option<&Path>,
    cli_overrides: &[(String, String)],
) -> OverrideOutcome {
    let mut customized = registry.clone();
    let mut warnings = Vec::new();

    let mut overrides = match config_file {
        Some(path) => load_file_overrides(path).unwrap_or_else(|e| {
            tracing::error!("Error loading tool config file {}: {}", path.display(), e);
            Vec::new()
        }),
        None => Vec::new(),
    };
    overrides.extend(parse_cli_overrides(cli_overrides));

    for entry in overrides {
        let Some(tool) = customized.get_mut(&entry.tool_id) else {
            continue;
        };
        let Some(field) = OverrideField::from_alias(&entry.alias) else {
            let message = format!(
                "Ignoring unknown field '{}' for tool '{}'",
                entry.alias, entry.tool_id
            );
            tracing::warn!("{}", message);
            warnings.push(message);
            continue;
        };
        match field {
            OverrideField::DisplayName => tool.display_name = entry.value,
            OverrideField::Description => {
                let length = entry.value.chars().count();
                if length > MAX_DESCRIPTION_CHARS {
                    let message = format!(
                        "Description for tool '{}' is {} characters, longer than the recommended {}",
                        entry.tool_id, length, MAX_DESCRIPTION_CHARS
                    );
                    tracing::warn!("{}", message);
                    warnings.push(message);
                }
                tool.description = entry.value;
            }
        }
    }

    OverrideOutcome {
        registry: customized,
        warnings,
    }
}
