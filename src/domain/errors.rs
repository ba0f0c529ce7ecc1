use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown or disabled tool: {0}")]
    UnknownTool(String),

    #[error("{0}")]
    Backend(String),

    #[error(
        "tool {tool} is not supported for OpenSearch version {current}; supported versions: {min} to {max}"
    )]
    VersionIncompatible {
        tool: String,
        current: String,
        min: String,
        max: String,
    },

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("failed to fetch API specification: {0}")]
    SpecFetch(String),

    #[error("failed to parse config: {0}")]
    ConfigParse(String),

    #[error("{0}")]
    InvalidData(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Io(String),

    #[error("failed to deserialize: {0}")]
    Deserialize(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialize(err.to_string())
    }
}

impl From<serde_yaml::Error> for DomainError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}
