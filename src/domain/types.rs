use super::errors::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_MIN_VERSION: &str = "0.0.0";
pub const DEFAULT_MAX_VERSION: &str = "99.99.99";

// ── Version ───────────────────────────────────────────────────────────────────

/// Numeric `major.minor.patch` triple.
///
/// Missing minor/patch components parse as zero, so `"3"` and `"3.0.0"` are
/// the same version. A pre-release or build suffix (`2.11.0-SNAPSHOT`) is
/// accepted and ignored for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let core = trimmed
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        if core.is_empty() {
            return Err(DomainError::InvalidVersion(format!("'{}'", raw)));
        }

        let mut parts = [0u64; 3];
        let mut count = 0;
        for segment in core.split('.') {
            if count == parts.len() {
                return Err(DomainError::InvalidVersion(format!(
                    "'{}' has more than three components",
                    raw
                )));
            }
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(DomainError::InvalidVersion(format!("'{}'", raw)));
            }
            parts[count] = segment
                .parse::<u64>()
                .map_err(|_| DomainError::InvalidVersion(format!("'{}'", raw)))?;
            count += 1;
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = DomainError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// `min <= current <= max`, both bounds inclusive.
pub fn is_compatible(current: &Version, min: &str, max: &str) -> Result<bool> {
    let min = Version::parse(min)?;
    let max = Version::parse(max)?;
    Ok(min <= *current && *current <= max)
}

// ── VersionRange ──────────────────────────────────────────────────────────────

/// Declared version bounds of a tool, kept as written so they can be echoed
/// back in error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub min: String,
    pub max: String,
}

impl VersionRange {
    pub fn new(min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    pub fn contains(&self, current: &Version) -> Result<bool> {
        is_compatible(current, &self.min, &self.max)
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_VERSION, DEFAULT_MAX_VERSION)
    }
}

// ── ClusterCompat ─────────────────────────────────────────────────────────────

/// What the connected cluster tells us about version gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterCompat {
    /// Serverless collections report no usable version; every tool is allowed.
    Serverless,
    Versioned(Version),
}

// ── HttpMethod ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Patch => "PATCH",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "PATCH" => Ok(Self::Patch),
            _ => Err(DomainError::InvalidData(format!(
                "unsupported HTTP method '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ServerMode ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerMode {
    /// One cluster taken from the environment; base args are hidden.
    #[default]
    Single,
    /// Clusters addressed by name on every call; base args are advertised.
    Multi,
}

impl FromStr for ServerMode {
    type Err = DomainError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "multi" => Ok(Self::Multi),
            _ => Err(DomainError::InvalidData(format!(
                "mode must be 'single' or 'multi', got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::Multi => f.write_str("multi"),
        }
    }
}

// ── ContentBlock ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}
