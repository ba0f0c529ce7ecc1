use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::domain::types::ServerMode;

const TOOL_OVERRIDE_PREFIX: &str = "--tool.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    Stdio,
    /// Streamable HTTP on `--host`/`--port`.
    Stream,
    /// Legacy SSE (`/sse` and `/messages/`) on `--host`/`--port`.
    Sse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Single,
    Multi,
}

impl From<ModeArg> for ServerMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Single => ServerMode::Single,
            ModeArg::Multi => ServerMode::Multi,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "mcp-opensearch", version, about = "OpenSearch MCP Server")]
pub struct Cli {
    /// Transport type
    #[arg(long, value_enum, default_value = "stdio")]
    pub transport: Transport,

    /// Host to bind to (stream and sse only)
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on (stream and sse only)
    #[arg(long, default_value_t = 9900)]
    pub port: u16,

    /// single uses environment variables for the connection; multi takes a
    /// cluster name on every call
    #[arg(long, value_enum, default_value = "single")]
    pub mode: ModeArg,

    /// AWS profile to use for OpenSearch connection
    #[arg(long, env = "AWS_PROFILE", default_value = "")]
    pub profile: String,

    /// Path to a YAML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Arguments split into regular flags and `--tool.<id>.<field>` overrides.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SplitArgs {
    pub rest: Vec<String>,
    /// `("tool.<id>.<field>", value)` in command-line order.
    pub overrides: Vec<(String, String)>,
}

/// Pulls `--tool.X.Y=value` and `--tool.X.Y value` tokens out before clap
/// sees them. A trailing override with no value is kept with an empty value.
pub fn split_tool_overrides<I, S>(args: I) -> SplitArgs
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut split = SplitArgs::default();
    let mut iter = args.into_iter().map(Into::into).peekable();
    while let Some(arg) = iter.next() {
        let Some(stripped) = arg.strip_prefix("--") else {
            split.rest.push(arg);
            continue;
        };
        if !arg.starts_with(TOOL_OVERRIDE_PREFIX) {
            split.rest.push(arg);
            continue;
        }
        match stripped.split_once('=') {
            Some((key, value)) => split.overrides.push((key.to_string(), value.to_string())),
            None => {
                let value = match iter.peek() {
                    Some(next) if !next.starts_with("--") => iter.next().unwrap_or_default(),
                    _ => String::new(),
                };
                split.overrides.push((stripped.to_string(), value));
            }
        }
    }
    split
}
