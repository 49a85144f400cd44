use clap::Parser;
use std::path::PathBuf;

/// Streams served when none are given on the command line
pub const DEFAULT_STREAMS: &[(&str, &str)] = &[
    ("volumes", "volume"),
    ("nodes", "node"),
    ("engineimages", "engineImage"),
    ("settings", "setting"),
    ("events", "event"),
];

/// One served stream: its URL name and the resource type it lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub name: String,
    pub resource_type: String,
}

impl StreamSpec {
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
        }
    }
}

/// Parse a `name:resourceType` pair
fn parse_stream(raw: &str) -> Result<StreamSpec, String> {
    let (name, resource_type) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:TYPE, got {raw:?}"))?;
    if name.is_empty() || resource_type.is_empty() {
        return Err(format!("expected NAME:TYPE, got {raw:?}"));
    }
    if name.contains('/') {
        return Err(format!("stream name must not contain '/': {name:?}"));
    }
    Ok(StreamSpec::new(name, resource_type))
}

/// listcast: push live resource lists to WebSocket clients
#[derive(Parser, Debug)]
#[command(name = "listcast")]
#[command(about = "Serve live, deduplicated resource lists over WebSocket", long_about = None)]
pub struct Cli {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the HTTP server to
    #[arg(long, default_value_t = 9500)]
    pub port: u16,

    /// Stream to serve, as NAME:TYPE (repeatable; defaults to the built-in set)
    #[arg(long = "stream", value_name = "NAME:TYPE", value_parser = parse_stream)]
    pub streams: Vec<StreamSpec>,

    /// JSON file mapping stream names to arrays of initial resources
    #[arg(long)]
    pub seed: Option<PathBuf>,

    /// Seconds between keepalive pings
    #[arg(long, default_value_t = 15)]
    pub keepalive_secs: u64,

    /// Seconds allowed for a single frame write
    #[arg(long, default_value_t = 10)]
    pub write_timeout_secs: u64,
}

impl Cli {
    /// Parse CLI arguments from the environment
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Streams to serve, falling back to [`DEFAULT_STREAMS`]
    pub fn stream_specs(&self) -> Vec<StreamSpec> {
        if self.streams.is_empty() {
            DEFAULT_STREAMS
                .iter()
                .map(|(name, resource_type)| StreamSpec::new(*name, *resource_type))
                .collect()
        } else {
            self.streams.clone()
        }
    }
}
