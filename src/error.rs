use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{}", resolution_message(.repository, .version, .attempts))]
    IndexResolution {
        repository: String,
        version: String,
        attempts: Vec<TierAttempt>,
    },

    #[error("Index build for {repository} exceeded {seconds}s; no artifact was written")]
    BuildTimeout { repository: String, seconds: u64 },

    #[error(
        "Checkout drifted since indexing: {} (expected {expected}, found {found})",
        .path.display()
    )]
    SourceDrift {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Git error: {0}")]
    Git(String),

    #[error("Embedding backend error: {0}")]
    Embedding(String),

    #[error("MCP error: {0}")]
    Mcp(String),
}

/// One step of index resolution that was tried and failed.
#[derive(Debug, Clone, Serialize)]
pub struct TierAttempt {
    pub tier: ResolutionTier,
    pub detail: String,
}

impl TierAttempt {
    pub fn new(tier: ResolutionTier, detail: impl Into<String>) -> Self {
        Self {
            tier,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    LocalOverride,
    Bundled,
    Registry,
    Manual,
}

impl ResolutionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionTier::LocalOverride => "local override",
            ResolutionTier::Bundled => "bundled manifest",
            ResolutionTier::Registry => "registry download",
            ResolutionTier::Manual => "manual location",
        }
    }

    fn fix_hint(&self) -> &'static str {
        match self {
            ResolutionTier::LocalOverride => "set `override_path` for the repository",
            ResolutionTier::Bundled => "place the artifact in `bundled_dir` and list it in manifest.yaml",
            ResolutionTier::Registry => "set `index_url` for the repository",
            ResolutionTier::Manual => "set `index_path` or run `api-indexer index`",
        }
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn resolution_message(repository: &str, version: &str, attempts: &[TierAttempt]) -> String {
    let mut message = format!(
        "No index artifact found for {}@{}. Tiers attempted:",
        repository, version
    );
    for attempt in attempts {
        message.push_str(&format!(
            "\n  - {}: {} (fix: {})",
            attempt.tier,
            attempt.detail,
            attempt.tier.fix_hint()
        ));
    }
    message
}

pub type Result<T> = std::result::Result<T, IndexerError>;
