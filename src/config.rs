//! Configuration file loading.
//!
//! The configuration is read once at startup and passed explicitly into the
//! build pipeline and the query server.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IndexerError, Result};
use crate::search::SearchCapability;

pub const DEFAULT_CONFIG_FILE: &str = "api-indexer.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Root for cached checkouts and index artifacts
    pub cache_dir: PathBuf,
    /// Directory holding pre-bundled index artifacts and `manifest.yaml`
    pub bundled_dir: Option<PathBuf>,
    pub page_size: usize,
    pub build_timeout_secs: u64,
    /// Bound on a registry download of an index artifact
    pub download_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".api-indexer"),
            bundled_dir: None,
            page_size: 20,
            build_timeout_secs: 900,
            download_timeout_secs: 60,
        }
    }
}

impl Settings {
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn checkouts_dir(&self) -> PathBuf {
        self.cache_dir.join("checkouts")
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.cache_dir.join("indexes")
    }

    /// Registry downloads, kept apart from locally built artifacts.
    pub fn downloads_dir(&self) -> PathBuf {
        self.cache_dir.join("downloads")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RankingConfig {
    pub popularity_weight: f64,
    pub cooccurrence_weight: f64,
    pub min_support: usize,
    pub include_private: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            popularity_weight: 1.0,
            cooccurrence_weight: 1.0,
            min_support: 2,
            include_private: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub provider: String,
    pub k1: f64,
    pub b: f64,
    pub default_limit: usize,
    pub embedding_endpoint: Option<String>,
    pub embedding_model: String,
    pub embedding_api_key_env: String,
    /// Weight of the cosine similarity in the hybrid blend (0.0..=1.0)
    pub semantic_weight: f64,
    pub embedding_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "hybrid".to_string(),
            k1: 1.5,
            b: 0.75,
            default_limit: 10,
            embedding_endpoint: None,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_api_key_env: "OPENAI_API_KEY".to_string(),
            semantic_weight: 0.3,
            embedding_timeout_secs: 30,
        }
    }
}

impl SearchConfig {
    pub fn capability(&self) -> Result<SearchCapability> {
        SearchCapability::from_str(&self.provider).ok_or_else(|| {
            IndexerError::Configuration(format!(
                "unknown search provider '{}' (expected hybrid, bm25 or keyword)",
                self.provider
            ))
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub name: String,
    /// Git URL or local directory of the target library
    pub url: String,
    pub version: String,
    /// Namespace allow-list; empty means dynamic mode
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub samples: Vec<String>,
    #[serde(default)]
    pub source_root: Option<String>,
    #[serde(default)]
    pub override_path: Option<PathBuf>,
    #[serde(default)]
    pub index_url: Option<String>,
    #[serde(default)]
    pub index_path: Option<PathBuf>,
    #[serde(default)]
    pub checkout_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IndexerError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| IndexerError::Configuration(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.settings.page_size == 0 {
            return Err(IndexerError::Configuration(
                "settings.page_size must be greater than zero".to_string(),
            ));
        }
        self.search.capability()?;

        for (name, weight) in [
            ("ranking.popularity_weight", self.ranking.popularity_weight),
            ("ranking.cooccurrence_weight", self.ranking.cooccurrence_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(IndexerError::Configuration(format!(
                    "{} must be a non-negative number",
                    name
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.search.semantic_weight) {
            return Err(IndexerError::Configuration(
                "search.semantic_weight must be within 0.0..=1.0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for repo in &self.repositories {
            for (field, value) in [("name", &repo.name), ("url", &repo.url), ("version", &repo.version)] {
                if value.trim().is_empty() {
                    return Err(IndexerError::Configuration(format!(
                        "repository entry is missing `{}`{}",
                        field,
                        if repo.name.is_empty() {
                            String::new()
                        } else {
                            format!(" ({})", repo.name)
                        }
                    )));
                }
            }
            if !seen.insert(repo.name.as_str()) {
                return Err(IndexerError::Configuration(format!(
                    "duplicate repository name '{}'",
                    repo.name
                )));
            }
        }

        Ok(())
    }

    pub fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Picks the named repository, or the only one when no name is given.
    pub fn select_repository(&self, name: Option<&str>) -> Result<&RepositoryConfig> {
        match name {
            Some(name) => self.repository(name).ok_or_else(|| {
                IndexerError::Configuration(format!("repository '{}' is not configured", name))
            }),
            None => match self.repositories.as_slice() {
                [only] => Ok(only),
                [] => Err(IndexerError::Configuration(
                    "no repositories configured".to_string(),
                )),
                _ => Err(IndexerError::Configuration(
                    "several repositories configured; pass a repository name".to_string(),
                )),
            },
        }
    }
}
