//! Four-tier lookup of the index artifact for a (repository, version).
//!
//! Tiers are tried in a fixed order: local override, bundled manifest,
//! registry download, manual location. The first artifact that parses and
//! carries the requested identity wins; otherwise every attempt is reported.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::config::{RepositoryConfig, Settings};
use crate::error::{IndexerError, ResolutionTier, Result, TierAttempt};
use crate::index::{index_key, parse_artifact, read_artifact, Index, IndexStore};

pub const MANIFEST_FILE: &str = "manifest.yaml";

/// `manifest.yaml` inside the bundled directory.
#[derive(Debug, Default, Deserialize)]
pub struct BundledManifest {
    /// Index key → artifact path relative to the bundled directory
    #[serde(default)]
    pub indexes: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct ResolvedIndex {
    pub index: Index,
    pub tier: ResolutionTier,
    /// Path or URL the artifact was read from
    pub source: String,
}

pub struct IndexResolver {
    store: IndexStore,
    downloads: IndexStore,
    bundled_dir: Option<PathBuf>,
    http: reqwest::Client,
    download_timeout: Duration,
}

impl IndexResolver {
    pub fn new(settings: &Settings) -> Self {
        let download_timeout = settings.download_timeout();
        Self {
            store: IndexStore::new(settings.indexes_dir()),
            downloads: IndexStore::new(settings.downloads_dir()),
            bundled_dir: settings.bundled_dir.clone(),
            http: http_client(download_timeout),
            download_timeout,
        }
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.http = http_client(timeout);
        self.download_timeout = timeout;
        self
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub async fn resolve(&self, repository: &RepositoryConfig) -> Result<ResolvedIndex> {
        let mut attempts = Vec::new();

        let tiers = [
            ResolutionTier::LocalOverride,
            ResolutionTier::Bundled,
            ResolutionTier::Registry,
            ResolutionTier::Manual,
        ];
        for tier in tiers {
            let outcome = match tier {
                ResolutionTier::LocalOverride => self.local_override(repository),
                ResolutionTier::Bundled => self.bundled(repository),
                ResolutionTier::Registry => self.registry(repository).await,
                ResolutionTier::Manual => self.manual(repository),
            };
            match outcome {
                Ok((index, source)) => {
                    tracing::info!(
                        "Resolved index for {}@{} via {} ({}, {} targets)",
                        repository.name,
                        repository.version,
                        tier,
                        source,
                        index.targets.len()
                    );
                    return Ok(ResolvedIndex { index, tier, source });
                }
                Err(detail) => {
                    tracing::debug!("{} tier failed for {}: {}", tier, repository.name, detail);
                    attempts.push(TierAttempt::new(tier, detail));
                }
            }
        }

        Err(IndexerError::IndexResolution {
            repository: repository.name.clone(),
            version: repository.version.clone(),
            attempts,
        })
    }

    fn local_override(&self, repository: &RepositoryConfig) -> std::result::Result<(Index, String), String> {
        let path = repository
            .override_path
            .as_deref()
            .ok_or_else(|| "not configured".to_string())?;
        load_checked(path, repository)
    }

    fn bundled(&self, repository: &RepositoryConfig) -> std::result::Result<(Index, String), String> {
        let dir = self
            .bundled_dir
            .as_deref()
            .ok_or_else(|| "no bundled_dir configured".to_string())?;
        let key = index_key(&repository.url, &repository.version);

        let manifest_path = dir.join(MANIFEST_FILE);
        let listed = if manifest_path.is_file() {
            let content = std::fs::read_to_string(&manifest_path)
                .map_err(|e| format!("cannot read {}: {}", manifest_path.display(), e))?;
            let manifest: BundledManifest = serde_yaml::from_str(&content)
                .map_err(|e| format!("invalid {}: {}", manifest_path.display(), e))?;
            manifest.indexes.get(&key).map(|file| dir.join(file))
        } else {
            None
        };

        let path = listed.unwrap_or_else(|| dir.join(format!("{}.json", key)));
        if !path.is_file() {
            return Err(format!("no artifact for key {} in {}", key, dir.display()));
        }
        load_checked(&path, repository)
    }

    async fn registry(&self, repository: &RepositoryConfig) -> std::result::Result<(Index, String), String> {
        let url = repository
            .index_url
            .as_deref()
            .ok_or_else(|| "no index_url configured".to_string())?;

        let cached = self.downloads.path_for(&repository.url, &repository.version);
        if cached.is_file() {
            if let Ok(found) = load_checked(&cached, repository) {
                return Ok(found);
            }
        }

        tracing::info!("Downloading index for {} from {}", repository.name, url);
        let bytes = self.download(url).await.map_err(|e| match e {
            IndexerError::Http(e) if e.is_timeout() => format!(
                "download from {} timed out after {:?}",
                url, self.download_timeout
            ),
            e => format!("download from {} failed: {}", url, e),
        })?;
        let index = parse_artifact(&bytes).map_err(|e| format!("{}: {}", url, e))?;
        check_identity(&index, repository)?;
        let stored = self
            .downloads
            .save(&index)
            .map_err(|e| format!("cannot cache download: {}", e))?;
        Ok((index, stored.display().to_string()))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    fn manual(&self, repository: &RepositoryConfig) -> std::result::Result<(Index, String), String> {
        let path = repository
            .index_path
            .clone()
            .unwrap_or_else(|| self.store.path_for(&repository.url, &repository.version));
        if !path.is_file() {
            return Err(format!("{} does not exist", path.display()));
        }
        load_checked(&path, repository)
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build bounded http client, using defaults: {}", e);
            reqwest::Client::new()
        })
}

fn load_checked(path: &Path, repository: &RepositoryConfig) -> std::result::Result<(Index, String), String> {
    let index = read_artifact(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    check_identity(&index, repository)?;
    Ok((index, path.display().to_string()))
}

fn check_identity(index: &Index, repository: &RepositoryConfig) -> std::result::Result<(), String> {
    if index.matches(&repository.url, &repository.version) {
        Ok(())
    } else {
        Err(format!(
            "artifact is for {}@{}, expected {}@{}",
            index.repository, index.version, repository.url, repository.version
        ))
    }
}
