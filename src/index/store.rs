use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{IndexerError, Result};
use crate::index::models::{Index, INDEX_FORMAT_VERSION};

static TMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Stable content-address for a (repository, version) pair.
pub fn index_key(repository: &str, version: &str) -> String {
    let material = format!("{}\n{}", repository.trim_end_matches('/'), version);
    format!("{:016x}", xxh3_64(material.as_bytes()))
}

/// On-disk store of index artifacts, one JSON file per key.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, repository: &str, version: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", index_key(repository, version)))
    }

    /// Writes the artifact atomically. Concurrent writers of the same key are
    /// safe because the content for a key is deterministic.
    pub fn save(&self, index: &Index) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let target = self.path_for(&index.repository, &index.version);
        let tmp = self.root.join(format!(
            ".{}.{}.{}.tmp",
            index_key(&index.repository, &index.version),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let json = serde_json::to_vec_pretty(index)?;
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        tracing::info!(
            "Stored index for {}@{} ({} targets) at {}",
            index.repository,
            index.version,
            index.targets.len(),
            target.display()
        );
        Ok(target)
    }

    pub fn load(&self, repository: &str, version: &str) -> Result<Option<Index>> {
        let path = self.path_for(repository, version);
        if !path.is_file() {
            return Ok(None);
        }
        read_artifact(&path).map(Some)
    }
}

/// Reads and validates an artifact file.
pub fn read_artifact(path: &Path) -> Result<Index> {
    let bytes = fs::read(path)?;
    parse_artifact(&bytes)
}

pub fn parse_artifact(bytes: &[u8]) -> Result<Index> {
    let index: Index = serde_json::from_slice(bytes)?;
    if index.format_version != INDEX_FORMAT_VERSION {
        return Err(IndexerError::Configuration(format!(
            "index artifact has format version {}, expected {}",
            index.format_version, INDEX_FORMAT_VERSION
        )));
    }
    Ok(index)
}
