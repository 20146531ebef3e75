//! Checkout cache: one working tree per (repository, version), cloned with
//! the `git` CLI and reused across indexing runs.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{IndexerError, Result};

/// Ref used for sample repositories, which are mined at their default branch.
pub const DEFAULT_REF: &str = "HEAD";

#[derive(Debug, Clone)]
pub struct CheckoutCache {
    root: PathBuf,
}

impl CheckoutCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory-safe name for a repository URL.
    pub fn slug(url: &str) -> String {
        let trimmed = url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url)
            .trim_end_matches('/')
            .trim_end_matches(".git");
        let trimmed = trimmed.rsplit_once('@').map(|(_, r)| r).unwrap_or(trimmed);

        let mut slug = String::with_capacity(trimmed.len());
        for c in trimmed.chars() {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                slug.push(c);
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        slug.trim_matches('-').to_string()
    }

    pub fn path_for(&self, url: &str, version: &str) -> PathBuf {
        self.root.join(Self::slug(url)).join(Self::slug(version))
    }

    /// A URL that names an existing local directory is used in place.
    pub fn local_dir(url: &str) -> Option<PathBuf> {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        path.is_dir().then_some(path)
    }

    /// Checkout already on disk, without cloning.
    pub fn existing(&self, url: &str, version: &str) -> Option<PathBuf> {
        if let Some(local) = Self::local_dir(url) {
            return Some(local);
        }
        let path = self.path_for(url, version);
        path.join(".git").exists().then_some(path)
    }

    /// Returns the checkout for `url` at `version`, cloning it if needed.
    pub fn ensure(&self, url: &str, version: &str) -> Result<PathBuf> {
        if let Some(existing) = self.existing(url, version) {
            tracing::debug!("Reusing checkout {} for {}@{}", existing.display(), url, version);
            return Ok(existing);
        }

        let target = self.path_for(url, version);
        let parent = target.parent().unwrap_or(&self.root).to_path_buf();
        std::fs::create_dir_all(&parent)?;
        let staging = parent.join(format!(".{}.{}.partial", Self::slug(version), std::process::id()));
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }

        tracing::info!("Cloning {} at {} into {}", url, version, target.display());
        let cloned = run_git(&parent, &["clone", "--quiet", url, &path_arg(&staging)])
            .and_then(|_| run_git(&staging, &["checkout", "--quiet", version]));
        if let Err(e) = cloned {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        if let Err(e) = std::fs::rename(&staging, &target) {
            let _ = std::fs::remove_dir_all(&staging);
            // Another build may have finished the same checkout first
            if target.join(".git").exists() {
                return Ok(target);
            }
            return Err(e.into());
        }
        Ok(target)
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn run_git(cwd: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| IndexerError::Git(format!("Failed to run git: {}", e)))?;

    if !output.status.success() {
        return Err(IndexerError::Git(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
