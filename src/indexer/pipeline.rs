//! The offline build job: checkout, scan, mine, rank, persist.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, RankingConfig, RepositoryConfig};
use crate::error::{IndexerError, Result};
use crate::git::{CheckoutCache, DEFAULT_REF};
use crate::index::{Index, IndexStore};
use crate::indexer::miner::{CheckoutSource, UsageFilter, UsageMiner};
use crate::indexer::ranker::TargetRanker;
use crate::indexer::scanner::StructuralScanner;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildStats {
    pub files_scanned: usize,
    pub parse_failures: usize,
    pub entities: usize,
    pub unresolved_bases: usize,
    pub files_mined: usize,
    pub associations: usize,
    pub targets: usize,
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub index: Index,
    pub path: PathBuf,
    pub stats: BuildStats,
    pub elapsed: Duration,
}

/// Runs scan → mine → rank over checkouts that are already on disk.
///
/// This is the synchronous core of a build; it checks `cancel` between
/// files and returns `Cancelled` as soon as it is triggered.
pub fn build_index(
    repository: &RepositoryConfig,
    ranking: &RankingConfig,
    target_root: &Path,
    sample_roots: &[PathBuf],
    cancel: &CancellationToken,
) -> Result<(Index, BuildStats)> {
    let source_root = repository
        .source_root
        .clone()
        .or_else(|| StructuralScanner::detect_source_root(target_root));

    let scanner = StructuralScanner::new(source_root.clone());
    let map = scanner.scan(target_root, cancel)?;

    let mut sources = vec![CheckoutSource::target(target_root, source_root)];
    sources.extend(
        sample_roots
            .iter()
            .map(|root| CheckoutSource::sample(root, StructuralScanner::detect_source_root(root))),
    );
    let filter = UsageFilter::from_namespaces(&repository.namespaces);
    let miner = UsageMiner::new(filter.clone(), ranking.min_support);
    let graph = miner.mine(&sources, Some(&map), cancel)?;

    if cancel.is_cancelled() {
        return Err(IndexerError::Cancelled);
    }
    let targets = TargetRanker::from_config(ranking)
        .with_scope(filter)
        .rank(&map, &graph);

    let stats = BuildStats {
        files_scanned: map.files.len(),
        parse_failures: map.parse_failures,
        entities: map.entities.len(),
        unresolved_bases: map
            .inheritance
            .iter()
            .filter(|edge| !edge.base.is_resolved())
            .count(),
        files_mined: graph.files_mined,
        associations: graph.edge_count(),
        targets: targets.len(),
    };
    let index = Index::new(&repository.url, &repository.version, targets, map.files);
    Ok((index, stats))
}

/// Builds and stores index artifacts for configured repositories.
#[derive(Clone)]
pub struct IndexPipeline {
    config: Arc<AppConfig>,
    checkouts: CheckoutCache,
    store: IndexStore,
    timeout: Duration,
}

impl IndexPipeline {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            checkouts: CheckoutCache::new(config.settings.checkouts_dir()),
            store: IndexStore::new(config.settings.indexes_dir()),
            timeout: config.settings.build_timeout(),
            config,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Builds one repository under the wall-clock bound. Nothing is written
    /// unless the whole build finishes in time.
    pub async fn build(&self, repository: &RepositoryConfig) -> Result<BuildOutcome> {
        let started = Instant::now();
        let cancel = CancellationToken::new();

        let job = {
            let repository = repository.clone();
            let ranking = self.config.ranking.clone();
            let checkouts = self.checkouts.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                let target = checkouts.ensure(&repository.url, &repository.version)?;
                let samples = sample_checkouts(&checkouts, &repository, &cancel)?;
                build_index(&repository, &ranking, &target, &samples, &cancel)
            })
        };

        let (index, stats) = match tokio::time::timeout(self.timeout, job).await {
            Ok(joined) => joined.map_err(|e| {
                IndexerError::Io(std::io::Error::other(format!("index build task failed: {}", e)))
            })??,
            Err(_) => {
                cancel.cancel();
                tracing::warn!(
                    "Index build for {} timed out after {:?}; discarding partial results",
                    repository.name,
                    self.timeout
                );
                return Err(IndexerError::BuildTimeout {
                    repository: repository.name.clone(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let path = self.store.save(&index)?;
        let elapsed = started.elapsed();
        tracing::info!(
            "Indexed {}@{} in {:.1}s: {} targets from {} entities, {} associations",
            repository.name,
            repository.version,
            elapsed.as_secs_f64(),
            stats.targets,
            stats.entities,
            stats.associations
        );
        Ok(BuildOutcome {
            index,
            path,
            stats,
            elapsed,
        })
    }

    /// Builds every configured repository concurrently.
    pub async fn build_all(&self) -> Vec<(String, Result<BuildOutcome>)> {
        let mut join_set = JoinSet::new();
        for repository in self.config.repositories.clone() {
            let pipeline = self.clone();
            join_set.spawn(async move {
                let result = pipeline.build(&repository).await;
                (repository.name, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => tracing::warn!("Index build task panicked: {}", e),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

/// Samples that cannot be fetched are skipped; they only add usage signal.
fn sample_checkouts(
    checkouts: &CheckoutCache,
    repository: &RepositoryConfig,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    for url in &repository.samples {
        if cancel.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }
        match checkouts.ensure(url, DEFAULT_REF) {
            Ok(root) => roots.push(root),
            Err(e) => tracing::warn!("Skipping sample {}: {}", url, e),
        }
    }
    Ok(roots)
}
