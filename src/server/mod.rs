//! Query server: resolves and loads one index per repository on first use,
//! then answers the four read-only operations from memory.

pub mod resolver;
pub mod view;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::config::AppConfig;
use crate::error::Result;
use crate::search::SearchResponse;

pub use resolver::{BundledManifest, IndexResolver, ResolvedIndex, MANIFEST_FILE};
pub use view::{
    ModulePage, RepositoryView, SourceLookup, SourceSnippet, SymbolLookup, SymbolSpec,
    TargetSummary,
};

type LoadSlot = Arc<OnceCell<Arc<RepositoryView>>>;

pub struct QueryServer {
    config: Arc<AppConfig>,
    resolver: IndexResolver,
    /// One slot per repository so a slow load never blocks another repository
    loaded: Mutex<HashMap<String, LoadSlot>>,
}

impl QueryServer {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            resolver: IndexResolver::new(&config.settings),
            config,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Loaded view for the named repository (or the only configured one).
    pub async fn repository(&self, name: Option<&str>) -> Result<Arc<RepositoryView>> {
        let repository = self.config.select_repository(name)?.clone();
        let slot = {
            let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
            loaded
                .entry(repository.name.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let view = slot
            .get_or_try_init(|| async {
                let resolved = self.resolver.resolve(&repository).await?;
                RepositoryView::new(repository.clone(), resolved, &self.config).map(Arc::new)
            })
            .await?;
        Ok(view.clone())
    }

    /// Resolves every configured repository; any failure is fatal for the caller.
    pub async fn preload(&self) -> Result<()> {
        for repository in &self.config.repositories {
            self.repository(Some(&repository.name)).await?;
        }
        Ok(())
    }

    pub async fn list_modules(&self, repository: Option<&str>, page: usize) -> Result<ModulePage> {
        Ok(self.repository(repository).await?.list_modules(page))
    }

    pub async fn inspect_symbol(&self, repository: Option<&str>, fqn: &str) -> Result<SymbolLookup> {
        Ok(self.repository(repository).await?.inspect_symbol(fqn))
    }

    pub async fn read_source_code(&self, repository: Option<&str>, fqn: &str) -> Result<SourceLookup> {
        self.repository(repository).await?.read_source_code(fqn)
    }

    pub async fn search_knowledge(
        &self,
        repository: Option<&str>,
        queries: &[String],
        limit: Option<usize>,
    ) -> Result<SearchResponse> {
        self.repository(repository)
            .await?
            .search_knowledge(queries, limit)
            .await
    }
}
