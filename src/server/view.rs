//! The four read-only operations over one loaded index.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{AppConfig, RepositoryConfig};
use crate::error::{IndexerError, ResolutionTier, Result};
use crate::git::CheckoutCache;
use crate::index::{
    BaseRef, EntityKind, FileFingerprint, Index, Location, MemberSummary, Parameter, SourceEntity,
};
use crate::indexer::scanner::StructuralScanner;
use crate::search::{SearchCascade, SearchDocument, SearchResponse};
use crate::server::resolver::ResolvedIndex;

const MAX_SUGGESTIONS: usize = 5;
const SUGGESTION_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub rank: usize,
    pub fqn: String,
    pub kind: EntityKind,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub member_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModulePage {
    pub repository: String,
    pub version: String,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_targets: usize,
    pub items: Vec<TargetSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolSpec {
    pub fqn: String,
    pub kind: EntityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_annotation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<BaseRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub location: Location,
    pub members: Vec<MemberSummary>,
    /// 1-based rank for ranked targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl SymbolSpec {
    fn from_entity(entity: &SourceEntity, members: Vec<MemberSummary>) -> Self {
        Self {
            fqn: entity.fqn.clone(),
            kind: entity.kind,
            signature: entity.signature.clone(),
            parameters: entity.parameters.clone(),
            return_annotation: entity.return_annotation.clone(),
            docstring: entity.docstring.clone(),
            bases: entity.bases.clone(),
            owner: entity.owner.clone(),
            location: entity.location.clone(),
            members,
            rank: None,
            score: None,
        }
    }

    fn from_member(member: &MemberSummary, owner: &str) -> Self {
        Self {
            fqn: member.fqn.clone(),
            kind: member.kind,
            signature: member.signature.clone(),
            parameters: Vec::new(),
            return_annotation: None,
            docstring: member.summary.clone(),
            bases: Vec::new(),
            owner: Some(owner.to_string()),
            location: member.location.clone(),
            members: Vec::new(),
            rank: None,
            score: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SymbolLookup {
    Found(Box<SymbolSpec>),
    NotFound { fqn: String, suggestions: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSnippet {
    pub fqn: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceLookup {
    Found(SourceSnippet),
    NotFound { fqn: String, suggestions: Vec<String> },
}

/// Where an FQN lives inside the loaded index.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Target(usize),
    Member(usize, usize),
}

/// One loaded index with its derived lookup tables and search cascade.
pub struct RepositoryView {
    repository: RepositoryConfig,
    index: Index,
    tier: ResolutionTier,
    slots: HashMap<String, Slot>,
    checkout: Option<PathBuf>,
    scanner: StructuralScanner,
    page_size: usize,
    default_limit: usize,
    search: SearchCascade,
}

impl RepositoryView {
    pub fn new(repository: RepositoryConfig, resolved: ResolvedIndex, config: &AppConfig) -> Result<Self> {
        let index = resolved.index;

        let mut slots = HashMap::new();
        for (t, target) in index.targets.iter().enumerate() {
            slots.insert(target.fqn.clone(), Slot::Target(t));
            for (m, member) in target.members.iter().enumerate() {
                slots.entry(member.fqn.clone()).or_insert(Slot::Member(t, m));
            }
        }

        let checkout = repository.checkout_path.clone().or_else(|| {
            CheckoutCache::new(config.settings.checkouts_dir()).existing(&repository.url, &repository.version)
        });
        if checkout.is_none() {
            tracing::warn!(
                "No checkout for {}@{}; read_source_code is unavailable",
                repository.name,
                repository.version
            );
        }
        let source_root = repository.source_root.clone().or_else(|| {
            checkout
                .as_deref()
                .and_then(StructuralScanner::detect_source_root)
        });

        let documents = Arc::new(SearchDocument::from_index(&index));
        let search = SearchCascade::build(&config.search, documents)?;
        tracing::info!(
            "Loaded {} targets for {} via {}; search chain: {:?}",
            index.targets.len(),
            repository.name,
            resolved.tier,
            search.capabilities()
        );

        Ok(Self {
            repository,
            index,
            tier: resolved.tier,
            slots,
            checkout,
            scanner: StructuralScanner::new(source_root),
            page_size: config.settings.page_size.max(1),
            default_limit: config.search.default_limit.max(1),
            search,
        })
    }

    pub fn repository(&self) -> &RepositoryConfig {
        &self.repository
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn tier(&self) -> ResolutionTier {
        self.tier
    }

    pub fn total_pages(&self) -> usize {
        self.index.targets.len().div_ceil(self.page_size)
    }

    /// 1-indexed page of ranked targets. Out-of-range pages are empty.
    pub fn list_modules(&self, page: usize) -> ModulePage {
        let items = if page == 0 {
            Vec::new()
        } else {
            self.index
                .targets
                .iter()
                .enumerate()
                .skip((page - 1).saturating_mul(self.page_size))
                .take(self.page_size)
                .map(|(i, target)| TargetSummary {
                    rank: i + 1,
                    fqn: target.fqn.clone(),
                    kind: target.entity.kind,
                    score: target.score,
                    summary: target.summary.clone(),
                    member_count: target.members.len(),
                })
                .collect()
        };

        ModulePage {
            repository: self.repository.name.clone(),
            version: self.index.version.clone(),
            page,
            page_size: self.page_size,
            total_pages: self.total_pages(),
            total_targets: self.index.targets.len(),
            items,
        }
    }

    pub fn inspect_symbol(&self, fqn: &str) -> SymbolLookup {
        let fqn = fqn.trim();
        match self.slots.get(fqn) {
            Some(Slot::Target(t)) => {
                let target = &self.index.targets[*t];
                let mut spec = SymbolSpec::from_entity(&target.entity, target.members.clone());
                spec.rank = Some(t + 1);
                spec.score = Some(target.score);
                SymbolLookup::Found(Box::new(spec))
            }
            Some(Slot::Member(t, m)) => {
                let target = &self.index.targets[*t];
                let member = &target.members[*m];
                let spec = self
                    .rescan_entity(&member.location.file_path, fqn)
                    .unwrap_or_else(|| SymbolSpec::from_member(member, &target.fqn));
                SymbolLookup::Found(Box::new(spec))
            }
            // Nested below an indexed name, the same set read_source_code accepts
            None => match self
                .nearest_ancestor(fqn)
                .and_then(|location| self.rescan_entity(&location.file_path, fqn))
            {
                Some(spec) => SymbolLookup::Found(Box::new(spec)),
                None => SymbolLookup::NotFound {
                    fqn: fqn.to_string(),
                    suggestions: self.suggestions(fqn),
                },
            },
        }
    }

    /// Re-derives an entity from the checkout. `None` on any failure (no
    /// checkout, drift, parse error, name not defined in the file).
    fn rescan_entity(&self, file_path: &str, fqn: &str) -> Option<SymbolSpec> {
        let checkout = self.checkout.as_deref()?;
        if let Err(e) = self.verify_file(file_path) {
            tracing::warn!("Not enriching {}: {}", fqn, e);
            return None;
        }
        let scan = self.scanner.scan_file(checkout, file_path).ok()??;
        let entity = scan.entities.iter().find(|e| e.fqn == fqn)?;
        let mut members: Vec<&SourceEntity> = scan
            .entities
            .iter()
            .filter(|e| e.owner.as_deref() == Some(fqn))
            .collect();
        members.sort_by_key(|e| e.location.start_line);
        Some(SymbolSpec::from_entity(
            entity,
            members.into_iter().map(MemberSummary::from_entity).collect(),
        ))
    }

    pub fn read_source_code(&self, fqn: &str) -> Result<SourceLookup> {
        let fqn = fqn.trim();
        let not_found = || SourceLookup::NotFound {
            fqn: fqn.to_string(),
            suggestions: self.suggestions(fqn),
        };

        let stored = self.slots.get(fqn).map(|slot| self.location_of(*slot).clone());
        let file_path = match stored.as_ref().or_else(|| self.nearest_ancestor(fqn)) {
            Some(location) => location.file_path.clone(),
            None => return Ok(not_found()),
        };

        let checkout = self.checkout.as_deref().ok_or_else(|| {
            IndexerError::Configuration(format!(
                "no checkout available for {}@{}; set `checkout_path` or run `api-indexer index`",
                self.repository.name, self.repository.version
            ))
        })?;
        let bytes = self.verify_file(&file_path)?;

        let location = match stored {
            Some(location) => location,
            // Nested below an indexed ancestor: re-derive the span from the file
            None => {
                let scan = self.scanner.scan_file(checkout, &file_path)?;
                match scan.and_then(|s| s.entities.into_iter().find(|e| e.fqn == fqn)) {
                    Some(entity) => entity.location,
                    None => return Ok(not_found()),
                }
            }
        };

        let text = String::from_utf8_lossy(&bytes);
        let start = location.start_line.max(1) as usize;
        let end = location.end_line.max(location.start_line) as usize;
        let code = text
            .lines()
            .skip(start - 1)
            .take(end - start + 1)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(SourceLookup::Found(SourceSnippet {
            fqn: fqn.to_string(),
            file_path: location.file_path,
            start_line: location.start_line,
            end_line: location.end_line,
            code,
        }))
    }

    pub async fn search_knowledge(&self, queries: &[String], limit: Option<usize>) -> Result<SearchResponse> {
        self.search
            .search(queries, limit.unwrap_or(self.default_limit).max(1))
            .await
    }

    fn location_of(&self, slot: Slot) -> &Location {
        match slot {
            Slot::Target(t) => &self.index.targets[t].entity.location,
            Slot::Member(t, m) => &self.index.targets[t].members[m].location,
        }
    }

    fn nearest_ancestor(&self, fqn: &str) -> Option<&Location> {
        let mut current = fqn;
        while let Some((parent, _)) = current.rsplit_once('.') {
            if let Some(slot) = self.slots.get(parent) {
                return Some(self.location_of(*slot));
            }
            current = parent;
        }
        None
    }

    /// Reads a checkout file and checks it against the fingerprint recorded at build time.
    fn verify_file(&self, file_path: &str) -> Result<Vec<u8>> {
        let checkout = self.checkout.as_deref().ok_or_else(|| {
            IndexerError::Configuration(format!("no checkout available for {}", self.repository.name))
        })?;
        let path = checkout.join(file_path);
        let expected = self.index.files.get(file_path);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexerError::SourceDrift {
                    path,
                    expected: expected.map(FileFingerprint::describe).unwrap_or_default(),
                    found: "file missing".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let found = FileFingerprint::of_bytes(&bytes);
        match expected {
            Some(expected) if *expected == found => Ok(bytes),
            Some(expected) => Err(IndexerError::SourceDrift {
                path,
                expected: expected.describe(),
                found: found.describe(),
            }),
            None => Err(IndexerError::SourceDrift {
                path,
                expected: "no fingerprint recorded".to_string(),
                found: found.describe(),
            }),
        }
    }

    fn suggestions(&self, fqn: &str) -> Vec<String> {
        let mut scored: Vec<(f64, &String)> = self
            .slots
            .keys()
            .map(|candidate| (strsim::jaro_winkler(fqn, candidate), candidate))
            .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, candidate)| candidate.clone())
            .collect()
    }
}
