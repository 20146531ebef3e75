//! Usage miner: counts which imported symbols are referenced together
//! across the target checkout and its sample projects.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tree_sitter::StreamingIterator;

use crate::error::{IndexerError, Result};
use crate::index::{CooccurrenceAssociation, CooccurrenceGraph, StructuralMap};
use crate::indexer::imports::{is_identifier, module_name_for, ImportBindings, ModuleName};
use crate::indexer::parser::{ParsedFile, Parser};
use crate::indexer::walker::{relative_path, FileWalker};
use crate::languages::{LanguageGrammar, LanguageRegistry};

/// A checkout whose files are mined for references.
#[derive(Debug, Clone)]
pub struct CheckoutSource {
    pub root: PathBuf,
    pub source_root: Option<String>,
    /// Popularity is counted over target files only
    pub is_target: bool,
}

impl CheckoutSource {
    pub fn target(root: impl Into<PathBuf>, source_root: Option<String>) -> Self {
        Self {
            root: root.into(),
            source_root,
            is_target: true,
        }
    }

    pub fn sample(root: impl Into<PathBuf>, source_root: Option<String>) -> Self {
        Self {
            root: root.into(),
            source_root,
            is_target: false,
        }
    }
}

/// Which referenced names count as usage of the indexed library.
#[derive(Debug, Clone, PartialEq)]
pub enum UsageFilter {
    /// Keep names equal to, or nested under, one of the namespaces
    Namespaces(Vec<String>),
    /// No namespaces configured: keep everything outside the standard library
    ExcludeStdlib,
}

impl UsageFilter {
    pub fn from_namespaces(namespaces: &[String]) -> Self {
        let namespaces: Vec<String> = namespaces
            .iter()
            .map(|ns| ns.trim().trim_end_matches('.').to_string())
            .filter(|ns| !ns.is_empty())
            .collect();
        if namespaces.is_empty() {
            UsageFilter::ExcludeStdlib
        } else {
            UsageFilter::Namespaces(namespaces)
        }
    }

    pub fn admits(&self, fqn: &str, grammar: &dyn LanguageGrammar) -> bool {
        match self {
            UsageFilter::Namespaces(_) => self.covers_definition(fqn),
            UsageFilter::ExcludeStdlib => {
                let root = fqn.split('.').next().unwrap_or(fqn);
                !root.is_empty() && !grammar.is_stdlib_module(root)
            }
        }
    }

    /// Whether a definition of the target checkout belongs to the library's
    /// public namespaces. Everything qualifies when none are configured.
    pub fn covers_definition(&self, fqn: &str) -> bool {
        match self {
            UsageFilter::Namespaces(namespaces) => namespaces.iter().any(|ns| {
                fqn == ns
                    || fqn
                        .strip_prefix(ns.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }),
            UsageFilter::ExcludeStdlib => true,
        }
    }
}

pub struct UsageMiner {
    filter: UsageFilter,
    min_support: usize,
    walker: FileWalker,
    parser: Parser,
}

impl UsageMiner {
    pub fn new(filter: UsageFilter, min_support: usize) -> Self {
        Self {
            filter,
            min_support: min_support.max(1),
            walker: FileWalker::new(LanguageRegistry::new()),
            parser: Parser::default(),
        }
    }

    /// Mines every file of every source. When `structure` is given, references
    /// to re-exported names are folded onto their defining FQN before counting.
    pub fn mine(
        &self,
        sources: &[CheckoutSource],
        structure: Option<&StructuralMap>,
        cancel: &CancellationToken,
    ) -> Result<CooccurrenceGraph> {
        let mut files: Vec<(&CheckoutSource, PathBuf)> = Vec::new();
        for source in sources {
            for file in self.walker.walk(&source.root)? {
                files.push((source, file));
            }
        }
        tracing::info!(
            "Mining references in {} files across {} checkouts",
            files.len(),
            sources.len()
        );

        let per_file: Vec<Option<(bool, BTreeSet<String>)>> = files
            .par_iter()
            .map(|(source, file)| {
                if cancel.is_cancelled() {
                    return Err(IndexerError::Cancelled);
                }
                match self.file_references(source, file) {
                    Ok(refs) => {
                        let refs = match structure {
                            Some(map) => refs.iter().map(|fqn| map.canonical(fqn)).collect(),
                            None => refs,
                        };
                        Ok(Some((source.is_target, refs)))
                    }
                    Err(IndexerError::Parse { path, message }) => {
                        tracing::warn!("Skipping unparsable file {}: {}", path, message);
                        Ok(None)
                    }
                    Err(IndexerError::Io(e)) => {
                        tracing::warn!("Skipping unreadable file {}: {}", file.display(), e);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut graph = CooccurrenceGraph::default();
        let mut pairs: BTreeMap<(String, String), usize> = BTreeMap::new();

        for (is_target, refs) in per_file.into_iter().flatten() {
            graph.files_mined += 1;
            for fqn in &refs {
                *graph.occurrences.entry(fqn.clone()).or_insert(0) += 1;
                if is_target {
                    *graph.target_occurrences.entry(fqn.clone()).or_insert(0) += 1;
                }
            }
            let refs: Vec<&String> = refs.iter().collect();
            for (i, a) in refs.iter().enumerate() {
                for b in &refs[i + 1..] {
                    *pairs.entry(((*a).clone(), (*b).clone())).or_insert(0) += 1;
                }
            }
        }

        for ((a, b), support) in pairs {
            if support < self.min_support {
                continue;
            }
            let count_a = graph.occurrences.get(&a).copied().unwrap_or(support);
            let count_b = graph.occurrences.get(&b).copied().unwrap_or(support);
            graph.edges.entry(a.clone()).or_default().push(CooccurrenceAssociation {
                related: b.clone(),
                support,
                probability: support as f64 / count_a as f64,
            });
            graph.edges.entry(b).or_default().push(CooccurrenceAssociation {
                related: a,
                support,
                probability: support as f64 / count_b as f64,
            });
        }
        for associations in graph.edges.values_mut() {
            associations.sort_by(|x, y| x.related.cmp(&y.related));
        }

        tracing::info!(
            "Mined {} files: {} referenced names, {} directed associations (min support {})",
            graph.files_mined,
            graph.occurrences.len(),
            graph.edge_count(),
            self.min_support
        );
        Ok(graph)
    }

    fn file_references(&self, source: &CheckoutSource, file: &Path) -> Result<BTreeSet<String>> {
        let relative = relative_path(&source.root, file);
        let module = module_name_for(&relative, source.source_root.as_deref());
        let parsed = self.parser.parse_file(file).map_err(|e| match e {
            IndexerError::Parse { message, .. } => IndexerError::Parse {
                path: relative.clone(),
                message,
            },
            other => other,
        })?;
        Ok(self.references_in(&parsed, module.as_ref()))
    }

    /// Distinct library FQNs a parsed file refers to.
    pub fn references_in(&self, parsed: &ParsedFile, module: Option<&ModuleName>) -> BTreeSet<String> {
        let bindings = ImportBindings::collect(parsed, module);
        let mut refs = BTreeSet::new();
        if bindings.is_empty() {
            return refs;
        }

        for imported in bindings.imports() {
            refs.insert(imported.target.clone());
        }

        if let Some(query) = parsed.grammar.cached_references_query() {
            let mut cursor = tree_sitter::QueryCursor::new();
            let mut matches = cursor.matches(query, parsed.root_node(), parsed.source_bytes());

            while let Some(m) = matches.next() {
                for capture in m.captures {
                    let capture_name = query.capture_names()[capture.index as usize];
                    if !matches!(capture_name, "call_name" | "attribute_chain" | "extends_type") {
                        continue;
                    }
                    let text: String = parsed
                        .node_text(&capture.node)
                        .chars()
                        .filter(|c| !c.is_whitespace() && *c != '\\')
                        .collect();
                    // Only plain dotted names; `f().x` or `a[0].b` have no static target
                    if !text.split('.').all(is_identifier) {
                        continue;
                    }
                    if let Some(fqn) = bindings.resolve(&text) {
                        refs.insert(fqn);
                    }
                }
            }
        }

        refs.retain(|fqn| self.filter.admits(fqn, parsed.grammar.as_ref()));
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn refs(source: &str, filter: UsageFilter) -> Vec<String> {
        let miner = UsageMiner::new(filter, 2);
        let parser = Parser::default();
        let parsed = parser.parse_source(source, parser.python().unwrap()).unwrap();
        miner.references_in(&parsed, None).into_iter().collect()
    }

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_references_resolve_through_imports() {
        let found = refs(
            "from google.adk.agents import Agent\nfrom google.genai import types\nimport os\n\nagent = Agent(config=types.GenerateContentConfig())\nos.getcwd()\n",
            UsageFilter::from_namespaces(&["google.adk".to_string(), "google.genai".to_string()]),
        );
        assert_eq!(
            found,
            vec![
                "google.adk.agents.Agent",
                "google.genai.types",
                "google.genai.types.GenerateContentConfig",
            ]
        );
    }

    #[test]
    fn test_namespace_match_is_segment_aware() {
        let grammar = crate::languages::python::PythonGrammar;
        let filter = UsageFilter::from_namespaces(&["google.adk".to_string()]);
        assert!(filter.admits("google.adk", &grammar));
        assert!(filter.admits("google.adk.tools.Tool", &grammar));
        assert!(!filter.admits("google.adkx.Tool", &grammar));
        assert!(!filter.admits("google.genai", &grammar));
    }

    #[test]
    fn test_dynamic_filter_drops_stdlib() {
        let found = refs(
            "import json\nfrom pydantic import BaseModel\njson.dumps(BaseModel())\n",
            UsageFilter::from_namespaces(&[]),
        );
        assert_eq!(found, vec!["pydantic.BaseModel"]);
    }

    #[test]
    fn test_unbound_names_are_ignored() {
        let found = refs("x = Agent()\nobj.method()\n", UsageFilter::ExcludeStdlib);
        assert!(found.is_empty());
    }

    #[test]
    fn test_pair_needs_min_support_files() {
        let dir = TempDir::new().unwrap();
        let both = "from lib import A, B\nA()\nB()\n";
        write(dir.path(), "one.py", both);
        write(dir.path(), "two.py", "from lib import A\nA()\n");

        let miner = UsageMiner::new(UsageFilter::from_namespaces(&["lib".to_string()]), 2);
        let sources = vec![CheckoutSource::sample(dir.path(), None)];
        let graph = miner.mine(&sources, None, &CancellationToken::new()).unwrap();
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.occurrences.get("lib.A"), Some(&2));
        assert!(graph.target_occurrences.is_empty());

        write(dir.path(), "three.py", both);
        let graph = miner.mine(&sources, None, &CancellationToken::new()).unwrap();
        let from_a = graph.related("lib.A");
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_a[0].related, "lib.B");
        assert_eq!(from_a[0].support, 2);
        // A appears in 3 files, B in 2
        assert!((from_a[0].probability - 2.0 / 3.0).abs() < 1e-9);
        assert!((graph.related("lib.B")[0].probability - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reexports_are_counted_once_per_file() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "app.py",
            "from lib import Agent\nfrom lib.agents import Agent as Impl\nAgent()\nImpl()\n",
        );
        let mut map = StructuralMap::default();
        map.aliases.insert("lib.Agent".to_string(), "lib.agents.Agent".to_string());

        let miner = UsageMiner::new(UsageFilter::from_namespaces(&["lib".to_string()]), 1);
        let graph = miner
            .mine(&[CheckoutSource::sample(dir.path(), None)], Some(&map), &CancellationToken::new())
            .unwrap();
        assert_eq!(graph.occurrences.get("lib.agents.Agent"), Some(&1));
        assert!(!graph.occurrences.contains_key("lib.Agent"));
    }

    #[test]
    fn test_stubbed_module_counts_once() {
        let target = TempDir::new().unwrap();
        write(target.path(), "lib/use.py", "from lib.core import A\nA()\n");
        write(target.path(), "lib/use.pyi", "from lib.core import A\ndef make() -> A: ...\n");

        let miner = UsageMiner::new(UsageFilter::from_namespaces(&["lib".to_string()]), 2);
        let graph = miner
            .mine(&[CheckoutSource::target(target.path(), None)], None, &CancellationToken::new())
            .unwrap();
        assert_eq!(graph.files_mined, 1);
        assert_eq!(graph.target_occurrences.get("lib.core.A"), Some(&1));
    }

    #[test]
    fn test_target_occurrences_count_target_files_only() {
        let target = TempDir::new().unwrap();
        let sample = TempDir::new().unwrap();
        write(target.path(), "lib/use.py", "from lib.core import A\nA()\n");
        write(sample.path(), "app.py", "from lib.core import A\nA()\n");

        let miner = UsageMiner::new(UsageFilter::from_namespaces(&["lib".to_string()]), 2);
        let graph = miner
            .mine(
                &[
                    CheckoutSource::target(target.path(), None),
                    CheckoutSource::sample(sample.path(), None),
                ],
                None,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(graph.occurrences.get("lib.core.A"), Some(&2));
        assert_eq!(graph.target_occurrences.get("lib.core.A"), Some(&1));
        assert_eq!(graph.files_mined, 2);
    }
}
