//! Combines structure and usage into the ranked target list.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::config::RankingConfig;
use crate::index::{
    CooccurrenceGraph, EntityKind, MemberSummary, RankedTarget, SourceEntity, StructuralMap,
};
use crate::indexer::miner::UsageFilter;

/// Members that stay visible even though they start with an underscore.
const PUBLIC_DUNDERS: &[&str] = &["__init__", "__call__"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankWeights {
    pub popularity: f64,
    pub cooccurrence: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            popularity: 1.0,
            cooccurrence: 1.0,
        }
    }
}

pub struct TargetRanker {
    weights: RankWeights,
    include_private: bool,
    scope: UsageFilter,
}

impl TargetRanker {
    pub fn new(weights: RankWeights, include_private: bool) -> Self {
        Self {
            weights,
            include_private,
            scope: UsageFilter::ExcludeStdlib,
        }
    }

    /// Restricts candidates to definitions inside the configured namespaces.
    pub fn with_scope(mut self, scope: UsageFilter) -> Self {
        self.scope = scope;
        self
    }

    pub fn from_config(config: &RankingConfig) -> Self {
        Self::new(
            RankWeights {
                popularity: config.popularity_weight,
                cooccurrence: config.cooccurrence_weight,
            },
            config.include_private,
        )
    }

    /// Ranks module-level classes and functions. Usage that points at names
    /// absent from `map` never contributes to any score.
    pub fn rank(&self, map: &StructuralMap, graph: &CooccurrenceGraph) -> Vec<RankedTarget> {
        let popularity = self.popularity(map, graph);
        let cooccurrence = self.cooccurrence(map, graph);

        let candidates: Vec<&SourceEntity> = map
            .entities
            .values()
            .filter(|entity| self.is_candidate(map, entity))
            .collect();

        let mut targets: Vec<RankedTarget> = candidates
            .par_iter()
            .map(|entity| {
                let pop = popularity.get(&entity.fqn).copied().unwrap_or(0) as f64;
                let cooc = cooccurrence.get(&entity.fqn).copied().unwrap_or(0.0);
                RankedTarget {
                    fqn: entity.fqn.clone(),
                    score: self.weights.popularity * pop + self.weights.cooccurrence * cooc,
                    popularity: pop,
                    cooccurrence: cooc,
                    summary: entity.doc_summary(),
                    entity: (*entity).clone(),
                    members: members(map, &entity.fqn),
                }
            })
            .collect();

        targets.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.fqn.cmp(&b.fqn)));

        tracing::info!(
            "Ranked {} targets ({} with usage)",
            targets.len(),
            targets.iter().filter(|t| t.score > 0.0).count()
        );
        targets
    }

    fn is_candidate(&self, map: &StructuralMap, entity: &SourceEntity) -> bool {
        if !matches!(entity.kind, EntityKind::Class | EntityKind::Function) {
            return false;
        }
        if !self.include_private && !entity.is_public() {
            return false;
        }
        if !self.scope.covers_definition(&entity.fqn) {
            return false;
        }
        entity
            .owner
            .as_deref()
            .and_then(|owner| map.get(owner))
            .is_some_and(|owner| owner.kind == EntityKind::Module)
    }

    fn popularity(&self, map: &StructuralMap, graph: &CooccurrenceGraph) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (fqn, count) in &graph.target_occurrences {
            let canonical = map.canonical(fqn);
            if map.contains(&canonical) {
                *counts.entry(canonical).or_insert(0) += count;
            }
        }
        counts
    }

    /// Sums edge probabilities in both directions for every entity that is
    /// an endpoint of an edge between two known entities.
    fn cooccurrence(&self, map: &StructuralMap, graph: &CooccurrenceGraph) -> BTreeMap<String, f64> {
        let mut sums = BTreeMap::new();
        for (key, associations) in &graph.edges {
            let from = map.canonical(key);
            if !map.contains(&from) {
                continue;
            }
            for association in associations {
                let to = map.canonical(&association.related);
                if to == from || !map.contains(&to) {
                    continue;
                }
                *sums.entry(from.clone()).or_insert(0.0) += association.probability;
                *sums.entry(to).or_insert(0.0) += association.probability;
            }
        }
        sums
    }
}

fn members(map: &StructuralMap, owner: &str) -> Vec<MemberSummary> {
    map.members_of(owner)
        .into_iter()
        .filter(|member| member.is_public() || PUBLIC_DUNDERS.contains(&member.name.as_str()))
        .map(MemberSummary::from_entity)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{CooccurrenceAssociation, Location};

    fn entity(fqn: &str, kind: EntityKind, owner: Option<&str>, line: u32) -> SourceEntity {
        SourceEntity {
            fqn: fqn.to_string(),
            name: fqn.rsplit('.').next().unwrap().to_string(),
            kind,
            signature: None,
            parameters: Vec::new(),
            return_annotation: None,
            docstring: None,
            owner: owner.map(str::to_string),
            location: Location::new("lib/core.py", line, line),
            bases: Vec::new(),
        }
    }

    fn structure() -> StructuralMap {
        let mut map = StructuralMap::default();
        for e in [
            entity("lib.core", EntityKind::Module, None, 1),
            entity("lib.core.Agent", EntityKind::Class, Some("lib.core"), 2),
            entity("lib.core.Agent.__init__", EntityKind::Method, Some("lib.core.Agent"), 3),
            entity("lib.core.Agent._secret", EntityKind::Method, Some("lib.core.Agent"), 4),
            entity("lib.core.Agent.run", EntityKind::Method, Some("lib.core.Agent"), 5),
            entity("lib.core.Agent.Inner", EntityKind::Class, Some("lib.core.Agent"), 6),
            entity("lib.core.Tool", EntityKind::Class, Some("lib.core"), 10),
            entity("lib.core.helper", EntityKind::Function, Some("lib.core"), 20),
            entity("lib.core._private", EntityKind::Function, Some("lib.core"), 30),
        ] {
            map.entities.insert(e.fqn.clone(), e);
        }
        map
    }

    fn edge(graph: &mut CooccurrenceGraph, from: &str, to: &str, probability: f64) {
        graph.edges.entry(from.to_string()).or_default().push(CooccurrenceAssociation {
            related: to.to_string(),
            support: 2,
            probability,
        });
    }

    #[test]
    fn test_candidates_are_public_module_level() {
        let ranked = TargetRanker::new(RankWeights::default(), false)
            .rank(&structure(), &CooccurrenceGraph::default());
        let fqns: Vec<_> = ranked.iter().map(|t| t.fqn.as_str()).collect();
        // All zero scores, so FQN order
        assert_eq!(fqns, vec!["lib.core.Agent", "lib.core.Tool", "lib.core.helper"]);

        let with_private = TargetRanker::new(RankWeights::default(), true)
            .rank(&structure(), &CooccurrenceGraph::default());
        assert!(with_private.iter().any(|t| t.fqn == "lib.core._private"));
    }

    #[test]
    fn test_scope_keeps_namespace_definitions_only() {
        let mut map = structure();
        for e in [
            entity("tests", EntityKind::Module, None, 1),
            entity("tests.test_core", EntityKind::Module, None, 1),
            entity("tests.test_core.test_agent", EntityKind::Function, Some("tests.test_core"), 3),
        ] {
            map.entities.insert(e.fqn.clone(), e);
        }
        let mut graph = CooccurrenceGraph::default();
        graph
            .target_occurrences
            .insert("tests.test_core.test_agent".to_string(), 4);

        let unscoped = TargetRanker::new(RankWeights::default(), false).rank(&map, &graph);
        assert_eq!(unscoped[0].fqn, "tests.test_core.test_agent");

        let scoped = TargetRanker::new(RankWeights::default(), false)
            .with_scope(UsageFilter::from_namespaces(&["lib".to_string()]))
            .rank(&map, &graph);
        let fqns: Vec<_> = scoped.iter().map(|t| t.fqn.as_str()).collect();
        assert_eq!(fqns, vec!["lib.core.Agent", "lib.core.Tool", "lib.core.helper"]);
    }

    #[test]
    fn test_members_keep_dunders_and_source_order() {
        let ranked = TargetRanker::new(RankWeights::default(), false)
            .rank(&structure(), &CooccurrenceGraph::default());
        let agent = ranked.iter().find(|t| t.fqn == "lib.core.Agent").unwrap();
        let names: Vec<_> = agent.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["__init__", "run", "Inner"]);
    }

    #[test]
    fn test_scores_combine_popularity_and_cooccurrence() {
        let mut graph = CooccurrenceGraph::default();
        graph.target_occurrences.insert("lib.core.Tool".to_string(), 3);
        graph.target_occurrences.insert("lib.core.Agent".to_string(), 1);
        edge(&mut graph, "lib.core.Agent", "lib.core.helper", 0.5);
        edge(&mut graph, "lib.core.helper", "lib.core.Agent", 1.0);

        let ranked = TargetRanker::new(
            RankWeights {
                popularity: 1.0,
                cooccurrence: 2.0,
            },
            false,
        )
        .rank(&structure(), &graph);

        let agent = ranked.iter().find(|t| t.fqn == "lib.core.Agent").unwrap();
        assert_eq!(agent.popularity, 1.0);
        assert!((agent.cooccurrence - 1.5).abs() < 1e-9);
        assert!((agent.score - 4.0).abs() < 1e-9);

        let fqns: Vec<_> = ranked.iter().map(|t| t.fqn.as_str()).collect();
        assert_eq!(fqns, vec!["lib.core.Agent", "lib.core.Tool", "lib.core.helper"]);
    }

    #[test]
    fn test_edges_to_unknown_names_contribute_nothing() {
        let mut graph = CooccurrenceGraph::default();
        edge(&mut graph, "lib.core.Tool", "lib.core.Hallucinated", 1.0);
        edge(&mut graph, "lib.core.Hallucinated", "lib.core.Tool", 1.0);
        graph.target_occurrences.insert("lib.core.Hallucinated".to_string(), 5);

        let ranked = TargetRanker::new(RankWeights::default(), false).rank(&structure(), &graph);
        assert!(ranked.iter().all(|t| t.score == 0.0));
        assert!(ranked.iter().all(|t| t.fqn != "lib.core.Hallucinated"));
    }

    #[test]
    fn test_aliases_fold_onto_definition() {
        let mut map = structure();
        map.aliases.insert("lib.Tool".to_string(), "lib.core.Tool".to_string());
        let mut graph = CooccurrenceGraph::default();
        graph.target_occurrences.insert("lib.Tool".to_string(), 2);

        let ranked = TargetRanker::new(RankWeights::default(), false).rank(&map, &graph);
        assert_eq!(ranked[0].fqn, "lib.core.Tool");
        assert_eq!(ranked[0].popularity, 2.0);
    }
}
