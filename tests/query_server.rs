//! Integration tests for the four query operations over a built index.

mod common;

use std::sync::Arc;

use api_indexer::{
    build_index, AppConfig, IndexStore, IndexerError, QueryServer, SearchCapability,
    SearchConfig, SourceLookup, SymbolLookup,
};
use tokio_util::sync::CancellationToken;

use common::{write, Fixture};

// ============================================================================
// Test Helpers
// ============================================================================

/// Builds the fixture index into the configured store.
fn index_fixture(fixture: &Fixture, config: &AppConfig) {
    let (index, _) = build_index(
        &config.repositories[0],
        &config.ranking,
        fixture.target_path(),
        &fixture.sample_paths(),
        &CancellationToken::new(),
    )
    .unwrap();
    IndexStore::new(config.settings.indexes_dir())
        .save(&index)
        .unwrap();
}

fn server_for(fixture: &Fixture) -> QueryServer {
    server_with(fixture, fixture.config())
}

fn server_with(fixture: &Fixture, config: AppConfig) -> QueryServer {
    index_fixture(fixture, &config);
    QueryServer::new(Arc::new(config))
}

fn queries(items: &[&str]) -> Vec<String> {
    items.iter().map(|q| q.to_string()).collect()
}

// ============================================================================
// list_modules
// ============================================================================

mod list_modules {
    use super::*;

    #[tokio::test]
    async fn test_pages_are_disjoint_and_cover_all_targets() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let first = server.list_modules(None, 1).await.unwrap();
        let second = server.list_modules(None, 2).await.unwrap();
        assert_eq!(first.total_targets, 4);
        assert_eq!(first.total_pages, 2);
        assert_eq!(first.items.len(), 2);
        assert_eq!(second.items.len(), 2);

        let mut seen: Vec<_> = first
            .items
            .iter()
            .chain(second.items.iter())
            .map(|item| item.fqn.clone())
            .collect();
        let ranks: Vec<_> = first
            .items
            .iter()
            .chain(second.items.iter())
            .map(|item| item.rank)
            .collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 4);
    }

    #[tokio::test]
    async fn test_page_beyond_total_is_empty() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let page = server.list_modules(None, 3).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, 2);

        let zero = server.list_modules(None, 0).await.unwrap();
        assert!(zero.items.is_empty());
    }

    #[tokio::test]
    async fn test_scores_are_non_increasing() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let mut scores = Vec::new();
        for page in 1..=2 {
            let page = server.list_modules(Some("adklib"), page).await.unwrap();
            scores.extend(page.items.iter().map(|item| item.score));
        }
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn test_unknown_repository_is_configuration_error() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let result = server.list_modules(Some("nope"), 1).await;
        assert!(matches!(result, Err(IndexerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_missing_index_reports_every_tier() {
        let fixture = Fixture::new();
        // Nothing built into the store
        let server = QueryServer::new(fixture.shared_config());

        let err = server.list_modules(None, 1).await.unwrap_err();
        match &err {
            IndexerError::IndexResolution { attempts, .. } => assert_eq!(attempts.len(), 4),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("api-indexer index"));
    }
}

// ============================================================================
// inspect_symbol
// ============================================================================

mod inspect_symbol {
    use super::*;

    #[tokio::test]
    async fn test_every_listed_name_is_inspectable() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);
        let view = server.repository(None).await.unwrap();

        for target in &view.index().targets {
            let lookup = server.inspect_symbol(None, &target.fqn).await.unwrap();
            assert!(matches!(lookup, SymbolLookup::Found(_)), "{}", target.fqn);
            for member in &target.members {
                let lookup = server.inspect_symbol(None, &member.fqn).await.unwrap();
                assert!(matches!(lookup, SymbolLookup::Found(_)), "{}", member.fqn);
            }
        }
    }

    #[tokio::test]
    async fn test_target_carries_members_and_rank() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let SymbolLookup::Found(spec) = server
            .inspect_symbol(None, "adklib.agents.Agent")
            .await
            .unwrap()
        else {
            panic!("Agent should be found");
        };
        assert!(spec.rank.is_some());
        assert_eq!(spec.docstring.as_deref(), Some("Runs a model with tools attached."));
        let members: Vec<_> = spec.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(members, vec!["__init__", "run", "Options"]);
    }

    #[tokio::test]
    async fn test_member_is_enriched_from_checkout() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let SymbolLookup::Found(spec) = server
            .inspect_symbol(None, "adklib.agents.Agent.run")
            .await
            .unwrap()
        else {
            panic!("run should be found");
        };
        assert_eq!(
            spec.docstring.as_deref(),
            Some("Run the agent on one prompt.\n\nReturns the final answer.")
        );
        let params: Vec<_> = spec.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(params, vec!["self", "prompt"]);
        assert_eq!(spec.return_annotation.as_deref(), Some("str"));
        assert_eq!(spec.owner.as_deref(), Some("adklib.agents.Agent"));
    }

    #[tokio::test]
    async fn test_member_falls_back_to_summary_after_drift() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);
        write(fixture.target_path(), "adklib/agents.py", "# rewritten\n");

        let SymbolLookup::Found(spec) = server
            .inspect_symbol(None, "adklib.agents.Agent.run")
            .await
            .unwrap()
        else {
            panic!("run should still be found from the index");
        };
        assert_eq!(spec.docstring.as_deref(), Some("Run the agent on one prompt."));
        assert!(spec.parameters.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_name_suggests_close_matches() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        match server.inspect_symbol(None, "adklib.agents.Agnt").await.unwrap() {
            SymbolLookup::NotFound { suggestions, .. } => {
                assert_eq!(suggestions.first().map(String::as_str), Some("adklib.agents.Agent"));
            }
            SymbolLookup::Found(_) => panic!("misspelled name must not resolve"),
        }
    }

    #[tokio::test]
    async fn test_names_below_a_target_match_read_source_code() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        for fqn in ["adklib.tools.FunctionTool._bind", "adklib.agents.Agent.Options.describe"] {
            let inspected = server.inspect_symbol(None, fqn).await.unwrap();
            let SymbolLookup::Found(spec) = inspected else {
                panic!("{fqn} should be inspectable");
            };
            assert_eq!(spec.fqn, fqn);
            assert!(spec.rank.is_none());

            let source = server.read_source_code(None, fqn).await.unwrap();
            let SourceLookup::Found(snippet) = source else {
                panic!("{fqn} should be readable");
            };
            assert_eq!(snippet.start_line, spec.location.start_line);
            assert_eq!(snippet.end_line, spec.location.end_line);
        }

        let SymbolLookup::Found(bind) = server
            .inspect_symbol(None, "adklib.tools.FunctionTool._bind")
            .await
            .unwrap()
        else {
            unreachable!();
        };
        assert_eq!(bind.owner.as_deref(), Some("adklib.tools.FunctionTool"));
        assert_eq!(bind.kind, api_indexer::EntityKind::Method);
    }

    #[tokio::test]
    async fn test_undefined_name_below_a_target_is_not_found() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let inspected = server
            .inspect_symbol(None, "adklib.tools.FunctionTool.missing")
            .await
            .unwrap();
        assert!(matches!(inspected, SymbolLookup::NotFound { .. }));
        let source = server
            .read_source_code(None, "adklib.tools.FunctionTool.missing")
            .await
            .unwrap();
        assert!(matches!(source, SourceLookup::NotFound { .. }));
    }
}

// ============================================================================
// read_source_code
// ============================================================================

mod read_source_code {
    use super::*;

    #[tokio::test]
    async fn test_reads_exact_span() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let SourceLookup::Found(snippet) = server
            .read_source_code(None, "adklib.agents.make_agent")
            .await
            .unwrap()
        else {
            panic!("make_agent should be readable");
        };
        assert_eq!(snippet.file_path, "adklib/agents.py");
        assert_eq!(
            snippet.code,
            "def make_agent(name: str) -> Agent:\n    \"\"\"Create an agent with no tools.\"\"\"\n    return Agent(name)"
        );
        assert_eq!(
            snippet.end_line - snippet.start_line + 1,
            snippet.code.lines().count() as u32
        );
    }

    #[tokio::test]
    async fn test_nested_name_is_located_by_rescan() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let SourceLookup::Found(snippet) = server
            .read_source_code(None, "adklib.agents.Agent.Options.describe")
            .await
            .unwrap()
        else {
            panic!("nested method should be readable");
        };
        assert!(snippet.code.trim_start().starts_with("def describe(self) -> str:"));
        assert!(snippet.code.contains("return \"options\""));
    }

    #[tokio::test]
    async fn test_drifted_file_is_an_error() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);
        write(
            fixture.target_path(),
            "adklib/tools.py",
            "\"\"\"Tool primitives.\"\"\"\n\nclass ToolConfig:\n    pass\n",
        );

        let result = server.read_source_code(None, "adklib.tools.ToolConfig").await;
        assert!(matches!(result, Err(IndexerError::SourceDrift { .. })));
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let lookup = server
            .read_source_code(None, "other.module.Thing")
            .await
            .unwrap();
        assert!(matches!(lookup, SourceLookup::NotFound { .. }));
    }
}

// ============================================================================
// search_knowledge
// ============================================================================

mod search_knowledge {
    use super::*;

    #[tokio::test]
    async fn test_identifier_query_finds_class() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let response = server
            .search_knowledge(None, &queries(&["ToolConfig"]), Some(5))
            .await
            .unwrap();
        assert_eq!(response.hits[0].fqn, "adklib.tools.ToolConfig");
        assert!(response.hits.len() <= 5);
        assert!(response.fallbacks.is_empty());
    }

    #[tokio::test]
    async fn test_sub_queries_are_combined() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let response = server
            .search_knowledge(None, &queries(&["agent prompt", "function tool"]), None)
            .await
            .unwrap();
        let fqns: Vec<_> = response.hits.iter().map(|h| h.fqn.as_str()).collect();
        assert!(fqns.contains(&"adklib.agents.Agent.run"));
        assert!(fqns.contains(&"adklib.tools.FunctionTool"));
    }

    #[tokio::test]
    async fn test_missing_embedding_credential_falls_back_to_bm25() {
        let fixture = Fixture::new();
        let mut config = fixture.config();
        config.search = SearchConfig {
            provider: "hybrid".to_string(),
            embedding_endpoint: Some("http://127.0.0.1:9/v1".to_string()),
            embedding_api_key_env: "API_INDEXER_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        let server = server_with(&fixture, config);

        let response = server
            .search_knowledge(None, &queries(&["ToolConfig"]), None)
            .await
            .unwrap();
        assert_eq!(response.provider, SearchCapability::Bm25);
        assert_eq!(response.hits[0].fqn, "adklib.tools.ToolConfig");
    }

    #[tokio::test]
    async fn test_keyword_provider_when_configured() {
        let fixture = Fixture::new();
        let mut config = fixture.config();
        config.search.provider = "keyword".to_string();
        let server = server_with(&fixture, config);

        let response = server
            .search_knowledge(None, &queries(&["function tool"]), None)
            .await
            .unwrap();
        assert_eq!(response.provider, SearchCapability::Keyword);
        assert_eq!(response.hits[0].fqn, "adklib.tools.FunctionTool");
    }

    #[tokio::test]
    async fn test_no_match_is_empty_not_error() {
        let fixture = Fixture::new();
        let server = server_for(&fixture);

        let response = server
            .search_knowledge(None, &queries(&["kubernetes"]), None)
            .await
            .unwrap();
        assert!(response.hits.is_empty());
    }
}
