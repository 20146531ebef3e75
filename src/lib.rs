pub mod config;
pub mod error;
pub mod git;
pub mod index;
pub mod indexer;
pub mod languages;
pub mod search;
pub mod server;

pub use config::{AppConfig, RankingConfig, RepositoryConfig, SearchConfig, Settings};
pub use error::{IndexerError, ResolutionTier, Result, TierAttempt};
pub use git::CheckoutCache;
pub use index::{
    index_key, BaseRef, CooccurrenceAssociation, CooccurrenceGraph, EntityKind, FileFingerprint,
    Index, IndexStore, InheritanceEdge, Location, MemberSummary, Parameter, RankedTarget,
    SourceEntity, StructuralMap,
};
pub use indexer::{
    build_index, BuildOutcome, BuildStats, CheckoutSource, IndexPipeline, RankWeights,
    StructuralScanner, TargetRanker, UsageFilter, UsageMiner,
};
pub use languages::LanguageRegistry;
pub use search::{SearchCapability, SearchCascade, SearchDocument, SearchHit, SearchResponse};
pub use server::{
    IndexResolver, ModulePage, QueryServer, RepositoryView, SourceLookup, SourceSnippet,
    SymbolLookup, SymbolSpec,
};
