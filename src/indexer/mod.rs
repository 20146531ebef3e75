pub mod imports;
pub mod miner;
pub mod parser;
pub mod pipeline;
pub mod ranker;
pub mod scanner;
pub mod walker;

pub use imports::{module_name_for, ImportBindings, ModuleName};
pub use miner::{CheckoutSource, UsageFilter, UsageMiner};
pub use parser::{ParsedFile, Parser};
pub use pipeline::{build_index, BuildOutcome, BuildStats, IndexPipeline};
pub use ranker::{RankWeights, TargetRanker};
pub use scanner::{FileScan, StructuralScanner};
pub use walker::FileWalker;
