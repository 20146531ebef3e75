pub mod models;
pub mod store;

pub use models::*;
pub use store::{index_key, parse_artifact, read_artifact, IndexStore};
