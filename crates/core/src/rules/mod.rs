pub mod index;
pub mod store;

pub use index::{index_keys, IndexBuilder, IndexRebuildReport};
pub use store::RuleStore;
