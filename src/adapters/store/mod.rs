//! Feature store abstraction and in-memory implementation

pub mod memory;
pub mod predicate;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::FeatureStore;
