//! # Core Module
//!
//! The checkpointed duplicate detection engine.
//!
//! ## Modules
//! - `scanner` - Discovers images under a collection root
//! - `signature` - Decodes images into compact comparable signatures
//! - `enumerator` - Walks the pending pair space
//! - `comparator` - Pre-filters, scores, classifies and groups pairs
//! - `checkpoint` - Persists every acknowledged result
//! - `pool` - Executes signature and comparison jobs in parallel
//! - `engine` - Owns the run lifecycle

pub mod checkpoint;
pub mod comparator;
pub mod engine;
pub mod enumerator;
pub mod pool;
pub mod scanner;
pub mod signature;

// Re-export commonly used types
pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
pub use comparator::{DuplicateGroup, PairVerdict, ResultAggregator, Verdict};
pub use engine::{Engine, EngineConfig, Progress, RunHandle, RunOutcome};
pub use enumerator::PairKey;
pub use scanner::DiscoveredImage;
pub use signature::Signature;
