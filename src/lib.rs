//! # Resumable Photo Dedup
//!
//! Finds duplicate and near-duplicate images in very large collections,
//! surviving interruption without redoing completed work.
//!
//! ## Core Guarantees
//! - **Resumable** - every signature and pair verdict is durable before it is
//!   acknowledged, so a killed run continues where it stopped
//! - **Idempotent** - recomputing a stored result is a no-op; a *different*
//!   result for the same key is surfaced as a divergence
//! - **Deterministic** - the groups depend only on the images and the
//!   settings, never on worker count or interleaving
//!
//! ## Architecture
//! - `core` - The checkpointed pairwise-similarity engine
//! - `events` - Event-driven progress reporting
//! - `error` - Typed errors with recovery classes

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use crate::core::engine::{Engine, EngineConfig, RunHandle, RunOutcome};
pub use error::{EngineError, Result};

/// Initialize tracing for the library
///
/// This should be called by the application entry point. `RUST_LOG`
/// overrides `default_directive` when set.
pub fn init_tracing(default_directive: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    // A subscriber installed by the host application wins
    let _ = tracing::subscriber::set_global_default(subscriber);
}
