//! Event type definitions for progress reporting.

use crate::core::checkpoint::RunPhase;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// All events emitted by a dedup run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Run lifecycle events
    Run(RunEvent),
    /// Discovery and checkpoint reconciliation events
    Discovery(DiscoveryEvent),
    /// Signature stage events
    Signature(SignatureEvent),
    /// Comparison stage events
    Compare(CompareEvent),
}

/// Run-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    /// The coordinator started, either fresh or from an existing checkpoint
    Started { run_id: String, resumed: bool },
    /// Lifecycle transition
    PhaseChanged { phase: RunPhase },
    /// Run finished and groups were produced
    Completed { summary: RunSummary },
    /// Run stopped before the pair space was exhausted
    Interrupted { resumable: bool },
    /// A fatal error ended the run
    Error { message: String },
}

/// Events produced while reconciling discovery with the checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DiscoveryEvent {
    /// Discovery has started
    Started { root: PathBuf },
    /// A file could not be inspected (non-fatal)
    Error { path: PathBuf, message: String },
    /// Discovery and reconciliation finished
    Completed(DiscoverySummary),
}

/// What reconciliation changed in the checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverySummary {
    /// Images present in the collection
    pub total_images: usize,
    /// Images seen for the first time
    pub new_images: usize,
    /// Known images whose fingerprint changed
    pub changed_images: usize,
    /// Known images no longer present
    pub missing_images: usize,
    /// Pairs discarded because one side changed
    pub invalidated_pairs: usize,
}

/// Events during the signature stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SignatureEvent {
    /// Signature stage has started
    Started { pending: usize, cached: usize },
    /// Progress update
    Progress(SignatureProgress),
    /// An image could not be decoded and is excluded from pairing
    Failed { path: PathBuf, reason: String },
    /// Signature stage completed
    Completed { signed: usize, failed: usize },
}

/// Progress information during the signature stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureProgress {
    /// Work units finished in this run
    pub completed: usize,
    /// Work units dispatched in this run
    pub total: usize,
    /// Failures so far in this run
    pub failed: usize,
}

/// Events during the comparison stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompareEvent {
    /// Comparison has started
    Started { total_pairs: u64, already_resolved: u64 },
    /// Progress update
    Progress(CompareProgress),
    /// A pair ended in a terminal error state
    Error { a: u32, b: u32, message: String },
    /// Comparison completed
    Completed { resolved: u64, errored: u64 },
}

/// Progress information during the comparison stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareProgress {
    /// Pairs resolved, including those resolved by earlier runs
    pub pairs_resolved: u64,
    /// Size of the pair space
    pub pairs_total: u64,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Non-failed images in the collection
    pub total_images: usize,
    /// Images excluded because they could not be decoded
    pub failed_images: usize,
    /// Pairs in the comparison space
    pub total_pairs: u64,
    /// Groups with more than one member
    pub duplicate_groups: usize,
    /// Images that belong to a group but are not its first member
    pub duplicate_count: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}
