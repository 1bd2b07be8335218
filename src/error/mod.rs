//! # Error Module
//!
//! Typed errors for the checkpointed duplicate engine.
//!
//! ## Recovery Classes
//! - **Local** - `DecodeError` and `CompareError` are recorded against the
//!   image or pair that caused them and the run continues
//! - **Fatal, resumable** - `CheckpointError` halts the run; everything
//!   acknowledged before the failure is still on disk
//! - **Fatal, not resumable** - `DivergenceError` means two different results
//!   were produced for the same key and must be investigated
//! - **Up front** - `ConfigError` is raised before any work is dispatched

use std::path::PathBuf;
use thiserror::Error;

/// Top-level engine error
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Discovery error: {0}")]
    Scan(#[from] ScanError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Comparison error: {0}")]
    Compare(#[from] CompareError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Divergence detected: {0}")]
    Divergence(#[from] DivergenceError),

    #[error("Worker pool error: {0}")]
    Pool(String),
}

impl EngineError {
    /// Whether a run that ended with this error can be resumed from its
    /// checkpoint without manual intervention.
    pub fn is_resumable(&self) -> bool {
        match self {
            EngineError::Divergence(_) => false,
            EngineError::Config(_) => false,
            EngineError::Checkpoint(CheckpointError::Corrupted { .. }) => false,
            _ => true,
        }
    }
}

/// Errors that occur while discovering images
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Permission denied accessing: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that occur while decoding an image into a signature
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported image format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to decode image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Image is empty or corrupted: {path}")]
    EmptyImage { path: PathBuf },

    #[error("Failed to open image file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Signature extraction panicked for {path}: {message}")]
    Panicked { path: PathBuf, message: String },
}

/// Errors raised by a similarity metric for a single pair
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompareError {
    #[error("Signatures cannot be compared: {reason}")]
    IncompatibleSignatures { reason: String },

    #[error("Metric returned score {score} outside [0, 1]")]
    ScoreOutOfRange { score: f64 },

    #[error("Metric panicked: {message}")]
    Panicked { message: String },
}

/// Errors from the durable checkpoint layer
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Failed to open checkpoint database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Checkpoint query failed: {0}")]
    QueryFailed(String),

    #[error("Checkpoint lock poisoned for {path}")]
    Poisoned { path: PathBuf },

    #[error("Checkpoint corruption detected at {path}: {reason}. Delete this file to start over.")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Image index {index} is not registered in the checkpoint")]
    UnknownImage { index: u32 },

    #[error("Fingerprint of image {index} changed while it was being processed")]
    StaleFingerprint { index: u32 },

    #[error("Failed to serialize run state: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for CheckpointError {
    fn from(error: rusqlite::Error) -> Self {
        CheckpointError::QueryFailed(error.to_string())
    }
}

/// Invalid engine configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("worker_count must be greater than zero")]
    InvalidWorkerCount,

    #[error("{name} must be within [0, 1], got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("similar_threshold ({similar}) must not exceed duplicate_threshold ({duplicate})")]
    ThresholdOrder { similar: f64, duplicate: f64 },

    #[error("prefilter_tolerance must be a non-negative number, got {0}")]
    InvalidTolerance(f64),

    #[error("signature_size must be between 8 and 256, got {0}")]
    InvalidSignatureSize(u32),

    #[error("{name} must be greater than zero")]
    InvalidCapacity { name: &'static str },

    #[error("Collection root not found: {path}")]
    RootNotFound { path: PathBuf },

    #[error("Collections {root} and {compare_root} must not contain each other")]
    NestedRoots { root: PathBuf, compare_root: PathBuf },

    #[error(
        "Checkpoint was created with {field} = {stored}, but this run requests {requested}. \
         Start a fresh run or use matching settings."
    )]
    Incompatible {
        field: &'static str,
        stored: String,
        requested: String,
    },
}

/// Two different terminal results were produced for the same key
#[derive(Error, Debug)]
pub enum DivergenceError {
    #[error("Image {index} ({path}) already has a different signature stored")]
    Signature { index: u32, path: PathBuf },

    #[error("Image {index} ({path}) is {stored} in the checkpoint but a worker reported {incoming}")]
    ImageState {
        index: u32,
        path: PathBuf,
        stored: String,
        incoming: String,
    },

    #[error("Pair ({a}, {b}) is stored as {stored} but was recomputed as {incoming}")]
    Pair {
        a: u32,
        b: u32,
        stored: String,
        incoming: String,
    },
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_includes_path() {
        let error = DecodeError::Decode {
            path: PathBuf::from("/photos/broken.jpg"),
            reason: "invalid JPEG".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("/photos/broken.jpg"));
        assert!(message.contains("invalid JPEG"));
    }

    #[test]
    fn divergence_is_not_resumable() {
        let error: EngineError = DivergenceError::Pair {
            a: 1,
            b: 2,
            stored: "duplicate (0.99)".to_string(),
            incoming: "distinct (0.10)".to_string(),
        }
        .into();

        assert!(!error.is_resumable());
        assert!(error.to_string().contains("(1, 2)"));
    }

    #[test]
    fn checkpoint_io_is_resumable() {
        let error: EngineError = CheckpointError::QueryFailed("disk I/O error".to_string()).into();
        assert!(error.is_resumable());
    }

    #[test]
    fn incompatible_config_names_the_field() {
        let error = ConfigError::Incompatible {
            field: "duplicate_threshold",
            stored: "0.95".to_string(),
            requested: "0.9".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("duplicate_threshold"));
        assert!(message.contains("0.95"));
    }
}
