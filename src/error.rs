//! Error taxonomy for the drift engine.
//!
//! Construction problems surface as [`ConfigError`] and refuse to build an
//! engine. Everything that can go wrong while feeding a batch is wrapped in a
//! [`DriftError`], which always carries the stream id and the index of the
//! offending batch so a failure can be diagnosed without replaying the stream.

use thiserror::Error;
use uuid::Uuid;

/// Invalid engine or extractor configuration. Fatal at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("factor_warn ({warn}) must be smaller than or equal to factor_change ({change})")]
    FactorOrder { warn: f64, change: f64 },
    #[error("{name} must be a finite, non-negative number, got {value}")]
    NegativeFactor { name: &'static str, value: f64 },
    #[error("factor_std_extr_forg must lie in [0, 1), got {0}")]
    ForgettingOutOfRange(f64),
    #[error("{name} must be at least {min}, got {value}")]
    TooSmall {
        name: &'static str,
        min: usize,
        value: usize,
    },
    #[error("missing required extractor argument: {0}")]
    MissingExtractorArg(&'static str),
    #[error("invalid extractor argument {name}: {reason}")]
    InvalidExtractorArg { name: &'static str, reason: String },
    #[error("unable to parse configuration: {0}")]
    Parse(String),
}

/// Records that cannot form a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("record {row} has {found} values, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("duplicate attribute name {0:?}")]
    DuplicateAttribute(String),
    #[error("record {row} lacks attribute {attribute:?}")]
    MissingAttribute { row: usize, attribute: String },
    #[error("record {row} has unexpected attribute {attribute:?}")]
    UnexpectedAttribute { row: usize, attribute: String },
}

/// Summary extraction failed for one batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("batch contains no records")]
    EmptyBatch,
    #[error("column {0:?} is missing from the batch")]
    MissingColumn(String),
    #[error("malformed batch: {0}")]
    Malformed(String),
    #[error("summary contains a non-finite value")]
    NonFinite,
    #[error("extractor failed: {0}")]
    Failed(String),
}

/// Two summaries cannot be compared or combined.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Incompatibility {
    #[error("attribute schema changed (missing: {missing:?}, unexpected: {unexpected:?})")]
    Schema {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("summary shape mismatch: {0}")]
    Shape(String),
    #[error("dissimilarity is not a finite non-negative number: {0}")]
    InvalidScore(f64),
}

/// An alert listener refused or failed to take an alert.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NotifyError {
    #[error("alert receiver disconnected")]
    Disconnected,
    #[error("alert listener panicked: {0}")]
    Panicked(String),
    #[error("alert listener failed: {0}")]
    Failed(String),
}

/// Failures while writing or reading an engine snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnapshotError {
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),
    #[error("unsupported snapshot version: {found} (max supported: {max_supported})")]
    UnsupportedVersion { found: u32, max_supported: u32 },
    #[error("snapshot does not match the engine configuration: {0}")]
    ConfigMismatch(String),
}

/// Failure to process one batch. The stream remains usable afterwards.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriftError {
    #[error("stream {stream}, batch {batch}: invalid batch: {reason}")]
    InvalidBatch {
        stream: Uuid,
        batch: u64,
        reason: String,
    },
    #[error("stream {stream}, batch {batch}: summary extraction failed: {source}")]
    Extraction {
        stream: Uuid,
        batch: u64,
        #[source]
        source: ExtractionError,
    },
    #[error("stream {stream}, batch {batch}: incompatible summary: {source}")]
    Incompatible {
        stream: Uuid,
        batch: u64,
        #[source]
        source: Incompatibility,
    },
    /// Reference requested before the first batch was incorporated.
    #[error("reference window is empty")]
    NotReady,
    #[error("stream {stream}: feed_new_batch called while another call is in progress")]
    ConcurrentAccess { stream: Uuid },
    #[error("stream {stream}: engine state poisoned by an earlier panic")]
    Poisoned { stream: Uuid },
}

impl DriftError {
    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidBatch { .. } => "invalid_batch",
            Self::Extraction { .. } => "extraction",
            Self::Incompatible { .. } => "incompatible",
            Self::NotReady => "not_ready",
            Self::ConcurrentAccess { .. } => "concurrent_access",
            Self::Poisoned { .. } => "poisoned",
        }
    }

    /// Index of the batch that failed, where one applies.
    pub fn batch_index(&self) -> Option<u64> {
        match self {
            Self::InvalidBatch { batch, .. }
            | Self::Extraction { batch, .. }
            | Self::Incompatible { batch, .. } => Some(*batch),
            _ => None,
        }
    }
}
