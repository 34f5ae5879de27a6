//! Unsupervised concept-drift detection for streams of categorical batches.
//!
//! Each batch is reduced to a summary by a [`SummaryExtractor`], compared
//! against a running reference of past summaries, and the resulting change
//! score is judged against adaptive Chebyshev cutoffs `μ + k·σ` learnt from
//! the stream's own score history. Warnings and drifts are handed to an
//! [`AlertSink`].
//!
//! ```no_run
//! use cdcstream::{Batch, DilcaArgs, DilcaExtractor, DriftEngine, EngineConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = DriftEngine::new(
//!     EngineConfig::default(),
//!     DilcaExtractor::new(),
//!     DilcaArgs::default(),
//! )?;
//!
//! let batch = Batch::from_unnamed_rows(2, vec![vec!["a", "x"], vec!["b", "y"]])?;
//! let outcome = engine.feed_new_batch(&batch)?;
//! println!("{:?}", outcome.code);
//! # Ok(())
//! # }
//! ```

pub mod algo;
pub mod alert;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod metrics;
pub mod reference;
pub mod scorer;
pub mod sink;
pub mod snapshot;
pub mod summary;
pub mod threshold;

pub use algo::{ContextSelection, DilcaArgs, DilcaExtractor, NominalColumns};
pub use alert::{Alert, AlertCode, AlertState};
pub use batch::{Batch, Schema};
pub use config::{EngineConfig, ReferenceUpdate, SchemaPolicy};
pub use engine::{BatchOutcome, DriftEngine, SharedEngine};
pub use error::{
    BatchError, ConfigError, DriftError, ExtractionError, Incompatibility, NotifyError,
    SnapshotError,
};
pub use history::{DriftLog, LogEntry};
pub use sink::{AlertSink, ChannelSink, LogSink, NullSink};
pub use snapshot::{EngineSnapshot, SNAPSHOT_VERSION};
pub use summary::{AttributeSummary, FnExtractor, Summary, SummaryExtractor};
pub use threshold::Thresholds;
