pub mod dilca;
pub mod entropy;
pub mod welford;

// Re-exports for convenience
pub use dilca::{ContextSelection, DilcaArgs, DilcaExtractor, NominalColumns, ValueDistances};
pub use welford::RunningMoments;
