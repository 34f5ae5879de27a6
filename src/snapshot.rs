//! Snapshot and restore of a stream's detection state.
//!
//! A snapshot holds everything the engine learned: reference, score model,
//! alert machine, schema, counters and the analysis log. The extractor, its
//! arguments and the alert listener are supplied again on restore.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::alert::AlertStateMachine;
use crate::batch::Schema;
use crate::config::EngineConfig;
use crate::engine::DriftEngine;
use crate::error::SnapshotError;
use crate::history::DriftLog;
use crate::reference::ReferenceWindow;
use crate::sink::LogSink;
use crate::summary::SummaryExtractor;
use crate::threshold::ThresholdTracker;

/// Version for snapshot format migrations
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot<S> {
    /// Format version; always the first field so it can be read on its own.
    pub version: u32,
    pub stream_id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub config: EngineConfig,
    pub reference: ReferenceWindow<S>,
    pub tracker: ThresholdTracker,
    pub machine: AlertStateMachine,
    pub schema: Option<Schema>,
    pub batches_seen: u64,
    pub batches_processed: u64,
    pub log: DriftLog,
}

impl<S: Serialize + DeserializeOwned> EngineSnapshot<S> {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        // Check the version before decoding the body, whose layout may differ.
        let version: u32 = bincode::deserialize(bytes)
            .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))?;
        if version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: version,
                max_supported: SNAPSHOT_VERSION,
            });
        }

        bincode::deserialize(bytes).map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))
    }
}

impl<E> DriftEngine<E>
where
    E: SummaryExtractor,
    E::Summary: Serialize + DeserializeOwned,
{
    pub fn to_snapshot(&self) -> EngineSnapshot<E::Summary> {
        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            stream_id: self.stream_id,
            taken_at: Utc::now(),
            config: self.config.clone(),
            reference: self.reference.clone(),
            tracker: self.tracker.clone(),
            machine: self.machine.clone(),
            schema: self.schema.clone(),
            batches_seen: self.batches_seen,
            batches_processed: self.batches_processed,
            log: self.log.clone(),
        }
    }

    /// Serialise the detection state.
    pub fn snapshot(&self) -> Result<Vec<u8>, SnapshotError> {
        self.to_snapshot().to_bytes()
    }

    /// Build an engine that continues the stream captured in `bytes`.
    ///
    /// The restored engine logs alerts through `tracing`; attach a listener
    /// with [`with_sink`](Self::with_sink).
    pub fn from_snapshot(bytes: &[u8], extractor: E, args: E::Args) -> Result<Self, SnapshotError> {
        let snapshot = EngineSnapshot::<E::Summary>::from_bytes(bytes)?;
        snapshot
            .config
            .validate()
            .map_err(|e| SnapshotError::ConfigMismatch(e.to_string()))?;
        extractor
            .validate_args(&args)
            .map_err(|e| SnapshotError::ConfigMismatch(e.to_string()))?;

        info!(
            stream = %snapshot.stream_id,
            batches = snapshot.batches_seen,
            taken_at = %snapshot.taken_at,
            "Drift engine restored from snapshot"
        );

        Ok(Self {
            config: snapshot.config,
            extractor,
            args,
            stream_id: snapshot.stream_id,
            reference: snapshot.reference,
            tracker: snapshot.tracker,
            machine: snapshot.machine,
            schema: snapshot.schema,
            batches_seen: snapshot.batches_seen,
            batches_processed: snapshot.batches_processed,
            sink: Box::new(LogSink),
            log: snapshot.log,
        })
    }
}
