//! The per-stream drift engine.
//!
//! Every call to [`DriftEngine::feed_new_batch`] runs the same pipeline:
//! validate, extract, score against the reference, update the score model,
//! fold the batch into the reference, then evaluate the alert state machine.
//! All fallible work happens before any state is committed, so a failed batch
//! leaves the stream exactly as it was.

use chrono::Utc;
use std::sync::{Arc, Mutex, TryLockError};
use tracing::{debug, debug_span, info, warn};
use uuid::Uuid;

use crate::alert::{Alert, AlertCode, AlertState, AlertStateMachine, Decision};
use crate::batch::{Batch, Schema};
use crate::config::{EngineConfig, ReferenceUpdate, SchemaPolicy};
use crate::error::{ConfigError, DriftError, ExtractionError};
use crate::history::{DriftLog, LogEntry};
use crate::metrics;
use crate::reference::ReferenceWindow;
use crate::scorer::change_score;
use crate::sink::{AlertSink, LogSink, deliver};
use crate::summary::{Summary, SummaryExtractor};
use crate::threshold::{ThresholdTracker, Thresholds};

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub batch_index: u64,
    /// `None` when the batch (re)started the reference.
    pub score: Option<f64>,
    pub thresholds: Option<Thresholds>,
    pub state: AlertState,
    pub code: AlertCode,
    /// A drift-level score was downgraded by the cooldown.
    pub suppressed: bool,
    pub alert: Option<Alert>,
    /// The reference was restarted from this batch.
    pub rebaselined: bool,
}

pub struct DriftEngine<E: SummaryExtractor> {
    pub(crate) config: EngineConfig,
    pub(crate) extractor: E,
    pub(crate) args: E::Args,
    pub(crate) stream_id: Uuid,
    pub(crate) reference: ReferenceWindow<E::Summary>,
    pub(crate) tracker: ThresholdTracker,
    pub(crate) machine: AlertStateMachine,
    pub(crate) schema: Option<Schema>,
    pub(crate) batches_seen: u64,
    pub(crate) batches_processed: u64,
    pub(crate) sink: Box<dyn AlertSink>,
    pub(crate) log: DriftLog,
}

impl<E: SummaryExtractor> DriftEngine<E> {
    /// Build an engine for one stream. Alerts go to the `tracing` pipeline
    /// until a listener is attached with [`with_sink`](Self::with_sink).
    pub fn new(config: EngineConfig, extractor: E, args: E::Args) -> Result<Self, ConfigError> {
        config.validate()?;
        extractor.validate_args(&args)?;

        let stream_id = Uuid::new_v4();
        info!(
            stream = %stream_id,
            factor_warn = config.factor_warn,
            factor_change = config.factor_change,
            forgetting = config.factor_std_extr_forg,
            cooldown = config.cooldown_cycles,
            "Drift engine initialised"
        );

        Ok(Self {
            reference: ReferenceWindow::new(config.factor_std_extr_forg, config.reference_horizon),
            tracker: ThresholdTracker::from_config(&config),
            machine: AlertStateMachine::new(
                config.cooldown_cycles,
                config.cooldown_suppresses_warnings,
            ),
            log: DriftLog::new(config.log_capacity),
            schema: None,
            batches_seen: 0,
            batches_processed: 0,
            sink: Box::new(LogSink),
            stream_id,
            config,
            extractor,
            args,
        })
    }

    pub fn with_sink(mut self, sink: impl AlertSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_stream_id(mut self, stream_id: Uuid) -> Self {
        self.stream_id = stream_id;
        self
    }

    /// Process the next batch of the stream.
    pub fn feed_new_batch(&mut self, batch: &Batch) -> Result<BatchOutcome, DriftError> {
        let index = self.batches_seen;
        self.batches_seen += 1;

        let span = debug_span!("feed_new_batch", stream = %self.stream_id, batch = index);
        let _enter = span.enter();

        match self.process(index, batch) {
            Ok(outcome) => {
                self.batches_processed += 1;
                metrics::record_batch(outcome.code);
                Ok(outcome)
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Batch rejected");
                metrics::record_failure(e.kind());
                Err(e)
            }
        }
    }

    fn process(&mut self, index: u64, batch: &Batch) -> Result<BatchOutcome, DriftError> {
        if batch.is_empty() {
            return Err(DriftError::InvalidBatch {
                stream: self.stream_id,
                batch: index,
                reason: "batch contains no records".into(),
            });
        }

        let schema = batch.schema();
        let schema_changed = match &self.schema {
            Some(known) => match known.check(&schema) {
                Ok(()) => false,
                Err(source) if self.config.schema_policy == SchemaPolicy::Reject => {
                    return Err(DriftError::Incompatible {
                        stream: self.stream_id,
                        batch: index,
                        source,
                    });
                }
                Err(source) => {
                    debug!(error = %source, "Schema differs, stream will be reset");
                    true
                }
            },
            None => false,
        };

        let summary = self
            .extractor
            .extract(batch, &self.args)
            .and_then(|s| {
                if s.is_finite() {
                    Ok(s)
                } else {
                    Err(ExtractionError::NonFinite)
                }
            })
            .map_err(|source| DriftError::Extraction {
                stream: self.stream_id,
                batch: index,
                source,
            })?;

        if schema_changed {
            warn!(
                old = self.schema.as_ref().map(Schema::fingerprint),
                new = schema.fingerprint(),
                "Attribute schema changed, resetting stream state"
            );
            self.reset_state();
        }

        if !self.reference.is_ready() {
            return Ok(self.bootstrap(index, summary, schema, schema_changed));
        }

        let reference = self.reference.current()?;
        let score = change_score(&summary, reference).map_err(|source| DriftError::Incompatible {
            stream: self.stream_id,
            batch: index,
            source,
        })?;

        // Stage the reference update so a failing blend leaves nothing half
        // applied.
        let headline = summary.headline();
        let mut absorbed = self.reference.clone();
        absorbed
            .incorporate(summary.clone())
            .map_err(|source| DriftError::Incompatible {
                stream: self.stream_id,
                batch: index,
                source,
            })?;

        self.tracker.update(score);
        let thresholds = self.tracker.thresholds();
        let (mean, std_dev) = (self.tracker.mean(), self.tracker.std_dev());
        let decision = self.machine.step(score, thresholds.as_ref());

        let rebaselined = match self.config.reference_update {
            ReferenceUpdate::Always => {
                self.reference = absorbed;
                false
            }
            ReferenceUpdate::SkipOnAlert => {
                if decision.code == AlertCode::None {
                    self.reference = absorbed;
                }
                false
            }
            ReferenceUpdate::RebaselineOnDrift if decision.code == AlertCode::Drift => {
                // Scores against the old reference say nothing about the new one.
                self.reference.rebaseline(summary);
                self.tracker.restart();
                true
            }
            ReferenceUpdate::RebaselineOnDrift => {
                self.reference = absorbed;
                false
            }
        };

        debug!(
            score,
            mean,
            std_dev,
            warn_cutoff = thresholds.map(|t| t.warn),
            drift_cutoff = thresholds.map(|t| t.drift),
            state = ?decision.state,
            "Batch scored"
        );

        let alert = thresholds.and_then(|t| self.raise(index, score, &t, &decision));

        self.log.push(LogEntry {
            batch: index,
            summary: headline,
            score: Some(score),
            mean,
            std_dev,
            warn_cutoff: thresholds.map(|t| t.warn),
            drift_cutoff: thresholds.map(|t| t.drift),
            state: decision.state,
            code: decision.code,
        });

        Ok(BatchOutcome {
            batch_index: index,
            score: Some(score),
            thresholds,
            state: decision.state,
            code: decision.code,
            suppressed: decision.suppressed,
            alert,
            rebaselined,
        })
    }

    fn bootstrap(
        &mut self,
        index: u64,
        summary: E::Summary,
        schema: Schema,
        rebaselined: bool,
    ) -> BatchOutcome {
        let headline = summary.headline();
        self.reference.rebaseline(summary);
        self.schema = Some(schema);
        debug!(summary = headline, "Reference bootstrapped");

        self.log.push(LogEntry {
            batch: index,
            summary: headline,
            score: None,
            mean: self.tracker.mean(),
            std_dev: self.tracker.std_dev(),
            warn_cutoff: None,
            drift_cutoff: None,
            state: self.machine.state(),
            code: AlertCode::None,
        });

        BatchOutcome {
            batch_index: index,
            score: None,
            thresholds: None,
            state: self.machine.state(),
            code: AlertCode::None,
            suppressed: false,
            alert: None,
            rebaselined,
        }
    }

    fn raise(
        &mut self,
        index: u64,
        score: f64,
        thresholds: &Thresholds,
        decision: &Decision,
    ) -> Option<Alert> {
        let cutoff = match decision.code {
            AlertCode::None => return None,
            AlertCode::Warning => thresholds.warn,
            AlertCode::Drift => thresholds.drift,
        };

        let mut message = format!(
            "{}: score {:.6} >= cutoff {:.6} (mean {:.6}, std {:.6})",
            decision.code.name(),
            score,
            cutoff,
            thresholds.mean,
            thresholds.std_dev
        );
        if decision.suppressed {
            message.push_str(", drift suppressed by cooldown");
        }

        let alert = Alert {
            stream: self.stream_id,
            batch: index,
            code: decision.code,
            message,
            score,
            cutoff,
            raised_at: Utc::now(),
        };

        match alert.code {
            AlertCode::Drift => warn!(score, cutoff, "Concept drift detected"),
            _ => info!(score, cutoff, suppressed = decision.suppressed, "Drift warning"),
        }

        if !deliver(self.sink.as_mut(), &alert) {
            metrics::record_notify_failure();
        }
        Some(alert)
    }

    fn reset_state(&mut self) {
        self.reference =
            ReferenceWindow::new(self.config.factor_std_extr_forg, self.config.reference_horizon);
        self.tracker = ThresholdTracker::from_config(&self.config);
        self.machine = AlertStateMachine::new(
            self.config.cooldown_cycles,
            self.config.cooldown_suppresses_warnings,
        );
        self.schema = None;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn args(&self) -> &E::Args {
        &self.args
    }

    /// Current reference summary.
    pub fn reference(&self) -> Option<&E::Summary> {
        self.reference.current().ok()
    }

    pub fn reference_window(&self) -> &ReferenceWindow<E::Summary> {
        &self.reference
    }

    pub fn thresholds(&self) -> Option<Thresholds> {
        self.tracker.thresholds()
    }

    pub fn tracker(&self) -> &ThresholdTracker {
        &self.tracker
    }

    pub fn state(&self) -> AlertState {
        self.machine.state()
    }

    pub fn cooldown_remaining(&self) -> u32 {
        self.machine.cooldown_remaining()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Calls to `feed_new_batch`, failed ones included.
    pub fn batches_seen(&self) -> u64 {
        self.batches_seen
    }

    pub fn batches_processed(&self) -> u64 {
        self.batches_processed
    }

    pub fn log(&self) -> &DriftLog {
        &self.log
    }
}

/// Cloneable handle for handing one engine to several threads.
///
/// Calls never queue: a feed that finds the engine busy fails with
/// [`DriftError::ConcurrentAccess`] instead of waiting.
pub struct SharedEngine<E: SummaryExtractor> {
    inner: Arc<Mutex<DriftEngine<E>>>,
    stream_id: Uuid,
}

impl<E: SummaryExtractor> Clone for SharedEngine<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            stream_id: self.stream_id,
        }
    }
}

impl<E: SummaryExtractor> SharedEngine<E> {
    pub fn new(engine: DriftEngine<E>) -> Self {
        let stream_id = engine.stream_id();
        Self {
            inner: Arc::new(Mutex::new(engine)),
            stream_id,
        }
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn feed_new_batch(&self, batch: &Batch) -> Result<BatchOutcome, DriftError> {
        match self.inner.try_lock() {
            Ok(mut engine) => engine.feed_new_batch(batch),
            Err(TryLockError::WouldBlock) => {
                metrics::record_failure("concurrent_access");
                Err(DriftError::ConcurrentAccess {
                    stream: self.stream_id,
                })
            }
            Err(TryLockError::Poisoned(_)) => Err(DriftError::Poisoned {
                stream: self.stream_id,
            }),
        }
    }

    /// Run `f` against the engine, waiting for any feed in progress.
    pub fn with<R>(&self, f: impl FnOnce(&DriftEngine<E>) -> R) -> Result<R, DriftError> {
        let engine = self.inner.lock().map_err(|_| DriftError::Poisoned {
            stream: self.stream_id,
        })?;
        Ok(f(&engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Incompatibility;
    use crate::summary::FnExtractor;
    use std::sync::atomic::{AtomicBool, Ordering};

    type ScalarFn = fn(&Batch, &()) -> Result<f64, ExtractionError>;

    /// Reads the first value of column `v` as the batch summary.
    fn scalar(batch: &Batch, _: &()) -> Result<f64, ExtractionError> {
        let column = batch
            .column("v")
            .ok_or_else(|| ExtractionError::MissingColumn("v".into()))?;
        column[0]
            .parse::<f64>()
            .map_err(|e| ExtractionError::Malformed(e.to_string()))
    }

    fn engine(config: EngineConfig) -> DriftEngine<FnExtractor<ScalarFn, (), f64>> {
        DriftEngine::new(config, FnExtractor::new(scalar as ScalarFn), ()).unwrap()
    }

    fn value(v: f64) -> Batch {
        Batch::from_rows(vec!["v".into()], vec![vec![v.to_string()]]).unwrap()
    }

    #[test]
    fn test_invalid_config_refused() {
        let config = EngineConfig::default().with_factors(4.0, 1.0);
        assert!(matches!(
            DriftEngine::new(config, FnExtractor::new(scalar as ScalarFn), ()),
            Err(ConfigError::FactorOrder { .. })
        ));
    }

    #[test]
    fn test_first_batch_bootstraps() {
        let mut engine = engine(EngineConfig::default());
        assert_eq!(engine.reference(), None);

        let outcome = engine.feed_new_batch(&value(5.0)).unwrap();
        assert_eq!(outcome.score, None);
        assert_eq!(outcome.code, AlertCode::None);
        assert_eq!(*engine.reference().unwrap(), 5.0);
        assert_eq!(engine.tracker().count(), 0);
    }

    #[test]
    fn test_reference_is_running_mean_without_forgetting() {
        let mut engine = engine(EngineConfig::default());
        for v in [1.0, 2.0, 3.0] {
            engine.feed_new_batch(&value(v)).unwrap();
        }
        assert!((engine.reference().unwrap() - 2.0).abs() < 1e-12);
        // Scores: |2 - 1| and |3 - 1.5|.
        assert_eq!(engine.tracker().count(), 2);
        assert!((engine.tracker().mean() - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_empty_batch_is_invalid() {
        let mut engine = engine(EngineConfig::default());
        let empty = Batch::from_rows(vec!["v".into()], Vec::<Vec<String>>::new()).unwrap();
        let err = engine.feed_new_batch(&empty).unwrap_err();
        assert!(matches!(err, DriftError::InvalidBatch { batch: 0, .. }));
        assert_eq!(engine.batches_seen(), 1);
        assert_eq!(engine.batches_processed(), 0);

        // Stream stays usable and keeps counting.
        let outcome = engine.feed_new_batch(&value(1.0)).unwrap();
        assert_eq!(outcome.batch_index, 1);
    }

    #[test]
    fn test_extraction_failure_leaves_state_untouched() {
        let mut engine = engine(EngineConfig::default());
        for v in [1.0, 1.2, 0.9] {
            engine.feed_new_batch(&value(v)).unwrap();
        }
        let reference = *engine.reference().unwrap();
        let count = engine.tracker().count();
        let log_len = engine.log().len();

        let bad = Batch::from_rows(vec!["v".into()], vec![vec!["oops"]]).unwrap();
        let err = engine.feed_new_batch(&bad).unwrap_err();
        assert_eq!(err.kind(), "extraction");
        assert_eq!(err.batch_index(), Some(3));

        assert_eq!(*engine.reference().unwrap(), reference);
        assert_eq!(engine.tracker().count(), count);
        assert_eq!(engine.log().len(), log_len);
    }

    #[test]
    fn test_non_finite_summary_rejected() {
        let mut engine = engine(EngineConfig::default());
        engine.feed_new_batch(&value(1.0)).unwrap();
        let err = engine.feed_new_batch(&value(f64::INFINITY)).unwrap_err();
        assert!(matches!(
            err,
            DriftError::Extraction {
                source: ExtractionError::NonFinite,
                ..
            }
        ));
    }

    #[test]
    fn test_schema_change_rejected_by_default() {
        let mut engine = engine(EngineConfig::default());
        engine.feed_new_batch(&value(1.0)).unwrap();

        let wider =
            Batch::from_rows(vec!["v".into(), "w".into()], vec![vec!["1", "x"]]).unwrap();
        let err = engine.feed_new_batch(&wider).unwrap_err();
        match err {
            DriftError::Incompatible {
                source: Incompatibility::Schema { unexpected, .. },
                ..
            } => assert_eq!(unexpected, vec!["w".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*engine.reference().unwrap(), 1.0);
    }

    #[test]
    fn test_schema_change_resets_when_configured() {
        let config = EngineConfig {
            schema_policy: SchemaPolicy::Reset,
            ..EngineConfig::default()
        };
        let mut engine = engine(config);
        for v in [1.0, 2.0, 3.0] {
            engine.feed_new_batch(&value(v)).unwrap();
        }

        let wider =
            Batch::from_rows(vec!["v".into(), "w".into()], vec![vec!["7", "x"]]).unwrap();
        let outcome = engine.feed_new_batch(&wider).unwrap();
        assert!(outcome.rebaselined);
        assert_eq!(outcome.score, None);
        assert_eq!(*engine.reference().unwrap(), 7.0);
        assert_eq!(engine.tracker().count(), 0);
        assert_eq!(engine.schema().unwrap().attributes().count(), 2);
    }

    #[test]
    fn test_alert_reaches_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let mut engine = engine(EngineConfig::default()).with_sink(
            move |code: AlertCode, msg: &str| {
                sink_seen.lock().unwrap().push((code, msg.to_string()));
            },
        );

        for i in 0..30 {
            let v = if i % 2 == 0 { 1.0 } else { 1.1 };
            engine.feed_new_batch(&value(v)).unwrap();
        }
        let outcome = engine.feed_new_batch(&value(100.0)).unwrap();
        assert_eq!(outcome.code, AlertCode::Drift);
        let alert = outcome.alert.unwrap();
        assert_eq!(alert.batch, 30);
        assert!(alert.score >= alert.cutoff);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, AlertCode::Drift);
        assert!(seen[0].1.starts_with("drift: score"));
    }

    #[test]
    fn test_skip_on_alert_keeps_reference() {
        let config = EngineConfig {
            reference_update: ReferenceUpdate::SkipOnAlert,
            ..EngineConfig::default()
        };
        let mut engine = engine(config);
        for i in 0..30 {
            engine.feed_new_batch(&value(if i % 2 == 0 { 1.0 } else { 1.1 })).unwrap();
        }
        let before = *engine.reference().unwrap();
        let outcome = engine.feed_new_batch(&value(100.0)).unwrap();
        assert_ne!(outcome.code, AlertCode::None);
        assert_eq!(*engine.reference().unwrap(), before);
    }

    #[test]
    fn test_rebaseline_on_drift() {
        let config = EngineConfig {
            reference_update: ReferenceUpdate::RebaselineOnDrift,
            ..EngineConfig::default()
        };
        let mut engine = engine(config);
        for i in 0..30 {
            engine.feed_new_batch(&value(if i % 2 == 0 { 1.0 } else { 1.1 })).unwrap();
        }
        let outcome = engine.feed_new_batch(&value(100.0)).unwrap();
        assert_eq!(outcome.code, AlertCode::Drift);
        assert!(outcome.rebaselined);
        assert_eq!(*engine.reference().unwrap(), 100.0);
        assert_eq!(engine.tracker().count(), 0);
    }

    #[test]
    fn test_rebaseline_restarts_score_history() {
        let config = EngineConfig {
            reference_update: ReferenceUpdate::RebaselineOnDrift,
            ..EngineConfig::default()
        };
        let mut engine = engine(config);
        for i in 0..30 {
            engine.feed_new_batch(&value(if i % 2 == 0 { 1.0 } else { 1.1 })).unwrap();
        }
        let jump = engine.feed_new_batch(&value(100.0)).unwrap();
        assert_eq!(jump.code, AlertCode::Drift);
        assert!(jump.rebaselined);

        // One score in the new regime: σ comes from the old extrema.
        let (lo, hi) = engine.tracker().std_extrema().unwrap();
        let first = engine.feed_new_batch(&value(100.0)).unwrap();
        assert_eq!(first.code, AlertCode::None);
        let t = first.thresholds.unwrap();
        assert!((t.std_dev - (lo + hi) / 2.0).abs() < 1e-12);

        for i in 1..10 {
            let v = if i % 2 == 0 { 100.0 } else { 100.1 };
            let outcome = engine.feed_new_batch(&value(v)).unwrap();
            assert_eq!(outcome.code, AlertCode::None, "batch {v} alerted");
        }
        assert_eq!(engine.tracker().count(), 10);

        // Thresholds now reflect the quiet new regime, not the jump.
        let outcome = engine.feed_new_batch(&value(110.0)).unwrap();
        assert_eq!(outcome.code, AlertCode::Drift);
        assert!(outcome.thresholds.unwrap().drift < 10.0);
    }

    #[test]
    fn test_log_records_every_processed_batch() {
        let mut engine = engine(EngineConfig::default());
        for v in [1.0, 2.0, 1.5, 1.7] {
            engine.feed_new_batch(&value(v)).unwrap();
        }
        let entries: Vec<_> = engine.log().entries().collect();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].score, None);
        assert_eq!(entries[1].score, Some(1.0));
        assert!(entries[1].warn_cutoff.is_none(), "one score is not actionable");
        assert!(entries[2].warn_cutoff.is_some());
    }

    #[test]
    fn test_shared_engine_poisoned_after_panic() {
        static EXPLODE: AtomicBool = AtomicBool::new(false);

        fn fragile(batch: &Batch, _: &()) -> Result<f64, ExtractionError> {
            if EXPLODE.load(Ordering::SeqCst) {
                panic!("extractor crashed");
            }
            scalar(batch, &())
        }

        let engine = DriftEngine::new(
            EngineConfig::default(),
            FnExtractor::new(fragile as ScalarFn),
            (),
        )
        .unwrap();
        let shared = SharedEngine::new(engine);
        shared.feed_new_batch(&value(1.0)).unwrap();

        EXPLODE.store(true, Ordering::SeqCst);
        let worker = shared.clone();
        let joined = std::thread::spawn(move || worker.feed_new_batch(&value(2.0))).join();
        assert!(joined.is_err());

        assert!(matches!(
            shared.feed_new_batch(&value(3.0)),
            Err(DriftError::Poisoned { .. })
        ));
        assert!(shared.with(|e| e.batches_seen()).is_err());
    }
}
