//! The running reference ("current normal") of a stream.
//!
//! Only the aggregate is stored, so memory stays at one summary no matter how
//! long the stream runs. Each incorporated summary gets share `1 / W` where
//! the effective weight evolves as
//!
//! ```text
//! W <- min((1 - f) * W + 1, horizon)
//! ```
//!
//! With `f = 0` and no horizon this is the plain mean of every summary seen.
//! A positive `f` decays older summaries geometrically; the horizon caps how
//! many summaries the reference can average over.

use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Incompatibility};
use crate::summary::Summary;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReferenceWindow<S> {
    aggregate: Option<S>,
    weight: f64,
    forgetting: f64,
    horizon: Option<usize>,
    incorporated: u64,
    /// Summaries blended in since the last (re)baseline.
    span: u64,
}

impl<S: Summary> ReferenceWindow<S> {
    /// `forgetting` must lie in `[0, 1)`; the engine configuration checks it.
    pub fn new(forgetting: f64, horizon: Option<usize>) -> Self {
        Self {
            aggregate: None,
            weight: 0.0,
            forgetting: forgetting.clamp(0.0, 1.0 - f64::EPSILON),
            horizon,
            incorporated: 0,
            span: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.aggregate.is_some()
    }

    /// Fold a summary into the reference. The first summary becomes the
    /// reference as is.
    pub fn incorporate(&mut self, summary: S) -> Result<(), Incompatibility> {
        let weight = self.next_weight();
        if let Some(current) = self.aggregate.as_mut() {
            current.blend(&summary, 1.0 / weight)?;
        } else {
            self.aggregate = Some(summary);
        }
        self.weight = weight;
        self.incorporated += 1;
        self.span += 1;
        Ok(())
    }

    /// Drop all history and start over from `summary`.
    pub fn rebaseline(&mut self, summary: S) {
        self.aggregate = Some(summary);
        self.weight = 1.0;
        self.incorporated += 1;
        self.span = 1;
    }

    pub fn current(&self) -> Result<&S, DriftError> {
        self.aggregate.as_ref().ok_or(DriftError::NotReady)
    }

    /// Share of the reference contributed by the summary incorporated
    /// `age` batches ago (0 = the latest one).
    pub fn influence(&self, age: u64) -> f64 {
        if age >= self.span || self.weight == 0.0 {
            return 0.0;
        }
        if self.forgetting == 0.0 && self.horizon.is_none() {
            return 1.0 / self.span as f64;
        }
        // Replay the weight recursion: the summary got share 1 / W when it
        // arrived and kept (1 - 1 / W) of it through every later blend.
        let arrival = self.span - 1 - age;
        let mut w = 0.0;
        let mut share = 0.0;
        for k in 0..self.span {
            w = self.step(w);
            if k == arrival {
                share = 1.0 / w;
            } else if k > arrival {
                share *= 1.0 - 1.0 / w;
            }
        }
        share
    }

    /// Effective number of summaries the reference averages over.
    pub fn effective_weight(&self) -> f64 {
        self.weight
    }

    pub fn incorporated(&self) -> u64 {
        self.incorporated
    }

    fn next_weight(&self) -> f64 {
        self.step(self.weight)
    }

    fn step(&self, weight: f64) -> f64 {
        let w = (1.0 - self.forgetting) * weight + 1.0;
        match self.horizon {
            Some(h) => w.min(h as f64),
            None => w,
        }
    }
}
