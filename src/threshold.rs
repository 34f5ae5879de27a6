//! Adaptive cutoffs over the change-score history.
//!
//! Cutoffs follow Chebyshev's inequality: a score further than `k` standard
//! deviations above the mean has probability at most `1 / k^2` under the
//! current regime.
//!
//! The tracker also remembers the smallest and largest σ it has produced.
//! After a [`restart`](ThresholdTracker::restart) the fresh history is too
//! short for a σ of its own, so the midpoint of those extrema stands in until
//! `min_scores` new scores exist. A positive forgetting factor pulls the two
//! extrema towards each other on every update.

use serde::{Deserialize, Serialize};

use crate::algo::RunningMoments;
use crate::config::EngineConfig;

/// Cutoffs derived from the score history at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub mean: f64,
    pub std_dev: f64,
    pub warn: f64,
    pub drift: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ThresholdTracker {
    moments: RunningMoments,
    factor_warn: f64,
    factor_change: f64,
    min_scores: usize,
    std_floor: f64,
    /// Scores ever observed, including those that left the window.
    observed: u64,
    std_min: Option<f64>,
    std_max: Option<f64>,
    extrema_forgetting: f64,
}

impl ThresholdTracker {
    pub fn new(factor_warn: f64, factor_change: f64, window: Option<usize>) -> Self {
        Self {
            moments: RunningMoments::new(window),
            factor_warn,
            factor_change,
            min_scores: 2,
            std_floor: 0.0,
            observed: 0,
            std_min: None,
            std_max: None,
            extrema_forgetting: 0.0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let mut tracker = Self::new(
            config.factor_warn,
            config.factor_change,
            config.score_window,
        );
        tracker.min_scores = config.min_scores;
        tracker.std_floor = config.std_floor;
        tracker.extrema_forgetting = config.factor_std_extr_forg;
        tracker
    }

    pub fn update(&mut self, score: f64) {
        self.forget_extrema();
        self.moments.push(score);
        self.observed += 1;

        if self.moments.count() >= 2 {
            let std_dev = self.moments.std_dev();
            self.std_min = Some(self.std_min.map_or(std_dev, |m| m.min(std_dev)));
            self.std_max = Some(self.std_max.map_or(std_dev, |m| m.max(std_dev)));
        }
    }

    /// Start a new score history, keeping the σ extrema seen so far.
    pub fn restart(&mut self) {
        self.moments = RunningMoments::new(self.moments.window());
    }

    /// Whether enough scores were seen for the cutoffs to mean anything.
    pub fn is_actionable(&self) -> bool {
        self.sigma().is_some()
    }

    /// Current cutoffs, or `None` while still establishing a baseline.
    pub fn thresholds(&self) -> Option<Thresholds> {
        let std_dev = self.sigma()?;
        let mean = self.moments.mean();
        let sigma = std_dev.max(self.std_floor);
        Some(Thresholds {
            mean,
            std_dev,
            warn: mean + self.factor_warn * sigma,
            drift: mean + self.factor_change * sigma,
        })
    }

    pub fn mean(&self) -> f64 {
        self.moments.mean()
    }

    pub fn std_dev(&self) -> f64 {
        self.moments.std_dev()
    }

    /// Scores in the current statistics window.
    pub fn count(&self) -> u64 {
        self.moments.count()
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Smallest and largest σ produced so far.
    pub fn std_extrema(&self) -> Option<(f64, f64)> {
        self.std_min.zip(self.std_max)
    }

    fn sigma(&self) -> Option<f64> {
        let count = self.moments.count();
        if count >= self.min_scores as u64 {
            return Some(self.moments.std_dev());
        }
        if count == 0 {
            return None;
        }
        self.std_extrema().map(|(lo, hi)| (lo + hi) / 2.0)
    }

    /// Shrink the maximum and grow the minimum, unless they would cross.
    fn forget_extrema(&mut self) {
        if self.extrema_forgetting == 0.0 {
            return;
        }
        if let Some((lo, hi)) = self.std_extrema() {
            let lo = lo * (1.0 + self.extrema_forgetting);
            let hi = hi * (1.0 - self.extrema_forgetting);
            if lo <= hi {
                self.std_min = Some(lo);
                self.std_max = Some(hi);
            }
        }
    }
}
