use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Running mean and population variance (Welford), optionally restricted to a
/// trailing window of observations.
///
/// With a window, evicted samples are removed by the inverse update and the
/// moments are recomputed from the retained samples once per `window` pushes
/// so rounding error cannot accumulate over an unbounded stream.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RunningMoments {
    count: u64,
    mean: f64,
    m2: f64,
    window: Option<usize>,
    samples: VecDeque<f64>,
    since_resync: usize,
}

impl RunningMoments {
    pub fn new(window: Option<usize>) -> Self {
        let window = window.map(|w| w.max(1));
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            window,
            samples: VecDeque::with_capacity(window.unwrap_or(0)),
            since_resync: 0,
        }
    }

    pub fn push(&mut self, x: f64) {
        self.add(x);

        if let Some(window) = self.window {
            self.samples.push_back(x);
            if self.samples.len() > window {
                if let Some(old) = self.samples.pop_front() {
                    self.remove(old);
                }
            }
            self.since_resync += 1;
            if self.since_resync >= window {
                self.resync();
            }
        }
    }

    fn add(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn remove(&mut self, x: f64) {
        if self.count <= 1 {
            self.count = 0;
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let n = self.count as f64;
        let new_mean = (n * self.mean - x) / (n - 1.0);
        self.m2 -= (x - self.mean) * (x - new_mean);
        self.m2 = self.m2.max(0.0);
        self.mean = new_mean;
        self.count -= 1;
    }

    fn resync(&mut self) {
        self.since_resync = 0;
        self.count = 0;
        self.mean = 0.0;
        self.m2 = 0.0;
        let samples = std::mem::take(&mut self.samples);
        for &x in &samples {
            self.add(x);
        }
        self.samples = samples;
    }

    /// Observations currently contributing to the moments.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.m2 / self.count as f64).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn window(&self) -> Option<usize> {
        self.window
    }
}
