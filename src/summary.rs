//! Batch summaries and the extractor seam.
//!
//! The engine never looks inside a summary. It only needs to blend one into
//! the running reference and to measure how far one lies from another.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;

use crate::batch::Batch;
use crate::error::{ConfigError, ExtractionError, Incompatibility};

/// Numeric representation of one batch.
pub trait Summary: Clone + Debug + Send {
    /// Replace `self` with `(1 - share) * self + share * incoming`.
    ///
    /// Must leave `self` untouched when it returns an error.
    fn blend(&mut self, incoming: &Self, share: f64) -> Result<(), Incompatibility>;

    /// Dissimilarity between two summaries. Non-negative and deterministic.
    fn distance(&self, other: &Self) -> Result<f64, Incompatibility>;

    fn is_finite(&self) -> bool;

    /// Single number used for logs.
    fn headline(&self) -> f64;
}

impl Summary for f64 {
    fn blend(&mut self, incoming: &Self, share: f64) -> Result<(), Incompatibility> {
        *self += share * (incoming - *self);
        Ok(())
    }

    fn distance(&self, other: &Self) -> Result<f64, Incompatibility> {
        Ok((self - other).abs())
    }

    fn is_finite(&self) -> bool {
        f64::is_finite(*self)
    }

    fn headline(&self) -> f64 {
        *self
    }
}

/// One summary value per attribute.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttributeSummary {
    values: BTreeMap<String, f64>,
}

impl AttributeSummary {
    pub fn new(values: BTreeMap<String, f64>) -> Self {
        Self { values }
    }

    pub fn get(&self, attribute: &str) -> Option<f64> {
        self.values.get(attribute).copied()
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mean over attributes: the scalar batch summary.
    pub fn overall(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.values().sum::<f64>() / self.values.len() as f64
    }

    fn check_compatible(&self, other: &Self) -> Result<(), Incompatibility> {
        if self.values.keys().eq(other.values.keys()) {
            return Ok(());
        }
        Err(Incompatibility::Schema {
            missing: self
                .values
                .keys()
                .filter(|k| !other.values.contains_key(*k))
                .cloned()
                .collect(),
            unexpected: other
                .values
                .keys()
                .filter(|k| !self.values.contains_key(*k))
                .cloned()
                .collect(),
        })
    }
}

impl Summary for AttributeSummary {
    fn blend(&mut self, incoming: &Self, share: f64) -> Result<(), Incompatibility> {
        self.check_compatible(incoming)?;
        for (value, new) in self.values.values_mut().zip(incoming.values.values()) {
            *value += share * (new - *value);
        }
        Ok(())
    }

    /// Mean absolute per-attribute difference.
    fn distance(&self, other: &Self) -> Result<f64, Incompatibility> {
        self.check_compatible(other)?;
        if self.values.is_empty() {
            return Ok(0.0);
        }
        let total: f64 = self
            .values
            .values()
            .zip(other.values.values())
            .map(|(a, b)| (a - b).abs())
            .sum();
        Ok(total / self.values.len() as f64)
    }

    fn is_finite(&self) -> bool {
        self.values.values().all(|v| v.is_finite())
    }

    fn headline(&self) -> f64 {
        self.overall()
    }
}

/// Turns a batch into a summary. Stateless with respect to the engine.
pub trait SummaryExtractor: Send {
    type Summary: Summary;
    type Args: Clone + Debug + Send;

    fn extract(&self, batch: &Batch, args: &Self::Args) -> Result<Self::Summary, ExtractionError>;

    /// Checked once when the engine is built.
    fn validate_args(&self, _args: &Self::Args) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Adapts a plain function or closure into a [`SummaryExtractor`].
pub struct FnExtractor<F, A, S> {
    f: F,
    _marker: PhantomData<fn(&A) -> S>,
}

impl<F, A, S> FnExtractor<F, A, S>
where
    F: Fn(&Batch, &A) -> Result<S, ExtractionError> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<F, A, S> SummaryExtractor for FnExtractor<F, A, S>
where
    F: Fn(&Batch, &A) -> Result<S, ExtractionError> + Send,
    A: Clone + Debug + Send,
    S: Summary,
{
    type Summary = S;
    type Args = A;

    fn extract(&self, batch: &Batch, args: &A) -> Result<S, ExtractionError> {
        (self.f)(batch, args)
    }
}
