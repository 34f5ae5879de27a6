//! DILCA: context-based distances between categorical values.
//!
//! For a target attribute Y, a *context* of correlated attributes is chosen
//! with symmetric uncertainty. Two values of Y are close when they co-occur
//! with the context values in similar proportions:
//!
//! ```text
//! d(yi, yj) = sqrt( sum_X sum_x (P(yi|x) - P(yj|x))^2 / sum_X |X| )
//! ```
//!
//! The batch summary condenses each attribute's value-distance matrix into a
//! scalar, `sqrt(sum_{i<j} d^2) / (c (c - 1) / 2)`, and keeps one scalar per
//! attribute. Constant attributes summarise to 0.
//!
//! Reference: Ienco, Pensa, Meo, "From Context to Distance: Learning
//! Dissimilarity for Categorical Data Clustering", TKDD 2012.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use tracing::debug;

use super::entropy::{EncodedColumn, contingency, symmetric_uncertainty};
use crate::batch::Batch;
use crate::error::{ConfigError, ExtractionError};
use crate::summary::{AttributeSummary, SummaryExtractor};

type Context = SmallVec<[usize; 8]>;

/// Which columns are treated as categorical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NominalColumns {
    #[default]
    All,
    Only(Vec<String>),
}

/// How the context of a target attribute is selected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextSelection {
    /// Rank by relevance, then drop attributes made redundant by a better
    /// ranked one (FCBF-style).
    #[default]
    RelevanceRedundancy,
    /// Keep attributes whose relevance is at least `sigma` times the mean.
    Relevance { sigma: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DilcaArgs {
    pub nominal_cols: NominalColumns,
    pub context: ContextSelection,
}

/// Value-distance matrix of one attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueDistances {
    pub attribute: String,
    pub labels: Vec<String>,
    /// Row-major `labels.len() x labels.len()` symmetric matrix.
    pub distances: Vec<f64>,
    /// Attributes used as context.
    pub context: Vec<String>,
}

impl ValueDistances {
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.distances[i * self.labels.len() + j]
    }

    pub fn cardinality(&self) -> usize {
        self.labels.len()
    }

    /// Normalised upper-triangle norm of the matrix.
    pub fn summary_value(&self) -> f64 {
        let c = self.cardinality();
        if c <= 1 {
            return 0.0;
        }
        let mut sq = 0.0;
        for i in 0..c {
            for j in (i + 1)..c {
                let d = self.get(i, j);
                sq += d * d;
            }
        }
        let pairs = (c * (c - 1)) as f64 * 0.5;
        sq.sqrt() / pairs
    }
}

/// Native DILCA summary extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct DilcaExtractor;

impl DilcaExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Value-distance matrices for every selected attribute.
    pub fn matrices(
        &self,
        batch: &Batch,
        args: &DilcaArgs,
    ) -> Result<Vec<ValueDistances>, ExtractionError> {
        if batch.is_empty() {
            return Err(ExtractionError::EmptyBatch);
        }

        let selected: Vec<(&str, &[String])> = match &args.nominal_cols {
            NominalColumns::All => batch.columns().collect(),
            NominalColumns::Only(names) => names
                .iter()
                .map(|name| {
                    batch
                        .column(name)
                        .map(|col| (name.as_str(), col))
                        .ok_or_else(|| ExtractionError::MissingColumn(name.clone()))
                })
                .collect::<Result<_, _>>()?,
        };

        let names: Vec<&str> = selected.iter().map(|(n, _)| *n).collect();
        let columns: Vec<EncodedColumn> = selected
            .iter()
            .map(|(_, values)| EncodedColumn::encode(values))
            .collect();

        let su = SuTable::new(&columns);
        let mut out = Vec::with_capacity(columns.len());
        for target in 0..columns.len() {
            let context = match args.context {
                ContextSelection::RelevanceRedundancy => {
                    relevance_redundancy_context(&su, target)
                }
                ContextSelection::Relevance { sigma } => relevance_context(&su, target, sigma),
            };
            let distances = value_distances(&columns, target, &context);
            out.push(ValueDistances {
                attribute: names[target].to_string(),
                labels: columns[target].labels.clone(),
                distances,
                context: context.iter().map(|&c| names[c].to_string()).collect(),
            });
        }
        Ok(out)
    }
}

impl SummaryExtractor for DilcaExtractor {
    type Summary = AttributeSummary;
    type Args = DilcaArgs;

    fn extract(&self, batch: &Batch, args: &DilcaArgs) -> Result<AttributeSummary, ExtractionError> {
        let matrices = self.matrices(batch, args)?;
        let values: BTreeMap<String, f64> = matrices
            .iter()
            .map(|m| (m.attribute.clone(), m.summary_value()))
            .collect();
        if values.values().any(|v| !v.is_finite()) {
            return Err(ExtractionError::NonFinite);
        }
        debug!(
            attributes = values.len(),
            records = batch.len(),
            "DILCA summary extracted"
        );
        Ok(AttributeSummary::new(values))
    }

    fn validate_args(&self, args: &DilcaArgs) -> Result<(), ConfigError> {
        if let NominalColumns::Only(names) = &args.nominal_cols {
            if names.is_empty() {
                return Err(ConfigError::MissingExtractorArg("nominal_cols"));
            }
        }
        if let ContextSelection::Relevance { sigma } = args.context {
            if !(0.0..=1.0).contains(&sigma) {
                return Err(ConfigError::InvalidExtractorArg {
                    name: "context.sigma",
                    reason: format!("must lie in [0, 1], got {sigma}"),
                });
            }
        }
        Ok(())
    }
}

/// Lazily filled symmetric-uncertainty cache.
struct SuTable<'a> {
    columns: &'a [EncodedColumn],
    cache: std::cell::RefCell<BTreeMap<(usize, usize), f64>>,
}

impl<'a> SuTable<'a> {
    fn new(columns: &'a [EncodedColumn]) -> Self {
        Self {
            columns,
            cache: std::cell::RefCell::new(BTreeMap::new()),
        }
    }

    fn len(&self) -> usize {
        self.columns.len()
    }

    /// SU(a, b); symmetric, so cached under the ordered pair.
    fn get(&self, a: usize, b: usize) -> f64 {
        let key = (a.min(b), a.max(b));
        if let Some(&v) = self.cache.borrow().get(&key) {
            return v;
        }
        let v = symmetric_uncertainty(&self.columns[key.0], &self.columns[key.1]);
        self.cache.borrow_mut().insert(key, v);
        v
    }
}

fn fallback_context(n: usize, target: usize) -> Context {
    let others: Context = (0..n).filter(|&j| j != target).collect();
    if others.is_empty() {
        smallvec::smallvec![target]
    } else {
        others
    }
}

fn ranked_candidates(su: &SuTable, target: usize) -> Vec<(usize, f64)> {
    let mut ranked: Vec<(usize, f64)> = (0..su.len())
        .filter(|&j| j != target)
        .map(|j| (j, su.get(target, j)))
        .filter(|&(_, s)| s > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
}

fn relevance_redundancy_context(su: &SuTable, target: usize) -> Context {
    let ranked = ranked_candidates(su, target);
    let mut removed = vec![false; su.len()];
    let mut context = Context::new();

    for (i, &(kept, _)) in ranked.iter().enumerate() {
        if removed[kept] {
            continue;
        }
        context.push(kept);
        for &(other, relevance) in &ranked[i + 1..] {
            if !removed[other] && su.get(kept, other) >= relevance {
                removed[other] = true;
            }
        }
    }

    if context.is_empty() {
        return fallback_context(su.len(), target);
    }
    context
}

fn relevance_context(su: &SuTable, target: usize, sigma: f64) -> Context {
    let scores: Vec<(usize, f64)> = (0..su.len())
        .filter(|&j| j != target)
        .map(|j| (j, su.get(target, j)))
        .collect();
    if scores.is_empty() {
        return fallback_context(su.len(), target);
    }
    let mean = scores.iter().map(|(_, s)| s).sum::<f64>() / scores.len() as f64;
    let context: Context = scores
        .iter()
        .filter(|&&(_, s)| s > 0.0 && s >= sigma * mean)
        .map(|&(j, _)| j)
        .collect();
    if context.is_empty() {
        return fallback_context(su.len(), target);
    }
    context
}

fn value_distances(columns: &[EncodedColumn], target: usize, context: &[usize]) -> Vec<f64> {
    let y = &columns[target];
    let c = y.cardinality();
    let mut out = vec![0.0; c * c];
    if c <= 1 {
        return out;
    }

    // P(y | x) for every context value x, one row per x.
    let mut conditionals: Vec<Vec<f64>> = Vec::new();
    let mut total_values = 0usize;
    for &ctx in context {
        let x = &columns[ctx];
        total_values += x.cardinality();
        for row in contingency(y, x) {
            let group: usize = row.iter().sum();
            if group == 0 {
                continue;
            }
            conditionals.push(row.iter().map(|&n| n as f64 / group as f64).collect());
        }
    }
    if total_values == 0 {
        return out;
    }

    for i in 0..c {
        for j in (i + 1)..c {
            let d2: f64 = conditionals
                .iter()
                .map(|p| (p[i] - p[j]).powi(2))
                .sum();
            let d = (d2 / total_values as f64).sqrt();
            out[i * c + j] = d;
            out[j * c + i] = d;
        }
    }
    out
}
