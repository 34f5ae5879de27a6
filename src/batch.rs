//! Batches of categorical records.
//!
//! A [`Batch`] is stored column-major: one vector of category labels per
//! attribute. Every record must define every attribute of the batch.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{BatchError, Incompatibility};

/// One immutable chunk of a categorical stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    attributes: Vec<String>,
    columns: Vec<Vec<String>>,
    len: usize,
}

impl Batch {
    /// Build a batch from attribute names and row-major records.
    ///
    /// Fails when a record's width differs from the number of attributes or
    /// when an attribute name is repeated.
    pub fn from_rows<R, V>(attributes: Vec<String>, rows: R) -> Result<Self, BatchError>
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = V>,
        V: ToString,
    {
        {
            let mut seen = BTreeSet::new();
            if let Some(dup) = attributes.iter().find(|a| !seen.insert(a.as_str())) {
                return Err(BatchError::DuplicateAttribute(dup.clone()));
            }
        }

        let expected = attributes.len();
        let mut columns = vec![Vec::new(); expected];
        let mut len = 0;
        for (row, values) in rows.into_iter().enumerate() {
            let mut found = 0;
            for value in values {
                if let Some(column) = columns.get_mut(found) {
                    column.push(value.to_string());
                }
                found += 1;
            }
            if found != expected {
                return Err(BatchError::RaggedRow {
                    row,
                    expected,
                    found,
                });
            }
            len += 1;
        }

        Ok(Self {
            attributes,
            columns,
            len,
        })
    }

    /// Build a batch from records given as attribute -> value maps.
    ///
    /// The attribute set is taken from the first record; every other record
    /// must define exactly the same attributes.
    pub fn from_records<I>(records: I) -> Result<Self, BatchError>
    where
        I: IntoIterator<Item = BTreeMap<String, String>>,
    {
        let mut iter = records.into_iter().peekable();
        let attributes: Vec<String> = match iter.peek() {
            Some(first) => first.keys().cloned().collect(),
            None => Vec::new(),
        };

        let mut rows = Vec::new();
        for (idx, mut record) in iter.enumerate() {
            let mut row = Vec::with_capacity(attributes.len());
            for attr in &attributes {
                let value = record
                    .remove(attr)
                    .ok_or_else(|| BatchError::MissingAttribute {
                        row: idx,
                        attribute: attr.clone(),
                    })?;
                row.push(value);
            }
            if let Some(extra) = record.into_keys().next() {
                return Err(BatchError::UnexpectedAttribute {
                    row: idx,
                    attribute: extra,
                });
            }
            rows.push(row);
        }

        Self::from_rows(attributes, rows)
    }

    /// Convenience constructor naming attributes `c0, c1, ...`.
    pub fn from_unnamed_rows<R, V>(width: usize, rows: R) -> Result<Self, BatchError>
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = V>,
        V: ToString,
    {
        let attributes = (0..width).map(|i| format!("c{i}")).collect();
        Self::from_rows(attributes, rows)
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0 || self.attributes.is_empty()
    }

    /// Values of one attribute, in record order.
    pub fn column(&self, attribute: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .position(|a| a == attribute)
            .map(|idx| self.columns[idx].as_slice())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.attributes
            .iter()
            .zip(&self.columns)
            .map(|(a, c)| (a.as_str(), c.as_slice()))
    }

    pub fn schema(&self) -> Schema {
        Schema::new(self.attributes.iter().cloned())
    }
}

/// Attribute set of a stream, order-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    attributes: BTreeSet<String>,
    fingerprint: u64,
}

impl Schema {
    pub fn new<I: IntoIterator<Item = String>>(attributes: I) -> Self {
        let attributes: BTreeSet<String> = attributes.into_iter().collect();
        let joined = attributes
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\u{1f}");
        let fingerprint = xxhash_rust::xxh3::xxh3_64(joined.as_bytes());
        Self {
            attributes,
            fingerprint,
        }
    }

    /// Stable hash of the attribute names.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(String::as_str)
    }

    /// Check that `other` has the same attribute set as `self`.
    pub fn check(&self, other: &Schema) -> Result<(), Incompatibility> {
        if self.fingerprint == other.fingerprint && self.attributes == other.attributes {
            return Ok(());
        }
        Err(Incompatibility::Schema {
            missing: self
                .attributes
                .difference(&other.attributes)
                .cloned()
                .collect(),
            unexpected: other
                .attributes
                .difference(&self.attributes)
                .cloned()
                .collect(),
        })
    }
}
