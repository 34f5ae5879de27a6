use std::collections::BTreeMap;

/// A categorical column with labels replaced by dense codes.
///
/// Codes follow the sorted order of the labels, so encoding is deterministic.
#[derive(Debug, Clone)]
pub struct EncodedColumn {
    pub labels: Vec<String>,
    pub codes: Vec<usize>,
}

impl EncodedColumn {
    pub fn encode(values: &[String]) -> Self {
        let mut index: BTreeMap<&str, usize> = BTreeMap::new();
        for v in values {
            index.entry(v.as_str()).or_insert(0);
        }
        for (code, slot) in index.values_mut().enumerate() {
            *slot = code;
        }
        let codes = values.iter().map(|v| index[v.as_str()]).collect();
        let labels = index.keys().map(|s| s.to_string()).collect();
        Self { labels, codes }
    }

    pub fn cardinality(&self) -> usize {
        self.labels.len()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.cardinality()];
        for &c in &self.codes {
            counts[c] += 1;
        }
        counts
    }
}

/// Shannon entropy (nats) of a frequency table.
pub fn entropy_of_counts(counts: &[usize]) -> f64 {
    let n: usize = counts.iter().sum();
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    let mut h = 0.0;
    for &c in counts {
        if c > 0 {
            let p = c as f64 / n;
            h -= p * p.ln();
        }
    }
    h
}

pub fn entropy(col: &EncodedColumn) -> f64 {
    entropy_of_counts(&col.counts())
}

/// `table[x][y]`: co-occurrence counts of `x`'s and `y`'s codes.
pub fn contingency(y: &EncodedColumn, x: &EncodedColumn) -> Vec<Vec<usize>> {
    let mut table = vec![vec![0; y.cardinality()]; x.cardinality()];
    for (&yc, &xc) in y.codes.iter().zip(&x.codes) {
        table[xc][yc] += 1;
    }
    table
}

/// H(Y | X).
pub fn conditional_entropy(y: &EncodedColumn, x: &EncodedColumn) -> f64 {
    let n = y.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mut h = 0.0;
    for row in contingency(y, x) {
        let group: usize = row.iter().sum();
        if group > 0 {
            h += group as f64 / n * entropy_of_counts(&row);
        }
    }
    h
}

/// Symmetric uncertainty `2 * IG(Y|X) / (H(Y) + H(X))`, in `[0, 1]`.
pub fn symmetric_uncertainty(y: &EncodedColumn, x: &EncodedColumn) -> f64 {
    let hy = entropy(y);
    let hx = entropy(x);
    if hy + hx <= 0.0 {
        return 0.0;
    }
    (2.0 * (hy - conditional_entropy(y, x)) / (hy + hx)).max(0.0)
}
