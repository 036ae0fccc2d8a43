//! Region-pair matrix aggregation.
//!
//! A matrix is built over the sorted union of labels seen on either side of
//! the input triples. Repeated (source, target) observations are averaged.
//! The diagonal is always NaN; intra-region instance pairs carry distinct
//! `region_instanceN` labels and therefore never land on it.

use std::collections::HashMap;
use std::path::Path;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use serde::{Deserialize, Serialize};

/// Square matrix of per-pair metric means
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matrix {
    pub labels: Vec<String>,
    /// Row-major values, `values[src][dst]`, NaN where no observation exists
    pub values: Vec<Vec<f64>>,
}

impl Matrix {
    /// Build from (source, target, metric) observations
    pub fn from_triples<S: AsRef<str>>(triples: &[(S, S, f64)]) -> Matrix {
        let mut labels: Vec<String> = triples
            .iter()
            .flat_map(|(a, b, _)| [a.as_ref().to_string(), b.as_ref().to_string()])
            .collect();
        labels.sort();
        labels.dedup();

        let index: HashMap<&str, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i))
            .collect();

        let n = labels.len();
        let mut sums = vec![vec![0.0_f64; n]; n];
        let mut counts = vec![vec![0_u32; n]; n];
        for (a, b, value) in triples {
            let (i, j) = (index[a.as_ref()], index[b.as_ref()]);
            sums[i][j] += value;
            counts[i][j] += 1;
        }

        let mut values = vec![vec![f64::NAN; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i != j && counts[i][j] > 0 {
                    values[i][j] = sums[i][j] / f64::from(counts[i][j]);
                }
            }
        }

        Matrix { labels, values }
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Cell for a label pair; NaN when either label is absent
    pub fn get(&self, source: &str, target: &str) -> f64 {
        let find = |l: &str| self.labels.iter().position(|x| x == l);
        match (find(source), find(target)) {
            (Some(i), Some(j)) => self.values[i][j],
            _ => f64::NAN,
        }
    }

    /// All finite cell values
    pub fn finite_values(&self) -> Vec<f64> {
        self.values
            .iter()
            .flatten()
            .copied()
            .filter(|v| v.is_finite())
            .collect()
    }

    /// Write as CSV with a leading label column; NaN renders as an empty
    /// cell
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .wrap_err_with(|| format!("Failed to create '{}'", path.display()))?;

        let mut header = vec![String::new()];
        header.extend(self.labels.iter().cloned());
        writer.write_record(&header)?;

        for (label, row) in self.labels.iter().zip(&self.values) {
            let mut record = vec![label.clone()];
            record.extend(row.iter().map(|v| {
                if v.is_finite() {
                    format!("{:.3}", v)
                } else {
                    String::new()
                }
            }));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Histogram prep over fixed-width bins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    pub counts: Vec<usize>,
    pub bin_edges: Vec<f64>,
    pub bin_centers: Vec<f64>,
}

/// Bin values into `bins` equal-width buckets spanning [min, max]
pub fn histogram(values: &[f64], bins: usize) -> Option<Histogram> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || bins == 0 {
        return None;
    }

    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };

    let mut counts = vec![0_usize; bins];
    for v in &finite {
        let mut idx = ((v - min) / width) as usize;
        if idx >= bins {
            idx = bins - 1;
        }
        counts[idx] += 1;
    }

    let bin_edges: Vec<f64> = (0..=bins).map(|i| min + width * i as f64).collect();
    let bin_centers: Vec<f64> = bin_edges.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();

    Some(Histogram {
        counts,
        bin_edges,
        bin_centers,
    })
}
