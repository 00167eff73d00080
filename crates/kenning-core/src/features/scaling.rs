//! Batch Feature Scaling
//!
//! Min-max and z-score normalization applied column-wise across a batch of
//! feature rows before the derived summary is produced. Single-row
//! extraction scales against precomputed corpus statistics instead.

use serde::{Deserialize, Serialize};

use crate::config::ScalingMethod;

/// Per-column statistics for scaling outside a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusStats {
    pub mins: Vec<f64>,
    pub maxs: Vec<f64>,
    pub means: Vec<f64>,
    pub std_devs: Vec<f64>,
}

impl CorpusStats {
    /// Compute column statistics over a batch of equal-length rows
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let Some(first) = rows.first() else {
            return Self::default();
        };
        let cols = first.len();
        let n = rows.len() as f64;

        let mut mins = vec![f64::INFINITY; cols];
        let mut maxs = vec![f64::NEG_INFINITY; cols];
        let mut means = vec![0.0; cols];
        for row in rows {
            for (c, &v) in row.iter().enumerate() {
                mins[c] = mins[c].min(v);
                maxs[c] = maxs[c].max(v);
                means[c] += v / n;
            }
        }

        let mut std_devs = vec![0.0; cols];
        for row in rows {
            for (c, &v) in row.iter().enumerate() {
                std_devs[c] += (v - means[c]).powi(2) / n;
            }
        }
        for s in &mut std_devs {
            *s = s.sqrt();
        }

        Self {
            mins,
            maxs,
            means,
            std_devs,
        }
    }

    /// Scale one row in place
    pub fn scale_row(&self, row: &mut [f64], method: ScalingMethod) {
        if self.mins.len() != row.len() {
            return;
        }
        for (c, v) in row.iter_mut().enumerate() {
            *v = match method {
                ScalingMethod::MinMax => {
                    let range = self.maxs[c] - self.mins[c];
                    if range.abs() < f64::EPSILON {
                        // Degenerate column: every value identical
                        0.5
                    } else {
                        (*v - self.mins[c]) / range
                    }
                }
                ScalingMethod::ZScore => {
                    if self.std_devs[c] < f64::EPSILON {
                        0.0
                    } else {
                        (*v - self.means[c]) / self.std_devs[c]
                    }
                }
            };
        }
    }
}

/// Scale all rows of a batch in place using the batch's own statistics
pub fn scale_batch(rows: &mut [Vec<f64>], method: ScalingMethod) -> CorpusStats {
    let stats = CorpusStats::from_rows(rows);
    for row in rows.iter_mut() {
        stats.scale_row(row, method);
    }
    stats
}
