//! Flow-volume anomaly analysis.
//!
//! This module turns a batch of [`FlowRecord`]s into ranked anomaly
//! candidates using per-group standard scores.
//!
//! # Statistical Methodology
//!
//! ## Grouping
//! Records are partitioned by a [`GroupKey`] (by default the
//! `(source, destination)` pair). Each group is its own population.
//!
//! ## Group Statistics
//! For a group with metric values [x₀, x₁, ..., xₙ₋₁]:
//! - μ (mu) = mean of the values
//! - σ (sigma) = sample standard deviation (N-1 divisor)
//!
//! A single-member or constant group has σ = 0 by convention. Non-finite
//! values are left out of the statistics.
//!
//! ## Standard Score
//! z = (x - μ) / σ
//!
//! When σ = 0 the score is undefined and the record is never an anomaly
//! candidate. A constant group would otherwise produce infinite scores.
//!
//! ## Selection
//! A record is a candidate when |z| > threshold. Candidates are ranked by
//! the signed score, so large positive deviations (unusually high volume)
//! come before negative ones of the same magnitude.

use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;
use statrs::statistics::{Data, Distribution};
use tracing::{debug, trace};

use crate::flow::{FlowRecord, GroupKey, KeySpec};

/// Default |z| threshold, roughly two standard deviations.
pub const DEFAULT_ZSCORE_THRESHOLD: f64 = 2.0;

/// Default number of findings to report.
pub const DEFAULT_TOP_K: usize = 10;

/// Per-group summary of the metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroupStats {
    pub mean: f64,
    pub stddev: f64,
    pub count: usize,
}

impl GroupStats {
    /// Returns true when every member of the group has the same metric.
    pub fn is_degenerate(&self) -> bool {
        self.stddev == 0.0
    }
}

/// Calculates mean and sample standard deviation for a set of values.
///
/// Non-finite values are skipped; `count` is the number of finite values.
pub fn calculate_statistics(values: &[f64]) -> GroupStats {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let count = finite.len();
    if count < values.len() {
        trace!("Skipped {} non-finite values", values.len() - count);
    }

    // Streaming variance leaves rounding noise on constant fractional input
    let constant = finite.windows(2).all(|pair| pair[0] == pair[1]);

    let data = Data::new(finite);
    let mean = data.mean().filter(|m| m.is_finite()).unwrap_or(0.0);
    let stddev = if count < 2 || constant {
        0.0
    } else {
        data.std_dev().filter(|s| s.is_finite()).unwrap_or(0.0)
    };

    GroupStats {
        mean,
        stddev,
        count,
    }
}

/// Computes statistics for every group present in `records`.
///
/// The key extractor is arbitrary; the result holds exactly one entry per
/// distinct key. Empty input yields an empty map.
pub fn group_statistics<K, F>(records: &[FlowRecord], key_fn: F) -> HashMap<K, GroupStats>
where
    K: Hash + Eq,
    F: Fn(&FlowRecord) -> K,
{
    let mut buckets: HashMap<K, Vec<f64>> = HashMap::new();
    for record in records {
        buckets.entry(key_fn(record)).or_default().push(record.metric);
    }

    let stats: HashMap<K, GroupStats> = buckets
        .into_iter()
        .map(|(key, values)| (key, calculate_statistics(&values)))
        .collect();

    debug!(
        "Computed statistics for {} groups from {} records",
        stats.len(),
        records.len()
    );

    stats
}

/// Standard score of `metric` against `stats`.
///
/// Returns `None` for zero-variance groups and for any non-finite result.
pub fn z_score(metric: f64, stats: &GroupStats) -> Option<f64> {
    if stats.is_degenerate() {
        return None;
    }

    let z = (metric - stats.mean) / stats.stddev;
    z.is_finite().then_some(z)
}

/// A flow record with its standard score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub record: FlowRecord,
    /// `None` when the score is undefined for this record's group.
    pub z_score: Option<f64>,
}

/// Scores records against their group statistics.
#[derive(Debug, Clone, Default)]
pub struct AnomalyScorer {
    key_spec: KeySpec,
}

impl AnomalyScorer {
    pub fn new(key_spec: KeySpec) -> Self {
        Self { key_spec }
    }

    pub fn key_spec(&self) -> &KeySpec {
        &self.key_spec
    }

    /// Computes group statistics for a batch using this scorer's key.
    pub fn statistics(&self, records: &[FlowRecord]) -> HashMap<GroupKey, GroupStats> {
        group_statistics(records, |record| self.key_spec.key_for(record))
    }

    /// Produces one [`ScoredRecord`] per input record, order preserved.
    pub fn score(
        &self,
        records: Vec<FlowRecord>,
        stats: &HashMap<GroupKey, GroupStats>,
    ) -> Vec<ScoredRecord> {
        records
            .into_iter()
            .map(|record| {
                let key = self.key_spec.key_for(&record);
                let z_score = match stats.get(&key) {
                    Some(group) => z_score(record.metric, group),
                    None => {
                        trace!("No statistics for group {}", key);
                        None
                    }
                };
                ScoredRecord { record, z_score }
            })
            .collect()
    }
}

/// Threshold filter and ranking for scored records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyFilter {
    pub threshold: f64,
    pub top_k: usize,
}

impl Default for AnomalyFilter {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_ZSCORE_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl AnomalyFilter {
    pub fn new(threshold: f64, top_k: usize) -> Self {
        Self { threshold, top_k }
    }

    /// Returns true when the score strictly exceeds the threshold in magnitude.
    pub fn is_anomalous(&self, z_score: Option<f64>) -> bool {
        match z_score {
            Some(z) if z.is_finite() => z.abs() > self.threshold,
            _ => false,
        }
    }

    /// Keeps qualifying records and ranks them. No truncation.
    pub fn select(&self, scored: Vec<ScoredRecord>) -> Vec<ScoredRecord> {
        let mut candidates: Vec<ScoredRecord> = scored
            .into_iter()
            .filter(|s| self.is_anomalous(s.z_score))
            .collect();
        rank(&mut candidates);
        candidates
    }

    /// Truncates an already ranked list to the configured `top_k`.
    pub fn top_k<T>(&self, mut ranked: Vec<T>) -> Vec<T> {
        ranked.truncate(self.top_k);
        ranked
    }
}

/// Sorts descending by signed score. Stable; undefined scores sink to the end.
pub fn rank(scored: &mut [ScoredRecord]) {
    scored.sort_by(|a, b| match (a.z_score, b.z_score) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}
