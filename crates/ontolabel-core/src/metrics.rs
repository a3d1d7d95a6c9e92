//! Ranking metrics over a gold label set and a predicted ordered list.
//!
//! Both metrics truncate the prediction to its top `k` entries. Gold labels
//! are treated as a set.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Rank precision at k: `|P[:k] ∩ G| / min(k, |G|)`.
///
/// Defined as `0.0` when the gold set is empty.
pub fn rp_at_k<S: AsRef<str>>(gold: &[S], predicted: &[S], k: usize) -> f64 {
    let gold: HashSet<&str> = gold.iter().map(AsRef::as_ref).collect();
    let gold_k = k.min(gold.len());
    if gold_k == 0 {
        return 0.0;
    }
    hits(&gold, predicted, k) as f64 / gold_k as f64
}

/// Recall at k: `|{p ∈ P[:k] : p ∈ G}| / |G|`.
///
/// Undefined for an empty gold set, which yields `None`. Callers exclude such
/// examples from aggregation.
pub fn recall_at_k<S: AsRef<str>>(gold: &[S], predicted: &[S], k: usize) -> Option<f64> {
    let gold: HashSet<&str> = gold.iter().map(AsRef::as_ref).collect();
    if gold.is_empty() {
        return None;
    }
    Some(hits(&gold, predicted, k) as f64 / gold.len() as f64)
}

fn hits<S: AsRef<str>>(gold: &HashSet<&str>, predicted: &[S], k: usize) -> usize {
    predicted
        .iter()
        .take(k)
        .filter(|p| gold.contains(p.as_ref()))
        .count()
}

/// A named task metric, e.g. `rp10` or `recall5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Metric {
    RankPrecision(usize),
    Recall(usize),
}

impl Metric {
    /// Score a prediction. `None` when the metric is undefined for this gold set.
    pub fn score<S: AsRef<str>>(&self, gold: &[S], predicted: &[S]) -> Option<f64> {
        match *self {
            Self::RankPrecision(k) => Some(rp_at_k(gold, predicted, k)),
            Self::Recall(k) => recall_at_k(gold, predicted, k),
        }
    }

    pub fn k(&self) -> usize {
        match *self {
            Self::RankPrecision(k) | Self::Recall(k) => k,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RankPrecision(k) => write!(f, "rp{k}"),
            Self::Recall(k) => write!(f, "recall{k}"),
        }
    }
}

impl FromStr for Metric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ConfigError::UnknownMetric(s.to_string());
        let (ctor, digits): (fn(usize) -> Metric, &str) = if let Some(rest) = s.strip_prefix("recall") {
            (Metric::Recall, rest)
        } else if let Some(rest) = s.strip_prefix("rp") {
            (Metric::RankPrecision, rest)
        } else {
            return Err(unknown());
        };
        match digits.parse::<usize>() {
            Ok(k) if k > 0 => Ok(ctor(k)),
            _ => Err(unknown()),
        }
    }
}

impl TryFrom<String> for Metric {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Metric> for String {
    fn from(metric: Metric) -> Self {
        metric.to_string()
    }
}
