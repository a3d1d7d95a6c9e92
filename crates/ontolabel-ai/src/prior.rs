//! Label-frequency priors.
//!
//! `score' = score * ln(a * prior + e)`. Terms absent from the prior file get
//! a prior of zero, so with `a = 0` every score is multiplied by `ln(e) = 1`.

use std::collections::HashMap;
use std::f64::consts::E;
use std::fs;
use std::path::Path;

use ontolabel_core::{ConfigError, PipelineConfig};
use tracing::{debug, info};

use crate::index::ScoreMap;
use crate::ontology::{Ontology, TermId};

#[derive(Debug, Clone, Default)]
pub struct Prior {
    a: f64,
    /// Indexed by term id; empty when no prior file is configured.
    values: Vec<f64>,
}

impl Prior {
    /// A prior that leaves scores untouched.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(a: f64, values: Vec<f64>) -> Self {
        Self { a, values }
    }

    /// Parse a JSON `label → frequency` object against `ontology`.
    pub fn from_json(raw: &str, a: f64, ontology: &Ontology) -> Result<Self, ConfigError> {
        let table: HashMap<String, f64> = serde_json::from_str(raw)?;
        let mut values = vec![0.0; ontology.len()];
        let mut unknown = 0usize;
        for (label, value) in table {
            match ontology.id_of(&label) {
                Some(id) => values[id.0] = value,
                None => unknown += 1,
            }
        }
        if unknown > 0 {
            debug!(unknown, "ignored prior labels that are not ontology terms");
        }
        Ok(Self { a, values })
    }

    pub fn load(path: &Path, a: f64, ontology: &Ontology) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let prior = Self::from_json(&raw, a, ontology)?;
        info!(path = %path.display(), a, "loaded label prior");
        Ok(prior)
    }

    /// Build from `prior_a` and `prior_path`; no path means a zero prior.
    pub fn from_config(config: &PipelineConfig, ontology: &Ontology) -> Result<Self, ConfigError> {
        match &config.prior_path {
            Some(path) => Self::load(path, config.prior_a, ontology),
            None => Ok(Self::new(config.prior_a, Vec::new())),
        }
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn value(&self, id: TermId) -> f64 {
        self.values.get(id.0).copied().unwrap_or(0.0)
    }

    pub fn weight(&self, id: TermId) -> f64 {
        (self.a * self.value(id) + E).ln()
    }

    /// Reweight every entry present in `scores`. Never adds entries.
    pub fn reweight(&self, scores: &mut ScoreMap) {
        if self.a == 0.0 {
            return;
        }
        for (id, score) in scores.iter_mut() {
            *score = (f64::from(*score) * self.weight(*id)) as f32;
        }
    }
}
