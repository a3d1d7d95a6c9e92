//! Rank stage: ask the model to reorder a shortlist, then repair its answer
//! into a permutation of that shortlist.

use std::collections::HashSet;

use ontolabel_core::{Fields, NormalizeOptions, extract_labels};
use tracing::debug;

use crate::completion::Completion;
use crate::error::AiError;
use crate::predictor::{Predictor, TraceStep};

pub struct Ranking {
    pub labels: Vec<String>,
    pub step: TraceStep,
}

/// Rerank `shortlist` for `text`.
pub async fn rerank(
    predictor: &Predictor,
    lm: &dyn Completion,
    text: &str,
    shortlist: &[String],
    temperature: Option<f32>,
) -> Result<Ranking, AiError> {
    let mut inputs = Fields::new();
    inputs.insert("text".into(), text.to_string());
    inputs.insert("options".into(), shortlist.join(", "));

    let prediction = predictor.predict(lm, inputs, None, temperature).await?;
    let parsed = extract_labels(&prediction.outputs(), NormalizeOptions::SPLIT_COLON);
    Ok(Ranking {
        labels: merge_ranking(shortlist, &parsed),
        step: prediction.trace_step(),
    })
}

/// Keep the model's picks that are shortlist members, in model order and
/// without repeats, then append the rest of the shortlist in its own order.
///
/// The result is always a permutation of `shortlist`. Shortlists come from
/// an [`Ontology`](crate::Ontology), whose terms are distinct.
pub fn merge_ranking(shortlist: &[String], parsed: &[String]) -> Vec<String> {
    let members: HashSet<&str> = shortlist.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(shortlist.len());
    let mut merged = Vec::with_capacity(shortlist.len());

    for label in parsed {
        if members.contains(label.as_str()) && seen.insert(label.as_str()) {
            merged.push(label.clone());
        }
    }
    let valid = merged.len();
    for label in shortlist {
        if seen.insert(label.as_str()) {
            merged.push(label.clone());
        }
    }

    debug!(valid, shortlist = shortlist.len(), "rank returned valid options");
    merged
}
