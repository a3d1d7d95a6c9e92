//! Infer stage: turn one text window into a set of label queries.

use std::collections::BTreeSet;

use ontolabel_core::{Fields, NormalizeOptions, extract_labels};

use crate::completion::Completion;
use crate::error::AiError;
use crate::predictor::{Predictor, TraceStep};

pub struct Queries {
    pub queries: BTreeSet<String>,
    pub step: TraceStep,
}

/// Sample the infer predictor on `window` and union the parsed labels of
/// every sample. An empty completion yields an empty set.
pub async fn generate_queries(
    predictor: &Predictor,
    lm: &dyn Completion,
    window: &str,
    hint: Option<&str>,
    temperature: Option<f32>,
) -> Result<Queries, AiError> {
    let mut inputs = Fields::new();
    inputs.insert("text".into(), window.to_string());

    let prediction = predictor.predict(lm, inputs, hint, temperature).await?;
    let queries = extract_labels(&prediction.outputs(), NormalizeOptions::RAW)
        .into_iter()
        .collect();
    Ok(Queries {
        queries,
        step: prediction.trace_step(),
    })
}
