//! Scoring a program over a labelled example set.

use futures::StreamExt;
use futures::stream;
use ontolabel_ai::{Completion, Program};
use ontolabel_core::{Example, Metric};
use tracing::{debug, warn};

use crate::error::ExampleFailure;

/// Predictions for every example of a set, in input order.
pub struct Evaluation<'a> {
    examples: &'a [Example],
    /// `None` where the example failed to run.
    predictions: Vec<Option<Vec<String>>>,
    failures: Vec<ExampleFailure>,
}

impl<'a> Evaluation<'a> {
    /// Run `program` on every example, at most `num_threads` at a time.
    ///
    /// Failed examples are logged and recorded, never propagated.
    pub async fn run(
        program: &Program,
        lm: &dyn Completion,
        examples: &'a [Example],
        num_threads: usize,
    ) -> Evaluation<'a> {
        let results: Vec<_> = stream::iter(examples)
            .map(|example| async move { program.run_example(lm, example, None).await })
            .buffered(num_threads.max(1))
            .collect()
            .await;

        let mut predictions = Vec::with_capacity(examples.len());
        let mut failures = Vec::new();
        for (example, result) in examples.iter().zip(results) {
            match result {
                Ok(execution) => predictions.push(Some(execution.labels)),
                Err(e) => {
                    warn!(example = %example.id, error = %e, "evaluation example failed");
                    failures.push(ExampleFailure {
                        example_id: example.id.clone(),
                        detail: e.to_string(),
                    });
                    predictions.push(None);
                }
            }
        }
        debug!(examples = examples.len(), failures = failures.len(), "evaluated");
        Evaluation {
            examples,
            predictions,
            failures,
        }
    }

    /// Mean of `metric` over the examples where it is defined. A failed
    /// example scores zero.
    pub fn score(&self, metric: Metric) -> f64 {
        let scores: Vec<f64> = self
            .examples
            .iter()
            .zip(&self.predictions)
            .filter_map(|(example, prediction)| match prediction {
                Some(labels) => metric.score(&example.labels, labels),
                None => Some(0.0),
            })
            .collect();
        if scores.is_empty() {
            return 0.0;
        }
        scores.iter().sum::<f64>() / scores.len() as f64
    }

    pub fn predictions(&self) -> &[Option<Vec<String>>] {
        &self.predictions
    }

    pub fn failures(&self) -> &[ExampleFailure] {
        &self.failures
    }
}
