//! A prompted stage: one signature, one completion model, a demonstration
//! pool and a compile state.

use ontolabel_core::{Demonstration, Fields, StageId};
use tracing::debug;

use crate::completion::{Completion, CompletionRequest};
use crate::error::AiError;
use crate::signature::{ParsedCompletion, Signature};

/// Where a stage is in compilation. Transitions only move forward:
/// `Uncompiled → Bootstrapping → Frozen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Uncompiled,
    Bootstrapping,
    Frozen,
}

/// One stage invocation as recorded during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceStep {
    pub stage: StageId,
    pub inputs: Fields,
    pub outputs: Fields,
    pub rationale: Option<String>,
}

impl TraceStep {
    /// Turn this step into a bootstrapped demonstration for `example_id`.
    pub fn to_demonstration(&self, example_id: &str) -> Demonstration {
        Demonstration {
            stage: self.stage,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            rationale: self.rationale.clone(),
            example_id: Some(example_id.to_string()),
            augmented: true,
        }
    }
}

/// Every sampled completion of one call, parsed.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub stage: StageId,
    pub inputs: Fields,
    pub completions: Vec<ParsedCompletion>,
}

impl Prediction {
    pub fn outputs(&self) -> Vec<&str> {
        self.completions.iter().map(|c| c.output.as_str()).collect()
    }

    /// The trace step recorded for this call: the first sample's output.
    pub fn trace_step(&self) -> TraceStep {
        let first = self.completions.first();
        let mut outputs = Fields::new();
        outputs.insert(
            "output".into(),
            first.map(|c| c.output.clone()).unwrap_or_default(),
        );
        TraceStep {
            stage: self.stage,
            inputs: self.inputs.clone(),
            outputs,
            rationale: first.and_then(|c| c.rationale.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Predictor {
    stage: StageId,
    signature: &'static Signature,
    model: String,
    samples: usize,
    demos: Vec<Demonstration>,
    state: StageState,
}

impl Predictor {
    pub fn new(stage: StageId, signature: &'static Signature, model: impl Into<String>) -> Self {
        Self {
            stage,
            signature,
            model: model.into(),
            samples: 1,
            demos: Vec::new(),
            state: StageState::Uncompiled,
        }
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples.max(1);
        self
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn signature(&self) -> &'static Signature {
        self.signature
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn demos(&self) -> &[Demonstration] {
        &self.demos
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn is_frozen(&self) -> bool {
        self.state == StageState::Frozen
    }

    /// Replace the demonstration pool. Frozen stages refuse.
    pub fn set_demos(&mut self, demos: Vec<Demonstration>) -> Result<(), AiError> {
        if self.is_frozen() {
            return Err(AiError::Frozen(self.stage));
        }
        self.demos = demos;
        Ok(())
    }

    /// Drop demonstrations derived from `example_id`. Frozen pools are kept
    /// as compiled.
    pub fn exclude_example(&mut self, example_id: &str) {
        if !self.is_frozen() {
            self.demos.retain(|d| !d.derived_from(example_id));
        }
    }

    /// Clear an unfrozen stage back to zero-shot.
    pub fn reset(&mut self) {
        if !self.is_frozen() {
            self.demos.clear();
            self.state = StageState::Uncompiled;
        }
    }

    pub fn begin_bootstrap(&mut self) {
        if !self.is_frozen() {
            self.state = StageState::Bootstrapping;
        }
    }

    pub fn freeze(&mut self) {
        self.state = StageState::Frozen;
    }

    /// Restore a persisted pool. A restored non-empty pool counts as compiled.
    pub(crate) fn restore(&mut self, demos: Vec<Demonstration>) {
        self.state = if demos.is_empty() {
            StageState::Uncompiled
        } else {
            StageState::Frozen
        };
        self.demos = demos;
    }

    /// Render the prompt for `inputs`, call the model and parse every sample.
    ///
    /// `hint` is shown to the model but never recorded in the prediction.
    pub async fn predict(
        &self,
        lm: &dyn Completion,
        inputs: Fields,
        hint: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<Prediction, AiError> {
        let prompt = self.signature.render(&self.demos, &inputs, hint);
        let request = CompletionRequest {
            model: self.model.clone(),
            prompt,
            samples: self.samples,
            temperature,
            max_tokens: None,
        };
        let raw = lm.complete(&request).await?;
        debug!(
            stage = %self.stage,
            model = %self.model,
            demos = self.demos.len(),
            samples = raw.len(),
            "predicted"
        );
        let completions = raw.iter().map(|c| self.signature.parse(c)).collect();
        Ok(Prediction {
            stage: self.stage,
            inputs,
            completions,
        })
    }
}
