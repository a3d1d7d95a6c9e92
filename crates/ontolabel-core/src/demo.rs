//! Few-shot demonstrations and the persisted program state.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::example::Example;

/// Named input or output fields of one stage invocation.
pub type Fields = BTreeMap<String, String>;

/// Identifies a stage of the pipeline. Order is pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Infer,
    Rank,
}

impl StageId {
    pub const ALL: [StageId; 2] = [StageId::Infer, StageId::Rank];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Infer => "infer",
            Self::Rank => "rank",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "infer" => Ok(Self::Infer),
            "rank" => Ok(Self::Rank),
            other => Err(ConfigError::UnknownStage(other.to_string())),
        }
    }
}

/// A recorded input/output pair used as an in-context example for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demonstration {
    pub stage: StageId,
    pub inputs: Fields,
    pub outputs: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Training example this demonstration was produced from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_id: Option<String>,
    /// `true` for bootstrapped teacher traces, `false` for raw labelled examples.
    #[serde(default)]
    pub augmented: bool,
}

impl Demonstration {
    /// A raw labelled demonstration: the example text in, its gold labels out.
    pub fn labeled(stage: StageId, example: &Example) -> Self {
        let mut inputs = Fields::new();
        inputs.insert("text".into(), example.text.clone());
        let mut outputs = Fields::new();
        outputs.insert("output".into(), example.labels.join(", "));
        Self {
            stage,
            inputs,
            outputs,
            rationale: None,
            example_id: Some(example.id.clone()),
            augmented: false,
        }
    }

    /// Whether this demonstration was derived from the given example.
    pub fn derived_from(&self, example_id: &str) -> bool {
        self.example_id.as_deref() == Some(example_id)
    }
}

/// Full configuration plus the demonstrations of every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramState {
    pub config: PipelineConfig,
    #[serde(default)]
    pub demonstrations: BTreeMap<String, Vec<Demonstration>>,
}

impl ProgramState {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            demonstrations: BTreeMap::new(),
        }
    }

    pub fn demos(&self, stage: StageId) -> &[Demonstration] {
        self.demonstrations
            .get(stage.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn set_demos(&mut self, stage: StageId, demos: Vec<Demonstration>) {
        self.demonstrations.insert(stage.as_str().to_string(), demos);
    }

    /// Reject demonstration keys that name no stage.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for key in self.demonstrations.keys() {
            key.parse::<StageId>()?;
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&raw)?;
        state.validate()?;
        tracing::debug!(
            path = %path.display(),
            demos = state.demonstrations.values().map(Vec::len).sum::<usize>(),
            "loaded program state"
        );
        Ok(state)
    }

    pub fn to_json_file(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }
}
