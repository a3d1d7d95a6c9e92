//! Compiler and optimizer settings.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use ontolabel_core::{ConfigError, Metric};
use serde::{Deserialize, Serialize};

/// How a compiler turns training examples into demonstrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerKind {
    /// One bootstrap pass; a trace is kept when the teacher scores above zero.
    BootstrapFewShot,
    /// One bootstrap pass; a trace is kept when the teacher beats the student.
    BootstrapFewShotGain,
    /// Random search over bootstrapped candidates, scored on validation data.
    RandomSearch,
}

impl CompilerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BootstrapFewShot => "bootstrap-few-shot",
            Self::BootstrapFewShotGain => "bootstrap-few-shot-gain",
            Self::RandomSearch => "bootstrap-few-shot-with-random-search",
        }
    }
}

impl fmt::Display for CompilerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompilerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bootstrap-few-shot" => Ok(Self::BootstrapFewShot),
            "bootstrap-few-shot-gain" => Ok(Self::BootstrapFewShotGain),
            "bootstrap-few-shot-with-random-search" => Ok(Self::RandomSearch),
            other => Err(ConfigError::UnknownCompiler(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerConfig {
    #[serde(alias = "compiler_name")]
    pub name: String,
    #[serde(default = "default_metric", alias = "metric_name")]
    pub metric: Metric,

    #[serde(default = "default_max_bootstrapped_demos")]
    pub max_bootstrapped_demos: usize,
    #[serde(default)]
    pub max_labeled_demos: usize,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_num_candidate_programs")]
    pub num_candidate_programs: usize,

    /// Validation examples in flight at once.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    /// Failed training examples tolerated per bootstrap pass.
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
    /// Failed validation examples tolerated per candidate. Unlimited when unset.
    #[serde(default)]
    pub validation_max_errors: Option<usize>,
    /// Abort the whole search, rather than drop the candidate, when a
    /// candidate exceeds `validation_max_errors`.
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub seed: u64,
}

fn default_metric() -> Metric {
    Metric::RankPrecision(10)
}

fn default_max_bootstrapped_demos() -> usize {
    4
}

fn default_max_rounds() -> usize {
    1
}

fn default_num_candidate_programs() -> usize {
    10
}

fn default_num_threads() -> usize {
    8
}

fn default_max_errors() -> usize {
    5
}

impl CompilerConfig {
    pub fn new(kind: CompilerKind) -> Self {
        Self {
            name: kind.as_str().to_string(),
            metric: default_metric(),
            max_bootstrapped_demos: default_max_bootstrapped_demos(),
            max_labeled_demos: 0,
            max_rounds: default_max_rounds(),
            num_candidate_programs: default_num_candidate_programs(),
            num_threads: default_num_threads(),
            max_errors: default_max_errors(),
            validation_max_errors: None,
            fail_fast: false,
            seed: 0,
        }
    }

    pub fn kind(&self) -> Result<CompilerKind, ConfigError> {
        self.name.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kind()?;
        if self.max_rounds == 0 {
            return Err(ConfigError::invalid("max_rounds", "must be at least 1"));
        }
        if self.num_threads == 0 {
            return Err(ConfigError::invalid("num_threads", "must be at least 1"));
        }
        Ok(())
    }
}

/// Order in which the two stages are compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    EndToEnd,
    LeftToRight,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndToEnd => "end-to-end",
            Self::LeftToRight => "left-to-right",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "end-to-end" => Ok(Self::EndToEnd),
            "left-to-right" => Ok(Self::LeftToRight),
            other => Err(ConfigError::UnknownOptimizer(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub optimizer_name: String,

    // teacher models
    #[serde(alias = "infer_teacher_model_name")]
    pub infer_teacher_model: String,
    #[serde(alias = "rank_teacher_model_name")]
    pub rank_teacher_model: String,

    // compilation flags
    #[serde(default = "yes")]
    pub infer_compile: bool,
    #[serde(default = "yes")]
    pub rank_compile: bool,
    /// Show the teacher the gold labels while bootstrapping Infer.
    #[serde(default)]
    pub infer_hint: bool,

    pub infer_compile_config: CompilerConfig,
    pub rank_compile_config: CompilerConfig,
}

fn yes() -> bool {
    true
}

impl OptimizerConfig {
    pub fn kind(&self) -> Result<OptimizerKind, ConfigError> {
        self.optimizer_name.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let kind = self.kind()?;
        if kind == OptimizerKind::LeftToRight && !(self.infer_compile && self.rank_compile) {
            return Err(ConfigError::invalid(
                "optimizer_name",
                "left-to-right needs both infer_compile and rank_compile",
            ));
        }
        self.infer_compile_config.validate()?;
        self.rank_compile_config.validate()?;
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded optimizer config");
        Ok(config)
    }

    pub fn to_json_file(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
