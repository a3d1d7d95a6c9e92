//! Pipeline hyperparameters.
//!
//! Every field is serializable: the config is persisted verbatim inside a
//! [`ProgramState`](crate::ProgramState) so a saved program can be rebuilt
//! without any other input.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_RETRIEVER_MODEL: &str = "sentence-transformers/all-mpnet-base-v2";
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    // signatures
    pub infer_signature_name: String,
    pub rank_signature_name: String,

    // completion models backing each stage
    #[serde(default = "default_model")]
    pub infer_model: String,
    #[serde(default = "default_model")]
    pub rank_model: String,
    /// Samples requested from the infer stage per window.
    #[serde(default = "default_infer_num_predictions")]
    pub infer_num_predictions: usize,

    // hyperparameters
    #[serde(default, alias = "prior_A")]
    pub prior_a: f64,
    #[serde(default)]
    pub prior_path: Option<PathBuf>,
    #[serde(default = "default_rank_topk")]
    pub rank_topk: usize,
    #[serde(default = "default_chunk_context_window")]
    pub chunk_context_window: usize,
    #[serde(default = "default_chunk_max_windows")]
    pub chunk_max_windows: usize,
    #[serde(default = "default_chunk_window_overlap")]
    pub chunk_window_overlap: f64,
    #[serde(default)]
    pub retriever_embed_descriptions: bool,

    // program logic flow
    #[serde(default)]
    pub rank_skip: bool,

    // ontology
    #[serde(default)]
    pub ontology_path: Option<PathBuf>,
    #[serde(default)]
    pub ontology_name: Option<String>,
    #[serde(default, alias = "ontology_description_path")]
    pub description_path: Option<PathBuf>,
    #[serde(default = "default_retriever_model")]
    pub retriever_model_name: String,
    #[serde(default = "default_embedding_cache_dir")]
    pub embedding_cache_dir: PathBuf,

    // optimizer
    #[serde(default)]
    pub optimizer_name: Option<String>,
}

fn default_model() -> String {
    DEFAULT_COMPLETION_MODEL.to_string()
}

fn default_infer_num_predictions() -> usize {
    1
}

fn default_rank_topk() -> usize {
    50
}

fn default_chunk_context_window() -> usize {
    3000
}

fn default_chunk_max_windows() -> usize {
    5
}

fn default_chunk_window_overlap() -> f64 {
    0.02
}

fn default_retriever_model() -> String {
    DEFAULT_RETRIEVER_MODEL.to_string()
}

fn default_embedding_cache_dir() -> PathBuf {
    PathBuf::from("data").join("embeddings")
}

impl PipelineConfig {
    /// A config with every hyperparameter at its default.
    pub fn new(infer_signature_name: impl Into<String>, rank_signature_name: impl Into<String>) -> Self {
        Self {
            infer_signature_name: infer_signature_name.into(),
            rank_signature_name: rank_signature_name.into(),
            infer_model: default_model(),
            rank_model: default_model(),
            infer_num_predictions: default_infer_num_predictions(),
            prior_a: 0.0,
            prior_path: None,
            rank_topk: default_rank_topk(),
            chunk_context_window: default_chunk_context_window(),
            chunk_max_windows: default_chunk_max_windows(),
            chunk_window_overlap: default_chunk_window_overlap(),
            retriever_embed_descriptions: false,
            rank_skip: false,
            ontology_path: None,
            ontology_name: None,
            description_path: None,
            retriever_model_name: default_retriever_model(),
            embedding_cache_dir: default_embedding_cache_dir(),
            optimizer_name: None,
        }
    }

    /// Check everything a pipeline needs before it is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ontology_path.is_none() {
            return Err(ConfigError::MissingField("ontology_path"));
        }
        if self.retriever_embed_descriptions && self.description_path.is_none() {
            return Err(ConfigError::invalid(
                "description_path",
                "required when retriever_embed_descriptions is set",
            ));
        }
        if self.rank_topk == 0 {
            return Err(ConfigError::invalid("rank_topk", "must be at least 1"));
        }
        if self.chunk_context_window == 0 {
            return Err(ConfigError::invalid("chunk_context_window", "must be at least 1"));
        }
        if self.chunk_max_windows == 0 {
            return Err(ConfigError::invalid("chunk_max_windows", "must be at least 1"));
        }
        if !(self.chunk_window_overlap >= 0.0) {
            return Err(ConfigError::invalid(
                "chunk_window_overlap",
                format!("must be non-negative, got {}", self.chunk_window_overlap),
            ));
        }
        if self.infer_num_predictions == 0 {
            return Err(ConfigError::invalid("infer_num_predictions", "must be at least 1"));
        }
        if !self.prior_a.is_finite() {
            return Err(ConfigError::invalid("prior_a", "must be finite"));
        }
        Ok(())
    }

    /// Ontology identifier used to key the embedding cache.
    ///
    /// Falls back to the ontology file stem when no explicit name is set.
    pub fn ontology_name(&self) -> Option<String> {
        if let Some(name) = &self.ontology_name {
            return Some(name.clone());
        }
        self.ontology_path
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }

    pub fn to_json_file(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }
}
