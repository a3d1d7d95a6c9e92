use ontolabel_core::{ConfigError, StageId};
use thiserror::Error;

use crate::completion::CompletionError;

#[derive(Debug, Error)]
pub enum AiError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("embedding cache {path}: {error:#}")]
    EmbeddingCache { path: String, error: anyhow::Error },

    #[error("stage {0} is frozen")]
    Frozen(StageId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
