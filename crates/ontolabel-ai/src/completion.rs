//! The text-completion seam. Every stage talks to a language model through
//! [`Completion`]; the HTTP adapter and the test stubs implement it.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompletionError {
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("completion backend returned no choices")]
    Empty,
    #[error("{0}")]
    Backend(String),
}

/// One prompt, possibly sampled several times.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    /// Number of independent completions to sample.
    pub samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            samples: 1,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// A language model. Calls may be nondeterministic and may fail.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Returns one string per requested sample (backends may return fewer).
    async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>, CompletionError>;
}

#[async_trait]
impl<T: Completion + ?Sized> Completion for std::sync::Arc<T> {
    async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>, CompletionError> {
        (**self).complete(request).await
    }
}
