//! Deterministic stand-ins for the completion and embedding seams.
//!
//! Compiled for this crate's tests and, with the `testing` feature, for
//! downstream crates' tests.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::completion::{Completion, CompletionError, CompletionRequest};
use crate::embed::{TextEmbedder, normalize};

/// Bag-of-words embedder: every lower-cased word hashes into one bucket.
///
/// Identical texts embed identically; texts sharing no words are (barring
/// bucket collisions) orthogonal.
pub struct HashEmbedder {
    dim: usize,
    model_name: String,
    embedded: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            model_name: format!("test/bag-of-words-{dim}"),
            embedded: AtomicUsize::new(0),
        }
    }

    /// Total number of texts embedded so far.
    pub fn embedded(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() % self.dim as u64) as usize] += 1.0;
        }
        normalize(&mut v);
        v
    }
}

impl TextEmbedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Embedder with hand-picked vectors. Unknown texts embed to zero.
pub struct TableEmbedder {
    dim: usize,
    table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            table: HashMap::new(),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.table.insert(text.to_string(), vector);
        self
    }
}

impl TextEmbedder for TableEmbedder {
    fn model_name(&self) -> &str {
        "test/table"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                self.table
                    .get(*t)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.dim])
            })
            .collect())
    }
}

type Respond = dyn Fn(&CompletionRequest) -> Result<Vec<String>, CompletionError> + Send + Sync;

/// Completion backend driven by a closure. Records every request.
pub struct ScriptedCompletion {
    respond: Box<Respond>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(
        respond: impl Fn(&CompletionRequest) -> Result<Vec<String>, CompletionError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `reply`, once per requested sample.
    pub fn constant(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |req| Ok(vec![reply.clone(); req.samples.max(1)]))
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>, CompletionError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        (self.respond)(request)
    }
}

/// Value of the last line of `prompt` that starts with `prefix`.
///
/// The rendered prompt ends with the live input, so this picks the current
/// example's field rather than a demonstration's.
pub fn last_field<'a>(prompt: &'a str, prefix: &str) -> Option<&'a str> {
    prompt
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(prefix))
        .map(str::trim)
}
