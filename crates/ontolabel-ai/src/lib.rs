//! The Infer → Retrieve → Rank pipeline and the seams it runs on: a text
//! completion model, a sentence embedder and the ontology index.

pub mod cache;
pub mod completion;
pub mod embed;
mod error;
pub mod index;
pub mod infer;
pub mod ontology;
pub mod predictor;
pub mod prior;
pub mod program;
pub mod rank;
pub mod signature;

#[cfg(feature = "onnx")]
mod embedder;
#[cfg(feature = "http")]
pub mod http;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{CacheStats, QueryCache};
pub use completion::{Completion, CompletionError, CompletionRequest};
pub use embed::TextEmbedder;
#[cfg(feature = "onnx")]
pub use embedder::Embedder;
pub use error::AiError;
#[cfg(feature = "http")]
pub use http::HttpCompletion;
pub use index::{EmbedMode, EmbeddingIndex, ScoreMap};
pub use ontology::{Ontology, TermId};
pub use predictor::{Predictor, StageState, TraceStep};
pub use prior::Prior;
pub use program::{Execution, Program, RunOptions};
