pub mod chunk;
pub mod config;
pub mod demo;
pub mod error;
pub mod example;
pub mod metrics;
pub mod parse;

pub use chunk::Chunker;
pub use config::PipelineConfig;
pub use demo::{Demonstration, Fields, ProgramState, StageId};
pub use error::ConfigError;
pub use example::Example;
pub use metrics::{Metric, recall_at_k, rp_at_k};
pub use parse::{NormalizeOptions, extract_labels, normalize};
