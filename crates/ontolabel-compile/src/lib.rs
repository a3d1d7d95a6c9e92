//! Compiling ontolabel programs: bootstrapped few-shot demonstrations chosen
//! by random search on validation data.

pub mod bootstrap;
pub mod config;
mod error;
pub mod evaluate;
pub mod optimizer;
pub mod search;

#[cfg(test)]
mod fixtures;

pub use bootstrap::{BootstrapReport, BootstrapSettings, Bootstrapped, SuccessMode, bootstrap};
pub use config::{CompilerConfig, CompilerKind, OptimizerConfig, OptimizerKind};
pub use error::{CompileError, ExampleFailure};
pub use evaluate::Evaluation;
pub use optimizer::{Optimized, Optimizer};
pub use search::{CandidateKind, CandidateReport, CompileReport, Compiled, Compiler};
