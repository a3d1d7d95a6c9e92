use ontolabel_ai::AiError;
use ontolabel_core::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error("too many failed examples: {errors} (max {max_errors})")]
    BudgetExceeded { errors: usize, max_errors: usize },

    #[error("every candidate program was disqualified")]
    NoViableCandidate,
}

/// One training or validation example that could not be run or scored.
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleFailure {
    pub example_id: String,
    pub detail: String,
}
