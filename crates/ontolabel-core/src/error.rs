use thiserror::Error;

/// Construction-time configuration failures. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unknown signature: {0}")]
    UnknownSignature(String),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("unknown compiler: {0}")]
    UnknownCompiler(String),

    #[error("unknown optimizer: {0}")]
    UnknownOptimizer(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
