use serde::{Deserialize, Serialize};

/// A labelled piece of text: one training, validation or test item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub id: String,
    pub text: String,
    pub labels: Vec<String>,
    /// When set, the gold labels are passed to the infer stage as a hint.
    /// Only used while bootstrapping a teacher.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hinted: bool,
}

impl Example {
    pub fn new(id: impl Into<String>, text: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            labels,
            hinted: false,
        }
    }

    /// Copy of this example that exposes its labels as a hint.
    pub fn with_hint(&self) -> Self {
        Self {
            hinted: true,
            ..self.clone()
        }
    }

    pub fn hint(&self) -> Option<&[String]> {
        self.hinted.then_some(self.labels.as_slice())
    }
}
