use thiserror::Error;

use crate::prompt::PromptError;

/// Error type that captures failures of the wizard engine itself.
///
/// Ordinary step faults never surface here: the navigator converts them into
/// module recovery steps. Only faults that escape recovery, contract
/// violations, and persistence problems do.
#[derive(Debug, Error)]
pub enum WizardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),
    #[error("No module installed under `{0}`")]
    UnknownModule(String),
    #[error("Module `{module}` has no step named `{step}`")]
    UnknownStep { module: String, step: String },
    #[error("Step `{0}` completed without registering a successor")]
    NoSuccessor(String),
    #[error("Recovery step `{step}` failed: {fault}")]
    RecoveryFailed { step: String, fault: String },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WizardError {
    /// Formatted text stored as `error` in the resume file for fatal exits.
    pub fn telemetry_text(&self) -> String {
        match self {
            WizardError::RecoveryFailed { fault, .. } => fault.clone(),
            other => other.to_string(),
        }
    }
}
