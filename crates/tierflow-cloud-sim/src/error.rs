//! Simulated provider error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("State file error: {0}")]
    StateError(String),

    #[error("State is locked by {holder} since {since}")]
    Locked { holder: String, since: String },

    #[error("Unsupported output '{output}' for {kind}")]
    UnsupportedOutput { kind: String, output: String },

    #[error("Missing required input '{input}' for {resource}")]
    MissingInput { resource: String, input: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cloud error: {0}")]
    CloudError(#[from] tierflow_cloud::CloudError),
}

impl From<SimError> for tierflow_cloud::CloudError {
    fn from(err: SimError) -> Self {
        use tierflow_cloud::CloudError;
        match err {
            SimError::StateError(msg) => CloudError::StateError(msg),
            SimError::Locked { .. } => CloudError::LockError(err.to_string()),
            SimError::UnsupportedOutput { .. } => CloudError::CreationFailed(err.to_string()),
            SimError::MissingInput { .. } => CloudError::InvalidConfig(err.to_string()),
            SimError::JsonError(e) => CloudError::Json(e),
            SimError::IoError(e) => CloudError::Io(e),
            SimError::CloudError(e) => e,
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
