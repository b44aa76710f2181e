//! Error types for topology declaration, provisioning and providers

use thiserror::Error;

/// Errors raised by a provisioner (the external collaborator that creates resources)
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Resource creation failed: {0}")]
    CreationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Transient failures that are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloudError::ApiError(_) | CloudError::Throttled(_) | CloudError::Timeout(_)
        )
    }
}

/// Errors raised while declaring, validating or running a topology
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Invalid address block '{0}'")]
    InvalidAddressBlock(String),

    #[error(
        "Address space exhausted: {requested} zones requested but {base} can hold at most {capacity}"
    )]
    AddressSpaceExhausted {
        base: String,
        requested: usize,
        capacity: usize,
    },

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("Resource '{0}' is declared more than once")]
    DuplicateNode(String),

    #[error("Unknown resource: {0}")]
    UnknownNode(String),

    #[error("Resource '{node}' has no output named '{output}'")]
    UnknownOutput { node: String, output: String },

    #[error("'{consumer}' reads an output of '{producer}' without depending on it")]
    UndeclaredDependency { consumer: String, producer: String },

    #[error("Value '{0}' has no producing resource and is never resolved")]
    UnboundValue(String),

    #[error("Value '{0}' has already been resolved")]
    AlreadyResolved(String),

    #[error("Replica mismatch: {zones} zones but {inputs} per-zone inputs")]
    ReplicaMismatch { zones: usize, inputs: usize },

    #[error("Insufficient availability zones: {requested} requested, {available} available")]
    InsufficientZones { requested: usize, available: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Provisioning of '{node}' failed: {cause}")]
    ProvisioningFailed { node: String, cause: String },

    #[error("Dependency '{0}' failed")]
    DependencyFailed(String),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),
}

pub type Result<T> = std::result::Result<T, TopologyError>;

/// Result type returned by provisioners
pub type ProviderResult<T> = std::result::Result<T, CloudError>;
