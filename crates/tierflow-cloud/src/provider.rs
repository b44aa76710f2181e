//! Provisioner trait definition

use crate::action::ActionType;
use crate::error::ProviderResult;
use crate::node::ResourceKind;
use crate::state::ProviderState;
use crate::value::ResolvedInputs;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// The external collaborator that actually creates resources
///
/// The engine hands it one node at a time with fully resolved inputs. Whether a
/// request results in a create, an update or nothing at all is the
/// provisioner's decision, based on the node identity and input hash.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Returns the provider name (e.g., "simulated")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> ProviderResult<AuthStatus>;

    /// Availability zones of the target region, in provider order
    async fn availability_zones(&self) -> ProviderResult<Vec<String>>;

    /// Snapshot of everything this provider has created
    async fn get_state(&self) -> ProviderResult<ProviderState>;

    /// Create or converge one resource
    async fn provision(&self, request: &ProvisionRequest) -> ProviderResult<ProvisionOutcome>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }
}

/// One node, ready to be provisioned
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Stable node name, the resource identity
    pub name: String,
    pub kind: ResourceKind,
    pub inputs: ResolvedInputs,
    /// SHA-256 of the resolved inputs
    pub input_hash: String,
    /// Output names the node declares; the outcome must contain each of them
    pub outputs: Vec<String>,
}

impl ProvisionRequest {
    pub fn new(name: impl Into<String>, kind: ResourceKind, inputs: ResolvedInputs) -> Self {
        let input_hash = inputs.input_hash();
        Self {
            name: name.into(),
            kind,
            inputs,
            input_hash,
            outputs: Vec::new(),
        }
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }
}

/// What the provisioner did and the outputs the node now has
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub action: ActionType,
    pub outputs: BTreeMap<String, Value>,
}

impl ProvisionOutcome {
    pub fn created(outputs: BTreeMap<String, Value>) -> Self {
        Self {
            action: ActionType::Create,
            outputs,
        }
    }

    pub fn updated(outputs: BTreeMap<String, Value>) -> Self {
        Self {
            action: ActionType::Update,
            outputs,
        }
    }

    pub fn unchanged(outputs: BTreeMap<String, Value>) -> Self {
        Self {
            action: ActionType::NoOp,
            outputs,
        }
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,

    /// Initial delay between retries
    #[serde(with = "millis")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "millis")]
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A single attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt number `attempt` (1-based, the first retry is attempt 2)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()).max(0.0))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(2), Duration::from_secs(1));
        assert_eq!(retry.delay_for(3), Duration::from_secs(2));
        assert_eq!(retry.delay_for(4), Duration::from_secs(4));
        assert_eq!(retry.delay_for(20), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_config_from_millis() {
        let retry: RetryConfig =
            serde_json::from_str(r#"{"max_attempts": 5, "initial_delay": 250}"#).unwrap();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(250));
        assert_eq!(retry.max_delay, Duration::from_secs(30));
    }
}
