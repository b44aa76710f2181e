//! Provider state snapshots
//!
//! A provisioner reports what it has created as a [`ProviderState`]: one
//! [`ResourceState`] per node name, with the input hash it was created from and
//! the outputs it produced. Planning compares a graph against such a snapshot.
//! Where (and whether) the snapshot is persisted is up to the provisioner.

use crate::node::ResourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const STATE_VERSION: u32 = 1;

/// State for a single provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderState {
    /// State format version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by node name
    pub resources: BTreeMap<String, ResourceState>,
}

impl Default for ProviderState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl ProviderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a resource
    pub fn set(&mut self, name: impl Into<String>, state: ResourceState) {
        self.resources.insert(name.into(), state);
        self.updated_at = Utc::now();
    }

    pub fn get(&self, name: &str) -> Option<&ResourceState> {
        self.resources.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResourceState)> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Recorded output `output` of resource `name`
    pub fn output(&self, name: &str, output: &str) -> Option<&Value> {
        self.resources.get(name).and_then(|r| r.outputs.get(output))
    }
}

/// State of a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Provider-specific resource ID
    pub id: String,

    /// Resource kind
    pub kind: ResourceKind,

    /// Current status
    pub status: ResourceStatus,

    /// Hash of the inputs the resource was last converged with
    pub input_hash: String,

    /// Outputs published for the resource (ID, address, endpoint, ...)
    pub outputs: BTreeMap<String, Value>,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, kind: ResourceKind, input_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            status: ResourceStatus::Unknown,
            input_hash: input_hash.into(),
            outputs: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_outputs(mut self, outputs: BTreeMap<String, Value>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Record a converge with new inputs
    pub fn touch(&mut self, input_hash: impl Into<String>, outputs: BTreeMap<String, Value>) {
        self.input_hash = input_hash.into();
        self.outputs = outputs;
        self.updated_at = Utc::now();
    }

    pub fn get_output<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.outputs
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Resource is being created
    Creating,
    /// Resource is available
    Available,
    /// Resource is in error state
    Error,
    /// Status is unknown
    Unknown,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Creating => write!(f, "creating"),
            ResourceStatus::Available => write!(f, "available"),
            ResourceStatus::Error => write!(f, "error"),
            ResourceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_roundtrip() {
        let mut state = ProviderState::new();
        state.set(
            "demo-vpc",
            ResourceState::new("vpc-0123", ResourceKind::Network, "abc")
                .with_status(ResourceStatus::Available)
                .with_outputs(BTreeMap::from([("id".to_string(), json!("vpc-0123"))])),
        );

        let json = serde_json::to_string(&state).unwrap();
        let loaded: ProviderState = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.output("demo-vpc", "id"), Some(&json!("vpc-0123")));
        assert_eq!(
            loaded.get("demo-vpc").unwrap().get_output::<String>("id"),
            Some("vpc-0123".to_string())
        );
    }
}
