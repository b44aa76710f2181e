//! Resource nodes
//!
//! A node is one unit of provisionable state: a stable name, a kind, the
//! desired inputs and the outputs it will publish once created.

use crate::error::{Result, TopologyError};
use crate::value::{Input, ResolvedInputs, ValueCell};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Kind of cloud resource a node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    InternetGateway,
    RouteTable,
    Subnet,
    ElasticAddress,
    NatGateway,
    RouteTableAssociation,
    SecurityGroup,
    KeyPair,
    MachineImage,
    ComputeInstance,
    DbSubnetGroup,
    DatabaseInstance,
    Cluster,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::InternetGateway => "internet-gateway",
            ResourceKind::RouteTable => "route-table",
            ResourceKind::Subnet => "subnet",
            ResourceKind::ElasticAddress => "elastic-address",
            ResourceKind::NatGateway => "nat-gateway",
            ResourceKind::RouteTableAssociation => "route-table-association",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::KeyPair => "key-pair",
            ResourceKind::MachineImage => "machine-image",
            ResourceKind::ComputeInstance => "compute-instance",
            ResourceKind::DbSubnetGroup => "db-subnet-group",
            ResourceKind::DatabaseInstance => "database-instance",
            ResourceKind::Cluster => "cluster",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of a node inside its [`DependencyGraph`](crate::graph::DependencyGraph)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Provisioning lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Declared, waiting for its dependencies
    Pending,
    /// Waiting for input cells
    ResolvingInputs,
    /// The provisioner is working on it
    Provisioning,
    /// Outputs published
    Resolved,
    /// The provisioner reported an error
    Failed,
    /// Never ran because a dependency failed
    Skipped,
    /// Never ran because scheduling was halted
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Resolved | NodeStatus::Failed | NodeStatus::Skipped | NodeStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, next),
            (Pending, ResolvingInputs)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (ResolvingInputs, Provisioning)
                | (ResolvingInputs, Skipped)
                | (ResolvingInputs, Failed)
                | (ResolvingInputs, Cancelled)
                | (Provisioning, Resolved)
                | (Provisioning, Failed)
        )
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Pending => write!(f, "pending"),
            NodeStatus::ResolvingInputs => write!(f, "resolving-inputs"),
            NodeStatus::Provisioning => write!(f, "provisioning"),
            NodeStatus::Resolved => write!(f, "resolved"),
            NodeStatus::Failed => write!(f, "failed"),
            NodeStatus::Skipped => write!(f, "skipped"),
            NodeStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Declaration of a single resource
#[derive(Debug, Clone)]
pub struct ResourceNode {
    name: String,
    kind: ResourceKind,
    inputs: BTreeMap<String, Input>,
    outputs: BTreeMap<String, ValueCell>,
}

impl ResourceNode {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn input(mut self, key: impl Into<String>, value: impl Into<Input>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Declare an output the provisioner must return
    pub fn output(mut self, key: &str) -> Self {
        let cell = ValueCell::output(&self.name, key, false);
        self.outputs.insert(key.to_string(), cell);
        self
    }

    /// Declare an output whose value is never displayed
    pub fn sensitive_output(mut self, key: &str) -> Self {
        let cell = ValueCell::output(&self.name, key, true);
        self.outputs.insert(key.to_string(), cell);
        self
    }

    /// Attach the conventional `Name` tag
    pub fn named_tag(self) -> Self {
        let name = self.name.clone();
        self.input("tags", Input::map([("Name", Input::from(name))]))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn inputs(&self) -> &BTreeMap<String, Input> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<String, ValueCell> {
        &self.outputs
    }

    /// Every cell this node reads
    pub fn referenced_cells(&self) -> Vec<&ValueCell> {
        self.inputs.values().flat_map(Input::cells).collect()
    }

    /// Wait for every input cell and collect the concrete input set
    pub async fn resolve_inputs(&self) -> Result<ResolvedInputs> {
        let mut resolved = ResolvedInputs::new();
        for (key, input) in &self.inputs {
            resolved.insert(key.clone(), input.resolve().await?);
        }
        Ok(resolved)
    }

    /// Resolve without waiting, see [`Input::peek`]
    pub fn peek_inputs(
        &self,
        fallback: &dyn Fn(&ValueCell) -> Option<Value>,
    ) -> Option<ResolvedInputs> {
        let mut resolved = ResolvedInputs::new();
        for (key, input) in &self.inputs {
            resolved.insert(key.clone(), input.peek(fallback)?);
        }
        Some(resolved)
    }

    /// Publish provisioner outputs into the output cells.
    ///
    /// All declared outputs must be present before any cell is written.
    /// Re-publishing an identical value (re-running a resolved graph) is accepted.
    pub(crate) fn publish(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(missing) = self.outputs.keys().find(|k| !values.contains_key(*k)) {
            return Err(TopologyError::ProvisioningFailed {
                node: self.name.clone(),
                cause: format!("provisioner did not return output '{}'", missing),
            });
        }

        for (key, cell) in &self.outputs {
            let Some(value) = values.get(key) else {
                continue;
            };
            if cell.get().as_ref() == Some(value) {
                continue;
            }
            cell.resolve(value.clone())?;
        }
        Ok(())
    }

    pub(crate) fn reject_outputs(&self, failed_node: &str) {
        for cell in self.outputs.values() {
            cell.reject(failed_node);
        }
    }
}

/// Reference to a declared node, used to wire consumers
#[derive(Debug, Clone)]
pub struct NodeHandle {
    id: NodeId,
    name: String,
    outputs: BTreeMap<String, ValueCell>,
}

impl NodeHandle {
    pub(crate) fn new(id: NodeId, node: &ResourceNode) -> Self {
        Self {
            id,
            name: node.name.clone(),
            outputs: node.outputs.clone(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self, key: &str) -> Result<ValueCell> {
        self.outputs
            .get(key)
            .cloned()
            .ok_or_else(|| TopologyError::UnknownOutput {
                node: self.name.clone(),
                output: key.to_string(),
            })
    }
}
