//! Planned actions and apply results

use crate::error::{Result, TopologyError};
use crate::graph::DependencyGraph;
use crate::node::{NodeStatus, ResourceKind};
use crate::state::ProviderState;
use crate::value::ValueCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Represents a planned action for a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Node name
    pub resource: String,

    /// Type of action to perform
    pub action_type: ActionType,

    pub kind: ResourceKind,

    /// Input hash the resource would be converged with, if already computable
    pub input_hash: Option<String>,

    /// Redacted inputs; `None` while some input is only known after apply
    pub inputs: Option<Value>,
}

impl Action {
    pub fn description(&self) -> String {
        format!("{} {} ({})", self.action_type, self.resource, self.kind)
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Plan containing all actions to be applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Actions in provisioning order
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
        }
    }

    /// Compare the declared graph with what a provider has already created.
    ///
    /// Cells that are not resolved yet are looked up in the recorded outputs of
    /// their producer. A node whose inputs still cannot be computed depends on
    /// something that will be created first, so it is planned as a create (or
    /// an update if the resource already exists).
    pub fn from_state(graph: &DependencyGraph, state: &ProviderState) -> Result<Self> {
        let order = graph.validate()?;
        let recorded = |cell: &ValueCell| {
            cell.source()
                .and_then(|source| state.output(&source.node, &source.output))
                .cloned()
        };

        let mut actions = Vec::with_capacity(order.len());
        for id in order {
            let node = graph
                .node(id)
                .ok_or_else(|| TopologyError::UnknownNode(format!("#{}", id.index())))?;
            let inputs = node.peek_inputs(&recorded);
            let input_hash = inputs.as_ref().map(|i| i.input_hash());

            let action_type = match (state.get(node.name()), &input_hash) {
                (None, _) => ActionType::Create,
                (Some(existing), Some(hash)) if existing.input_hash == *hash => ActionType::NoOp,
                (Some(_), _) => ActionType::Update,
            };

            actions.push(Action {
                resource: node.name().to_string(),
                action_type,
                kind: node.kind(),
                input_hash,
                inputs: inputs.map(|i| i.redacted()),
            });
        }

        Ok(Self::new(actions))
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} unchanged",
            self.create, self.update, self.no_change
        )
    }
}

/// A node the provisioner handled successfully
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub name: String,
    pub kind: ResourceKind,
    pub action: ActionType,
    pub duration_ms: u64,
}

/// A node the provisioner (or output publishing) failed on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFailure {
    pub name: String,
    pub kind: ResourceKind,
    /// Redacted cause
    pub error: String,
}

/// A node that never ran because something it depends on failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedNode {
    pub name: String,
    pub failed_dependency: String,
}

/// Result of running a graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Resolved nodes in completion order
    pub applied: Vec<NodeOutcome>,

    pub failed: Vec<NodeFailure>,

    pub skipped: Vec<SkippedNode>,

    /// Nodes never scheduled because of fail-fast or a stop request
    pub cancelled: Vec<String>,

    /// Final status of every node
    pub statuses: BTreeMap<String, NodeStatus>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node resolved
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && self.cancelled.is_empty()
    }

    pub fn status(&self, name: &str) -> Option<NodeStatus> {
        self.statuses.get(name).copied()
    }

    pub fn count(&self, action: ActionType) -> usize {
        self.applied.iter().filter(|o| o.action == action).count()
    }

    /// Failures and skips as errors, failures first
    pub fn errors(&self) -> Vec<TopologyError> {
        let failed = self.failed.iter().map(|f| TopologyError::ProvisioningFailed {
            node: f.name.clone(),
            cause: f.error.clone(),
        });
        let skipped = self
            .skipped
            .iter()
            .map(|s| TopologyError::DependencyFailed(s.failed_dependency.clone()));
        failed.chain(skipped).collect()
    }
}

impl std::fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} unchanged, {} failed, {} skipped, {} cancelled ({} ms)",
            self.count(ActionType::Create),
            self.count(ActionType::Update),
            self.count(ActionType::NoOp),
            self.failed.len(),
            self.skipped.len(),
            self.cancelled.len(),
            self.duration_ms
        )
    }
}
