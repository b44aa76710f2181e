//! Tierflow Cloud
//!
//! Declares a multi-tier cloud network (one network, N symmetric availability
//! zones with public and private subnets, one NAT gateway per zone) plus the
//! resources that attach to it, and provisions the result as a dependency graph.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   tier CLI                       │
//! │            (tier validate/plan/up)               │
//! └─────────────────┬───────────────────────────────┘
//!                   │ StackSpec
//! ┌─────────────────▼───────────────────────────────┐
//! │                tierflow-cloud                    │
//! │  partition ─► replica ─► topology / consumers    │
//! │                   │                              │
//! │          graph (nodes, value cells)              │
//! │                   │                              │
//! │  engine ──► trait Provisioner { provision() }    │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!           ┌───────▼───────┐
//!           │ tierflow-     │
//!           │ cloud-sim     │
//!           └───────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut graph = DependencyGraph::new();
//! let zones = provisioner.availability_zones().await?;
//! let stack = Stack::declare(&mut graph, &spec, &zones)?;
//!
//! let engine = ProvisioningEngine::new(provisioner, spec.engine.clone());
//! let result = engine.run(&graph).await?;
//! for output in stack.outputs() {
//!     println!("{} = {}", output.name, output.display(&|_| None));
//! }
//! ```

pub mod action;
pub mod consumers;
pub mod engine;
pub mod error;
pub mod graph;
pub mod node;
pub mod partition;
pub mod provider;
pub mod replica;
pub mod stack;
pub mod state;
pub mod topology;
pub mod value;

// Re-exports
pub use action::{
    Action, ActionType, ApplyResult, NodeFailure, NodeOutcome, Plan, PlanSummary, SkippedNode,
};
pub use consumers::{
    BastionOutputs, BastionSpec, ClusterOutputs, ClusterSpec, DatabaseOutputs, DatabaseSpec,
    ImageFilter,
};
pub use engine::{EngineConfig, ProvisioningEngine, StopHandle};
pub use error::{CloudError, ProviderResult, Result, TopologyError};
pub use graph::DependencyGraph;
pub use node::{NodeHandle, NodeId, NodeStatus, ResourceKind, ResourceNode};
pub use partition::{AddressBlock, PartitionScheme, ZonePartition, partition};
pub use provider::{AuthStatus, ProvisionOutcome, ProvisionRequest, Provisioner, RetryConfig};
pub use replica::{Replica, ReplicaTemplate, Zone, ZoneReplicaSet, replicate, select_zones};
pub use stack::{OutputValue, Stack, StackOutput, StackSpec};
pub use state::{ProviderState, ResourceState, ResourceStatus};
pub use topology::{NetworkSpec, NetworkTopology, TopologyOutputs};
pub use value::{CellSource, Input, REDACTED, ResolvedInputs, ResolvedValue, Secret, ValueCell};
