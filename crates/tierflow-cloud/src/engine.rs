//! Provisioning engine
//!
//! Drives a validated [`DependencyGraph`] to completion against a
//! [`Provisioner`]. All node futures are polled from the calling task through a
//! [`FuturesUnordered`]; a node is started as soon as every node it depends on
//! has resolved, and at most [`EngineConfig::parallelism`] provider calls are in
//! flight at once.
//!
//! A failed node rejects its output cells and every transitive dependent is
//! reported as skipped without ever reaching the provisioner. Nodes outside the
//! failed subtree keep running unless `fail_fast` is set, in which case nothing
//! new is scheduled after the first failure. Nodes that have not reached the
//! provisioner by then, including those still waiting for a slot, end up
//! `Cancelled`; a [`StopHandle`] has the same effect.

use crate::action::{ApplyResult, NodeFailure, NodeOutcome, SkippedNode};
use crate::error::{ProviderResult, Result, TopologyError};
use crate::graph::DependencyGraph;
use crate::node::{NodeId, NodeStatus};
use crate::provider::{ProvisionOutcome, ProvisionRequest, Provisioner, RetryConfig};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::Instrument;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stop scheduling new nodes after the first failure
    pub fail_fast: bool,

    /// Maximum number of concurrent provider calls
    pub parallelism: usize,

    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fail_fast: false,
            parallelism: 8,
            retry: RetryConfig::default(),
        }
    }
}

/// Requests that a running engine stop scheduling new nodes
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Current status of every node during a run
struct StatusBoard {
    statuses: Mutex<Vec<NodeStatus>>,
}

impl StatusBoard {
    fn new(len: usize) -> Self {
        Self {
            statuses: Mutex::new(vec![NodeStatus::Pending; len]),
        }
    }

    fn get(&self, id: NodeId) -> NodeStatus {
        let statuses = self.statuses.lock().unwrap_or_else(|e| e.into_inner());
        statuses[id.index()]
    }

    /// Apply a lifecycle transition; returns false if it is not allowed
    fn transition(&self, id: NodeId, next: NodeStatus) -> bool {
        let mut statuses = self.statuses.lock().unwrap_or_else(|e| e.into_inner());
        let current = statuses[id.index()];
        if current.can_transition_to(next) {
            statuses[id.index()] = next;
            true
        } else {
            tracing::debug!("Ignoring transition {} -> {} for #{}", current, next, id.index());
            false
        }
    }

    fn snapshot(&self) -> Vec<NodeStatus> {
        self.statuses.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Why a node task did not resolve
enum NodeError {
    /// An input cell was rejected by the named node
    Dependency(String),
    /// The node itself failed (redacted cause)
    Failed(String),
    /// A halt was requested while the node waited for a provider slot
    Cancelled,
}

pub struct ProvisioningEngine {
    provisioner: Arc<dyn Provisioner>,
    config: EngineConfig,
    stop: StopHandle,
}

impl ProvisioningEngine {
    pub fn new(provisioner: Arc<dyn Provisioner>, config: EngineConfig) -> Self {
        Self {
            provisioner,
            config,
            stop: StopHandle::default(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Provision every node of `graph`.
    ///
    /// Structural problems (cycles, undeclared reads) are returned as `Err`
    /// before anything is provisioned. Per-node failures are reported in the
    /// returned [`ApplyResult`].
    pub async fn run(&self, graph: &DependencyGraph) -> Result<ApplyResult> {
        let started = Instant::now();
        graph.validate()?;

        tracing::info!(
            "Provisioning {} resources with {}",
            graph.len(),
            self.provisioner.name()
        );

        let board = StatusBoard::new(graph.len());
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut result = ApplyResult::new();

        let mut waiting_on: Vec<usize> = graph
            .iter()
            .map(|(id, _)| graph.dependencies(id).count())
            .collect();
        let mut ready: BTreeSet<NodeId> = graph
            .iter()
            .map(|(id, _)| id)
            .filter(|id| waiting_on[id.index()] == 0)
            .collect();
        let halted = AtomicBool::new(false);
        let mut in_flight = FuturesUnordered::new();

        loop {
            if self.stop.is_stopped() && !halted.swap(true, Ordering::SeqCst) {
                tracing::warn!("Stop requested, no further resources will be started");
            }

            if !halted.load(Ordering::SeqCst) {
                while let Some(id) = ready.pop_first() {
                    if board.transition(id, NodeStatus::ResolvingInputs) {
                        in_flight.push(self.run_node(
                            graph,
                            id,
                            &board,
                            semaphore.clone(),
                            &halted,
                        ));
                    }
                }
            }

            let Some((id, outcome)) = in_flight.next().await else {
                break;
            };

            match outcome {
                Ok(done) => {
                    board.transition(id, NodeStatus::Resolved);
                    result.applied.push(done);
                    for dependent in graph.dependents(id) {
                        waiting_on[dependent.index()] -= 1;
                        if waiting_on[dependent.index()] == 0
                            && board.get(dependent) == NodeStatus::Pending
                        {
                            ready.insert(dependent);
                        }
                    }
                }
                Err(NodeError::Dependency(failed)) => {
                    board.transition(id, NodeStatus::Skipped);
                    self.skip(graph, id, &failed, &mut result);
                    self.skip_dependents(graph, id, &failed, &board, &mut result);
                }
                Err(NodeError::Failed(cause)) => {
                    let Some(node) = graph.node(id) else {
                        continue;
                    };
                    board.transition(id, NodeStatus::Failed);
                    node.reject_outputs(node.name());
                    result.failed.push(NodeFailure {
                        name: node.name().to_string(),
                        kind: node.kind(),
                        error: cause,
                    });
                    self.skip_dependents(graph, id, node.name(), &board, &mut result);

                    if self.config.fail_fast && !halted.swap(true, Ordering::SeqCst) {
                        tracing::warn!("Fail-fast: no further resources will be started");
                    }
                }
                Err(NodeError::Cancelled) => {
                    if board.transition(id, NodeStatus::Cancelled)
                        && let Some(node) = graph.node(id)
                    {
                        node.reject_outputs(node.name());
                        result.cancelled.push(node.name().to_string());
                    }
                }
            }
        }

        for (id, node) in graph.iter() {
            if board.get(id) == NodeStatus::Pending && board.transition(id, NodeStatus::Cancelled) {
                node.reject_outputs(node.name());
                result.cancelled.push(node.name().to_string());
            }
        }

        result.statuses = graph
            .iter()
            .zip(board.snapshot())
            .map(|((_, node), status)| (node.name().to_string(), status))
            .collect();
        result.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!("Provisioning finished: {}", result);
        Ok(result)
    }

    fn skip(&self, graph: &DependencyGraph, id: NodeId, failed: &str, result: &mut ApplyResult) {
        if let Some(node) = graph.node(id) {
            node.reject_outputs(failed);
            result.skipped.push(SkippedNode {
                name: node.name().to_string(),
                failed_dependency: failed.to_string(),
            });
            tracing::debug!(node = node.name(), "Skipped, '{}' failed", failed);
        }
    }

    fn skip_dependents(
        &self,
        graph: &DependencyGraph,
        id: NodeId,
        failed: &str,
        board: &StatusBoard,
        result: &mut ApplyResult,
    ) {
        for dependent in graph.transitive_dependents(id) {
            if board.transition(dependent, NodeStatus::Skipped) {
                self.skip(graph, dependent, failed, result);
            }
        }
    }

    async fn run_node(
        &self,
        graph: &DependencyGraph,
        id: NodeId,
        board: &StatusBoard,
        semaphore: Arc<Semaphore>,
        halted: &AtomicBool,
    ) -> (NodeId, std::result::Result<NodeOutcome, NodeError>) {
        let Some(node) = graph.node(id) else {
            return (id, Err(NodeError::Failed(format!("unknown node #{}", id.index()))));
        };
        let span = tracing::info_span!("node", node = node.name(), kind = %node.kind());

        let outcome = async {
            let started = Instant::now();

            let inputs = node.resolve_inputs().await.map_err(|e| match e {
                TopologyError::DependencyFailed(failed) => NodeError::Dependency(failed),
                other => NodeError::Failed(other.to_string()),
            })?;

            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| NodeError::Failed(e.to_string()))?;
            if halted.load(Ordering::SeqCst) || self.stop.is_stopped() {
                tracing::debug!("Halted before provisioning");
                return Err(NodeError::Cancelled);
            }
            board.transition(id, NodeStatus::Provisioning);

            let request = ProvisionRequest::new(node.name(), node.kind(), inputs)
                .with_outputs(node.outputs().keys().cloned());
            tracing::debug!(inputs = %request.inputs, "Provisioning");

            let provisioned = self.provision_with_retry(&request).await.map_err(|e| {
                let cause = request.inputs.redact_text(&e.to_string());
                tracing::warn!("Provisioning failed: {}", cause);
                NodeError::Failed(cause)
            })?;

            node.publish(&provisioned.outputs).map_err(|e| {
                let cause = request.inputs.redact_text(&e.to_string());
                tracing::warn!("Publishing outputs failed: {}", cause);
                NodeError::Failed(cause)
            })?;

            tracing::info!("{} {}", provisioned.action, node.name());
            Ok::<_, NodeError>(NodeOutcome {
                name: node.name().to_string(),
                kind: node.kind(),
                action: provisioned.action,
                duration_ms: started.elapsed().as_millis() as u64,
            })
        }
        .instrument(span)
        .await;

        (id, outcome)
    }

    async fn provision_with_retry(
        &self,
        request: &ProvisionRequest,
    ) -> ProviderResult<ProvisionOutcome> {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.provisioner.provision(request).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    attempt += 1;
                    let delay = retry.delay_for(attempt);
                    tracing::warn!(
                        "Attempt {}/{} in {:?}: {}",
                        attempt,
                        max_attempts,
                        delay,
                        request.inputs.redact_text(&e.to_string())
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
