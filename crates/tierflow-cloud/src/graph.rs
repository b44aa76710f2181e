//! Dependency graph
//!
//! Edges are declared explicitly as (consumer, producer) pairs, independent of
//! which outputs a node happens to read. [`DependencyGraph::validate`] checks
//! both that the graph is acyclic and that every value a node reads comes from
//! one of its declared dependencies.
//!
//! # Algorithm
//!
//! Ordering uses Kahn's algorithm with a min-heap on declaration order, so the
//! same declarations always produce the same order. When nodes remain after the
//! queue drains, one concrete cycle is extracted from them by walking
//! dependency edges until a node repeats.

use crate::error::{Result, TopologyError};
use crate::node::{NodeHandle, NodeId, ResourceNode};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<ResourceNode>,
    index: HashMap<String, NodeId>,
    /// consumer -> producers
    dependencies: Vec<BTreeSet<NodeId>>,
    /// producer -> consumers
    dependents: Vec<BTreeSet<NodeId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Names must be unique within the graph.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<NodeHandle> {
        if self.index.contains_key(node.name()) {
            return Err(TopologyError::DuplicateNode(node.name().to_string()));
        }

        let id = NodeId(self.nodes.len());
        let handle = NodeHandle::new(id, &node);
        self.index.insert(node.name().to_string(), id);
        self.nodes.push(node);
        self.dependencies.push(BTreeSet::new());
        self.dependents.push(BTreeSet::new());

        tracing::trace!("Declared {}", handle.name());
        Ok(handle)
    }

    /// `consumer` must not start before `producer` has resolved
    pub fn add_edge(&mut self, consumer: NodeId, producer: NodeId) -> Result<()> {
        self.check(consumer)?;
        self.check(producer)?;
        self.dependencies[consumer.0].insert(producer);
        self.dependents[producer.0].insert(consumer);
        Ok(())
    }

    /// Declare several producers for one consumer
    pub fn depends_on<I>(&mut self, consumer: NodeId, producers: I) -> Result<()>
    where
        I: IntoIterator<Item = NodeId>,
    {
        for producer in producers {
            self.add_edge(consumer, producer)?;
        }
        Ok(())
    }

    /// Add a node together with its dependency edges
    pub fn add_with_deps<I>(&mut self, node: ResourceNode, producers: I) -> Result<NodeHandle>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let handle = self.add_node(node)?;
        self.depends_on(handle.id(), producers)?;
        Ok(handle)
    }

    fn check(&self, id: NodeId) -> Result<()> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(TopologyError::UnknownNode(format!("#{}", id.0)))
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&ResourceNode> {
        self.nodes.get(id.0)
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    /// Nodes in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ResourceNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn dependencies(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.dependencies
            .get(id.0)
            .into_iter()
            .flat_map(|deps| deps.iter().copied())
    }

    pub fn dependents(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.dependents
            .get(id.0)
            .into_iter()
            .flat_map(|deps| deps.iter().copied())
    }

    /// Every node that directly or indirectly depends on `id`
    pub fn transitive_dependents(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.reachable(id, &self.dependents)
    }

    /// Every node `id` directly or indirectly depends on
    pub fn ancestors(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.reachable(id, &self.dependencies)
    }

    fn reachable(&self, start: NodeId, edges: &[BTreeSet<NodeId>]) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeId> = edges
            .get(start.0)
            .map(|e| e.iter().copied().collect())
            .unwrap_or_default();

        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(edges[next.0].iter().copied());
            }
        }
        seen
    }

    /// Order in which nodes can be provisioned, producers before consumers
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut queue: BinaryHeap<Reverse<NodeId>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(NodeId(i)))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(Reverse(id)) = queue.pop() {
            order.push(id);
            for &dependent in &self.dependents[id.0] {
                in_degree[dependent.0] -= 1;
                if in_degree[dependent.0] == 0 {
                    queue.push(Reverse(dependent));
                }
            }
        }

        if order.len() == self.nodes.len() {
            return Ok(order);
        }

        let remaining: BTreeSet<NodeId> = (0..self.nodes.len())
            .map(NodeId)
            .filter(|id| in_degree[id.0] > 0)
            .collect();
        Err(TopologyError::CycleDetected(self.extract_cycle(&remaining)))
    }

    /// Every remaining node still has a remaining dependency, so following
    /// those edges must revisit a node.
    fn extract_cycle(&self, remaining: &BTreeSet<NodeId>) -> Vec<String> {
        let Some(&start) = remaining.iter().next() else {
            return Vec::new();
        };

        let mut path: Vec<NodeId> = Vec::new();
        let mut position: HashMap<NodeId, usize> = HashMap::new();
        let mut current = start;

        loop {
            if let Some(&at) = position.get(&current) {
                return path[at..]
                    .iter()
                    .map(|id| self.nodes[id.0].name().to_string())
                    .collect();
            }
            position.insert(current, path.len());
            path.push(current);

            match self.dependencies[current.0]
                .iter()
                .find(|dep| remaining.contains(*dep))
            {
                Some(&next) => current = next,
                None => {
                    return path
                        .iter()
                        .map(|id| self.nodes[id.0].name().to_string())
                        .collect();
                }
            }
        }
    }

    /// Check the graph before anything is provisioned.
    ///
    /// Returns the provisioning order on success.
    pub fn validate(&self) -> Result<Vec<NodeId>> {
        let order = self.topological_order()?;

        for (id, node) in self.iter() {
            let mut ancestors = None;
            for cell in node.referenced_cells() {
                let Some(source) = cell.source() else {
                    if !cell.is_resolved() {
                        return Err(TopologyError::UnboundValue(cell.label().to_string()));
                    }
                    continue;
                };
                let producer = self
                    .find(&source.node)
                    .ok_or_else(|| TopologyError::UnknownNode(source.node.clone()))?;
                let known = ancestors.get_or_insert_with(|| self.ancestors(id));
                if !known.contains(&producer) {
                    return Err(TopologyError::UndeclaredDependency {
                        consumer: node.name().to_string(),
                        producer: source.node.clone(),
                    });
                }
            }
        }

        Ok(order)
    }
}
