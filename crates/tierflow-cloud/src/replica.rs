//! Per-zone replication
//!
//! A [`ReplicaTemplate`] declares the node group for one zone. The replicator
//! instantiates it once per zone, in zone order, and collects the results into a
//! [`ZoneReplicaSet`] whose positions match the zone ordinals.

use crate::error::{Result, TopologyError};
use crate::graph::DependencyGraph;
use serde::{Deserialize, Serialize};

/// Availability zone with its ordinal in the selected set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub index: usize,
}

impl Zone {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

/// Pick the first `count` zones in provider order
pub fn select_zones(available: &[String], count: usize) -> Result<Vec<Zone>> {
    if count == 0 || available.len() < count {
        return Err(TopologyError::InsufficientZones {
            requested: count,
            available: available.len(),
        });
    }

    Ok(available
        .iter()
        .take(count)
        .enumerate()
        .map(|(index, name)| Zone::new(name.clone(), index))
        .collect())
}

/// One zone's instantiation context
#[derive(Debug)]
pub struct Replica<'a, I> {
    pub zone: &'a Zone,
    pub input: I,
    base_name: &'a str,
    tier: &'a str,
}

impl<I> Replica<'_, I> {
    /// `<base-name>-<tier>-<zone>`
    pub fn name(&self) -> String {
        self.name_for(self.tier)
    }

    /// Name of a sibling node in the same zone group
    pub fn name_for(&self, tier: &str) -> String {
        format!("{}-{}-{}", self.base_name, tier, self.zone.name)
    }
}

/// Declares the resources of one zone
pub trait ReplicaTemplate {
    /// Zone-specific input bound to each replica
    type Input;
    /// What the template hands back for each zone
    type Output;

    /// Tier segment of the replica name (e.g. "public-subnet")
    fn tier(&self) -> &str;

    fn instantiate(
        &self,
        graph: &mut DependencyGraph,
        replica: Replica<'_, Self::Input>,
    ) -> Result<Self::Output>;
}

/// Ordered per-zone results. Position `i` always belongs to zone ordinal `i`.
#[derive(Debug, Clone)]
pub struct ZoneReplicaSet<T> {
    entries: Vec<(Zone, T)>,
}

impl<T> ZoneReplicaSet<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index).map(|(_, v)| v)
    }

    /// Replica of zone ordinal 0. Consumers that need "a" subnet use this one.
    pub fn first(&self) -> Option<&T> {
        self.get(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Zone, &T)> {
        self.entries.iter().map(|(z, v)| (z, v))
    }

    /// Positional projection, order preserved
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Vec<U> {
        self.entries.iter().map(|(_, v)| v).map(f).collect()
    }
}

/// Instantiate `template` once per zone.
///
/// `inputs[i]` is bound to `zones[i]`; both must have the same length.
pub fn replicate<T>(
    graph: &mut DependencyGraph,
    base_name: &str,
    template: &T,
    zones: &[Zone],
    inputs: Vec<T::Input>,
) -> Result<ZoneReplicaSet<T::Output>>
where
    T: ReplicaTemplate,
{
    if zones.len() != inputs.len() {
        return Err(TopologyError::ReplicaMismatch {
            zones: zones.len(),
            inputs: inputs.len(),
        });
    }

    let mut entries = Vec::with_capacity(zones.len());
    for (zone, input) in zones.iter().zip(inputs) {
        let replica = Replica {
            zone,
            input,
            base_name,
            tier: template.tier(),
        };
        tracing::debug!("Replicating {} into {}", replica.name(), zone.name);
        let output = template.instantiate(graph, replica)?;
        entries.push((zone.clone(), output));
    }

    Ok(ZoneReplicaSet { entries })
}
