//! Multi-tier network topology
//!
//! One network with an internet gateway and a shared public route table, then
//! per zone: a public subnet associated with that route table, an elastic
//! address and NAT gateway placed in the zone's own public subnet, and a
//! private subnet whose route table sends egress through the zone's own NAT.
//!
//! ```text
//! vpc ─┬─ igw ── public-rt ─┬─ public-rta-<zone>
//!      ├─ public-subnet-<zone> ─┤
//!      │        └─ nat-gw-<zone> (+ nat-eip-<zone>)
//!      └─ private-subnet-<zone> ── private-rta-<zone> ── private-rt-<zone>
//! ```

use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::node::{NodeHandle, NodeId, ResourceKind, ResourceNode};
use crate::partition::{AddressBlock, PartitionScheme};
use crate::replica::{Replica, ReplicaTemplate, Zone, ZoneReplicaSet, replicate};
use crate::value::{Input, ValueCell};
use serde::{Deserialize, Serialize};

const ANYWHERE: &str = "0.0.0.0/0";

fn default_zone_count() -> usize {
    3
}

/// Address and zone layout of the network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Base block, e.g. `10.0.0.0/16`
    pub cidr: AddressBlock,

    /// Number of availability zones to span
    #[serde(default = "default_zone_count")]
    pub zones: usize,

    #[serde(default)]
    pub partition: PartitionScheme,
}

impl NetworkSpec {
    pub fn new(cidr: AddressBlock) -> Self {
        Self {
            cidr,
            zones: default_zone_count(),
            partition: PartitionScheme::default(),
        }
    }

    pub fn with_zones(mut self, zones: usize) -> Self {
        self.zones = zones;
        self
    }
}

fn route_to(target_key: &str, target: ValueCell) -> Input {
    Input::from(vec![Input::map([
        ("cidr_block", Input::from(ANYWHERE)),
        (target_key, Input::from(target)),
    ])])
}

struct PublicTier<'a> {
    vpc: &'a NodeHandle,
    route_table: &'a NodeHandle,
}

struct PublicZone {
    subnet: NodeHandle,
    association: NodeHandle,
}

impl ReplicaTemplate for PublicTier<'_> {
    type Input = AddressBlock;
    type Output = PublicZone;

    fn tier(&self) -> &str {
        "public-subnet"
    }

    fn instantiate(
        &self,
        graph: &mut DependencyGraph,
        replica: Replica<'_, AddressBlock>,
    ) -> Result<PublicZone> {
        let subnet = graph.add_with_deps(
            ResourceNode::new(replica.name(), ResourceKind::Subnet)
                .input("vpc_id", self.vpc.output("id")?)
                .input("cidr_block", replica.input.to_string())
                .input("availability_zone", replica.zone.name.clone())
                .input("map_public_ip_on_launch", true)
                .named_tag()
                .output("id"),
            [self.vpc.id()],
        )?;

        let association = graph.add_with_deps(
            ResourceNode::new(replica.name_for("public-rta"), ResourceKind::RouteTableAssociation)
                .input("subnet_id", subnet.output("id")?)
                .input("route_table_id", self.route_table.output("id")?)
                .output("id"),
            [subnet.id(), self.route_table.id()],
        )?;

        Ok(PublicZone {
            subnet,
            association,
        })
    }
}

struct NatTier;

struct NatZone {
    address: NodeHandle,
    gateway: NodeHandle,
}

impl ReplicaTemplate for NatTier {
    /// The zone's own public subnet
    type Input = NodeHandle;
    type Output = NatZone;

    fn tier(&self) -> &str {
        "nat-gw"
    }

    fn instantiate(
        &self,
        graph: &mut DependencyGraph,
        replica: Replica<'_, NodeHandle>,
    ) -> Result<NatZone> {
        let address = graph.add_node(
            ResourceNode::new(replica.name_for("nat-eip"), ResourceKind::ElasticAddress)
                .input("domain", "vpc")
                .named_tag()
                .output("id")
                .output("public_ip"),
        )?;

        let subnet = &replica.input;
        let gateway = graph.add_with_deps(
            ResourceNode::new(replica.name(), ResourceKind::NatGateway)
                .input("allocation_id", address.output("id")?)
                .input("subnet_id", subnet.output("id")?)
                .named_tag()
                .output("id"),
            [address.id(), subnet.id()],
        )?;

        Ok(NatZone { address, gateway })
    }
}

struct PrivateTier<'a> {
    vpc: &'a NodeHandle,
}

struct PrivateZone {
    subnet: NodeHandle,
    route_table: NodeHandle,
    association: NodeHandle,
}

impl ReplicaTemplate for PrivateTier<'_> {
    /// The zone's private block and its NAT gateway
    type Input = (AddressBlock, NodeHandle);
    type Output = PrivateZone;

    fn tier(&self) -> &str {
        "private-subnet"
    }

    fn instantiate(
        &self,
        graph: &mut DependencyGraph,
        replica: Replica<'_, Self::Input>,
    ) -> Result<PrivateZone> {
        let (block, nat) = &replica.input;

        let subnet = graph.add_with_deps(
            ResourceNode::new(replica.name(), ResourceKind::Subnet)
                .input("vpc_id", self.vpc.output("id")?)
                .input("cidr_block", block.to_string())
                .input("availability_zone", replica.zone.name.clone())
                .named_tag()
                .output("id"),
            [self.vpc.id()],
        )?;

        let route_table = graph.add_with_deps(
            ResourceNode::new(replica.name_for("private-rt"), ResourceKind::RouteTable)
                .input("vpc_id", self.vpc.output("id")?)
                .input("routes", route_to("nat_gateway_id", nat.output("id")?))
                .named_tag()
                .output("id"),
            [self.vpc.id(), nat.id()],
        )?;

        let association = graph.add_with_deps(
            ResourceNode::new(replica.name_for("private-rta"), ResourceKind::RouteTableAssociation)
                .input("subnet_id", subnet.output("id")?)
                .input("route_table_id", route_table.output("id")?)
                .output("id"),
            [subnet.id(), route_table.id()],
        )?;

        Ok(PrivateZone {
            subnet,
            route_table,
            association,
        })
    }
}

/// What the topology exposes to downstream consumers
#[derive(Debug, Clone)]
pub struct TopologyOutputs {
    pub vpc: NodeHandle,
    pub vpc_id: ValueCell,
    /// Network address block as reported by the provider
    pub vpc_cidr: ValueCell,
    /// Public subnet ids in zone order
    pub public_subnet_ids: Vec<ValueCell>,
    /// Private subnet ids in zone order
    pub private_subnet_ids: Vec<ValueCell>,
    pub public_blocks: Vec<AddressBlock>,
    pub private_blocks: Vec<AddressBlock>,
    pub zones: Vec<Zone>,
    members: Vec<NodeId>,
}

impl TopologyOutputs {
    /// Every node of the topology. Consumers depend on all of them so they
    /// only start once the whole network (NAT routes included) is in place.
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn first_public_subnet_id(&self) -> Option<&ValueCell> {
        self.public_subnet_ids.first()
    }
}

pub struct NetworkTopology {
    name: String,
    spec: NetworkSpec,
}

impl NetworkTopology {
    pub fn new(name: impl Into<String>, spec: NetworkSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }

    pub fn spec(&self) -> &NetworkSpec {
        &self.spec
    }

    /// Declare every topology node into `graph`, one zone group per entry of `zones`.
    ///
    /// The address space is partitioned before anything is declared, so an
    /// oversized zone count leaves the graph untouched.
    pub fn declare(&self, graph: &mut DependencyGraph, zones: &[Zone]) -> Result<TopologyOutputs> {
        let name = &self.name;
        let blocks = self.spec.partition.partition(&self.spec.cidr, zones.len())?;

        tracing::debug!(
            "Declaring {} across {} zones from {}",
            name,
            zones.len(),
            self.spec.cidr
        );

        let vpc = graph.add_node(
            ResourceNode::new(format!("{}-vpc", name), ResourceKind::Network)
                .input("cidr_block", self.spec.cidr.to_string())
                .input("enable_dns_hostnames", true)
                .input("enable_dns_support", true)
                .named_tag()
                .output("id")
                .output("cidr_block"),
        )?;

        let igw = graph.add_with_deps(
            ResourceNode::new(format!("{}-igw", name), ResourceKind::InternetGateway)
                .input("vpc_id", vpc.output("id")?)
                .named_tag()
                .output("id"),
            [vpc.id()],
        )?;

        let public_rt = graph.add_with_deps(
            ResourceNode::new(format!("{}-public-rt", name), ResourceKind::RouteTable)
                .input("vpc_id", vpc.output("id")?)
                .input("routes", route_to("gateway_id", igw.output("id")?))
                .named_tag()
                .output("id"),
            [vpc.id(), igw.id()],
        )?;

        let public = replicate(
            graph,
            name,
            &PublicTier {
                vpc: &vpc,
                route_table: &public_rt,
            },
            zones,
            blocks.public.clone(),
        )?;

        let nat = replicate(
            graph,
            name,
            &NatTier,
            zones,
            public.map(|zone| zone.subnet.clone()),
        )?;

        let private_inputs: Vec<_> = blocks
            .private
            .iter()
            .copied()
            .zip(nat.map(|zone| zone.gateway.clone()))
            .collect();
        let private = replicate(graph, name, &PrivateTier { vpc: &vpc }, zones, private_inputs)?;

        let mut members = vec![vpc.id(), igw.id(), public_rt.id()];
        members.extend(collect_public(&public));
        members.extend(collect_nat(&nat));
        members.extend(collect_private(&private));

        Ok(TopologyOutputs {
            vpc_id: vpc.output("id")?,
            vpc_cidr: vpc.output("cidr_block")?,
            public_subnet_ids: public
                .map(|zone| zone.subnet.output("id"))
                .into_iter()
                .collect::<Result<_>>()?,
            private_subnet_ids: private
                .map(|zone| zone.subnet.output("id"))
                .into_iter()
                .collect::<Result<_>>()?,
            public_blocks: blocks.public,
            private_blocks: blocks.private,
            zones: zones.to_vec(),
            vpc,
            members,
        })
    }
}

fn collect_public(set: &ZoneReplicaSet<PublicZone>) -> Vec<NodeId> {
    set.map(|z| [z.subnet.id(), z.association.id()])
        .into_iter()
        .flatten()
        .collect()
}

fn collect_nat(set: &ZoneReplicaSet<NatZone>) -> Vec<NodeId> {
    set.map(|z| [z.address.id(), z.gateway.id()])
        .into_iter()
        .flatten()
        .collect()
}

fn collect_private(set: &ZoneReplicaSet<PrivateZone>) -> Vec<NodeId> {
    set.map(|z| [z.subnet.id(), z.route_table.id(), z.association.id()])
        .into_iter()
        .flatten()
        .collect()
}
