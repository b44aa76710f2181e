//! Resources that attach to the network topology
//!
//! Each consumer reads topology outputs through value cells and depends on
//! every topology node, so none of them starts before the network, including
//! NAT egress, is complete.

use crate::error::{Result, TopologyError};
use crate::graph::DependencyGraph;
use crate::node::{NodeHandle, ResourceKind, ResourceNode};
use crate::topology::TopologyOutputs;
use crate::value::{Input, Secret, ValueCell};
use serde::{Deserialize, Serialize};

const ANYWHERE: &str = "0.0.0.0/0";

fn security_group(
    name: String,
    vpc_id: ValueCell,
    description: String,
    port: u16,
    sources: Input,
) -> ResourceNode {
    let ingress = Input::map([
        ("protocol", Input::from("tcp")),
        ("from_port", Input::from(port)),
        ("to_port", Input::from(port)),
        ("cidr_blocks", sources),
    ]);
    let egress = Input::map([
        ("protocol", Input::from("-1")),
        ("from_port", Input::from(0u16)),
        ("to_port", Input::from(0u16)),
        ("cidr_blocks", Input::from(vec![Input::from(ANYWHERE)])),
    ]);

    ResourceNode::new(name, ResourceKind::SecurityGroup)
        .input("vpc_id", vpc_id)
        .input("description", description)
        .input("ingress", vec![ingress])
        .input("egress", vec![egress])
        .named_tag()
        .output("id")
}

fn default_image_name() -> String {
    "amzn2-ami-hvm-*-x86_64-gp2".to_string()
}

fn default_image_owner() -> String {
    "137112412989".to_string()
}

fn default_ssh_cidr() -> String {
    ANYWHERE.to_string()
}

/// Machine image lookup filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFilter {
    #[serde(default = "default_image_name")]
    pub name: String,
    #[serde(default = "default_image_owner")]
    pub owner: String,
}

impl Default for ImageFilter {
    fn default() -> Self {
        Self {
            name: default_image_name(),
            owner: default_image_owner(),
        }
    }
}

/// Jump host placed in the first public subnet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BastionSpec {
    pub instance_type: String,
    pub public_key: Secret,
    #[serde(default)]
    pub image: ImageFilter,
    /// Where SSH is allowed from
    #[serde(default = "default_ssh_cidr")]
    pub ssh_cidr: String,
}

#[derive(Debug, Clone)]
pub struct BastionOutputs {
    pub instance: NodeHandle,
    pub instance_id: ValueCell,
    pub public_ip: ValueCell,
    pub key_name: ValueCell,
}

impl BastionSpec {
    pub fn declare(
        &self,
        graph: &mut DependencyGraph,
        name: &str,
        topology: &TopologyOutputs,
    ) -> Result<BastionOutputs> {
        let subnet_id = topology.first_public_subnet_id().cloned().ok_or_else(|| {
            TopologyError::InvalidConfig("bastion needs at least one public subnet".into())
        })?;
        let after_network = topology.members().to_vec();

        let sg = graph.add_with_deps(
            security_group(
                format!("{}-sg", name),
                topology.vpc_id.clone(),
                "Allow SSH from internet".into(),
                22,
                Input::from(vec![Input::from(self.ssh_cidr.clone())]),
            ),
            after_network.iter().copied(),
        )?;

        let key_name = format!("{}-keypair", name);
        let key_pair = graph.add_with_deps(
            ResourceNode::new(key_name.clone(), ResourceKind::KeyPair)
                .input("key_name", key_name)
                .input("public_key", self.public_key.clone())
                .output("id")
                .output("key_name"),
            after_network.iter().copied(),
        )?;

        let image = graph.add_node(
            ResourceNode::new(format!("{}-ami", name), ResourceKind::MachineImage)
                .input(
                    "filters",
                    Input::map([
                        ("name", Input::from(self.image.name.clone())),
                        ("state", Input::from("available")),
                    ]),
                )
                .input("owners", vec![Input::from(self.image.owner.clone())])
                .input("most_recent", true)
                .output("id"),
        )?;

        let instance = graph.add_with_deps(
            ResourceNode::new(format!("{}-instance", name), ResourceKind::ComputeInstance)
                .input("ami", image.output("id")?)
                .input("instance_type", self.instance_type.clone())
                .input("subnet_id", subnet_id)
                .input("key_name", key_pair.output("key_name")?)
                .input("vpc_security_group_ids", vec![sg.output("id")?])
                .input("associate_public_ip_address", true)
                .named_tag()
                .output("id")
                .output("public_ip"),
            after_network
                .iter()
                .copied()
                .chain([sg.id(), key_pair.id(), image.id()]),
        )?;

        let eip = graph.add_with_deps(
            ResourceNode::new(format!("{}-eip", name), ResourceKind::ElasticAddress)
                .input("instance", instance.output("id")?)
                .input("domain", "vpc")
                .named_tag()
                .output("id")
                .output("public_ip"),
            [instance.id()],
        )?;

        Ok(BastionOutputs {
            instance_id: instance.output("id")?,
            public_ip: eip.output("public_ip")?,
            key_name: key_pair.output("key_name")?,
            instance,
        })
    }
}

/// Managed relational database in the private subnets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub instance_class: String,
    pub engine: String,
    pub engine_version: String,
    pub username: String,
    pub password: Secret,
    pub db_name: String,
    pub allocated_storage: u32,
    pub storage_type: String,
    #[serde(default)]
    pub storage_encrypted: bool,
    /// Overrides the engine's default port
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub multi_az: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseOutputs {
    pub instance: NodeHandle,
    pub endpoint: ValueCell,
    pub username: ValueCell,
    pub db_name: ValueCell,
}

impl DatabaseSpec {
    /// Listener port: the explicit override, or the engine family default
    pub fn port(&self) -> Result<u16> {
        if let Some(port) = self.port {
            return Ok(port);
        }

        let engine = self.engine.to_ascii_lowercase();
        match engine.as_str() {
            "mysql" | "mariadb" | "aurora" | "aurora-mysql" => Ok(3306),
            "postgres" | "postgresql" | "aurora-postgresql" => Ok(5432),
            e if e.starts_with("sqlserver") => Ok(1433),
            e if e.starts_with("oracle") => Ok(1521),
            _ => Err(TopologyError::InvalidConfig(format!(
                "no default port for database engine '{}', set `port` explicitly",
                self.engine
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.allocated_storage == 0 {
            return Err(TopologyError::InvalidConfig(
                "database allocated_storage must be greater than 0".into(),
            ));
        }
        if self.username.is_empty() || self.db_name.is_empty() {
            return Err(TopologyError::InvalidConfig(
                "database username and db_name must not be empty".into(),
            ));
        }
        self.port().map(|_| ())
    }

    pub fn declare(
        &self,
        graph: &mut DependencyGraph,
        name: &str,
        topology: &TopologyOutputs,
    ) -> Result<DatabaseOutputs> {
        self.validate()?;
        let port = self.port()?;
        let after_network = topology.members().to_vec();

        let subnet_group = graph.add_with_deps(
            ResourceNode::new(format!("{}-subnetgroup", name), ResourceKind::DbSubnetGroup)
                .input("subnet_ids", topology.private_subnet_ids.clone())
                .named_tag()
                .output("id"),
            after_network.iter().copied(),
        )?;

        let sg = graph.add_with_deps(
            security_group(
                format!("{}-sg", name),
                topology.vpc_id.clone(),
                format!("Allow {} traffic from within VPC", self.engine),
                port,
                Input::from(vec![topology.vpc_cidr.clone()]),
            ),
            after_network.iter().copied(),
        )?;

        let instance = graph.add_with_deps(
            ResourceNode::new(format!("{}-instance", name), ResourceKind::DatabaseInstance)
                .input("engine", self.engine.clone())
                .input("engine_version", self.engine_version.clone())
                .input("instance_class", self.instance_class.clone())
                .input("allocated_storage", self.allocated_storage)
                .input("storage_type", self.storage_type.clone())
                .input("storage_encrypted", self.storage_encrypted)
                .input("db_subnet_group_name", subnet_group.output("id")?)
                .input("vpc_security_group_ids", vec![sg.output("id")?])
                .input("skip_final_snapshot", true)
                .input("publicly_accessible", false)
                .input("db_name", self.db_name.clone())
                .input("username", self.username.clone())
                .input("password", self.password.clone())
                .input("multi_az", self.multi_az)
                .input("port", port)
                .named_tag()
                .output("id")
                .output("endpoint"),
            after_network
                .iter()
                .copied()
                .chain([subnet_group.id(), sg.id()]),
        )?;

        Ok(DatabaseOutputs {
            endpoint: instance.output("endpoint")?,
            username: ValueCell::resolved(format!("{}.username", name), self.username.clone()),
            db_name: ValueCell::resolved(format!("{}.db_name", name), self.db_name.clone()),
            instance,
        })
    }
}

/// Managed container cluster spanning public and private subnets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    pub node_group_name: String,
    pub node_instance_type: String,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
}

#[derive(Debug, Clone)]
pub struct ClusterOutputs {
    pub cluster: NodeHandle,
    /// Sensitive
    pub kubeconfig: ValueCell,
}

impl ClusterSpec {
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(TopologyError::InvalidConfig(
                "cluster max_size must be greater than 0".into(),
            ));
        }
        if !(self.min_size <= self.desired_capacity && self.desired_capacity <= self.max_size) {
            return Err(TopologyError::InvalidConfig(format!(
                "cluster sizing must satisfy min <= desired <= max (got {} / {} / {})",
                self.min_size, self.desired_capacity, self.max_size
            )));
        }
        Ok(())
    }

    pub fn declare(
        &self,
        graph: &mut DependencyGraph,
        topology: &TopologyOutputs,
    ) -> Result<ClusterOutputs> {
        self.validate()?;

        let cluster = graph.add_with_deps(
            ResourceNode::new(format!("{}-cluster", self.name), ResourceKind::Cluster)
                .input("vpc_id", topology.vpc_id.clone())
                .input("public_subnet_ids", topology.public_subnet_ids.clone())
                .input("private_subnet_ids", topology.private_subnet_ids.clone())
                .input("node_group_name", self.node_group_name.clone())
                .input("instance_type", self.node_instance_type.clone())
                .input("desired_capacity", self.desired_capacity)
                .input("min_size", self.min_size)
                .input("max_size", self.max_size)
                .named_tag()
                .output("id")
                .sensitive_output("kubeconfig"),
            topology.members().iter().copied(),
        )?;

        Ok(ClusterOutputs {
            kubeconfig: cluster.output("kubeconfig")?,
            cluster,
        })
    }
}
