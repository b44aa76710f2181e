//! A complete stack: the network topology plus its consumers

use crate::consumers::{
    BastionOutputs, BastionSpec, ClusterOutputs, ClusterSpec, DatabaseOutputs, DatabaseSpec,
};
use crate::engine::EngineConfig;
use crate::error::{Result, TopologyError};
use crate::graph::DependencyGraph;
use crate::replica::select_zones;
use crate::topology::{NetworkSpec, NetworkTopology, TopologyOutputs};
use crate::value::{REDACTED, ValueCell};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_region() -> String {
    "ap-northeast-2".to_string()
}

/// Declarative description of a stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSpec {
    /// Prefix of every resource name
    pub project: String,

    #[serde(default = "default_region")]
    pub region: String,

    pub network: NetworkSpec,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub bastion: Option<BastionSpec>,

    #[serde(default)]
    pub database: Option<DatabaseSpec>,

    #[serde(default)]
    pub cluster: Option<ClusterSpec>,
}

impl StackSpec {
    /// Checks that need no provider
    pub fn validate(&self) -> Result<()> {
        let valid_name = !self.project.is_empty()
            && self
                .project
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !self.project.starts_with('-');
        if !valid_name {
            return Err(TopologyError::InvalidConfig(format!(
                "project name '{}' must be lowercase letters, digits and '-'",
                self.project
            )));
        }

        if self.network.zones == 0 {
            return Err(TopologyError::InvalidConfig(
                "network.zones must be at least 1".into(),
            ));
        }
        let capacity = self.network.partition.capacity(&self.network.cidr);
        if self.network.zones > capacity {
            return Err(TopologyError::AddressSpaceExhausted {
                base: self.network.cidr.to_string(),
                requested: self.network.zones,
                capacity,
            });
        }

        if let Some(database) = &self.database {
            database.validate()?;
        }
        if let Some(cluster) = &self.cluster {
            cluster.validate()?;
        }
        Ok(())
    }
}

/// A value exported by the stack
#[derive(Debug, Clone)]
pub enum OutputValue {
    Single(ValueCell),
    /// Ordered by zone
    List(Vec<ValueCell>),
}

#[derive(Debug, Clone)]
pub struct StackOutput {
    pub name: &'static str,
    pub value: OutputValue,
}

impl StackOutput {
    fn single(name: &'static str, cell: &ValueCell) -> Self {
        Self {
            name,
            value: OutputValue::Single(cell.clone()),
        }
    }

    fn cells(&self) -> Vec<&ValueCell> {
        match &self.value {
            OutputValue::Single(cell) => vec![cell],
            OutputValue::List(cells) => cells.iter().collect(),
        }
    }

    pub fn is_sensitive(&self) -> bool {
        self.cells().iter().any(|c| c.is_sensitive())
    }

    /// Raw value, falling back to `lookup` for cells that are not resolved
    pub fn lookup(&self, lookup: &dyn Fn(&ValueCell) -> Option<Value>) -> Option<Value> {
        let get = |cell: &ValueCell| cell.get().or_else(|| lookup(cell));
        match &self.value {
            OutputValue::Single(cell) => get(cell),
            OutputValue::List(cells) => cells
                .iter()
                .map(get)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }

    /// Raw value if every cell is resolved
    pub fn value(&self) -> Option<Value> {
        self.lookup(&|_| None)
    }

    /// Printable form: masked when sensitive
    pub fn display(&self, lookup: &dyn Fn(&ValueCell) -> Option<Value>) -> String {
        match self.lookup(lookup) {
            None => "<unknown>".to_string(),
            Some(_) if self.is_sensitive() => REDACTED.to_string(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        }
    }
}

/// Declared stack with handles to everything it exports
#[derive(Debug, Clone)]
pub struct Stack {
    pub topology: TopologyOutputs,
    pub bastion: Option<BastionOutputs>,
    pub database: Option<DatabaseOutputs>,
    pub cluster: Option<ClusterOutputs>,
}

impl Stack {
    /// Declare the whole stack into `graph`.
    ///
    /// `available_zones` is the provider's zone list in provider order; the
    /// first `network.zones` of them are used.
    pub fn declare(
        graph: &mut DependencyGraph,
        spec: &StackSpec,
        available_zones: &[String],
    ) -> Result<Self> {
        spec.validate()?;
        let zones = select_zones(available_zones, spec.network.zones)?;

        let topology =
            NetworkTopology::new(spec.project.clone(), spec.network.clone()).declare(graph, &zones)?;

        let bastion = spec
            .bastion
            .as_ref()
            .map(|b| b.declare(graph, &format!("{}-bastion", spec.project), &topology))
            .transpose()?;
        let database = spec
            .database
            .as_ref()
            .map(|d| d.declare(graph, &format!("{}-rds", spec.project), &topology))
            .transpose()?;
        let cluster = spec
            .cluster
            .as_ref()
            .map(|c| c.declare(graph, &topology))
            .transpose()?;

        tracing::debug!("Declared stack {} with {} resources", spec.project, graph.len());

        Ok(Self {
            topology,
            bastion,
            database,
            cluster,
        })
    }

    /// Exported values in a fixed order
    pub fn outputs(&self) -> Vec<StackOutput> {
        let mut outputs = vec![
            StackOutput::single("vpcId", &self.topology.vpc_id),
            StackOutput::single("vpcCidr", &self.topology.vpc_cidr),
            StackOutput {
                name: "publicSubnetIds",
                value: OutputValue::List(self.topology.public_subnet_ids.clone()),
            },
            StackOutput {
                name: "privateSubnetIds",
                value: OutputValue::List(self.topology.private_subnet_ids.clone()),
            },
        ];

        if let Some(bastion) = &self.bastion {
            outputs.push(StackOutput::single("bastionPublicIp", &bastion.public_ip));
            outputs.push(StackOutput::single("bastionKeyName", &bastion.key_name));
        }
        if let Some(database) = &self.database {
            outputs.push(StackOutput::single("rdsEndpoint", &database.endpoint));
            outputs.push(StackOutput::single("rdsDbUsername", &database.username));
            outputs.push(StackOutput::single("rdsDatabaseName", &database.db_name));
        }
        if let Some(cluster) = &self.cluster {
            outputs.push(StackOutput::single("eksKubeconfig", &cluster.kubeconfig));
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::engine::ProvisioningEngine;
    use crate::error::{CloudError, ProviderResult};
    use crate::node::NodeStatus;
    use crate::provider::{AuthStatus, ProvisionOutcome, ProvisionRequest, Provisioner};
    use crate::state::ProviderState;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    const STACK: &str = r#"{
        "project": "demo",
        "network": { "cidr": "10.0.0.0/16" },
        "bastion": { "instance_type": "t3.micro", "public_key": "ssh-ed25519 AAAA" },
        "database": {
            "instance_class": "db.t3.micro", "engine": "mysql", "engine_version": "8.0",
            "username": "admin", "password": "hunter22", "db_name": "app",
            "allocated_storage": 20, "storage_type": "gp2", "storage_encrypted": true
        },
        "cluster": {
            "name": "demo-eks", "node_group_name": "workers", "node_instance_type": "t3.medium",
            "desired_capacity": 2, "min_size": 1, "max_size": 3
        }
    }"#;

    fn zones() -> Vec<String> {
        ["a", "b", "c", "d"]
            .iter()
            .map(|z| format!("ap-northeast-2{}", z))
            .collect()
    }

    struct FakeCloud {
        fail: Option<&'static str>,
        calls: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl Provisioner for FakeCloud {
        fn name(&self) -> &str {
            "fake"
        }
        fn display_name(&self) -> &str {
            "Fake"
        }
        async fn check_auth(&self) -> ProviderResult<AuthStatus> {
            Ok(AuthStatus::ok("test"))
        }
        async fn availability_zones(&self) -> ProviderResult<Vec<String>> {
            Ok(zones())
        }
        async fn get_state(&self) -> ProviderResult<ProviderState> {
            Ok(ProviderState::new())
        }
        async fn provision(&self, request: &ProvisionRequest) -> ProviderResult<ProvisionOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((request.name.clone(), request.inputs.to_value()));
            if self.fail == Some(request.name.as_str()) {
                return Err(CloudError::CreationFailed("quota exceeded".into()));
            }
            let outputs: BTreeMap<String, serde_json::Value> = request
                .outputs
                .iter()
                .map(|k| {
                    let value = match k.as_str() {
                        "cidr_block" | "key_name" => {
                            request.inputs.get(k).cloned().unwrap_or_default()
                        }
                        _ => json!(format!("{}/{}", request.name, k)),
                    };
                    (k.clone(), value)
                })
                .collect();
            Ok(ProvisionOutcome::created(outputs))
        }
    }

    fn spec() -> StackSpec {
        serde_json::from_str(STACK).unwrap()
    }

    #[test]
    fn test_spec_defaults() {
        let spec = spec();
        assert_eq!(spec.region, "ap-northeast-2");
        assert_eq!(spec.network.zones, 3);
        assert!(!spec.engine.fail_fast);
        assert_eq!(spec.database.as_ref().unwrap().port().unwrap(), 3306);
    }

    #[test]
    fn test_invalid_specs() {
        let mut bad = spec();
        bad.project = "Demo Project".into();
        assert!(matches!(bad.validate(), Err(TopologyError::InvalidConfig(_))));

        let mut bad = spec();
        bad.network.zones = 11;
        assert!(matches!(
            bad.validate(),
            Err(TopologyError::AddressSpaceExhausted { capacity: 10, .. })
        ));

        let mut graph = DependencyGraph::new();
        let err = Stack::declare(&mut graph, &spec(), &zones()[..2]).unwrap_err();
        assert!(matches!(
            err,
            TopologyError::InsufficientZones {
                requested: 3,
                available: 2
            }
        ));
    }

    #[test]
    fn test_outputs_in_original_order() {
        let mut graph = DependencyGraph::new();
        let stack = Stack::declare(&mut graph, &spec(), &zones()).unwrap();

        let names: Vec<&str> = stack.outputs().iter().map(|o| o.name).collect();
        assert_eq!(
            names,
            [
                "vpcId",
                "vpcCidr",
                "publicSubnetIds",
                "privateSubnetIds",
                "bastionPublicIp",
                "bastionKeyName",
                "rdsEndpoint",
                "rdsDbUsername",
                "rdsDatabaseName",
                "eksKubeconfig",
            ]
        );
        assert!(graph.validate().is_ok());
    }

    #[tokio::test]
    async fn test_full_stack_provisions() {
        let cloud = Arc::new(FakeCloud {
            fail: None,
            calls: Mutex::new(Vec::new()),
        });
        let mut graph = DependencyGraph::new();
        let stack = Stack::declare(&mut graph, &spec(), &zones()).unwrap();

        let engine = ProvisioningEngine::new(cloud.clone(), EngineConfig::default());
        let result = engine.run(&graph).await.unwrap();

        assert!(result.is_success(), "{}", result);
        assert_eq!(result.count(ActionType::Create), graph.len());

        let outputs = stack.outputs();
        let by_name = |n: &str| outputs.iter().find(|o| o.name == n).unwrap();
        assert_eq!(by_name("vpcCidr").value(), Some(json!("10.0.0.0/16")));
        assert_eq!(
            by_name("publicSubnetIds").value(),
            Some(json!([
                "demo-public-subnet-ap-northeast-2a/id",
                "demo-public-subnet-ap-northeast-2b/id",
                "demo-public-subnet-ap-northeast-2c/id"
            ]))
        );
        assert_eq!(by_name("bastionKeyName").value(), Some(json!("demo-bastion-keypair")));
        assert_eq!(by_name("rdsDbUsername").display(&|_| None), "admin");
        assert_eq!(by_name("eksKubeconfig").display(&|_| None), REDACTED);

        let calls = cloud.calls.lock().unwrap();
        let (_, db_inputs) = calls
            .iter()
            .find(|(name, _)| name == "demo-rds-instance")
            .unwrap();
        assert_eq!(db_inputs["db_subnet_group_name"], "demo-rds-subnetgroup/id");
        assert_eq!(db_inputs["password"], "hunter22");
    }

    #[tokio::test]
    async fn test_network_failure_skips_every_consumer() {
        let cloud = Arc::new(FakeCloud {
            fail: Some("demo-vpc"),
            calls: Mutex::new(Vec::new()),
        });
        let mut graph = DependencyGraph::new();
        let stack = Stack::declare(&mut graph, &spec(), &zones()).unwrap();

        let engine = ProvisioningEngine::new(cloud.clone(), EngineConfig::default());
        let result = engine.run(&graph).await.unwrap();

        assert_eq!(result.status("demo-vpc"), Some(NodeStatus::Failed));
        assert_eq!(result.status("demo-rds-instance"), Some(NodeStatus::Skipped));
        assert_eq!(result.status("demo-eks-cluster"), Some(NodeStatus::Skipped));
        // the image lookup does not depend on the network
        assert_eq!(result.status("demo-bastion-ami"), Some(NodeStatus::Resolved));

        let calls = cloud.calls.lock().unwrap();
        assert!(!calls.iter().any(|(name, _)| name == "demo-rds-instance"));
        assert_eq!(stack.outputs()[0].display(&|_| None), "<unknown>");
    }
}
