//! Simulated provider implementation

use crate::error::{Result, SimError};
use crate::state::StateManager;
use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tierflow_cloud::{
    AuthStatus, CloudError, ProviderResult, ProviderState, ProvisionOutcome, ProvisionRequest,
    Provisioner, ResourceKind, ResourceState, ResourceStatus,
};

const ZONE_SUFFIXES: &[char] = &['a', 'b', 'c', 'd', 'e', 'f'];

/// Stable hex digest of a resource name
fn digest(name: &str) -> String {
    format!("{:x}", Sha256::digest(name.as_bytes()))
}

fn id_prefix(kind: ResourceKind) -> Option<&'static str> {
    match kind {
        ResourceKind::Network => Some("vpc"),
        ResourceKind::InternetGateway => Some("igw"),
        ResourceKind::RouteTable => Some("rtb"),
        ResourceKind::Subnet => Some("subnet"),
        ResourceKind::ElasticAddress => Some("eipalloc"),
        ResourceKind::NatGateway => Some("nat"),
        ResourceKind::RouteTableAssociation => Some("rtbassoc"),
        ResourceKind::SecurityGroup => Some("sg"),
        ResourceKind::KeyPair => Some("key"),
        ResourceKind::MachineImage => Some("ami"),
        ResourceKind::ComputeInstance => Some("i"),
        ResourceKind::DatabaseInstance => Some("db"),
        // addressed by name
        ResourceKind::DbSubnetGroup | ResourceKind::Cluster => None,
    }
}

/// Inputs the simulated API refuses to work without
fn required_inputs(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Network => &["cidr_block"],
        ResourceKind::InternetGateway => &["vpc_id"],
        ResourceKind::RouteTable => &["vpc_id"],
        ResourceKind::Subnet => &["vpc_id", "cidr_block", "availability_zone"],
        ResourceKind::NatGateway => &["allocation_id", "subnet_id"],
        ResourceKind::RouteTableAssociation => &["subnet_id", "route_table_id"],
        ResourceKind::SecurityGroup => &["vpc_id"],
        ResourceKind::KeyPair => &["key_name", "public_key"],
        ResourceKind::ComputeInstance => &["ami", "instance_type", "subnet_id"],
        ResourceKind::DbSubnetGroup => &["subnet_ids"],
        ResourceKind::DatabaseInstance => &["engine", "instance_class", "username", "password"],
        ResourceKind::Cluster => &["vpc_id", "private_subnet_ids"],
        ResourceKind::ElasticAddress | ResourceKind::MachineImage => &[],
    }
}

/// Deterministic identifier for a resource
pub fn resource_id(kind: ResourceKind, name: &str) -> String {
    match id_prefix(kind) {
        Some(prefix) => format!("{}-{}", prefix, &digest(name)[..17]),
        None => name.to_string(),
    }
}

/// Address in the documentation range 203.0.113.0/24
fn public_ip(name: &str) -> String {
    let byte = u8::from_str_radix(&digest(name)[..2], 16).unwrap_or(0);
    format!("203.0.113.{}", 1 + byte % 254)
}

enum Failure {
    Permanent,
    /// Timeouts for the next `n` attempts
    Transient(usize),
}

/// In-memory provisioner that behaves like a cloud API without any network access
pub struct SimulatedProvider {
    region: String,
    zone_count: usize,
    latency: Option<Duration>,
    failures: Mutex<HashMap<String, Failure>>,
    state: Mutex<ProviderState>,
    calls: Mutex<HashMap<String, usize>>,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl SimulatedProvider {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            zone_count: 4,
            latency: None,
            failures: Mutex::new(HashMap::new()),
            state: Mutex::new(ProviderState::new()),
            calls: Mutex::new(HashMap::new()),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    /// Resume from the state stored under `project_root`
    pub async fn open(region: impl Into<String>, project_root: impl AsRef<Path>) -> Result<Self> {
        let state = StateManager::new(project_root).load().await?;
        Ok(Self::new(region).with_state(state))
    }

    /// Write the current state under `project_root`
    pub async fn persist(&self, project_root: impl AsRef<Path>) -> Result<()> {
        let state = self.snapshot()?;
        StateManager::new(project_root).save(&state).await
    }

    pub fn with_state(self, state: ProviderState) -> Self {
        Self {
            state: Mutex::new(state),
            ..self
        }
    }

    pub fn with_zone_count(mut self, zone_count: usize) -> Self {
        self.zone_count = zone_count.min(ZONE_SUFFIXES.len());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every provision call for `name` fails
    pub fn fail_on(self, name: impl Into<String>) -> Self {
        self.insert_failure(name.into(), Failure::Permanent);
        self
    }

    /// The next `times` provision calls for `name` time out
    pub fn fail_transiently(self, name: impl Into<String>, times: usize) -> Self {
        self.insert_failure(name.into(), Failure::Transient(times));
        self
    }

    fn insert_failure(&self, name: String, failure: Failure) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(name, failure);
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Number of provision calls received for `name`
    pub fn calls(&self, name: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().map(|c| c.values().sum()).unwrap_or(0)
    }

    pub fn created(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updated(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Result<ProviderState> {
        self.state
            .lock()
            .map(|s| s.clone())
            .map_err(|_| SimError::StateError("state mutex poisoned".into()))
    }

    fn record_call(&self, name: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(name.to_string()).or_default() += 1;
        }
    }

    /// Injected failure for this attempt, if any
    fn injected_failure(&self, name: &str) -> Option<CloudError> {
        let mut failures = self.failures.lock().ok()?;
        match failures.get_mut(name)? {
            Failure::Permanent => Some(CloudError::CreationFailed(format!(
                "simulated failure for {}",
                name
            ))),
            Failure::Transient(0) => None,
            Failure::Transient(left) => {
                *left -= 1;
                Some(CloudError::Timeout(format!("simulated timeout for {}", name)))
            }
        }
    }

    fn check_inputs(&self, request: &ProvisionRequest) -> Result<()> {
        for input in required_inputs(request.kind) {
            let present = match request.inputs.get(input) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.is_empty(),
                Some(Value::Array(items)) => !items.is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(SimError::MissingInput {
                    resource: request.name.clone(),
                    input: input.to_string(),
                });
            }
        }
        Ok(())
    }

    fn output_value(&self, request: &ProvisionRequest, id: &str, output: &str) -> Result<Value> {
        let name = &request.name;
        let value = match (request.kind, output) {
            (_, "id") => json!(id),
            (_, "cidr_block") => request.inputs.get("cidr_block").cloned().unwrap_or(Value::Null),
            (_, "key_name") => request.inputs.get("key_name").cloned().unwrap_or(Value::Null),
            (ResourceKind::ElasticAddress | ResourceKind::ComputeInstance, "public_ip") => {
                json!(public_ip(name))
            }
            (ResourceKind::DatabaseInstance, "endpoint") => {
                let port = request.inputs.get_u64("port").unwrap_or(3306);
                json!(format!(
                    "{}.{}.{}.rds.example.com:{}",
                    name,
                    &digest(name)[..12],
                    self.region,
                    port
                ))
            }
            (ResourceKind::Cluster, "kubeconfig") => json!(kubeconfig(name, &self.region)),
            (kind, other) => {
                return Err(SimError::UnsupportedOutput {
                    kind: kind.to_string(),
                    output: other.to_string(),
                });
            }
        };
        Ok(value)
    }

    fn build_outputs(&self, request: &ProvisionRequest, id: &str) -> Result<BTreeMap<String, Value>> {
        request
            .outputs
            .iter()
            .map(|output| Ok((output.clone(), self.output_value(request, id, output)?)))
            .collect()
    }

    fn converge(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome> {
        self.check_inputs(request)?;

        let mut guard = self
            .state
            .lock()
            .map_err(|_| SimError::StateError("state mutex poisoned".into()))?;
        let state = &mut *guard;

        match state.resources.get_mut(&request.name) {
            Some(existing) if existing.input_hash == request.input_hash => {
                tracing::debug!("{} is up to date", request.name);
                Ok(ProvisionOutcome::unchanged(existing.outputs.clone()))
            }
            Some(existing) => {
                let outputs = self.build_outputs(request, &existing.id)?;
                existing.touch(request.input_hash.clone(), outputs.clone());
                existing.status = ResourceStatus::Available;
                state.updated_at = chrono::Utc::now();
                self.updates.fetch_add(1, Ordering::SeqCst);
                tracing::info!("Updated {} ({})", request.name, request.kind);
                Ok(ProvisionOutcome::updated(outputs))
            }
            None => {
                let id = resource_id(request.kind, &request.name);
                let outputs = self.build_outputs(request, &id)?;
                state.set(
                    request.name.clone(),
                    ResourceState::new(id.clone(), request.kind, request.input_hash.clone())
                        .with_status(ResourceStatus::Available)
                        .with_outputs(outputs.clone()),
                );
                self.creates.fetch_add(1, Ordering::SeqCst);
                tracing::info!("Created {} ({}): {}", request.name, request.kind, id);
                Ok(ProvisionOutcome::created(outputs))
            }
        }
    }
}

fn kubeconfig(cluster: &str, region: &str) -> String {
    format!(
        "apiVersion: v1\n\
         kind: Config\n\
         clusters:\n\
         - name: {cluster}\n  \
           cluster:\n    \
             server: https://{endpoint}.{region}.eks.example.com\n\
         contexts:\n\
         - name: {cluster}\n  \
           context:\n    \
             cluster: {cluster}\n    \
             user: {cluster}-admin\n\
         current-context: {cluster}\n\
         users:\n\
         - name: {cluster}-admin\n  \
           user:\n    \
             token: {token}\n",
        cluster = cluster,
        endpoint = &digest(cluster)[..16],
        region = region,
        token = &digest(&format!("{}-token", cluster))[..40],
    )
}

#[async_trait]
impl Provisioner for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    fn display_name(&self) -> &str {
        "Simulated Cloud"
    }

    async fn check_auth(&self) -> ProviderResult<AuthStatus> {
        Ok(AuthStatus::ok(format!("simulated account ({})", self.region)))
    }

    async fn availability_zones(&self) -> ProviderResult<Vec<String>> {
        Ok(ZONE_SUFFIXES
            .iter()
            .take(self.zone_count)
            .map(|suffix| format!("{}{}", self.region, suffix))
            .collect())
    }

    async fn get_state(&self) -> ProviderResult<ProviderState> {
        Ok(self.snapshot()?)
    }

    async fn provision(&self, request: &ProvisionRequest) -> ProviderResult<ProvisionOutcome> {
        self.record_call(&request.name);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(err) = self.injected_failure(&request.name) {
            tracing::debug!("Injected failure for {}: {}", request.name, err);
            return Err(err);
        }

        Ok(self.converge(request)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierflow_cloud::{ActionType, ResolvedInputs, ResolvedValue};

    fn request(name: &str, kind: ResourceKind, inputs: &[(&str, Value)], outputs: &[&str]) -> ProvisionRequest {
        let mut resolved = ResolvedInputs::new();
        for (k, v) in inputs {
            resolved.insert(*k, ResolvedValue::plain(v.clone()));
        }
        ProvisionRequest::new(name, kind, resolved).with_outputs(outputs.iter().copied())
    }

    fn vpc(cidr: &str) -> ProvisionRequest {
        request(
            "demo-vpc",
            ResourceKind::Network,
            &[("cidr_block", json!(cidr))],
            &["id", "cidr_block"],
        )
    }

    #[tokio::test]
    async fn test_create_then_noop_then_update() {
        let sim = SimulatedProvider::new("ap-northeast-2");

        let first = sim.provision(&vpc("10.0.0.0/16")).await.unwrap();
        assert_eq!(first.action, ActionType::Create);
        assert_eq!(first.outputs["cidr_block"], "10.0.0.0/16");
        let id = first.outputs["id"].clone();
        assert!(id.as_str().unwrap().starts_with("vpc-"));

        let second = sim.provision(&vpc("10.0.0.0/16")).await.unwrap();
        assert_eq!(second.action, ActionType::NoOp);
        assert_eq!(second.outputs["id"], id);

        let third = sim.provision(&vpc("10.1.0.0/16")).await.unwrap();
        assert_eq!(third.action, ActionType::Update);
        assert_eq!(third.outputs["id"], id);
        assert_eq!(third.outputs["cidr_block"], "10.1.0.0/16");

        assert_eq!(sim.created(), 1);
        assert_eq!(sim.updated(), 1);
        assert_eq!(sim.calls("demo-vpc"), 3);
    }

    #[test]
    fn test_ids_are_deterministic() {
        assert_eq!(
            resource_id(ResourceKind::Subnet, "demo-public-subnet-a"),
            resource_id(ResourceKind::Subnet, "demo-public-subnet-a")
        );
        assert_ne!(
            resource_id(ResourceKind::Subnet, "demo-public-subnet-a"),
            resource_id(ResourceKind::Subnet, "demo-public-subnet-b")
        );
        assert_eq!(resource_id(ResourceKind::Cluster, "demo-eks-cluster"), "demo-eks-cluster");
        assert!(public_ip("demo-bastion-eip").starts_with("203.0.113."));
    }

    #[tokio::test]
    async fn test_zones_follow_region() {
        let sim = SimulatedProvider::new("eu-west-1").with_zone_count(2);
        assert_eq!(
            sim.availability_zones().await.unwrap(),
            vec!["eu-west-1a".to_string(), "eu-west-1b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let sim = SimulatedProvider::new("ap-northeast-2")
            .fail_on("demo-vpc")
            .fail_transiently("demo-igw", 1);

        let err = sim.provision(&vpc("10.0.0.0/16")).await.unwrap_err();
        assert!(matches!(err, CloudError::CreationFailed(_)));
        assert!(!err.is_retryable());

        let igw = request(
            "demo-igw",
            ResourceKind::InternetGateway,
            &[("vpc_id", json!("vpc-1"))],
            &["id"],
        );
        assert!(sim.provision(&igw).await.unwrap_err().is_retryable());
        assert_eq!(sim.provision(&igw).await.unwrap().action, ActionType::Create);
    }

    #[tokio::test]
    async fn test_missing_required_input() {
        let sim = SimulatedProvider::new("ap-northeast-2");
        let subnet = request("demo-subnet", ResourceKind::Subnet, &[], &["id"]);

        let err = sim.provision(&subnet).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidConfig(_)));
        assert_eq!(sim.created(), 0);
    }

    #[tokio::test]
    async fn test_database_and_cluster_outputs() {
        let sim = SimulatedProvider::new("ap-northeast-2");
        let mut inputs = ResolvedInputs::new();
        for (k, v) in [
            ("engine", json!("postgres")),
            ("instance_class", json!("db.t3.micro")),
            ("username", json!("admin")),
            ("port", json!(5432)),
        ] {
            inputs.insert(k, ResolvedValue::plain(v));
        }
        inputs.insert("password", ResolvedValue::sensitive(json!("pw")));
        let db = ProvisionRequest::new("demo-rds-instance", ResourceKind::DatabaseInstance, inputs)
            .with_outputs(["id", "endpoint"]);

        let outcome = sim.provision(&db).await.unwrap();
        let endpoint = outcome.outputs["endpoint"].as_str().unwrap();
        assert!(endpoint.starts_with("demo-rds-instance."));
        assert!(endpoint.ends_with(":5432"));

        let cluster = request(
            "demo-eks-cluster",
            ResourceKind::Cluster,
            &[("vpc_id", json!("vpc-1")), ("private_subnet_ids", json!(["s1"]))],
            &["id", "kubeconfig"],
        );
        let outcome = sim.provision(&cluster).await.unwrap();
        assert!(outcome.outputs["kubeconfig"].as_str().unwrap().contains("current-context: demo-eks-cluster"));
    }

    #[tokio::test]
    async fn test_unsupported_output() {
        let sim = SimulatedProvider::new("ap-northeast-2");
        let igw = request(
            "demo-igw",
            ResourceKind::InternetGateway,
            &[("vpc_id", json!("vpc-1"))],
            &["arn"],
        );
        assert!(matches!(
            sim.provision(&igw).await.unwrap_err(),
            CloudError::CreationFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_state_survives_persist_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let sim = SimulatedProvider::new("ap-northeast-2");
        sim.provision(&vpc("10.0.0.0/16")).await.unwrap();
        sim.persist(dir.path()).await.unwrap();

        let resumed = SimulatedProvider::open("ap-northeast-2", dir.path()).await.unwrap();
        let outcome = resumed.provision(&vpc("10.0.0.0/16")).await.unwrap();
        assert_eq!(outcome.action, ActionType::NoOp);
        assert_eq!(resumed.get_state().await.unwrap().len(), 1);
    }
}
