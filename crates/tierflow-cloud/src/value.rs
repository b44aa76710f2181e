//! Deferred values
//!
//! A [`ValueCell`] is written exactly once by the node that produces it and read
//! by any number of consumers. Reading before the producer has finished suspends
//! the reader until the value (or the producer's failure) is published.
//!
//! Node inputs are described with [`Input`], which mixes literals, secrets and
//! cells. Once every cell is available the inputs collapse into
//! [`ResolvedInputs`], the form handed to a provisioner.

use crate::error::{Result, TopologyError};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Placeholder shown wherever a sensitive value would otherwise appear
pub const REDACTED: &str = "[secret]";

/// A sensitive string (password, private key material, ...)
///
/// `Debug`, `Display` and `Serialize` never reveal the wrapped value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value. Only provisioners should need this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CellState {
    Pending,
    Resolved(Value),
    /// The producing node failed; holds the failed node's name
    Rejected(String),
}

/// Where a cell's value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellSource {
    pub node: String,
    pub output: String,
}

struct CellInner {
    label: String,
    source: Option<CellSource>,
    sensitive: bool,
    state: watch::Sender<CellState>,
}

/// Single-assignment, asynchronously resolved value
#[derive(Clone)]
pub struct ValueCell {
    inner: Arc<CellInner>,
}

impl ValueCell {
    fn build(
        label: String,
        source: Option<CellSource>,
        sensitive: bool,
        state: CellState,
    ) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self {
            inner: Arc::new(CellInner {
                label,
                source,
                sensitive,
                state: tx,
            }),
        }
    }

    /// An unresolved cell with no producing node
    pub fn new(label: impl Into<String>) -> Self {
        Self::build(label.into(), None, false, CellState::Pending)
    }

    /// An unresolved cell whose value must never be shown
    pub fn new_sensitive(label: impl Into<String>) -> Self {
        Self::build(label.into(), None, true, CellState::Pending)
    }

    /// A cell that is known up front (configuration values echoed as outputs)
    pub fn resolved(label: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::build(label.into(), None, false, CellState::Resolved(value.into()))
    }

    /// Output cell `output` of resource `node`
    pub(crate) fn output(node: &str, output: &str, sensitive: bool) -> Self {
        Self::build(
            format!("{}.{}", node, output),
            Some(CellSource {
                node: node.to_string(),
                output: output.to_string(),
            }),
            sensitive,
            CellState::Pending,
        )
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Producing node and output name, if the cell belongs to a resource
    pub fn source(&self) -> Option<&CellSource> {
        self.inner.source.as_ref()
    }

    pub fn is_sensitive(&self) -> bool {
        self.inner.sensitive
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.inner.state.borrow(), CellState::Resolved(_))
    }

    /// Current value without waiting
    pub fn get(&self) -> Option<Value> {
        match &*self.inner.state.borrow() {
            CellState::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Publish the value. A cell accepts exactly one value.
    pub fn resolve(&self, value: Value) -> Result<()> {
        let accepted = self.inner.state.send_if_modified(|state| {
            if matches!(state, CellState::Pending) {
                *state = CellState::Resolved(value);
                true
            } else {
                false
            }
        });

        if accepted {
            Ok(())
        } else {
            Err(TopologyError::AlreadyResolved(self.inner.label.clone()))
        }
    }

    /// Mark the cell as never going to resolve because `failed_node` failed.
    /// Waiting readers wake up with `DependencyFailed`.
    pub(crate) fn reject(&self, failed_node: &str) -> bool {
        self.inner.state.send_if_modified(|state| {
            if matches!(state, CellState::Pending) {
                *state = CellState::Rejected(failed_node.to_string());
                true
            } else {
                false
            }
        })
    }

    /// Wait until the value is published
    pub async fn wait(&self) -> Result<Value> {
        let mut rx = self.inner.state.subscribe();
        let state = {
            let current = rx
                .wait_for(|state| !matches!(state, CellState::Pending))
                .await
                .map_err(|_| TopologyError::DependencyFailed(self.inner.label.clone()))?;
            current.clone()
        };

        match state {
            CellState::Resolved(value) => Ok(value),
            CellState::Rejected(node) => Err(TopologyError::DependencyFailed(node)),
            CellState::Pending => Err(TopologyError::DependencyFailed(self.inner.label.clone())),
        }
    }
}

impl fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueCell({} = {})", self.inner.label, self)
    }
}

impl fmt::Display for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner.state.borrow() {
            CellState::Pending => f.write_str("<pending>"),
            CellState::Rejected(node) => write!(f, "<failed: {}>", node),
            CellState::Resolved(_) if self.inner.sensitive => f.write_str(REDACTED),
            CellState::Resolved(value) => write!(f, "{}", value),
        }
    }
}

/// Desired configuration value of a resource input
#[derive(Debug, Clone)]
pub enum Input {
    Value(Value),
    Secret(Secret),
    Cell(ValueCell),
    List(Vec<Input>),
    Map(BTreeMap<String, Input>),
}

impl Input {
    /// Build a map input from key/value pairs
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Input)>,
    {
        Input::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Every cell referenced by this input, depth first
    pub fn cells(&self) -> Vec<&ValueCell> {
        let mut cells = Vec::new();
        self.collect_cells(&mut cells);
        cells
    }

    fn collect_cells<'a>(&'a self, out: &mut Vec<&'a ValueCell>) {
        match self {
            Input::Cell(cell) => out.push(cell),
            Input::List(items) => items.iter().for_each(|i| i.collect_cells(out)),
            Input::Map(entries) => entries.values().for_each(|i| i.collect_cells(out)),
            Input::Value(_) | Input::Secret(_) => {}
        }
    }

    /// Wait for every referenced cell and produce the concrete value
    pub fn resolve(&self) -> BoxFuture<'_, Result<ResolvedValue>> {
        async move {
            match self {
                Input::Value(value) => Ok(ResolvedValue::plain(value.clone())),
                Input::Secret(secret) => Ok(ResolvedValue::sensitive(Value::String(
                    secret.expose().to_string(),
                ))),
                Input::Cell(cell) => Ok(ResolvedValue {
                    value: cell.wait().await?,
                    sensitive: cell.is_sensitive(),
                }),
                Input::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    let mut sensitive = false;
                    for item in items {
                        let resolved = item.resolve().await?;
                        sensitive |= resolved.sensitive;
                        values.push(resolved.value);
                    }
                    Ok(ResolvedValue {
                        value: Value::Array(values),
                        sensitive,
                    })
                }
                Input::Map(entries) => {
                    let mut object = serde_json::Map::new();
                    let mut sensitive = false;
                    for (key, item) in entries {
                        let resolved = item.resolve().await?;
                        sensitive |= resolved.sensitive;
                        object.insert(key.clone(), resolved.value);
                    }
                    Ok(ResolvedValue {
                        value: Value::Object(object),
                        sensitive,
                    })
                }
            }
        }
        .boxed()
    }

    /// Resolve without waiting. Unresolved cells are looked up through `fallback`;
    /// returns `None` if any value is still unknown.
    pub fn peek(&self, fallback: &dyn Fn(&ValueCell) -> Option<Value>) -> Option<ResolvedValue> {
        match self {
            Input::Value(value) => Some(ResolvedValue::plain(value.clone())),
            Input::Secret(secret) => Some(ResolvedValue::sensitive(Value::String(
                secret.expose().to_string(),
            ))),
            Input::Cell(cell) => cell.get().or_else(|| fallback(cell)).map(|value| ResolvedValue {
                value,
                sensitive: cell.is_sensitive(),
            }),
            Input::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                let mut sensitive = false;
                for item in items {
                    let resolved = item.peek(fallback)?;
                    sensitive |= resolved.sensitive;
                    values.push(resolved.value);
                }
                Some(ResolvedValue {
                    value: Value::Array(values),
                    sensitive,
                })
            }
            Input::Map(entries) => {
                let mut object = serde_json::Map::new();
                let mut sensitive = false;
                for (key, item) in entries {
                    let resolved = item.peek(fallback)?;
                    sensitive |= resolved.sensitive;
                    object.insert(key.clone(), resolved.value);
                }
                Some(ResolvedValue {
                    value: Value::Object(object),
                    sensitive,
                })
            }
        }
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Value(value)
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Input::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Input::Value(Value::String(value))
    }
}

impl From<bool> for Input {
    fn from(value: bool) -> Self {
        Input::Value(Value::Bool(value))
    }
}

impl From<u16> for Input {
    fn from(value: u16) -> Self {
        Input::Value(Value::from(value))
    }
}

impl From<u32> for Input {
    fn from(value: u32) -> Self {
        Input::Value(Value::from(value))
    }
}

impl From<Secret> for Input {
    fn from(value: Secret) -> Self {
        Input::Secret(value)
    }
}

impl From<ValueCell> for Input {
    fn from(value: ValueCell) -> Self {
        Input::Cell(value)
    }
}

impl From<&ValueCell> for Input {
    fn from(value: &ValueCell) -> Self {
        Input::Cell(value.clone())
    }
}

impl From<Vec<ValueCell>> for Input {
    fn from(cells: Vec<ValueCell>) -> Self {
        Input::List(cells.into_iter().map(Input::Cell).collect())
    }
}

impl From<Vec<Input>> for Input {
    fn from(items: Vec<Input>) -> Self {
        Input::List(items)
    }
}

/// A concrete input value and whether it carries sensitive data
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedValue {
    pub value: Value,
    pub sensitive: bool,
}

impl ResolvedValue {
    pub fn plain(value: Value) -> Self {
        Self {
            value,
            sensitive: false,
        }
    }

    pub fn sensitive(value: Value) -> Self {
        Self {
            value,
            sensitive: true,
        }
    }
}

/// Fully resolved input set of one resource
#[derive(Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    values: BTreeMap<String, ResolvedValue>,
}

impl ResolvedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ResolvedValue) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).map(|v| &v.value)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| v.sensitive)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Full values, secrets included. Only for the provisioner.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect(),
        )
    }

    /// Values with every sensitive entry replaced by the placeholder
    pub fn redacted(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| {
                    let shown = if v.sensitive {
                        Value::String(REDACTED.to_string())
                    } else {
                        v.value.clone()
                    };
                    (k.clone(), shown)
                })
                .collect(),
        )
    }

    /// Stable SHA-256 over the canonical JSON form (object keys are sorted)
    pub fn input_hash(&self) -> String {
        let canonical = self.to_value().to_string();
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }

    /// Scrub sensitive values out of free text such as provider error messages
    pub fn redact_text(&self, text: &str) -> String {
        let mut secrets = Vec::new();
        for value in self.values.values().filter(|v| v.sensitive) {
            collect_strings(&value.value, &mut secrets);
        }
        // longest first so a secret containing another is replaced whole
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));

        secrets
            .into_iter()
            .filter(|s| !s.is_empty())
            .fold(text.to_string(), |acc, secret| acc.replace(secret, REDACTED))
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

impl fmt::Display for ResolvedInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

impl fmt::Debug for ResolvedInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResolvedInputs({})", self.redacted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_resolve_twice_fails() {
        let cell = ValueCell::new("vpc.id");
        cell.resolve(json!("vpc-1")).unwrap();

        let err = cell.resolve(json!("vpc-2")).unwrap_err();
        assert!(matches!(err, TopologyError::AlreadyResolved(ref label) if label == "vpc.id"));
        assert_eq!(cell.get(), Some(json!("vpc-1")));
    }

    #[test]
    fn test_wait_suspends_until_resolved() {
        let cell = ValueCell::new("subnet.id");
        let reader = cell.clone();
        let mut waiting = task::spawn(async move { reader.wait().await });

        assert_pending!(waiting.poll());
        assert!(cell.get().is_none());

        cell.resolve(json!("subnet-1")).unwrap();
        assert!(waiting.is_woken());
        let value = assert_ready!(waiting.poll()).unwrap();
        assert_eq!(value, json!("subnet-1"));
    }

    #[tokio::test]
    async fn test_rejected_cell_reports_failed_producer() {
        let cell = ValueCell::output("demo-vpc", "id", false);
        assert!(cell.reject("demo-vpc"));
        assert!(!cell.reject("other"));

        let err = cell.wait().await.unwrap_err();
        assert!(matches!(err, TopologyError::DependencyFailed(ref n) if n == "demo-vpc"));
        assert!(cell.resolve(json!("late")).is_err());
    }

    #[tokio::test]
    async fn test_many_readers() {
        let cell = ValueCell::new("igw.id");
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let c = cell.clone();
                tokio::spawn(async move { c.wait().await.unwrap() })
            })
            .collect();

        cell.resolve(json!("igw-1")).unwrap();
        for reader in readers {
            assert_eq!(reader.await.unwrap(), json!("igw-1"));
        }
    }

    #[test]
    fn test_sensitive_cell_display_is_redacted() {
        let cell = ValueCell::output("demo-eks-cluster", "kubeconfig", true);
        cell.resolve(json!("apiVersion: v1 token=abc")).unwrap();

        assert_eq!(cell.to_string(), REDACTED);
        assert!(!format!("{:?}", cell).contains("token=abc"));
    }

    #[test]
    fn test_secret_never_printed() {
        let secret = Secret::new("hunter22");
        assert_eq!(secret.to_string(), REDACTED);
        assert!(!format!("{:?}", secret).contains("hunter22"));
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"[secret]\"");
        assert_eq!(secret.expose(), "hunter22");
    }

    #[tokio::test]
    async fn test_nested_input_resolution() {
        let a = ValueCell::new("a");
        let b = ValueCell::new("b");
        a.resolve(json!("subnet-a")).unwrap();
        b.resolve(json!("subnet-b")).unwrap();

        let input = Input::map([
            ("ids", Input::from(vec![a.clone(), b.clone()])),
            ("cidr", Input::from("0.0.0.0/0")),
        ]);

        assert_eq!(input.cells().len(), 2);
        let resolved = input.resolve().await.unwrap();
        assert_eq!(
            resolved.value,
            json!({"cidr": "0.0.0.0/0", "ids": ["subnet-a", "subnet-b"]})
        );
        assert!(!resolved.sensitive);
    }

    #[test]
    fn test_peek_uses_fallback_for_unresolved_cells() {
        let known = ValueCell::resolved("known", "x");
        let unknown = ValueCell::new("unknown");
        let input = Input::from(vec![known, unknown]);

        assert!(input.peek(&|_| None).is_none());
        let peeked = input.peek(&|_| Some(json!("y"))).unwrap();
        assert_eq!(peeked.value, json!(["x", "y"]));
    }

    #[test]
    fn test_redaction_and_hash() {
        let mut inputs = ResolvedInputs::new();
        inputs.insert("username", ResolvedValue::plain(json!("admin")));
        inputs.insert("password", ResolvedValue::sensitive(json!("s3cr3t-pw")));

        assert_eq!(
            inputs.redacted(),
            json!({"password": REDACTED, "username": "admin"})
        );
        assert!(!inputs.to_string().contains("s3cr3t-pw"));
        assert_eq!(
            inputs.redact_text("rejected password s3cr3t-pw for admin"),
            "rejected password [secret] for admin"
        );

        let mut same = ResolvedInputs::new();
        same.insert("password", ResolvedValue::sensitive(json!("s3cr3t-pw")));
        same.insert("username", ResolvedValue::plain(json!("admin")));
        assert_eq!(inputs.input_hash(), same.input_hash());

        let mut changed = same.clone();
        changed.insert("password", ResolvedValue::sensitive(json!("other")));
        assert_ne!(inputs.input_hash(), changed.input_hash());
    }
}
