//! Per-run variable and output store.
//!
//! Variables are layered at construction: persisted globals, then workflow
//! variables, then the keys of an object input. Later layers win. Each node
//! visit records its output under the node id.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::credentials::{is_sealed, SecretCipher};
use crate::expression::{get_path_value, Scope};
use crate::storage::Variable;
use crate::workflow::Node;

/// A variable as held by the context.
#[derive(Debug, Clone)]
pub enum VariableValue {
    Plain(Value),
    /// Sealed secret, opened on every read
    Sealed(String),
}

/// Loop frame visible as `${loop.item}` and `${loop.index}`.
#[derive(Debug, Clone)]
struct LoopFrame {
    item: Value,
    index: usize,
}

/// Execution-scoped variables and node outputs.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    variables: HashMap<String, VariableValue>,
    outputs: HashMap<String, Value>,
    /// node name -> node id
    names: HashMap<String, String>,
    cipher: Option<Arc<dyn SecretCipher>>,
    frame: Option<LoopFrame>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cipher used to open sealed variables.
    pub fn with_cipher(mut self, cipher: Arc<dyn SecretCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Make node names addressable in expressions.
    pub fn with_node_names<'a>(mut self, nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        for node in nodes {
            if !node.name.is_empty() {
                self.names
                    .entry(node.name.clone())
                    .or_insert_with(|| node.id.clone());
            }
        }
        self
    }

    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.variables
            .insert(name.to_string(), VariableValue::Plain(value));
    }

    /// Store a sealed secret under `name`.
    pub fn set_secret(&mut self, name: &str, sealed: &str) {
        self.variables
            .insert(name.to_string(), VariableValue::Sealed(sealed.to_string()));
    }

    /// Layer persisted variables over the current ones.
    pub fn load_variables(&mut self, variables: &[Variable]) {
        for var in variables {
            match &var.value {
                Value::String(sealed) if var.secret && is_sealed(sealed) => {
                    self.set_secret(&var.name, sealed)
                }
                value => {
                    if var.secret {
                        warn!("Secret variable '{}' is not sealed; using it as plain", var.name);
                    }
                    self.set_variable(&var.name, value.clone());
                }
            }
        }
    }

    /// Layer the keys of an object input over the variables.
    pub fn apply_input(&mut self, input: &Value) {
        if let Value::Object(map) = input {
            for (key, value) in map {
                self.set_variable(key, value.clone());
            }
        }
    }

    /// Record a node's latest output.
    pub fn record_output(&mut self, node_id: &str, output: Value) {
        self.outputs.insert(node_id.to_string(), output);
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    pub fn outputs(&self) -> &HashMap<String, Value> {
        &self.outputs
    }

    /// Plain variables. Secrets are left out.
    pub fn plain_variables(&self) -> HashMap<String, Value> {
        self.variables
            .iter()
            .filter_map(|(name, value)| match value {
                VariableValue::Plain(v) => Some((name.clone(), v.clone())),
                VariableValue::Sealed(_) => None,
            })
            .collect()
    }

    /// Read a variable, opening it if sealed.
    pub fn variable(&self, name: &str) -> Option<Value> {
        match self.variables.get(name)? {
            VariableValue::Plain(value) => Some(value.clone()),
            VariableValue::Sealed(sealed) => {
                let Some(cipher) = &self.cipher else {
                    warn!("Secret variable '{}' read without a cipher", name);
                    return None;
                };
                match cipher.open(sealed) {
                    Ok(secret) => Some(Value::String(secret.expose().to_string())),
                    Err(e) => {
                        warn!("Failed to open secret variable '{}': {}", name, e);
                        None
                    }
                }
            }
        }
    }

    /// Copy of this context bound to one loop item.
    pub fn for_iteration(&self, item: Value, index: usize) -> Self {
        let mut ctx = self.clone();
        ctx.frame = Some(LoopFrame { item, index });
        ctx
    }

    pub fn loop_item(&self) -> Option<(&Value, usize)> {
        self.frame.as_ref().map(|f| (&f.item, f.index))
    }

    /// Name resolution for one node visit.
    pub fn scope<'a>(&'a self, input: &'a Value) -> VisitScope<'a> {
        VisitScope { ctx: self, input }
    }
}

/// Scope used to evaluate a node's parameters.
///
/// First match wins: `input`, `loop`, an exact variable name, a variable plus
/// a path, a node id plus a path, a node name plus a path.
pub struct VisitScope<'a> {
    ctx: &'a ExecutionContext,
    input: &'a Value,
}

impl Scope for VisitScope<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        let (head, path) = name.split_once('.').unwrap_or((name, ""));

        if head == "input" {
            return get_path_value(self.input, path);
        }
        if head == "loop" {
            if let Some(frame) = &self.ctx.frame {
                return match path.split_once('.').unwrap_or((path, "")) {
                    ("item", rest) => get_path_value(&frame.item, rest),
                    ("index", "") => Some(Value::from(frame.index)),
                    _ => None,
                };
            }
        }

        if let Some(value) = self.ctx.variable(name) {
            return Some(value);
        }
        if !path.is_empty() {
            if let Some(value) = self.ctx.variable(head) {
                return get_path_value(&value, path);
            }
        }

        if let Some(output) = self.ctx.outputs.get(head) {
            return get_path_value(output, path);
        }
        let id = self.ctx.names.get(head)?;
        get_path_value(self.ctx.outputs.get(id)?, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialVault;
    use crate::expression::Evaluator;
    use crate::storage::VariableScope;
    use serde_json::json;

    #[test]
    fn test_variable_precedence() {
        let mut ctx = ExecutionContext::new();
        ctx.load_variables(&[
            Variable::global("region", json!("eu")),
            Variable::global("tier", json!("free")),
        ]);
        ctx.load_variables(&[Variable::workflow("wf", "region", json!("us"))]);
        ctx.apply_input(&json!({"tier": "pro"}));

        assert_eq!(ctx.variable("region"), Some(json!("us")));
        assert_eq!(ctx.variable("tier"), Some(json!("pro")));
    }

    #[test]
    fn test_lookup_order() {
        let nodes = vec![Node::new("fetch", "http").with_name("Fetch Users")];
        let mut ctx = ExecutionContext::new().with_node_names(&nodes);
        ctx.set_variable("config", json!({"limit": 10}));
        ctx.set_variable("a.b", json!("dotted"));
        ctx.record_output("fetch", json!({"users": ["ada", "bob"]}));

        let input = json!({"id": 7});
        let scope = ctx.scope(&input);

        assert_eq!(scope.lookup("input.id"), Some(json!(7)));
        assert_eq!(scope.lookup("input"), Some(json!({"id": 7})));
        assert_eq!(scope.lookup("a.b"), Some(json!("dotted")));
        assert_eq!(scope.lookup("config.limit"), Some(json!(10)));
        assert_eq!(scope.lookup("fetch.users.1"), Some(json!("bob")));
        assert_eq!(scope.lookup("Fetch Users.users.0"), Some(json!("ada")));
        assert_eq!(scope.lookup("loop.item"), None);
        assert_eq!(scope.lookup("nothing"), None);
    }

    #[test]
    fn test_loop_frame() {
        let ctx = ExecutionContext::new().for_iteration(json!({"n": 4}), 2);
        let input = Value::Null;
        let eval = Evaluator::new();
        let out = eval
            .evaluate("${loop.item.n}-${loop.index}", &ctx.scope(&input))
            .unwrap();
        assert_eq!(out, "4-2");
    }

    #[test]
    fn test_secret_opened_on_read_only() {
        let vault = Arc::new(CredentialVault::generate().unwrap());
        let sealed = vault.seal("s3cret").unwrap();

        let mut ctx = ExecutionContext::new().with_cipher(vault);
        ctx.load_variables(&[Variable::secret(VariableScope::Global, "api_key", &sealed)]);

        assert!(ctx.plain_variables().get("api_key").is_none());
        let input = Value::Null;
        let out = Evaluator::new()
            .evaluate("Bearer ${api_key}", &ctx.scope(&input))
            .unwrap();
        assert_eq!(out, "Bearer s3cret");
    }

    #[test]
    fn test_secret_without_cipher_stays_literal() {
        let mut ctx = ExecutionContext::new();
        ctx.set_secret("api_key", "enc:abc");
        let input = Value::Null;
        let out = Evaluator::new()
            .evaluate("${api_key}", &ctx.scope(&input))
            .unwrap();
        assert_eq!(out, "${api_key}");
    }
}
