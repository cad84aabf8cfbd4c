//! Tool and variable registries shared by every execution strategy.

use std::collections::HashMap;
use std::sync::Arc;

use crucible_core::EngineError;
use serde_json::Value;

/// What invoking a tool produced: an ordinary return value, or a directive
/// that the caller's evaluation should end now carrying this value as the
/// final answer.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Value(Value),
    FinalAnswer(Value),
}

/// A callable exposed to guest code. Implementations must be side-effect-safe
/// to call from any thread: the isolated-worker and fiber-batch layers may
/// invoke a tool from a thread other than the one that registered it.
pub trait Tool: Send + Sync {
    fn call(&self, args: Value, kwargs: Value) -> Result<ToolOutcome, EngineError>;
}

impl<F> Tool for F
where
    F: Fn(Value, Value) -> Result<ToolOutcome, EngineError> + Send + Sync,
{
    fn call(&self, args: Value, kwargs: Value) -> Result<ToolOutcome, EngineError> {
        self(args, kwargs)
    }
}

/// Names that collide with host-reserved identifiers. Registering a tool
/// under one of these is always rejected with `InvalidArgument`.
pub const DANGEROUS_TOOL_NAMES: &[&str] = &[
    "eval", "instance_eval", "class_eval", "module_eval",
    "system", "exec", "spawn", "fork",
    "require", "require_relative", "load", "autoload",
    "open", "file", "io", "dir",
    "send", "__send__", "public_send", "method", "define_method",
    "const_get", "const_set", "remove_const",
    "instance_variable_get", "instance_variable_set",
    "class_variable_get", "class_variable_set",
    "binding", "objectspace", "marshal", "kernel",
];

/// Whether `name` collides with a host-reserved identifier (case-insensitive).
#[must_use]
pub fn is_dangerous_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    DANGEROUS_TOOL_NAMES.contains(&lower.as_str())
}

/// Registered tools, keyed by name, guarded against dangerous-name collisions.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) -> Result<(), EngineError> {
        let name = name.into();
        if is_dangerous_name(&name) {
            return Err(EngineError::invalid_argument(format!(
                "cannot register tool with reserved name: {name}"
            )));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Merge `other` into this registry, enforcing the dangerous-name guard
    /// per entry. On the first collision, no further entries are merged.
    pub fn merge(&mut self, other: HashMap<String, Arc<dyn Tool>>) -> Result<(), EngineError> {
        for (name, tool) in other {
            self.register(name, tool)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Registered read-only variables, keyed by name.
#[derive(Clone, Default)]
pub struct VariableRegistry {
    variables: HashMap<String, Value>,
}

impl VariableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn merge(&mut self, other: HashMap<String, Value>) {
        self.variables.extend(other);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.variables.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_tool() -> Arc<dyn Tool> {
        Arc::new(|args: Value, _kwargs: Value| Ok(ToolOutcome::Value(args)))
    }

    #[test]
    fn register_rejects_dangerous_names() {
        let mut registry = ToolRegistry::new();
        let err = registry.register("eval", noop_tool()).unwrap_err();
        assert!(err.propagates());
    }

    #[test]
    fn register_rejects_dangerous_names_case_insensitively() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register("System", noop_tool()).is_err());
    }

    #[test]
    fn register_accepts_ordinary_names() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register("search", noop_tool()).is_ok());
        assert!(registry.get("search").is_some());
    }

    #[test]
    fn merge_stops_at_first_dangerous_collision() {
        let mut registry = ToolRegistry::new();
        let mut incoming: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        incoming.insert("search".to_string(), noop_tool());
        incoming.insert("fork".to_string(), noop_tool());
        assert!(registry.merge(incoming).is_err());
    }

    #[test]
    fn variable_registry_roundtrip() {
        let mut vars = VariableRegistry::new();
        vars.set("x", Value::from(1));
        assert_eq!(vars.get("x"), Some(&Value::from(1)));
        assert_eq!(vars.get("missing"), None);
    }
}
