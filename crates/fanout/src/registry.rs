//! Registry of named task functions.
//!
//! The registry maps function names to handlers taking JSON arguments. It is
//! what lets a task description cross the process boundary: the parent sends
//! the name and arguments, and the worker process dispatches through its own
//! copy of the registry. In-process strategies dispatch through it directly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::task::TaskOutput;

/// Handler function type: JSON arguments in, JSON value or error message out.
pub type TaskHandler = Arc<dyn Fn(Value) -> TaskOutput + Send + Sync>;

/// Registry of named task functions.
///
/// # Example
///
/// ```
/// use fanout::TaskRegistry;
/// use serde_json::json;
///
/// let mut registry = TaskRegistry::new();
/// registry.register("double", |args| {
///     let n = args.as_i64().ok_or("expected a number")?;
///     Ok(json!(n * 2))
/// });
///
/// assert_eq!(registry.dispatch("double", json!(21)), Ok(json!(42)));
/// ```
pub struct TaskRegistry {
    handlers: HashMap<String, TaskHandler>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a function under `name`, replacing any previous handler.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(Value) -> TaskOutput + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Arc::new(handler));
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<TaskHandler> {
        self.handlers.get(name).cloned()
    }

    /// Check whether a function is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Names of all registered functions.
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|s| s.as_str())
    }

    /// Call the named function with `args`.
    pub fn dispatch(&self, function: &str, args: Value) -> TaskOutput {
        match self.handlers.get(function) {
            Some(handler) => handler(args),
            None => Err(format!("unknown function: {function}")),
        }
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("functions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_dispatch() {
        let mut registry = TaskRegistry::new();
        registry.register("add", |args| {
            let a = args["a"].as_i64().ok_or("missing a")?;
            let b = args["b"].as_i64().ok_or("missing b")?;
            Ok(json!(a + b))
        });

        assert!(registry.contains("add"));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.dispatch("add", json!({ "a": 2, "b": 3 })),
            Ok(json!(5))
        );
    }

    #[test]
    fn test_unknown_function() {
        let registry = TaskRegistry::new();
        let result = registry.dispatch("missing", json!({}));
        assert_eq!(result, Err("unknown function: missing".to_string()));
    }

    #[test]
    fn test_handler_error_propagates() {
        let mut registry = TaskRegistry::new();
        registry.register("fail", |_| Err("always fails".to_string()));
        assert_eq!(
            registry.dispatch("fail", json!(null)),
            Err("always fails".to_string())
        );
    }

    #[test]
    fn test_replace_handler() {
        let mut registry = TaskRegistry::new();
        registry.register("f", |_| Ok(json!(1)));
        registry.register("f", |_| Ok(json!(2)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.dispatch("f", json!(null)), Ok(json!(2)));
    }

    #[test]
    fn test_registry_debug() {
        let mut registry = TaskRegistry::new();
        registry.register("echo", |args| Ok(args));
        let debug = format!("{:?}", registry);
        assert!(debug.contains("echo"));
    }
}
