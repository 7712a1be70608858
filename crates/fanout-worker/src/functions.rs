//! Functions served by the worker binary.
//!
//! Small and deliberately varied: enough surface to exercise success,
//! failure, latency, crashes, and worker identity from the parent side.

use fanout::TaskRegistry;
use serde_json::{json, Value};

pub fn build_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();

    registry.register("echo", |args| Ok(args));

    registry.register("add", |args| {
        let a = field_i64(&args, "a")?;
        let b = field_i64(&args, "b")?;
        Ok(json!(a + b))
    });

    // Exposes which OS process served the call; recycling tests key off it.
    registry.register("worker_pid", |_| Ok(json!(std::process::id())));

    registry.register("sleep_ms", |args| {
        let millis = args.as_u64().ok_or("sleep_ms expects a duration in milliseconds")?;
        std::thread::sleep(std::time::Duration::from_millis(millis));
        Ok(json!(millis))
    });

    registry.register("fail", |args| {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("requested failure");
        Err(message.to_string())
    });

    // Simulates a worker crash.
    registry.register("exit", |args| {
        let code = args.as_i64().unwrap_or(1) as i32;
        std::process::exit(code);
    });

    registry
}

fn field_i64(args: &Value, field: &str) -> Result<i64, String> {
    args.get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| format!("missing integer field '{field}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add() {
        let registry = build_registry();
        let out = registry.dispatch("add", json!({ "a": 2, "b": 40 }));
        assert_eq!(out, Ok(json!(42)));
    }

    #[test]
    fn test_add_missing_field() {
        let registry = build_registry();
        let out = registry.dispatch("add", json!({ "a": 2 }));
        assert_eq!(out, Err("missing integer field 'b'".to_string()));
    }

    #[test]
    fn test_fail_uses_message() {
        let registry = build_registry();
        let out = registry.dispatch("fail", json!({ "message": "no thanks" }));
        assert_eq!(out, Err("no thanks".to_string()));
    }

    #[test]
    fn test_echo() {
        let registry = build_registry();
        let out = registry.dispatch("echo", json!([1, 2, 3]));
        assert_eq!(out, Ok(json!([1, 2, 3])));
    }
}
