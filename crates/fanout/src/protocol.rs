//! Wire format between the process strategy and its worker processes.
//!
//! Newline-delimited JSON over the child's stdin/stdout. One request line in,
//! one response line out; the worker handles requests strictly in order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One task dispatched to a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Correlation id; echoed back in the response.
    pub id: u64,
    /// Registered function name.
    pub function: String,
    /// JSON arguments.
    pub args: Value,
}

/// Worker-side outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerResponse {
    /// The function returned a value.
    Completed {
        /// Correlation id from the request.
        id: u64,
        /// The function's return value.
        output: Value,
    },
    /// The function returned an error or panicked.
    Failed {
        /// Correlation id from the request.
        id: u64,
        /// Error message.
        error: String,
    },
}

impl WorkerResponse {
    /// Correlation id carried by this response.
    pub fn id(&self) -> u64 {
        match self {
            WorkerResponse::Completed { id, .. } | WorkerResponse::Failed { id, .. } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip() {
        let request = WorkerRequest {
            id: 7,
            function: "add".to_string(),
            args: json!({ "a": 1, "b": 2 }),
        };
        let line = serde_json::to_string(&request).unwrap();
        let parsed: WorkerRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(request, parsed);
    }

    #[test]
    fn test_response_wire_shape() {
        let completed = WorkerResponse::Completed {
            id: 1,
            output: json!(3),
        };
        let line = serde_json::to_string(&completed).unwrap();
        assert!(line.contains("\"status\":\"completed\""));

        let failed = WorkerResponse::Failed {
            id: 2,
            error: "boom".to_string(),
        };
        let line = serde_json::to_string(&failed).unwrap();
        assert!(line.contains("\"status\":\"failed\""));
        assert_eq!(failed.id(), 2);
    }

    #[test]
    fn test_response_roundtrip() {
        let response = WorkerResponse::Failed {
            id: 9,
            error: "unknown function: nope".to_string(),
        };
        let line = serde_json::to_string(&response).unwrap();
        let parsed: WorkerResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response, parsed);
    }
}
