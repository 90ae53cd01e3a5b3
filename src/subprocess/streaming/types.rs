//! Core types for the output streaming protocol

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Reserved payload field that carries a new agent session id
pub const NEW_SESSION_ID_FIELD: &str = "newSessionId";

/// Status reported by the agent runner in a result payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    Success,
    Error,
}

/// One structured event recovered from a container's output stream
///
/// The payload is kept verbatim. Only `newSessionId` carries meaning for the
/// demultiplexer; the typed accessors below are conveniences for consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerOutputEvent {
    /// Zero-based extraction order within one demultiplexer
    #[serde(skip)]
    pub sequence: u64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ContainerOutputEvent {
    pub fn new(sequence: u64, payload: Map<String, Value>) -> Self {
        Self { sequence, payload }
    }

    /// Session id announced by this event, if it carries a non-empty one
    pub fn new_session_id(&self) -> Option<&str> {
        self.payload
            .get(NEW_SESSION_ID_FIELD)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn status(&self) -> Option<OutputStatus> {
        self.payload
            .get("status")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// The `result` text, `None` when absent or null
    pub fn result(&self) -> Option<&str> {
        self.payload.get("result").and_then(Value::as_str)
    }

    pub fn error(&self) -> Option<&str> {
        self.payload.get("error").and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }
}

/// Limits applied by the session runner
#[derive(Debug, Clone)]
pub struct SessionLimits {
    /// Hard timeout, reset whenever a payload is recovered
    pub container_timeout: Duration,
    /// Idle period the agent is allowed before it is reaped
    pub idle_timeout: Duration,
    /// Grace added on top of the idle timeout so the agent's own idle
    /// shutdown can fire before the hard kill does
    pub idle_grace: Duration,
    /// Maximum bytes of raw stdout/stderr retained for diagnostics
    pub max_output_size: usize,
}

impl SessionLimits {
    pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(30);

    /// Effective kill timeout
    pub fn effective_timeout(&self) -> Duration {
        self.container_timeout
            .max(self.idle_timeout + self.idle_grace)
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            container_timeout: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(30 * 60),
            idle_grace: Self::DEFAULT_IDLE_GRACE,
            max_output_size: 10 * 1024 * 1024,
        }
    }
}
