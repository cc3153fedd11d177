//! The step handler protocol.
//!
//! The handler performs the actual side-effect of each step. The
//! orchestrator calls it with the step's action, whether it is invoking or
//! compensating, and a payload of metadata plus data. A returned value is
//! captured as the step's response; an error signals failure and is subject
//! to the step's retry budget.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::payload::Payload;

/// Which direction a dispatch runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerType {
    /// Perform the step's side-effect.
    Invoke,
    /// Undo a previously performed side-effect.
    Compensate,
}

impl HandlerType {
    /// Lowercase wire name, used in payload metadata and sub-keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerType::Invoke => "invoke",
            HandlerType::Compensate => "compensate",
        }
    }
}

impl std::fmt::Display for HandlerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error a handler returns to signal that a dispatch failed.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StepFailure {
    message: String,
}

impl StepFailure {
    /// Creates a failure with the given reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure reason.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// User-supplied function that performs the side-effect of each step.
///
/// Implementations must be safe to call concurrently: sibling steps in a
/// parallel fan-out are dispatched at the same time.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Performs (or undoes) the step named by `action`.
    ///
    /// The returned value is stored as the step's response and, when the
    /// step carries the forward-response flag, injected into its child's
    /// payload. Returning an error counts as one failed attempt.
    async fn call(
        &self,
        action: &str,
        handler_type: HandlerType,
        payload: Payload,
    ) -> Result<Value, StepFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_type_wire_names() {
        assert_eq!(HandlerType::Invoke.as_str(), "invoke");
        assert_eq!(HandlerType::Compensate.as_str(), "compensate");
        assert_eq!(HandlerType::Invoke.to_string(), "invoke");
    }

    #[test]
    fn test_handler_type_serialization() {
        assert_eq!(
            serde_json::to_string(&HandlerType::Compensate).unwrap(),
            "\"compensate\""
        );
        let back: HandlerType = serde_json::from_str("\"invoke\"").unwrap();
        assert_eq!(back, HandlerType::Invoke);
    }

    #[test]
    fn test_step_failure_message() {
        let failure = StepFailure::new("out of stock");
        assert_eq!(failure.message(), "out of stock");
        assert_eq!(failure.to_string(), "out of stock");
    }
}
