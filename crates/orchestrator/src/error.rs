//! Orchestrator error types.

use flow::FlowError;
use thiserror::Error;

/// Programming errors surfaced by the orchestrator.
///
/// Step failures, retry exhaustion, and compensation are never surfaced as
/// errors; they are reflected in the transaction's final status.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// `register_step_failure` was called on a step that was never
    /// dispatched.
    #[error("Cannot set step failure when status is idle")]
    StepFailureWhileIdle,

    /// `register_step_success` was called on a step that was never
    /// dispatched.
    #[error("Cannot set step success when status is idle")]
    StepSuccessWhileIdle,

    /// A `register_step_*` call named a sub-key that resolves to no step of
    /// the flow.
    #[error("Unknown step key: {0}")]
    UnknownStepKey(String),

    /// The flow definition failed to compile.
    #[error(transparent)]
    Flow(#[from] FlowError),
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_failure_message_is_literal() {
        assert_eq!(
            OrchestratorError::StepFailureWhileIdle.to_string(),
            "Cannot set step failure when status is idle"
        );
    }

    #[test]
    fn test_idle_success_message() {
        assert_eq!(
            OrchestratorError::StepSuccessWhileIdle.to_string(),
            "Cannot set step success when status is idle"
        );
    }

    #[test]
    fn test_flow_error_passes_through() {
        let err = OrchestratorError::from(FlowError::DuplicateAction("x".into()));
        assert_eq!(err.to_string(), "Duplicate action in flow: x");
    }
}
