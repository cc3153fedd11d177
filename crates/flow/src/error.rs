//! Flow compilation errors.

use thiserror::Error;

/// Errors raised by the flow compiler on malformed definitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// The same action identifier appears more than once in the flow.
    #[error("Duplicate action in flow: {0}")]
    DuplicateAction(String),

    /// The definition names no initial step.
    #[error("Flow definition has no steps")]
    EmptyFlow,
}

/// Convenience type alias for flow results.
pub type Result<T> = std::result::Result<T, FlowError>;
