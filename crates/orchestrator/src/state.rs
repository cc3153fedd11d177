//! Transaction and step state machines.

use serde::{Deserialize, Serialize};

/// Overall status of a transaction.
///
/// Status transitions:
/// ```text
/// NOT_STARTED ──► INVOKING ──┬──────────────────────────► DONE
///                            ├──► COMPENSATING ──┬──► REVERTED
///                            │         ▲         └──► FAILED
///                            └──► WAITING_TO_COMPENSATE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Allocated but not yet driven.
    #[default]
    NotStarted,

    /// Forward traversal is in progress or suspended on an async step.
    Invoking,

    /// Compensation was requested while async work is still in flight.
    WaitingToCompensate,

    /// Previously-completed steps are being undone.
    Compensating,

    /// Every step completed (terminal).
    Done,

    /// Compensation finished after a failure (terminal).
    Reverted,

    /// A step or compensation failed irrecoverably (terminal).
    Failed,
}

impl TransactionStatus {
    /// Returns true if no further work will be scheduled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Done | TransactionStatus::Reverted | TransactionStatus::Failed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::NotStarted => "NOT_STARTED",
            TransactionStatus::Invoking => "INVOKING",
            TransactionStatus::WaitingToCompensate => "WAITING_TO_COMPENSATE",
            TransactionStatus::Compensating => "COMPENSATING",
            TransactionStatus::Done => "DONE",
            TransactionStatus::Reverted => "REVERTED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a single step within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    /// Not yet scheduled.
    #[default]
    Idle,

    /// Dispatched; for async steps, awaiting external resolution.
    Invoking,

    /// Completed successfully.
    InvokedOk,

    /// Failed permanently during invoke.
    InvokeFailed,

    /// Undo is in flight; for async steps, awaiting external resolution.
    Compensating,

    /// Undo completed.
    Compensated,

    /// Exhausted retries on a step flagged to continue anyway.
    PermanentFailureSkipped,
}

impl StepState {
    /// True when the step counts as done for traversal purposes, so its
    /// children may be scheduled.
    pub fn is_settled_ok(&self) -> bool {
        matches!(self, StepState::InvokedOk | StepState::PermanentFailureSkipped)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Idle => "IDLE",
            StepState::Invoking => "INVOKING",
            StepState::InvokedOk => "INVOKED_OK",
            StepState::InvokeFailed => "INVOKE_FAILED",
            StepState::Compensating => "COMPENSATING",
            StepState::Compensated => "COMPENSATED",
            StepState::PermanentFailureSkipped => "PERMANENT_FAILURE_SKIPPED",
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
