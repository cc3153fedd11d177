//! Named events fired at transaction and step state transitions.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;

/// Events observable on an orchestrator.
///
/// `Finish` fires exactly once per transaction, on any terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrchestratorEvent {
    /// A transaction was allocated.
    Begin,
    /// `resume` was called on a non-terminal transaction.
    Resume,
    /// The transaction reached a terminal status.
    Finish,
    /// A step was dispatched.
    StepBegin,
    /// A step (invoke or compensate) completed successfully.
    StepSuccess,
    /// A step failed permanently.
    StepFailure,
    /// Compensation started.
    CompensateBegin,
    /// All compensations succeeded.
    Reverted,
    /// The transaction failed irrecoverably.
    Failed,
}

impl OrchestratorEvent {
    /// Returns the event name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorEvent::Begin => "begin",
            OrchestratorEvent::Resume => "resume",
            OrchestratorEvent::Finish => "finish",
            OrchestratorEvent::StepBegin => "stepBegin",
            OrchestratorEvent::StepSuccess => "stepSuccess",
            OrchestratorEvent::StepFailure => "stepFailure",
            OrchestratorEvent::CompensateBegin => "compensateBegin",
            OrchestratorEvent::Reverted => "reverted",
            OrchestratorEvent::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrchestratorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

type Listener = Box<dyn Fn(&Transaction) + Send + Sync>;

/// Per-event listener registry. Listeners are invoked synchronously at the
/// state transition, before any dependent step is scheduled.
#[derive(Default)]
pub(crate) struct EventListeners {
    inner: RwLock<HashMap<OrchestratorEvent, Vec<Listener>>>,
}

impl EventListeners {
    pub(crate) fn on(
        &self,
        event: OrchestratorEvent,
        listener: impl Fn(&Transaction) + Send + Sync + 'static,
    ) {
        let mut inner = self.inner.write().unwrap();
        inner.entry(event).or_default().push(Box::new(listener));
    }

    pub(crate) fn emit(&self, event: OrchestratorEvent, transaction: &Transaction) {
        let inner = self.inner.read().unwrap();
        if let Some(listeners) = inner.get(&event) {
            for listener in listeners {
                listener(transaction);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(OrchestratorEvent::Begin.as_str(), "begin");
        assert_eq!(OrchestratorEvent::StepBegin.as_str(), "stepBegin");
        assert_eq!(OrchestratorEvent::StepSuccess.as_str(), "stepSuccess");
        assert_eq!(OrchestratorEvent::StepFailure.as_str(), "stepFailure");
        assert_eq!(OrchestratorEvent::CompensateBegin.as_str(), "compensateBegin");
        assert_eq!(OrchestratorEvent::Finish.as_str(), "finish");
    }

    #[test]
    fn test_event_serialization_matches_names() {
        for event in [
            OrchestratorEvent::Begin,
            OrchestratorEvent::Resume,
            OrchestratorEvent::Finish,
            OrchestratorEvent::StepBegin,
            OrchestratorEvent::StepSuccess,
            OrchestratorEvent::StepFailure,
            OrchestratorEvent::CompensateBegin,
            OrchestratorEvent::Reverted,
            OrchestratorEvent::Failed,
        ] {
            let json = serde_json::to_string(&event).unwrap();
            assert_eq!(json, format!("\"{event}\""));
            let back: OrchestratorEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
        }
    }
}
