//! Per-run transaction state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use flow::FlowGraph;
use serde_json::Value;

use crate::handler::{HandlerType, StepHandler};
use crate::state::{StepState, TransactionStatus};

/// Per-step record inside a transaction.
#[derive(Debug, Clone, Default)]
pub struct StepRecord {
    pub(crate) state: StepState,
    /// Invoke dispatches made so far; equals the final attempt count.
    pub(crate) attempts: u32,
    /// Compensate dispatches made so far; counted separately from invokes.
    pub(crate) compensation_attempts: u32,
    pub(crate) last_response: Option<Value>,
    pub(crate) failure_reason: Option<String>,
}

impl StepRecord {
    /// Current lifecycle state.
    pub fn state(&self) -> StepState {
        self.state
    }

    /// Number of invoke dispatches made.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of compensate dispatches made.
    pub fn compensation_attempts(&self) -> u32 {
        self.compensation_attempts
    }

    /// The handler's most recent invoke response, if any.
    pub fn last_response(&self) -> Option<&Value> {
        self.last_response.as_ref()
    }

    /// The most recent failure reason, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}

/// One run of a flow: node states, attempt counters, forwarded responses,
/// the sub-key index, and the overall status.
///
/// Created by [`Orchestrator::begin_transaction`] and mutated only by the
/// orchestrator runtime and by external resume calls. Distinct transactions
/// share no state; callers must serialize resume calls per transaction.
///
/// [`Orchestrator::begin_transaction`]: crate::Orchestrator::begin_transaction
pub struct Transaction {
    pub(crate) graph: Arc<FlowGraph>,
    pub(crate) handler: Arc<dyn StepHandler>,
    idempotency_key: String,
    flow_name: String,
    initial_payload: Value,
    status: TransactionStatus,
    is_partially_completed: bool,
    pub(crate) records: Vec<StepRecord>,
    /// Sub-key → (node index, handler type), populated at dispatch time.
    pub(crate) key_index: HashMap<String, (usize, HandlerType)>,
    /// Nodes that reached `INVOKED_OK`, in completion order.
    pub(crate) completed_order: Vec<usize>,
    /// Compensation candidates in the order they became candidates: every
    /// completed node, plus async nodes that failed after dispatch (their
    /// side-effect may have partially happened).
    pub(crate) compensation_order: Vec<usize>,
    pub(crate) started_at: Instant,
}

impl Transaction {
    pub(crate) fn new(
        graph: Arc<FlowGraph>,
        handler: Arc<dyn StepHandler>,
        idempotency_key: String,
        flow_name: String,
        initial_payload: Value,
    ) -> Self {
        let records = vec![StepRecord::default(); graph.len()];
        Self {
            graph,
            handler,
            idempotency_key,
            flow_name,
            initial_payload,
            status: TransactionStatus::NotStarted,
            is_partially_completed: false,
            records,
            key_index: HashMap::new(),
            completed_order: Vec::new(),
            compensation_order: Vec::new(),
            started_at: Instant::now(),
        }
    }

    /// The caller-supplied transaction key, opaque to the orchestrator.
    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    /// The flow name this transaction runs under.
    pub fn flow_name(&self) -> &str {
        &self.flow_name
    }

    /// The payload supplied to `begin_transaction`.
    pub fn initial_payload(&self) -> &Value {
        &self.initial_payload
    }

    /// Overall status.
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// True if any step completed via the continue-on-permanent-failure
    /// flag.
    pub fn is_partially_completed(&self) -> bool {
        self.is_partially_completed
    }

    /// The per-step record for `action`, if the flow contains it.
    pub fn step(&self, action: &str) -> Option<&StepRecord> {
        self.graph.index_of(action).map(|idx| &self.records[idx])
    }

    /// The lifecycle state of `action`, if the flow contains it.
    pub fn step_state(&self, action: &str) -> Option<StepState> {
        self.step(action).map(StepRecord::state)
    }

    /// Number of invoke dispatches made for `action`, if the flow contains
    /// it.
    pub fn step_attempts(&self, action: &str) -> Option<u32> {
        self.step(action).map(StepRecord::attempts)
    }

    /// The most recent response stored for `action`, if any.
    pub fn step_response(&self, action: &str) -> Option<&Value> {
        self.step(action).and_then(StepRecord::last_response)
    }

    /// The most recent failure reason recorded for `action`, if any.
    pub fn step_failure_reason(&self, action: &str) -> Option<&str> {
        self.step(action).and_then(StepRecord::failure_reason)
    }

    /// Actions that completed successfully, in completion order.
    pub fn completed_actions(&self) -> Vec<&str> {
        self.completed_order
            .iter()
            .map(|idx| self.graph.node(*idx).action.as_str())
            .collect()
    }

    pub(crate) fn set_status(&mut self, status: TransactionStatus) {
        self.status = status;
    }

    pub(crate) fn mark_partially_completed(&mut self) {
        self.is_partially_completed = true;
    }

    pub(crate) fn record(&self, idx: usize) -> &StepRecord {
        &self.records[idx]
    }

    pub(crate) fn record_mut(&mut self, idx: usize) -> &mut StepRecord {
        &mut self.records[idx]
    }

    /// True while any step is dispatched and unresolved.
    pub(crate) fn any_invoking(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.state == StepState::Invoking)
    }

    /// True while any compensation is dispatched and unresolved.
    pub(crate) fn any_compensating(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.state == StepState::Compensating)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("idempotency_key", &self.idempotency_key)
            .field("flow_name", &self.flow_name)
            .field("status", &self.status)
            .field("is_partially_completed", &self.is_partially_completed)
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}
