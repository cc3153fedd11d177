//! The orchestrator runtime: traversal, scheduling, retry, compensation.

use std::sync::Arc;

use flow::{FlowDefinition, FlowGraph};
use futures_util::future::join_all;
use serde_json::Value;

use crate::error::{OrchestratorError, Result};
use crate::events::{EventListeners, OrchestratorEvent};
use crate::handler::{HandlerType, StepHandler};
use crate::payload::{self, Payload};
use crate::state::{StepState, TransactionStatus};
use crate::transaction::Transaction;

/// Drives transactions over a compiled flow.
///
/// The orchestrator owns the compiled flow and the listener registry only;
/// per-run state lives in the [`Transaction`]. Any number of concurrent
/// transactions may run over the same orchestrator.
pub struct Orchestrator {
    flow_name: String,
    graph: Arc<FlowGraph>,
    listeners: EventListeners,
}

/// Outcome of one node's invoke dispatch, including its internal retries.
struct InvokeOutcome {
    node: usize,
    /// Handler calls made by this dispatch.
    dispatches: u32,
    result: DispatchResult,
}

enum DispatchResult {
    Success(Value),
    Failure(String),
    /// Async step: the handler ran but resolution arrives externally.
    Pending,
}

impl Orchestrator {
    /// Default retry budget for steps that do not set `max_retries`.
    pub const DEFAULT_RETRIES: u32 = flow::DEFAULT_RETRIES;

    /// Compiles `definition` and creates an orchestrator for it.
    pub fn new(flow_name: impl Into<String>, definition: &FlowDefinition) -> Result<Self> {
        let graph = Arc::new(flow::compile(definition)?);
        Ok(Self {
            flow_name: flow_name.into(),
            graph,
            listeners: EventListeners::default(),
        })
    }

    /// The flow name, used as the `producer` in dispatch metadata.
    pub fn flow_name(&self) -> &str {
        &self.flow_name
    }

    /// Deterministic sub-key for one handler dispatch:
    /// `"<idempotency key>:<action>:<invoke|compensate>"`.
    pub fn key_name(idempotency_key: &str, action: &str, handler_type: HandlerType) -> String {
        payload::sub_key(idempotency_key, action, handler_type)
    }

    /// Registers a listener for `event`. Listeners are invoked synchronously
    /// at the state transition.
    pub fn on(
        &self,
        event: OrchestratorEvent,
        listener: impl Fn(&Transaction) + Send + Sync + 'static,
    ) {
        self.listeners.on(event, listener);
    }

    /// Allocates transaction state bound to this flow. Executes nothing.
    pub fn begin_transaction(
        &self,
        idempotency_key: impl Into<String>,
        handler: Arc<dyn StepHandler>,
        initial_payload: Option<Value>,
    ) -> Transaction {
        let transaction = Transaction::new(
            Arc::clone(&self.graph),
            handler,
            idempotency_key.into(),
            self.flow_name.clone(),
            initial_payload.unwrap_or(Value::Null),
        );
        metrics::counter!("transactions_started_total").increment(1);
        tracing::info!(
            flow = %self.flow_name,
            idempotency_key = %transaction.idempotency_key(),
            "transaction begun"
        );
        self.listeners.emit(OrchestratorEvent::Begin, &transaction);
        transaction
    }

    /// Drives execution until the transaction becomes terminal, blocks on an
    /// async step, or exhausts all currently-runnable work.
    ///
    /// Safe to call repeatedly; resuming a terminal transaction is a no-op.
    /// Step failures and compensation are reflected in the transaction's
    /// final status, never surfaced as errors.
    #[tracing::instrument(
        skip(self, transaction),
        fields(flow = %self.flow_name, idempotency_key = %transaction.idempotency_key())
    )]
    pub async fn resume(&self, transaction: &mut Transaction) {
        if transaction.status().is_terminal() {
            return;
        }
        metrics::counter!("transaction_resumes_total").increment(1);
        self.listeners.emit(OrchestratorEvent::Resume, transaction);

        match transaction.status() {
            TransactionStatus::NotStarted => {
                transaction.set_status(TransactionStatus::Invoking);
                self.drive(transaction).await;
            }
            TransactionStatus::Invoking => self.drive(transaction).await,
            TransactionStatus::WaitingToCompensate => {
                if !transaction.any_invoking() {
                    self.begin_compensation(transaction).await;
                }
            }
            TransactionStatus::Compensating => self.drive_compensation(transaction).await,
            _ => {}
        }
    }

    /// External completion signal for an async step.
    ///
    /// Resolves the dispatch identified by `sub_key`: an invoke sub-key
    /// marks the step completed (storing `response`) and continues
    /// traversal; a compensate sub-key marks the step compensated and
    /// continues compensation. Errors if the target step was never
    /// dispatched.
    pub async fn register_step_success(
        &self,
        sub_key: &str,
        response: Option<Value>,
        transaction: &mut Transaction,
    ) -> Result<()> {
        let (idx, handler_type) = self
            .resolve_sub_key(transaction, sub_key)
            .ok_or_else(|| OrchestratorError::UnknownStepKey(sub_key.to_string()))?;

        if transaction.record(idx).state == StepState::Idle {
            return Err(OrchestratorError::StepSuccessWhileIdle);
        }

        match handler_type {
            HandlerType::Invoke => {
                if transaction.record(idx).state != StepState::InvokedOk {
                    let record = transaction.record_mut(idx);
                    record.state = StepState::InvokedOk;
                    record.last_response = response;
                    transaction.completed_order.push(idx);
                    transaction.compensation_order.push(idx);
                    let action = &transaction.graph.node(idx).action;
                    tracing::info!(action = %action, "step completed externally");
                    self.listeners
                        .emit(OrchestratorEvent::StepSuccess, transaction);
                }
                match transaction.status() {
                    TransactionStatus::Invoking => self.drive(transaction).await,
                    TransactionStatus::WaitingToCompensate => {
                        if !transaction.any_invoking() {
                            self.begin_compensation(transaction).await;
                        }
                    }
                    _ => {}
                }
            }
            HandlerType::Compensate => {
                if transaction.record(idx).state != StepState::Compensated {
                    transaction.record_mut(idx).state = StepState::Compensated;
                    let action = &transaction.graph.node(idx).action;
                    tracing::info!(action = %action, "compensation completed externally");
                    self.listeners
                        .emit(OrchestratorEvent::StepSuccess, transaction);
                }
                if transaction.status() == TransactionStatus::Compensating {
                    self.drive_compensation(transaction).await;
                }
            }
        }
        Ok(())
    }

    /// External failure signal for an async step.
    ///
    /// Errors if the target step was never dispatched. Otherwise records the
    /// failure, re-drives the dispatch while retries remain, and on
    /// exhaustion drives compensation (or skips the step when it is flagged
    /// to continue on permanent failure).
    pub async fn register_step_failure(
        &self,
        sub_key: &str,
        failure_reason: Option<String>,
        transaction: &mut Transaction,
    ) -> Result<()> {
        let (idx, handler_type) = self
            .resolve_sub_key(transaction, sub_key)
            .ok_or_else(|| OrchestratorError::UnknownStepKey(sub_key.to_string()))?;

        if transaction.record(idx).state == StepState::Idle {
            return Err(OrchestratorError::StepFailureWhileIdle);
        }

        let graph = Arc::clone(&transaction.graph);
        let node = graph.node(idx);

        match handler_type {
            HandlerType::Invoke => {
                {
                    let record = transaction.record_mut(idx);
                    record.failure_reason = failure_reason;
                    record.state = StepState::InvokeFailed;
                }
                tracing::warn!(action = %node.action, "step failed externally");
                self.listeners
                    .emit(OrchestratorEvent::StepFailure, transaction);

                if transaction.record(idx).attempts <= node.max_retries {
                    // Retries remain: dispatch the invoke again.
                    transaction.record_mut(idx).state = StepState::Invoking;
                    let data = self.payload_data(transaction, idx);
                    let first_attempt = transaction.record(idx).attempts + 1;
                    let outcome = Self::run_invoke(
                        Arc::clone(&transaction.handler),
                        self.flow_name.clone(),
                        transaction.idempotency_key().to_string(),
                        node.action.clone(),
                        data,
                        node.max_retries,
                        first_attempt,
                        node.is_async,
                        idx,
                    )
                    .await;
                    let needs_compensation = self.apply_invoke_outcome(transaction, outcome);
                    if needs_compensation {
                        self.request_compensation(transaction).await;
                    } else if transaction.status() == TransactionStatus::Invoking {
                        self.drive(transaction).await;
                    }
                } else if node.continue_on_permanent_failure {
                    transaction.record_mut(idx).state = StepState::PermanentFailureSkipped;
                    transaction.mark_partially_completed();
                    if transaction.status() == TransactionStatus::Invoking {
                        self.drive(transaction).await;
                    }
                } else {
                    // The async side-effect may have partially happened;
                    // the step is a compensation candidate.
                    transaction.compensation_order.push(idx);
                    self.request_compensation(transaction).await;
                }
            }
            HandlerType::Compensate => {
                transaction.record_mut(idx).failure_reason = failure_reason;
                tracing::warn!(action = %node.action, "compensation failed externally");
                self.listeners
                    .emit(OrchestratorEvent::StepFailure, transaction);

                let attempts = transaction.record(idx).compensation_attempts;
                if attempts <= node.max_retries {
                    let data = self.payload_data(transaction, idx);
                    if node.is_async {
                        transaction.record_mut(idx).compensation_attempts += 1;
                        Self::dispatch_ignored(
                            Arc::clone(&transaction.handler),
                            &self.flow_name,
                            transaction.idempotency_key(),
                            &node.action,
                            HandlerType::Compensate,
                            attempts + 1,
                            data,
                        )
                        .await;
                    } else {
                        let (dispatches, result) = Self::dispatch_with_retries(
                            Arc::clone(&transaction.handler),
                            self.flow_name.clone(),
                            transaction.idempotency_key().to_string(),
                            node.action.clone(),
                            HandlerType::Compensate,
                            data,
                            node.max_retries,
                            attempts + 1,
                        )
                        .await;
                        transaction.record_mut(idx).compensation_attempts += dispatches;
                        match result {
                            Ok(_) => {
                                transaction.record_mut(idx).state = StepState::Compensated;
                                self.listeners
                                    .emit(OrchestratorEvent::StepSuccess, transaction);
                                self.drive_compensation(transaction).await;
                            }
                            Err(reason) => {
                                transaction.record_mut(idx).failure_reason = Some(reason);
                                self.finish(transaction, TransactionStatus::Failed);
                            }
                        }
                    }
                } else {
                    self.finish(transaction, TransactionStatus::Failed);
                }
            }
        }
        Ok(())
    }

    /// Forward traversal: repeatedly dispatch every ready node until the
    /// flow drains, suspends on async work, or a permanent failure flips the
    /// transaction into compensation.
    async fn drive(&self, transaction: &mut Transaction) {
        while transaction.status() == TransactionStatus::Invoking {
            let pass = self.collect_pass(transaction);
            if pass.is_empty() {
                if transaction.any_invoking() {
                    // Suspended until an external completion arrives.
                    return;
                }
                self.finish(transaction, TransactionStatus::Done);
                return;
            }

            let graph = Arc::clone(&transaction.graph);
            let mut dispatches = Vec::with_capacity(pass.len());
            for &idx in &pass {
                let node = graph.node(idx);
                transaction.record_mut(idx).state = StepState::Invoking;
                let key = payload::sub_key(
                    transaction.idempotency_key(),
                    &node.action,
                    HandlerType::Invoke,
                );
                transaction.key_index.insert(key, (idx, HandlerType::Invoke));
                tracing::info!(action = %node.action, depth = node.depth, "step dispatched");
                self.listeners
                    .emit(OrchestratorEvent::StepBegin, transaction);

                let data = self.payload_data(transaction, idx);
                let first_attempt = transaction.record(idx).attempts + 1;
                dispatches.push(Self::run_invoke(
                    Arc::clone(&transaction.handler),
                    self.flow_name.clone(),
                    transaction.idempotency_key().to_string(),
                    node.action.clone(),
                    data,
                    node.max_retries,
                    first_attempt,
                    node.is_async,
                    idx,
                ));
            }

            let outcomes = join_all(dispatches).await;

            let mut compensation_needed = false;
            for outcome in outcomes {
                if self.apply_invoke_outcome(transaction, outcome) {
                    compensation_needed = true;
                }
            }
            if compensation_needed {
                self.request_compensation(transaction).await;
                return;
            }
        }
    }

    /// Records one node's settled invoke outcome. Returns true when the
    /// outcome requires compensation.
    fn apply_invoke_outcome(&self, transaction: &mut Transaction, outcome: InvokeOutcome) -> bool {
        let graph = Arc::clone(&transaction.graph);
        let node = graph.node(outcome.node);
        transaction.record_mut(outcome.node).attempts += outcome.dispatches;

        match outcome.result {
            DispatchResult::Pending => false,
            DispatchResult::Success(value) => {
                let record = transaction.record_mut(outcome.node);
                record.state = StepState::InvokedOk;
                record.last_response = Some(value);
                transaction.completed_order.push(outcome.node);
                transaction.compensation_order.push(outcome.node);
                tracing::info!(action = %node.action, "step completed");
                self.listeners
                    .emit(OrchestratorEvent::StepSuccess, transaction);
                false
            }
            DispatchResult::Failure(reason) => {
                let record = transaction.record_mut(outcome.node);
                record.failure_reason = Some(reason);
                record.state = StepState::InvokeFailed;
                tracing::warn!(
                    action = %node.action,
                    attempts = transaction.record(outcome.node).attempts,
                    "step failed permanently"
                );
                self.listeners
                    .emit(OrchestratorEvent::StepFailure, transaction);

                if node.continue_on_permanent_failure {
                    transaction.record_mut(outcome.node).state =
                        StepState::PermanentFailureSkipped;
                    transaction.mark_partially_completed();
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Ready nodes for one scheduling pass, in node-index (level) order.
    ///
    /// Children of `no_wait` nodes join the same pass, appended after the
    /// initially-ready nodes.
    fn collect_pass(&self, transaction: &Transaction) -> Vec<usize> {
        let graph = &transaction.graph;
        let mut pass: Vec<usize> = (0..graph.len())
            .filter(|&idx| {
                transaction.record(idx).state == StepState::Idle
                    && match graph.node(idx).parent {
                        None => true,
                        Some(parent) => transaction.record(parent).state.is_settled_ok(),
                    }
            })
            .collect();

        let mut cursor = 0;
        while cursor < pass.len() {
            let idx = pass[cursor];
            if graph.node(idx).no_wait {
                for &child in &graph.node(idx).children {
                    if transaction.record(child).state == StepState::Idle
                        && !pass.contains(&child)
                    {
                        pass.push(child);
                    }
                }
            }
            cursor += 1;
        }
        pass
    }

    /// Payload data for a node: the initial payload, with the parent's
    /// response merged in when the parent forwards it.
    fn payload_data(&self, transaction: &Transaction, idx: usize) -> Value {
        let graph = &transaction.graph;
        if let Some(parent) = graph.node(idx).parent
            && graph.node(parent).forward_response
            && let Some(response) = transaction.record(parent).last_response.as_ref()
        {
            return payload::merge_response(transaction.initial_payload(), response);
        }
        transaction.initial_payload().clone()
    }

    /// Flips the transaction toward compensation, waiting out any in-flight
    /// async steps first.
    async fn request_compensation(&self, transaction: &mut Transaction) {
        if transaction.any_invoking() {
            transaction.set_status(TransactionStatus::WaitingToCompensate);
            tracing::warn!(
                idempotency_key = %transaction.idempotency_key(),
                "compensation requested; waiting on in-flight steps"
            );
            return;
        }
        self.begin_compensation(transaction).await;
    }

    async fn begin_compensation(&self, transaction: &mut Transaction) {
        if transaction.compensation_order.is_empty() {
            // Nothing ever completed; there is nothing to undo.
            self.finish(transaction, TransactionStatus::Failed);
            return;
        }
        transaction.set_status(TransactionStatus::Compensating);
        tracing::warn!(
            idempotency_key = %transaction.idempotency_key(),
            "compensation started"
        );
        self.listeners
            .emit(OrchestratorEvent::CompensateBegin, transaction);
        self.drive_compensation(transaction).await;
    }

    /// Undoes compensation candidates one at a time, deepest-completed
    /// first, until all are compensated or one fails permanently.
    async fn drive_compensation(&self, transaction: &mut Transaction) {
        while transaction.status() == TransactionStatus::Compensating {
            if transaction.any_compensating() {
                // Suspended until the async compensation resolves.
                return;
            }

            let next = transaction
                .compensation_order
                .iter()
                .rev()
                .copied()
                .find(|&idx| {
                    matches!(
                        transaction.record(idx).state,
                        StepState::InvokedOk | StepState::InvokeFailed
                    )
                });
            let Some(idx) = next else {
                self.finish(transaction, TransactionStatus::Reverted);
                return;
            };

            let graph = Arc::clone(&transaction.graph);
            let node = graph.node(idx);
            transaction.record_mut(idx).state = StepState::Compensating;
            let key = payload::sub_key(
                transaction.idempotency_key(),
                &node.action,
                HandlerType::Compensate,
            );
            transaction
                .key_index
                .insert(key, (idx, HandlerType::Compensate));
            tracing::info!(action = %node.action, "compensation dispatched");
            self.listeners
                .emit(OrchestratorEvent::StepBegin, transaction);

            let data = self.payload_data(transaction, idx);
            let first_attempt = transaction.record(idx).compensation_attempts + 1;

            if node.is_async {
                transaction.record_mut(idx).compensation_attempts += 1;
                Self::dispatch_ignored(
                    Arc::clone(&transaction.handler),
                    &self.flow_name,
                    transaction.idempotency_key(),
                    &node.action,
                    HandlerType::Compensate,
                    first_attempt,
                    data,
                )
                .await;
                return;
            }

            let (dispatches, result) = Self::dispatch_with_retries(
                Arc::clone(&transaction.handler),
                self.flow_name.clone(),
                transaction.idempotency_key().to_string(),
                node.action.clone(),
                HandlerType::Compensate,
                data,
                node.max_retries,
                first_attempt,
            )
            .await;
            transaction.record_mut(idx).compensation_attempts += dispatches;

            match result {
                Ok(_) => {
                    transaction.record_mut(idx).state = StepState::Compensated;
                    tracing::info!(action = %node.action, "compensation completed");
                    self.listeners
                        .emit(OrchestratorEvent::StepSuccess, transaction);
                }
                Err(reason) => {
                    transaction.record_mut(idx).failure_reason = Some(reason);
                    tracing::error!(action = %node.action, "compensation failed permanently");
                    self.listeners
                        .emit(OrchestratorEvent::StepFailure, transaction);
                    self.finish(transaction, TransactionStatus::Failed);
                    return;
                }
            }
        }
    }

    /// One node's invoke dispatch: a sequential retry loop for ordinary
    /// steps, a single ignored call for async steps.
    #[allow(clippy::too_many_arguments)]
    async fn run_invoke(
        handler: Arc<dyn StepHandler>,
        flow_name: String,
        idempotency_key: String,
        action: String,
        data: Value,
        max_retries: u32,
        first_attempt: u32,
        is_async: bool,
        node: usize,
    ) -> InvokeOutcome {
        if is_async {
            Self::dispatch_ignored(
                handler,
                &flow_name,
                &idempotency_key,
                &action,
                HandlerType::Invoke,
                first_attempt,
                data,
            )
            .await;
            return InvokeOutcome {
                node,
                dispatches: 1,
                result: DispatchResult::Pending,
            };
        }

        let (dispatches, result) = Self::dispatch_with_retries(
            handler,
            flow_name,
            idempotency_key,
            action,
            HandlerType::Invoke,
            data,
            max_retries,
            first_attempt,
        )
        .await;
        InvokeOutcome {
            node,
            dispatches,
            result: match result {
                Ok(value) => DispatchResult::Success(value),
                Err(reason) => DispatchResult::Failure(reason),
            },
        }
    }

    /// Sequential retry loop. Each attempt rebuilds the payload with the
    /// same data, an incremented attempt number, and a fresh timestamp.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_with_retries(
        handler: Arc<dyn StepHandler>,
        flow_name: String,
        idempotency_key: String,
        action: String,
        handler_type: HandlerType,
        data: Value,
        max_retries: u32,
        first_attempt: u32,
    ) -> (u32, std::result::Result<Value, String>) {
        let mut attempt = first_attempt;
        loop {
            let payload = Payload::build(
                &flow_name,
                &idempotency_key,
                &action,
                handler_type,
                attempt,
                data.clone(),
            );
            match handler.call(&action, handler_type, payload).await {
                Ok(value) => return (attempt - first_attempt + 1, Ok(value)),
                Err(failure) => {
                    if attempt > max_retries {
                        return (attempt - first_attempt + 1, Err(failure.message().to_string()));
                    }
                    tracing::debug!(
                        action = %action,
                        attempt,
                        error = %failure,
                        "step attempt failed; retrying"
                    );
                    attempt += 1;
                }
            }
        }
    }

    /// Single dispatch whose outcome is ignored: async steps resolve through
    /// external registration, not through the handler's return.
    async fn dispatch_ignored(
        handler: Arc<dyn StepHandler>,
        flow_name: &str,
        idempotency_key: &str,
        action: &str,
        handler_type: HandlerType,
        attempt: u32,
        data: Value,
    ) {
        let payload = Payload::build(
            flow_name,
            idempotency_key,
            action,
            handler_type,
            attempt,
            data,
        );
        if let Err(failure) = handler.call(action, handler_type, payload).await {
            tracing::debug!(
                action = %action,
                error = %failure,
                "async step outcome ignored; awaiting external resolution"
            );
        }
    }

    /// Resolves a sub-key to its step, preferring the dispatch-time index
    /// and falling back to recomputing keys for undispatched steps.
    fn resolve_sub_key(
        &self,
        transaction: &Transaction,
        sub_key: &str,
    ) -> Option<(usize, HandlerType)> {
        if let Some(entry) = transaction.key_index.get(sub_key) {
            return Some(*entry);
        }
        for (idx, node) in transaction.graph.nodes().iter().enumerate() {
            for handler_type in [HandlerType::Invoke, HandlerType::Compensate] {
                if payload::sub_key(transaction.idempotency_key(), &node.action, handler_type)
                    == sub_key
                {
                    return Some((idx, handler_type));
                }
            }
        }
        None
    }

    /// Moves the transaction into a terminal status, exactly once.
    fn finish(&self, transaction: &mut Transaction, status: TransactionStatus) {
        if transaction.status().is_terminal() {
            return;
        }
        transaction.set_status(status);
        let duration = transaction.started_at.elapsed().as_secs_f64();
        metrics::histogram!("transaction_duration_seconds").record(duration);

        match status {
            TransactionStatus::Done => {
                metrics::counter!("transactions_completed").increment(1);
                tracing::info!(
                    idempotency_key = %transaction.idempotency_key(),
                    duration,
                    "transaction completed"
                );
            }
            TransactionStatus::Reverted => {
                metrics::counter!("transactions_reverted").increment(1);
                tracing::warn!(
                    idempotency_key = %transaction.idempotency_key(),
                    "transaction reverted"
                );
                self.listeners
                    .emit(OrchestratorEvent::Reverted, transaction);
            }
            TransactionStatus::Failed => {
                metrics::counter!("transactions_failed").increment(1);
                tracing::error!(
                    idempotency_key = %transaction.idempotency_key(),
                    "transaction failed"
                );
                self.listeners.emit(OrchestratorEvent::Failed, transaction);
            }
            _ => {}
        }
        self.listeners.emit(OrchestratorEvent::Finish, transaction);
    }
}
