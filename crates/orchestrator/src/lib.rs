//! Saga-style transaction orchestrator.
//!
//! This crate drives a user-defined workflow of discrete steps with saga
//! semantics: per-step retries, reverse-order compensation on failure,
//! parallel fan-out, response forwarding between steps, and resumable
//! asynchronous steps whose completion is signalled externally.
//!
//! The orchestrator is a pure control-plane library. It emits events and
//! accepts externally supplied idempotency keys but does not persist state;
//! callers pair it with a durable log of their choosing to obtain
//! crash-resumability.
//!
//! # Quick start
//!
//! ```rust,ignore
//! let flow = FlowDefinition::starting_with(
//!     StepDefinition::new("reserve").then(StepDefinition::new("charge")),
//! );
//! let orchestrator = Orchestrator::new("checkout", &flow)?;
//!
//! let mut transaction = orchestrator.begin_transaction(
//!     "order-42",
//!     Arc::new(MyHandler),
//!     Some(serde_json::json!({"order_id": 42})),
//! );
//! orchestrator.resume(&mut transaction).await;
//! assert_eq!(transaction.status(), TransactionStatus::Done);
//! ```

pub mod coordinator;
pub mod error;
pub mod events;
pub mod handler;
pub mod payload;
pub mod state;
pub mod transaction;

pub use coordinator::Orchestrator;
pub use error::{OrchestratorError, Result};
pub use events::OrchestratorEvent;
pub use handler::{HandlerType, StepFailure, StepHandler};
pub use payload::{Metadata, Payload, RESPONSE_KEY, sub_key};
pub use state::{StepState, TransactionStatus};
pub use transaction::{StepRecord, Transaction};

pub use flow::{DEFAULT_RETRIES, FlowDefinition, FlowError, Next, StepDefinition};
