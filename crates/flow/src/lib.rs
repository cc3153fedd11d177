//! Flow definitions and the flow compiler.
//!
//! A flow is a tree of steps rooted at a synthetic entry: each step names an
//! opaque `action` and links to its successors through `next`, either a
//! single child or an ordered list of children that run in parallel. The
//! compiler
//! translates that nested shape into a flat, immutable [`FlowGraph`] whose
//! nodes carry the indices the orchestrator runtime traverses.
//!
//! The compiled graph is pure data: it can be wrapped in an `Arc` and shared
//! across any number of concurrent transactions.

pub mod compiler;
pub mod definition;
pub mod error;
pub mod graph;

pub use compiler::compile;
pub use definition::{DEFAULT_RETRIES, FlowDefinition, Next, StepDefinition};
pub use error::{FlowError, Result};
pub use graph::{FlowGraph, StepNode};
