//! Flow definition types.
//!
//! Definitions mirror the shape callers author (typically as JSON): a tree of
//! steps linked through `next`. Builder-style constructors cover programmatic
//! assembly; serde derives cover declarative flows.

use serde::{Deserialize, Serialize};

/// Default number of retries a step gets before its failure is permanent.
pub const DEFAULT_RETRIES: u32 = 3;

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

/// A single step in a flow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Opaque identifier passed back to the handler. Unique within a flow.
    pub action: String,

    /// Retries granted before a failure becomes permanent.
    /// `0` means a single attempt.
    #[serde(default = "default_retries")]
    pub max_retries: u32,

    /// On permanent failure, skip this step and keep going instead of
    /// compensating the transaction.
    #[serde(default)]
    pub continue_on_permanent_failure: bool,

    /// Inject this step's response into its immediate child's payload
    /// under the `_response` key.
    #[serde(default)]
    pub forward_response: bool,

    /// Schedule this step's children as soon as the step starts executing,
    /// without waiting for it to complete.
    #[serde(default)]
    pub no_wait: bool,

    /// Completion is signalled externally rather than by the handler's
    /// return.
    #[serde(default, rename = "async")]
    pub is_async: bool,

    /// Successor step(s), absent on leaves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Next>,
}

/// Successors of a step: one child, or siblings that run in parallel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Next {
    /// A single child step.
    Single(Box<StepDefinition>),
    /// An ordered sequence of children scheduled concurrently.
    Parallel(Vec<StepDefinition>),
}

impl Next {
    /// Returns the child steps in definition order.
    pub fn steps(&self) -> &[StepDefinition] {
        match self {
            Next::Single(step) => std::slice::from_ref(step),
            Next::Parallel(steps) => steps,
        }
    }
}

impl StepDefinition {
    /// Creates a step with default flags and no successors.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            max_retries: DEFAULT_RETRIES,
            continue_on_permanent_failure: false,
            forward_response: false,
            no_wait: false,
            is_async: false,
            next: None,
        }
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Marks the step as skippable on permanent failure.
    pub fn continue_on_permanent_failure(mut self) -> Self {
        self.continue_on_permanent_failure = true;
        self
    }

    /// Forwards this step's response to its immediate child.
    pub fn forward_response(mut self) -> Self {
        self.forward_response = true;
        self
    }

    /// Lets children start while this step is still executing.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Marks completion as externally signalled.
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Links a single successor.
    pub fn then(mut self, step: StepDefinition) -> Self {
        self.next = Some(Next::Single(Box::new(step)));
        self
    }

    /// Links parallel successors, scheduled in the given order.
    pub fn then_all(mut self, steps: Vec<StepDefinition>) -> Self {
        self.next = Some(Next::Parallel(steps));
        self
    }
}

/// A flow definition rooted at a synthetic entry.
///
/// The root itself is not a user-visible step: `next` names the initial
/// step(s) of the flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// The initial step(s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Next>,
}

impl FlowDefinition {
    /// A flow starting with a single step.
    pub fn starting_with(step: StepDefinition) -> Self {
        Self {
            next: Some(Next::Single(Box::new(step))),
        }
    }

    /// A flow starting with parallel steps.
    pub fn parallel(steps: Vec<StepDefinition>) -> Self {
        Self {
            next: Some(Next::Parallel(steps)),
        }
    }

    /// Returns the initial steps in definition order.
    pub fn initial_steps(&self) -> &[StepDefinition] {
        self.next.as_ref().map(Next::steps).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_step_has_default_flags() {
        let step = StepDefinition::new("charge");
        assert_eq!(step.action, "charge");
        assert_eq!(step.max_retries, DEFAULT_RETRIES);
        assert!(!step.continue_on_permanent_failure);
        assert!(!step.forward_response);
        assert!(!step.no_wait);
        assert!(!step.is_async);
        assert!(step.next.is_none());
    }

    #[test]
    fn builder_links_children() {
        let flow = FlowDefinition::starting_with(
            StepDefinition::new("first").then_all(vec![
                StepDefinition::new("second"),
                StepDefinition::new("third"),
            ]),
        );

        let initial = flow.initial_steps();
        assert_eq!(initial.len(), 1);
        let children = initial[0].next.as_ref().unwrap().steps();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].action, "second");
        assert_eq!(children[1].action, "third");
    }

    #[test]
    fn deserializes_from_json_with_defaults() {
        let json = serde_json::json!({
            "next": {
                "action": "reserve",
                "async": true,
                "next": [
                    { "action": "charge", "max_retries": 0 },
                    { "action": "notify", "continue_on_permanent_failure": true }
                ]
            }
        });

        let flow: FlowDefinition = serde_json::from_value(json).unwrap();
        let root = &flow.initial_steps()[0];
        assert!(root.is_async);
        assert_eq!(root.max_retries, DEFAULT_RETRIES);

        let children = root.next.as_ref().unwrap().steps();
        assert_eq!(children[0].max_retries, 0);
        assert!(children[1].continue_on_permanent_failure);
    }

    #[test]
    fn empty_flow_has_no_initial_steps() {
        let flow = FlowDefinition { next: None };
        assert!(flow.initial_steps().is_empty());
    }
}
