//! The compiled flow graph.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A compiled step node.
///
/// Indices refer into [`FlowGraph::nodes`]. Nodes are stored in breadth-first
/// order, so iterating indices yields the level-order scheduling the runtime
/// relies on: all initial steps first, then their children, and so on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepNode {
    /// Opaque identifier passed back to the handler.
    pub action: String,
    /// Distance from the synthetic root; initial steps sit at depth 0.
    pub depth: u32,
    /// Parent index. One parent in a tree; joins are reserved for later.
    pub parent: Option<usize>,
    /// Nodes sharing the same parent in a parallel fan-out, self excluded.
    pub siblings: Vec<usize>,
    /// Child indices in definition order.
    pub children: Vec<usize>,
    /// Retries granted before a failure becomes permanent.
    pub max_retries: u32,
    /// Skip instead of compensating on permanent failure.
    pub continue_on_permanent_failure: bool,
    /// Inject this node's response into its children's payloads.
    pub forward_response: bool,
    /// Children start as soon as this node starts executing.
    pub no_wait: bool,
    /// Completion is signalled externally.
    pub is_async: bool,
}

/// An immutable DAG of step nodes, shareable across transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowGraph {
    nodes: Vec<StepNode>,
    roots: Vec<usize>,
    index: HashMap<String, usize>,
}

impl FlowGraph {
    pub(crate) fn new(nodes: Vec<StepNode>, roots: Vec<usize>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.action.clone(), i))
            .collect();
        Self {
            nodes,
            roots,
            index,
        }
    }

    /// Returns the node at `idx`.
    pub fn node(&self, idx: usize) -> &StepNode {
        &self.nodes[idx]
    }

    /// Returns all nodes in breadth-first order.
    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    /// Returns the indices of the initial steps.
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Resolves an action identifier to its node index.
    pub fn index_of(&self, action: &str) -> Option<usize> {
        self.index.get(action).copied()
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
