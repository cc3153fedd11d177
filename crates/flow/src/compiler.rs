//! Translates nested flow definitions into flat flow graphs.

use std::collections::{HashSet, VecDeque};

use crate::definition::{FlowDefinition, StepDefinition};
use crate::error::{FlowError, Result};
use crate::graph::{FlowGraph, StepNode};

/// Compiles a flow definition into an immutable [`FlowGraph`].
///
/// Nodes are assigned indices in breadth-first order. Rejects definitions
/// with duplicate action identifiers or no steps at all.
pub fn compile(definition: &FlowDefinition) -> Result<FlowGraph> {
    let initial = definition.initial_steps();
    if initial.is_empty() {
        return Err(FlowError::EmptyFlow);
    }

    let mut nodes: Vec<StepNode> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(&StepDefinition, Option<usize>, u32)> = VecDeque::new();

    for step in initial {
        queue.push_back((step, None, 0));
    }

    while let Some((step, parent, depth)) = queue.pop_front() {
        if !seen.insert(step.action.clone()) {
            return Err(FlowError::DuplicateAction(step.action.clone()));
        }

        let idx = nodes.len();
        nodes.push(StepNode {
            action: step.action.clone(),
            depth,
            parent,
            siblings: Vec::new(),
            children: Vec::new(),
            max_retries: step.max_retries,
            continue_on_permanent_failure: step.continue_on_permanent_failure,
            forward_response: step.forward_response,
            no_wait: step.no_wait,
            is_async: step.is_async,
        });

        if let Some(parent) = parent {
            nodes[parent].children.push(idx);
        }

        if let Some(next) = &step.next {
            for child in next.steps() {
                queue.push_back((child, Some(idx), depth + 1));
            }
        }
    }

    // Sibling sets are the same-parent children, self excluded.
    for idx in 0..nodes.len() {
        let same_parent: Vec<usize> = match nodes[idx].parent {
            Some(parent) => nodes[parent].children.clone(),
            None => (0..nodes.len()).filter(|i| nodes[*i].parent.is_none()).collect(),
        };
        nodes[idx].siblings = same_parent.into_iter().filter(|i| *i != idx).collect();
    }

    let roots = (0..nodes.len()).filter(|i| nodes[*i].parent.is_none()).collect();
    Ok(FlowGraph::new(nodes, roots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DEFAULT_RETRIES;

    fn step(action: &str) -> StepDefinition {
        StepDefinition::new(action)
    }

    #[test]
    fn compiles_linear_flow() {
        let flow = FlowDefinition::starting_with(step("first").then(step("second")));
        let graph = compile(&flow).unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.roots(), &[0]);

        let first = graph.node(0);
        assert_eq!(first.action, "first");
        assert_eq!(first.depth, 0);
        assert_eq!(first.parent, None);
        assert_eq!(first.children, vec![1]);
        assert_eq!(first.max_retries, DEFAULT_RETRIES);

        let second = graph.node(1);
        assert_eq!(second.action, "second");
        assert_eq!(second.depth, 1);
        assert_eq!(second.parent, Some(0));
        assert!(second.children.is_empty());
    }

    #[test]
    fn assigns_breadth_first_indices_across_subtrees() {
        // one | two -> four -> six | three -> five
        let flow = FlowDefinition::parallel(vec![
            step("one"),
            step("two").then(step("four").then(step("six"))),
            step("three").then(step("five")),
        ]);
        let graph = compile(&flow).unwrap();

        let order: Vec<&str> = graph.nodes().iter().map(|n| n.action.as_str()).collect();
        assert_eq!(order, vec!["one", "two", "three", "four", "five", "six"]);

        assert_eq!(graph.node(graph.index_of("four").unwrap()).depth, 1);
        assert_eq!(graph.node(graph.index_of("six").unwrap()).depth, 2);
    }

    #[test]
    fn records_sibling_sets() {
        let flow = FlowDefinition::parallel(vec![step("a"), step("b"), step("c")]);
        let graph = compile(&flow).unwrap();

        let a = graph.index_of("a").unwrap();
        assert_eq!(graph.node(a).siblings, vec![1, 2]);
        let b = graph.index_of("b").unwrap();
        assert_eq!(graph.node(b).siblings, vec![0, 2]);
    }

    #[test]
    fn rejects_duplicate_actions() {
        let flow = FlowDefinition::starting_with(step("same").then(step("same")));
        let err = compile(&flow).unwrap_err();
        assert_eq!(err, FlowError::DuplicateAction("same".to_string()));
    }

    #[test]
    fn rejects_empty_flow() {
        let flow = FlowDefinition { next: None };
        assert_eq!(compile(&flow).unwrap_err(), FlowError::EmptyFlow);
    }

    #[test]
    fn compiled_graph_preserves_flags() {
        let flow = FlowDefinition::starting_with(
            step("root")
                .no_wait()
                .forward_response()
                .then(step("child").with_max_retries(0).asynchronous()),
        );
        let graph = compile(&flow).unwrap();

        let root = graph.node(graph.index_of("root").unwrap());
        assert!(root.no_wait);
        assert!(root.forward_response);

        let child = graph.node(graph.index_of("child").unwrap());
        assert_eq!(child.max_retries, 0);
        assert!(child.is_async);
    }
}
