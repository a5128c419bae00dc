//! Registry-wide dependency graph export.
//!
//! The snapshot is built from output edges, which outlive evaluation, so it
//! stays complete even after argument snapshots are discarded. Edges point
//! from an input node to the node constructed from it.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::hash::NodeId;
use crate::node::NodeState;
use crate::registry::Registry;

/// One registry node as seen by the graph snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: NodeId,
    pub name: &'static str,
    pub state: NodeState,
    /// Canonical call signature.
    pub call: String,
}

impl Registry {
    /// Snapshot of every live node and dependency edge, suitable for
    /// petgraph's traversal and rendering machinery.
    pub fn graph(&self) -> DiGraph<GraphNode, ()> {
        let cells = self.cells();

        let mut graph = DiGraph::new();
        let mut index: HashMap<NodeId, NodeIndex> = HashMap::new();

        for cell in &cells {
            let node = graph.add_node(GraphNode {
                id: cell.id(),
                name: cell.name(),
                state: cell.state(),
                call: cell.call().to_string(),
            });
            index.insert(cell.id(), node);
        }

        for cell in &cells {
            let Some(&from) = index.get(&cell.id()) else {
                continue;
            };
            for output in cell.live_outputs() {
                if let Some(&to) = index.get(&output.id()) {
                    graph.update_edge(from, to, ());
                }
            }
        }

        graph
    }
}

#[cfg(test)]
mod tests {
    use petgraph::Direction;

    use super::*;
    use crate::class::Class;
    use crate::params::{Args, CanonicalArguments, ParameterSpec};
    use crate::registry::Context;
    use crate::value::Value;

    struct N;
    impl Class for N {
        type Payload = ();
        const NAME: &'static str = "N";
        fn spec() -> ParameterSpec {
            ParameterSpec::builder().required("a").optional("rest", ()).build()
        }
        fn init(_: &Context, _: &CanonicalArguments) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn index_of(graph: &DiGraph<GraphNode, ()>, id: NodeId) -> NodeIndex {
        graph
            .node_indices()
            .find(|&ix| graph[ix].id == id)
            .expect("node missing from snapshot")
    }

    #[test]
    fn edges_follow_nested_node_arguments() {
        let registry = Registry::new();

        let one = registry.create::<N>(Args::new().pos(1)).unwrap();
        let two = registry.create::<N>(Args::new().pos(2)).unwrap();
        let three = registry.create::<N>(Args::new().pos(3)).unwrap();
        let parent = registry
            .create::<N>(Args::new().pos(&*one).kw(
                "rest",
                Value::list([Value::from(&*two), Value::from(&*three)]),
            ))
            .unwrap();

        let graph = registry.graph();
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 3);

        let parent_ix = index_of(&graph, parent.id());
        let incoming: Vec<NodeId> = graph
            .neighbors_directed(parent_ix, Direction::Incoming)
            .map(|ix| graph[ix].id)
            .collect();
        for input in [&one, &two, &three] {
            assert!(incoming.contains(&input.id()));
        }

        // Leaves have no inputs; every leaf feeds the parent.
        let one_ix = index_of(&graph, one.id());
        assert_eq!(
            graph.neighbors_directed(one_ix, Direction::Incoming).count(),
            0
        );
        assert!(graph
            .neighbors_directed(one_ix, Direction::Outgoing)
            .any(|ix| graph[ix].id == parent.id()));
    }

    #[test]
    fn shared_input_produces_one_node_and_two_edges() {
        let registry = Registry::new();

        let base = registry.create::<N>(Args::new().pos(0)).unwrap();
        let left = registry.create::<N>(Args::new().pos(&*base)).unwrap();
        let right = registry
            .create::<N>(Args::new().pos(&*base).kw("rest", 1))
            .unwrap();
        assert_ne!(left.id(), right.id());

        let graph = registry.graph();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);

        let base_ix = index_of(&graph, base.id());
        assert_eq!(
            graph.neighbors_directed(base_ix, Direction::Outgoing).count(),
            2
        );
    }

    #[test]
    fn snapshot_survives_evaluation() {
        let registry = Registry::new();

        let inner = registry.create::<N>(Args::new().pos(7)).unwrap();
        let outer = registry.create::<N>(Args::new().pos(&*inner)).unwrap();
        outer.evaluate().unwrap();

        // Arguments are gone, output edges are not.
        assert!(outer.inputs().is_err());
        let graph = registry.graph();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);

        let outer_ix = index_of(&graph, outer.id());
        assert_eq!(graph[outer_ix].state, crate::node::NodeState::Evaluated);
        assert_eq!(graph[outer_ix].call, outer.signature());
    }
}
