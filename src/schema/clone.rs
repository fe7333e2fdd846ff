//! Deep copy of a schema graph.
//!
//! A runtime instantiates its own graph from the shared [`Schema`] template
//! and then injects computation-owned properties into it. Copies are built
//! node by node into a fresh arena, with every edge remapped through an
//! old-index to new-index table, so no handle of the copy refers back into
//! the template.

use std::collections::HashMap;

use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};

use super::def::Schema;
use super::graph::SchemaGraph;

impl SchemaGraph {
    /// Private copy of a template schema.
    pub fn instantiate(schema: &Schema) -> SchemaGraph {
        schema.graph.clone_graph()
    }

    /// Structurally equal, fully independent copy of this graph.
    pub fn clone_graph(&self) -> SchemaGraph {
        let mut graph = StableGraph::with_capacity(self.graph.node_count(), self.graph.edge_count());
        let mut remap: HashMap<NodeIndex, NodeIndex> = HashMap::new();

        for idx in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(idx) {
                remap.insert(idx, graph.add_node(node.clone()));
            }
        }

        for edge in self.graph.edge_references() {
            if let (Some(&from), Some(&to)) = (remap.get(&edge.source()), remap.get(&edge.target())) {
                graph.add_edge(from, to, *edge.weight());
            }
        }

        let node_indices = self
            .node_indices
            .iter()
            .filter_map(|(name, idx)| remap.get(idx).map(|new| (name.clone(), *new)))
            .collect();

        SchemaGraph {
            graph,
            node_indices,
        }
    }
}
