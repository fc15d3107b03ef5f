use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::models::workflow::{Workflow, WorkflowNode};

/// Adjacency view over a stored workflow. Connections that name unknown
/// nodes are dropped. Edge lists keep connection order.
#[derive(Debug)]
pub(crate) struct Graph<'a> {
    order: Vec<&'a WorkflowNode>,
    nodes: HashMap<&'a str, &'a WorkflowNode>,
    edges_out: HashMap<&'a str, Vec<&'a str>>,
    edges_in: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> Graph<'a> {
    pub(crate) fn from_workflow(workflow: &'a Workflow) -> Self {
        let mut order = Vec::with_capacity(workflow.nodes.len());
        let mut nodes = HashMap::with_capacity(workflow.nodes.len());
        // The first definition of a node id wins; later duplicates are ignored.
        for node in &workflow.nodes {
            if let Entry::Vacant(slot) = nodes.entry(node.node_id.as_str()) {
                slot.insert(node);
                order.push(node);
            }
        }

        let mut edges_out: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut edges_in: HashMap<&str, Vec<&str>> = HashMap::new();
        for connection in &workflow.connections {
            let source = connection.source_node_id.as_str();
            let target = connection.target_node_id.as_str();
            if !nodes.contains_key(source) || !nodes.contains_key(target) {
                continue;
            }
            edges_out.entry(source).or_default().push(target);
            edges_in.entry(target).or_default().push(source);
        }

        Graph {
            order,
            nodes,
            edges_out,
            edges_in,
        }
    }

    pub(crate) fn node(&self, node_id: &str) -> Option<&'a WorkflowNode> {
        self.nodes.get(node_id).copied()
    }

    pub(crate) fn outgoing(&self, node_id: &str) -> &[&'a str] {
        self.edges_out
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn incoming(&self, node_id: &str) -> &[&'a str] {
        self.edges_in
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Nodes of `node_type` in definition order.
    pub(crate) fn nodes_of_type<'g>(
        &'g self,
        node_type: &'g str,
    ) -> impl Iterator<Item = &'a WorkflowNode> + 'g {
        self.order
            .iter()
            .copied()
            .filter(move |n| n.node_type == node_type)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::{WorkflowConnection, WorkflowNode};
    use serde_json::json;

    fn workflow(nodes: &[(&str, &str)], edges: &[(&str, &str)]) -> Workflow {
        Workflow {
            id: 1,
            name: "wf".into(),
            description: None,
            definition: json!({}),
            is_active: true,
            nodes: nodes
                .iter()
                .map(|(id, ty)| WorkflowNode::new(id, ty, json!({})))
                .collect(),
            connections: edges
                .iter()
                .map(|(s, t)| WorkflowConnection::new(s, t))
                .collect(),
        }
    }

    #[test]
    fn edges_keep_connection_order_and_skip_dangling() {
        let wf = workflow(
            &[("s", "start"), ("a", "agent"), ("b", "agent"), ("e", "end")],
            &[("s", "b"), ("s", "a"), ("s", "ghost"), ("a", "e"), ("b", "e")],
        );
        let graph = Graph::from_workflow(&wf);

        assert_eq!(graph.outgoing("s"), &["b", "a"]);
        assert_eq!(graph.incoming("e"), &["a", "b"]);
        assert!(graph.outgoing("e").is_empty());
        assert_eq!(graph.len(), 4);
        let starts: Vec<_> = graph.nodes_of_type("start").map(|n| n.node_id.as_str()).collect();
        assert_eq!(starts, vec!["s"]);
    }

    #[test]
    fn duplicate_node_ids_resolve_to_the_first_definition() {
        let wf = workflow(
            &[("s", "start"), ("x", "agent"), ("x", "end"), ("e", "end")],
            &[("s", "x"), ("x", "e")],
        );
        let graph = Graph::from_workflow(&wf);

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.node("x").unwrap().node_type, "agent");
        let ends: Vec<_> = graph.nodes_of_type("end").map(|n| n.node_id.as_str()).collect();
        assert_eq!(ends, vec!["e"]);
        assert!(std::ptr::eq(graph.node("x").unwrap(), &wf.nodes[1]));
    }
}
