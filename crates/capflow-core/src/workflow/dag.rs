//! Node/edge graph over `petgraph`, keyed by declaration index.
//!
//! Node weights are indices into the node slice, so iteration in index
//! order is declaration order. Edges whose endpoints do not exist are left
//! out of the graph; validation reports them separately.

use std::collections::HashMap;

use capflow_types::workflow::{WorkflowEdge, WorkflowNode};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};

/// Dependency graph of one workflow or snapshot.
#[derive(Debug)]
pub struct NodeGraph<'a> {
    nodes: &'a [WorkflowNode],
    edges: &'a [WorkflowEdge],
    graph: DiGraph<usize, usize>,
    index: HashMap<&'a str, NodeIndex>,
}

impl<'a> NodeGraph<'a> {
    pub fn build(nodes: &'a [WorkflowNode], edges: &'a [WorkflowEdge]) -> Self {
        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            // First declaration wins for duplicate IDs.
            index.entry(node.node_id.as_str()).or_insert_with(|| graph.add_node(i));
        }
        for (i, edge) in edges.iter().enumerate() {
            let (Some(&from), Some(&to)) = (
                index.get(edge.source_node_id.as_str()),
                index.get(edge.target_node_id.as_str()),
            ) else {
                continue;
            };
            graph.add_edge(from, to, i);
        }
        Self {
            nodes,
            edges,
            graph,
            index,
        }
    }

    fn node_id(&self, idx: NodeIndex) -> &'a str {
        self.nodes[self.graph[idx]].node_id.as_str()
    }

    /// Successors in declaration order.
    fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
        next.sort_by_key(|n| self.graph[*n]);
        next.dedup();
        next
    }

    /// Edges feeding `node_id`, in edge declaration order.
    pub fn incoming(&self, node_id: &str) -> Vec<&'a WorkflowEdge> {
        let Some(&idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        let mut edges: Vec<usize> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| *e.weight())
            .collect();
        edges.sort_unstable();
        edges.into_iter().map(|i| &self.edges[i]).collect()
    }

    /// Node IDs `node_id` directly depends on.
    pub fn upstream(&self, node_id: &str) -> Vec<&'a str> {
        let mut ids: Vec<&str> = Vec::new();
        for edge in self.incoming(node_id) {
            if !ids.contains(&edge.source_node_id.as_str()) {
                ids.push(edge.source_node_id.as_str());
            }
        }
        ids
    }

    /// A node with no outgoing edges.
    pub fn is_sink(&self, node_id: &str) -> bool {
        self.index.get(node_id).is_some_and(|&idx| {
            self.graph
                .neighbors_directed(idx, Direction::Outgoing)
                .next()
                .is_none()
        })
    }

    /// `node_id` and everything reachable forward from it, in declaration order.
    pub fn downstream_closure(&self, node_id: &str) -> Vec<&'a str> {
        let Some(&start) = self.index.get(node_id) else {
            return Vec::new();
        };
        let mut reached = Vec::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(idx) = dfs.next(&self.graph) {
            reached.push(self.graph[idx]);
        }
        reached.sort_unstable();
        reached
            .into_iter()
            .map(|i| self.nodes[i].node_id.as_str())
            .collect()
    }

    /// Every cycle closed by a back edge, found by depth-first search with
    /// an explicit recursion stack. Each path starts and ends on the same node.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut cycles = Vec::new();

        let mut roots: Vec<NodeIndex> = self.graph.node_indices().collect();
        roots.sort_by_key(|n| self.graph[*n]);

        for root in roots {
            if marks[root.index()] != Mark::Unvisited {
                continue;
            }
            // (node, successors, next successor position)
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
            marks[root.index()] = Mark::OnStack;
            stack.push((root, self.successors(root), 0));

            while let Some((node, next, pos)) = stack.last_mut() {
                let Some(&succ) = next.get(*pos) else {
                    marks[node.index()] = Mark::Done;
                    stack.pop();
                    continue;
                };
                *pos += 1;
                match marks[succ.index()] {
                    Mark::Unvisited => {
                        marks[succ.index()] = Mark::OnStack;
                        let succ_next = self.successors(succ);
                        stack.push((succ, succ_next, 0));
                    }
                    Mark::OnStack => {
                        let start = stack.iter().position(|(n, _, _)| *n == succ).unwrap_or(0);
                        let mut path: Vec<String> = stack[start..]
                            .iter()
                            .map(|(n, _, _)| self.node_id(*n).to_string())
                            .collect();
                        path.push(self.node_id(succ).to_string());
                        cycles.push(path);
                    }
                    Mark::Done => {}
                }
            }
        }
        cycles
    }
}
