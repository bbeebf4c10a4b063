use std::collections::{HashSet, VecDeque};

use crate::graph::{ColumnRef, LineageGraph, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upstream,
    Downstream,
}

/// Lazy breadth-first walk over the lineage graph.
///
/// Nodes are yielded at most once (visited-set dedup), which also bounds
/// traversal of recursive edges to a single pass, and expansion stops at
/// `max_depth` hops from the start column.
pub struct Walk<'a> {
    graph: &'a LineageGraph,
    direction: Direction,
    max_depth: usize,
    queue: VecDeque<(NodeId, usize)>,
    visited: HashSet<NodeId>,
}

impl<'a> Walk<'a> {
    fn new(
        graph: &'a LineageGraph,
        start: Option<NodeId>,
        direction: Direction,
        max_depth: usize,
    ) -> Self {
        let mut walk = Self {
            graph,
            direction,
            max_depth,
            queue: VecDeque::new(),
            visited: HashSet::new(),
        };
        if let Some(start) = start {
            walk.visited.insert(start);
            walk.expand(start, 0);
        }
        walk
    }

    fn expand(&mut self, node: NodeId, depth: usize) {
        if depth >= self.max_depth {
            return;
        }
        let edge_indices = match self.direction {
            Direction::Upstream => self.graph.incoming_of(node),
            Direction::Downstream => self.graph.outgoing_of(node),
        };
        for &edge_idx in edge_indices {
            let edge = &self.graph.edges()[edge_idx];
            let next = match self.direction {
                Direction::Upstream => edge.source,
                Direction::Downstream => edge.target,
            };
            if self.visited.insert(next) {
                self.queue.push_back((next, depth + 1));
            }
        }
    }
}

impl Iterator for Walk<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let (node, depth) = self.queue.pop_front()?;
        self.expand(node, depth);
        Some(node)
    }
}

impl LineageGraph {
    /// Columns reachable by following edges backward from `column`,
    /// closest first. Unknown columns yield an empty walk.
    pub fn upstream(&self, column: &ColumnRef, max_depth: usize) -> Walk<'_> {
        Walk::new(self, self.node_id(column), Direction::Upstream, max_depth)
    }

    pub fn downstream(&self, column: &ColumnRef, max_depth: usize) -> Walk<'_> {
        Walk::new(self, self.node_id(column), Direction::Downstream, max_depth)
    }

    pub fn walk_from(&self, start: NodeId, direction: Direction, max_depth: usize) -> Walk<'_> {
        Walk::new(self, Some(start), direction, max_depth)
    }

    /// Full downstream closure of `column`: everything whose value could be
    /// affected by a change to it.
    pub fn impact_of(&self, column: &ColumnRef) -> Vec<NodeId> {
        self.downstream(column, usize::MAX).collect()
    }
}
