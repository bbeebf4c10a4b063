use std::fmt::Display;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::LineageWarning;

/// Identifies a physical or statement-scoped column.
///
/// `statement` is `Some` only for entities whose lifetime is bound to one
/// statement (CTE outputs and the anonymous `query` entity naming a bare
/// select's projection). Physical tables and views use `None`, which is what
/// lets the graph builder unify references to the same column across
/// statements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub entity: String,
    pub column: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub statement: Option<u32>,
}

impl ColumnRef {
    pub fn physical(entity: &str, column: &str) -> Self {
        Self {
            entity: entity.to_lowercase(),
            column: column.to_lowercase(),
            statement: None,
        }
    }

    pub fn scoped(entity: &str, column: &str, statement: u32) -> Self {
        Self {
            entity: entity.to_lowercase(),
            column: column.to_lowercase(),
            statement: Some(statement),
        }
    }
}

impl Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.statement {
            Some(id) => write!(f, "{}@{}.{}", self.entity, id, self.column),
            None => write!(f, "{}.{}", self.entity, self.column),
        }
    }
}

/// How a source column contributes to a target column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransformationKind {
    Direct,
    Derived,
    Aggregated,
    Filtered,
}

impl TransformationKind {
    /// Kind of a dependency once it is wrapped in a computing expression:
    /// a plain copy becomes derived, stronger kinds are kept.
    pub fn derived(self) -> Self {
        match self {
            TransformationKind::Direct => TransformationKind::Derived,
            other => other,
        }
    }
}

/// One resolved dependency of an output column, as produced by the tracer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dep {
    pub source: ColumnRef,
    pub kind: TransformationKind,
    /// Set when the dependency points back into the entity being defined
    /// (recursive CTE self-reference).
    pub recursive: bool,
}

impl Dep {
    pub fn new(source: ColumnRef, kind: TransformationKind) -> Self {
        Self {
            source,
            kind,
            recursive: false,
        }
    }
}

/// Everything one statement contributes to the graph: the dependency sets of
/// its output columns, keyed by the column reference they define.
#[derive(Debug, Clone, Default)]
pub struct StatementLineage {
    pub statement: u32,
    pub outputs: Vec<(ColumnRef, Vec<Dep>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: TransformationKind,
    /// Statement that produced this edge.
    pub statement: u32,
    /// Among several producer statements writing the same target column, the
    /// edges of the most recent one are primary.
    pub primary: bool,
    /// The edge closes a cycle (recursive CTE or self-feeding insert).
    pub recursive: bool,
}

/// The accumulated column provenance graph.
///
/// Owned by the extraction pipeline, which serializes merges through `&mut`;
/// traversal only ever takes `&self`. Nodes live in an append-only arena
/// addressed by [`NodeId`] and deduplicated through `index`, so the same
/// physical column referenced by ten statements is one node.
#[derive(Debug, Default, Clone)]
pub struct LineageGraph {
    nodes: Vec<ColumnRef>,
    index: IndexMap<ColumnRef, NodeId>,
    edges: Vec<LineageEdge>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl LineageGraph {
    pub fn node(&self, id: NodeId) -> &ColumnRef {
        &self.nodes[id.0]
    }

    pub fn node_id(&self, column: &ColumnRef) -> Option<NodeId> {
        self.index.get(column).copied()
    }

    /// First node matching `entity.column`, ignoring statement scoping.
    pub fn find_column(&self, entity: &str, column: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| {
                node.entity.eq_ignore_ascii_case(entity)
                    && node.column.eq_ignore_ascii_case(column)
            })
            .map(NodeId)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &ColumnRef)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn edges(&self) -> &[LineageEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn outgoing_of(&self, id: NodeId) -> &[usize] {
        &self.outgoing[id.0]
    }

    pub(crate) fn incoming_of(&self, id: NodeId) -> &[usize] {
        &self.incoming[id.0]
    }

    fn intern(&mut self, column: ColumnRef) -> NodeId {
        if let Some(id) = self.index.get(&column) {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(column.clone());
        self.index.insert(column, id);
        self.outgoing.push(vec![]);
        self.incoming.push(vec![]);
        id
    }

    /// True when `to` is reachable from `from` by following edges forward.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if visited[node.0] {
                continue;
            }
            visited[node.0] = true;
            for &edge_idx in &self.outgoing[node.0] {
                let next = self.edges[edge_idx].target;
                if next == to {
                    return true;
                }
                if !visited[next.0] {
                    stack.push(next);
                }
            }
        }
        false
    }

    /// Folds one statement's trace into the graph.
    ///
    /// Producer edges (anything but `filtered`) added for a target that
    /// already has producers from an earlier statement demote those to
    /// non-primary: the most recent writer owns the column. Edges that would
    /// close a cycle are kept, tagged recursive, and reported as warnings.
    pub fn merge(&mut self, lineage: StatementLineage) -> Vec<LineageWarning> {
        let mut warnings = vec![];
        for (target, deps) in lineage.outputs {
            let target_id = self.intern(target);

            let adds_producer = deps
                .iter()
                .any(|dep| dep.kind != TransformationKind::Filtered);
            if adds_producer {
                for &edge_idx in &self.incoming[target_id.0] {
                    let edge = &mut self.edges[edge_idx];
                    if edge.statement != lineage.statement
                        && edge.kind != TransformationKind::Filtered
                    {
                        edge.primary = false;
                    }
                }
            }

            for dep in deps {
                let source_id = self.intern(dep.source);
                let duplicate = self.incoming[target_id.0].iter().any(|&idx| {
                    let edge = &self.edges[idx];
                    edge.source == source_id
                        && edge.kind == dep.kind
                        && edge.statement == lineage.statement
                });
                if duplicate {
                    continue;
                }

                let recursive = dep.recursive || self.reaches(target_id, source_id);
                if recursive {
                    warnings.push(LineageWarning::CyclicLineage {
                        statement: lineage.statement,
                        source: self.nodes[source_id.0].to_string(),
                        target: self.nodes[target_id.0].to_string(),
                    });
                }

                let edge_idx = self.edges.len();
                self.edges.push(LineageEdge {
                    source: source_id,
                    target: target_id,
                    kind: dep.kind,
                    statement: lineage.statement,
                    primary: dep.kind != TransformationKind::Filtered,
                    recursive,
                });
                self.outgoing[source_id.0].push(edge_idx);
                self.incoming[target_id.0].push(edge_idx);
                log::debug!(
                    "[{}] {} -{}-> {}{}",
                    lineage.statement,
                    self.nodes[source_id.0],
                    self.edges[edge_idx].kind,
                    self.nodes[target_id.0],
                    if recursive { " (recursive)" } else { "" }
                );
            }
        }
        warnings
    }

    /// Exchange form consumed by the diagram/output layer.
    pub fn to_doc(&self) -> GraphDoc {
        GraphDoc {
            nodes: self.nodes.clone(),
            edges: self
                .edges
                .iter()
                .map(|edge| DocEdge {
                    source: edge.source.0,
                    target: edge.target.0,
                    kind: edge.kind,
                    statement: edge.statement,
                    primary: edge.primary,
                    recursive: edge.recursive,
                })
                .collect(),
        }
    }

    /// Rebuilds a graph from its exchange form, validating that every edge
    /// endpoint names an existing node.
    pub fn from_doc(doc: GraphDoc) -> Result<Self, InvalidGraphDoc> {
        let mut graph = LineageGraph::default();
        for node in doc.nodes {
            graph.intern(node);
        }
        for (idx, edge) in doc.edges.into_iter().enumerate() {
            for endpoint in [edge.source, edge.target] {
                if endpoint >= graph.nodes.len() {
                    return Err(InvalidGraphDoc {
                        edge: idx,
                        node: endpoint,
                    });
                }
            }
            let edge_idx = graph.edges.len();
            graph.edges.push(LineageEdge {
                source: NodeId(edge.source),
                target: NodeId(edge.target),
                kind: edge.kind,
                statement: edge.statement,
                primary: edge.primary,
                recursive: edge.recursive,
            });
            graph.outgoing[edge.source].push(edge_idx);
            graph.incoming[edge.target].push(edge_idx);
        }
        Ok(graph)
    }
}

/// Serializable graph-exchange document: nodes plus index-addressed edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDoc {
    pub nodes: Vec<ColumnRef>,
    pub edges: Vec<DocEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocEdge {
    pub source: usize,
    pub target: usize,
    pub kind: TransformationKind,
    pub statement: u32,
    pub primary: bool,
    pub recursive: bool,
}

#[derive(Debug, Clone, Error)]
#[error("edge {edge} references unknown node index {node}")]
pub struct InvalidGraphDoc {
    pub edge: usize,
    pub node: usize,
}
