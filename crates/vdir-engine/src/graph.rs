//! Source graph.
//!
//! Nodes are the effective source mappings of one entry (its own plus every
//! ancestor's); edges group all relationships between one pair of nodes.
//! Built once per entry mapping, immutable afterwards.
//!
//! ```text
//!        (parent) g ─────── u (primary)
//!                            │  u.id = e.user_id
//!                            e (optional)
//! ```
//!
//! Traversal is depth-first from a start node. The visited set lives in a
//! per-run `Traversal`, never on the graph, so one graph serves concurrent
//! operations.

use std::collections::BTreeMap;
use std::fmt;
use vdir_mapping::{EntryId, Partition, Relationship};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SourceNode {
    pub alias: String,
    pub source_name: String,
    /// Entry mapping that declares this source.
    pub owner: EntryId,
    /// Declared by the graph's own entry rather than inherited.
    pub local: bool,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct SourceEdge {
    pub a: NodeId,
    pub b: NodeId,
    /// As configured; orient with `SourceGraph::relationships_from`.
    pub relationships: Vec<Relationship>,
}

impl SourceEdge {
    pub fn other(&self, node: NodeId) -> NodeId {
        if self.a == node {
            self.b
        } else {
            self.a
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceGraph {
    entry: EntryId,
    nodes: Vec<SourceNode>,
    edges: Vec<SourceEdge>,
    adjacency: Vec<Vec<EdgeId>>,
    primary: Option<NodeId>,
}

/// What a visitor wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Descend,
    Prune,
}

pub trait GraphVisitor {
    type Error;

    fn visit_node(&mut self, graph: &SourceGraph, node: NodeId) -> Result<Flow, Self::Error>;

    fn visit_edge(
        &mut self,
        _graph: &SourceGraph,
        _edge: EdgeId,
        _from: NodeId,
        _to: NodeId,
    ) -> Result<Flow, Self::Error> {
        Ok(Flow::Descend)
    }

    /// Called after the subtree behind a followed edge is done.
    fn leave_edge(
        &mut self,
        _graph: &SourceGraph,
        _edge: EdgeId,
        _from: NodeId,
        _to: NodeId,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct Traversal {
    visited: Vec<bool>,
}

impl SourceGraph {
    pub fn build(partition: &Partition, entry: EntryId) -> Self {
        let nodes: Vec<SourceNode> = partition
            .effective_sources(entry)
            .into_iter()
            .map(|s| SourceNode {
                alias: s.mapping.alias.clone(),
                source_name: s.mapping.source_name.clone(),
                owner: s.owner,
                local: s.local,
                required: s.mapping.required,
            })
            .collect();

        let index: BTreeMap<&str, NodeId> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.alias.as_str(), NodeId(i as u32)))
            .collect();

        let mut edges: Vec<SourceEdge> = Vec::new();
        let mut by_pair: BTreeMap<(NodeId, NodeId), EdgeId> = BTreeMap::new();
        for rel in partition.effective_relationships(entry) {
            let (Some(&l), Some(&r)) = (
                index.get(rel.lhs.source.as_str()),
                index.get(rel.rhs.source.as_str()),
            ) else {
                continue;
            };
            if l == r {
                continue;
            }
            let key = (l.min(r), l.max(r));
            let id = *by_pair.entry(key).or_insert_with(|| {
                edges.push(SourceEdge {
                    a: key.0,
                    b: key.1,
                    relationships: vec![],
                });
                EdgeId(edges.len() as u32 - 1)
            });
            edges[id.0 as usize].relationships.push(rel.clone());
        }

        let mut adjacency = vec![Vec::new(); nodes.len()];
        for (i, edge) in edges.iter().enumerate() {
            adjacency[edge.a.0 as usize].push(EdgeId(i as u32));
            adjacency[edge.b.0 as usize].push(EdgeId(i as u32));
        }

        let primary = partition
            .primary_source(entry)
            .and_then(|p| index.get(p.alias.as_str()).copied());

        Self {
            entry,
            nodes,
            edges,
            adjacency,
            primary,
        }
    }

    pub fn entry(&self) -> EntryId {
        self.entry
    }

    pub fn primary(&self) -> Option<NodeId> {
        self.primary
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn node(&self, id: NodeId) -> &SourceNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_by_alias(&self, alias: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.alias == alias)
            .map(|i| NodeId(i as u32))
    }

    pub fn edges(&self) -> &[SourceEdge] {
        &self.edges
    }

    pub fn edge(&self, id: EdgeId) -> &SourceEdge {
        &self.edges[id.0 as usize]
    }

    pub fn neighbors(&self, node: NodeId) -> impl Iterator<Item = (EdgeId, NodeId)> + '_ {
        self.adjacency[node.0 as usize]
            .iter()
            .map(move |&e| (e, self.edge(e).other(node)))
    }

    /// Relationships of `edge` with `lhs` on `from`'s side.
    pub fn relationships_from(&self, edge: EdgeId, from: NodeId) -> Vec<Relationship> {
        let alias = &self.node(from).alias;
        self.edge(edge)
            .relationships
            .iter()
            .map(|r| r.oriented_from(alias))
            .collect()
    }

    /// Depth-first traversal from `start`.
    pub fn traverse<V: GraphVisitor>(&self, start: NodeId, visitor: &mut V) -> Result<(), V::Error> {
        let mut run = Traversal {
            visited: vec![false; self.nodes.len()],
        };
        self.walk(start, visitor, &mut run)
    }

    fn walk<V: GraphVisitor>(
        &self,
        node: NodeId,
        visitor: &mut V,
        run: &mut Traversal,
    ) -> Result<(), V::Error> {
        run.visited[node.0 as usize] = true;
        if visitor.visit_node(self, node)? == Flow::Prune {
            return Ok(());
        }
        let neighbors: Vec<(EdgeId, NodeId)> = self.neighbors(node).collect();
        for (edge, next) in neighbors {
            if run.visited[next.0 as usize] {
                continue;
            }
            if visitor.visit_edge(self, edge, node, next)? == Flow::Prune {
                continue;
            }
            self.walk(next, visitor, run)?;
            visitor.leave_edge(self, edge, node, next)?;
        }
        Ok(())
    }
}
