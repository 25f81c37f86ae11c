//! Search planning.
//!
//! A plan is computed per (entry, logical filter) by walking the source graph
//! from the primary source:
//!
//! ```text
//!   primary ──► local ──► local          projected filter per local node
//!      │
//!      └──► inherited                    recorded as a connection, not entered
//! ```
//!
//! Local nodes get the logical filter projected onto their fields. Edges that
//! leave the entry's own sources become `Connection`s; the parent phase of a
//! search resolves them against the parent context.

use crate::graph::{EdgeId, Flow, GraphVisitor, NodeId, SourceGraph};
use crate::projection::{generate_filter, FilterProjector};
use crate::values::SourceValues;
use std::convert::Infallible;
use tracing::debug;
use vdir_mapping::{append_and, Filter, Partition, Relationship};

/// An edge from a local source to an inherited one.
#[derive(Debug, Clone)]
pub struct Connection {
    pub local: NodeId,
    pub inherited: NodeId,
    pub edge: EdgeId,
    /// Oriented with `lhs` on the local side.
    pub relationships: Vec<Relationship>,
}

/// Where a local resolution begins.
#[derive(Debug, Clone, PartialEq)]
pub struct Start {
    pub node: NodeId,
    pub filter: Option<Filter>,
}

#[derive(Debug, Clone)]
pub struct SearchPlan {
    filters: Vec<Option<Filter>>,
    depths: Vec<Option<usize>>,
    connections: Vec<Connection>,
}

impl SearchPlan {
    pub fn build(partition: &Partition, graph: &SourceGraph, filter: Option<&Filter>) -> Self {
        let mut plan = SearchPlan {
            filters: vec![None; graph.len()],
            depths: vec![None; graph.len()],
            connections: vec![],
        };
        let Some(primary) = graph.primary() else {
            return plan;
        };

        let mut visitor = PlanVisitor {
            projector: FilterProjector::new(partition, graph.entry()),
            filter,
            plan: &mut plan,
            depth: 0,
        };
        match graph.traverse(primary, &mut visitor) {
            Ok(()) => {}
            Err(never) => match never {},
        }

        debug!(
            entry = %graph.entry(),
            filtered = plan.filters.iter().filter(|f| f.is_some()).count(),
            connections = plan.connections.len(),
            "search plan built"
        );
        plan
    }

    /// The projected logical filter for `node`, if any.
    pub fn filter(&self, node: NodeId) -> Option<&Filter> {
        self.filters.get(node.0 as usize).and_then(Option::as_ref)
    }

    /// Distance from the primary source; `None` for nodes never reached.
    pub fn depth(&self, node: NodeId) -> Option<usize> {
        self.depths.get(node.0 as usize).copied().flatten()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn is_filtered(&self) -> bool {
        self.filters.iter().any(Option::is_some)
    }

    /// Replace every projected filter with a single filter on `node`.
    pub fn restrict_to(&mut self, node: NodeId, filter: Option<Filter>) {
        for f in &mut self.filters {
            *f = None;
        }
        if let Some(slot) = self.filters.get_mut(node.0 as usize) {
            *slot = filter;
        }
    }

    /// The deepest required local source carrying a projected filter.
    ///
    /// Optional sources never qualify: starting there would lose every entry
    /// that has no row in them.
    pub fn first_source(&self, graph: &SourceGraph) -> Option<NodeId> {
        graph
            .node_ids()
            .filter(|&n| {
                let node = graph.node(n);
                node.local && node.required && self.filter(n).is_some()
            })
            .filter_map(|n| self.depth(n).map(|d| (d, n)))
            .max_by_key(|&(d, n)| (d, std::cmp::Reverse(n)))
            .map(|(_, n)| n)
    }

    /// Pick the start source, in priority order:
    ///
    /// 1. a source the logical filter constrains directly;
    /// 2. a source connected to the resolved parent context;
    /// 3. the primary source.
    pub fn start(&self, graph: &SourceGraph, parent: &SourceValues) -> Option<Start> {
        if let Some(node) = self.first_source(graph) {
            let mut filter = self.filter(node).cloned();
            for conn in self.connections.iter().filter(|c| c.local == node) {
                filter = append_and(
                    filter,
                    generate_filter(&graph.node(node).alias, &conn.relationships, parent),
                );
            }
            return Some(Start { node, filter });
        }

        for conn in &self.connections {
            let alias = &graph.node(conn.local).alias;
            if let Some(generated) = generate_filter(alias, &conn.relationships, parent) {
                return Some(Start {
                    node: conn.local,
                    filter: append_and(Some(generated), self.filter(conn.local).cloned()),
                });
            }
        }

        graph
            .primary()
            .filter(|&p| graph.node(p).local)
            .map(|node| Start {
                node,
                filter: self.filter(node).cloned(),
            })
    }
}

struct PlanVisitor<'a, 'p> {
    projector: FilterProjector<'a>,
    filter: Option<&'a Filter>,
    plan: &'p mut SearchPlan,
    depth: usize,
}

impl GraphVisitor for PlanVisitor<'_, '_> {
    type Error = Infallible;

    fn visit_node(&mut self, graph: &SourceGraph, node: NodeId) -> Result<Flow, Infallible> {
        let index = node.0 as usize;
        self.plan.depths[index] = Some(self.depth);
        let source = graph.node(node);
        if source.local {
            if let Some(filter) = self.filter {
                self.plan.filters[index] = self
                    .projector
                    .project(&source.alias, filter)
                    .map(|p| p.filter);
            }
        }
        Ok(Flow::Descend)
    }

    fn visit_edge(
        &mut self,
        graph: &SourceGraph,
        edge: EdgeId,
        from: NodeId,
        to: NodeId,
    ) -> Result<Flow, Infallible> {
        if !graph.node(to).local {
            if graph.node(from).local {
                self.plan.connections.push(Connection {
                    local: from,
                    inherited: to,
                    edge,
                    relationships: graph.relationships_from(edge, from),
                });
            }
            return Ok(Flow::Prune);
        }
        self.depth += 1;
        Ok(Flow::Descend)
    }

    fn leave_edge(
        &mut self,
        _graph: &SourceGraph,
        _edge: EdgeId,
        _from: NodeId,
        _to: NodeId,
    ) -> Result<(), Infallible> {
        self.depth -= 1;
        Ok(())
    }
}
