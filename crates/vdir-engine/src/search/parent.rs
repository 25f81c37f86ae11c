//! Parent phase: resolve inherited sources.
//!
//! Inherited sources are reached only through the connections the planner
//! recorded. Values the parent context already carries are checked in place;
//! anything else is fetched with a filter generated from the local results.
//! An entry with no sources of its own resolves from the nearest ancestor's
//! primary source instead.

use super::{Collector, Frame, Resolver};
use crate::error::{EngineError, Result};
use crate::graph::{EdgeId, Flow, GraphVisitor, NodeId, SourceGraph};
use crate::planner::SearchPlan;
use crate::values::SourceValues;
use tracing::debug;

pub struct ParentRunner<'a, 'r> {
    collector: Collector<'a, 'r>,
    stack: Vec<Frame>,
}

impl<'a, 'r> ParentRunner<'a, 'r> {
    pub fn new(
        resolver: Resolver<'a>,
        graph: &'a SourceGraph,
        plan: &'r SearchPlan,
        parent: &'r SourceValues,
    ) -> Self {
        Self {
            collector: Collector::new(resolver, graph, plan, parent),
            stack: vec![],
        }
    }

    /// Extend the local phase's `rows` with inherited sources.
    pub fn run(mut self, rows: Vec<SourceValues>, started: bool) -> Result<Vec<SourceValues>> {
        let graph = self.collector.graph;
        if graph.is_empty() {
            return Ok(vec![self.collector.parent.clone()]);
        }

        if !started {
            let Some(start) = self.inherited_start() else {
                return Ok(vec![self.collector.parent.clone()]);
            };
            debug!(source = %graph.node(start).alias, "resolving from ancestor primary");
            if self
                .collector
                .parent
                .contains_source(&graph.node(start).alias)
            {
                self.collector.results = vec![self.collector.parent.clone()];
                self.collector.started = true;
            }
            self.stack.push(Frame::default());
            graph.traverse(start, &mut self)?;
            return Ok(self.collector.results);
        }

        self.collector.results = rows;
        self.collector.started = true;
        let plan = self.collector.plan;
        for conn in plan.connections() {
            let Some(frame) = self.collector.enter(conn.edge, conn.local, conn.inherited) else {
                if self.collector.results.is_empty() {
                    break;
                }
                continue;
            };
            self.stack.push(frame);
            graph.traverse(conn.inherited, &mut self)?;
            self.stack.pop();
        }
        Ok(self.collector.results)
    }

    /// The nearest ancestor's primary source among the inherited nodes.
    fn inherited_start(&self) -> Option<NodeId> {
        let graph = self.collector.graph;
        let partition = self.collector.resolver.partition;
        partition
            .ancestors(graph.entry())
            .filter_map(|owner| partition.primary_source(owner))
            .find_map(|primary| graph.node_by_alias(&primary.alias))
            .or_else(|| graph.node_ids().next())
    }
}

impl GraphVisitor for ParentRunner<'_, '_> {
    type Error = EngineError;

    fn visit_node(&mut self, _graph: &SourceGraph, node: NodeId) -> Result<Flow> {
        let frame = self.stack.last().cloned().unwrap_or_default();
        self.collector.absorb(node, &frame)
    }

    fn visit_edge(
        &mut self,
        graph: &SourceGraph,
        edge: EdgeId,
        from: NodeId,
        to: NodeId,
    ) -> Result<Flow> {
        if graph.node(to).local {
            return Ok(Flow::Prune);
        }
        match self.collector.enter(edge, from, to) {
            Some(frame) => {
                self.stack.push(frame);
                Ok(Flow::Descend)
            }
            None => Ok(Flow::Prune),
        }
    }

    fn leave_edge(
        &mut self,
        _graph: &SourceGraph,
        _edge: EdgeId,
        _from: NodeId,
        _to: NodeId,
    ) -> Result<()> {
        self.stack.pop();
        Ok(())
    }
}
