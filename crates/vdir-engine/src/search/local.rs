//! Local phase: resolve the entry's own sources.
//!
//! Starts at the planned source, then walks outward over edges between local
//! sources. Each newly reached source is fetched with a filter generated from
//! the values already joined, ANDed with its projected filter, and joined
//! (required) or left-joined (optional) into the batch. Edges into inherited
//! sources are left for the parent phase.

use super::{Collector, Frame, Resolver};
use crate::error::{EngineError, Result};
use crate::graph::{EdgeId, Flow, GraphVisitor, NodeId, SourceGraph};
use crate::planner::SearchPlan;
use crate::values::SourceValues;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct LocalOutcome {
    pub rows: Vec<SourceValues>,
    /// Any fetch was narrowed by the logical filter.
    pub filtered: bool,
    /// A start source existed and was fetched.
    pub started: bool,
}

pub struct LocalRunner<'a, 'r> {
    collector: Collector<'a, 'r>,
    stack: Vec<Frame>,
}

impl<'a, 'r> LocalRunner<'a, 'r> {
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

    pub fn run(mut self) -> Result<LocalOutcome> {
        let graph = self.collector.graph;
        let Some(start) = self.collector.plan.start(graph, self.collector.parent) else {
            return Ok(LocalOutcome::default());
        };
        debug!(
            source = %graph.node(start.node).alias,
            filter = %start.filter.as_ref().map(ToString::to_string).unwrap_or_default(),
            "local resolution starts"
        );

        self.stack.push(Frame {
            filter: start.filter,
            relationships: vec![],
        });
        graph.traverse(start.node, &mut self)?;

        Ok(LocalOutcome {
            rows: self.collector.results,
            filtered: self.collector.filtered,
            started: self.collector.started,
        })
    }
}

impl GraphVisitor for LocalRunner<'_, '_> {
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
        if !graph.node(to).local {
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
