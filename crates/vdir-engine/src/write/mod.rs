//! Write path: from one logical mutation to ordered per-source statements.
//!
//! All four engines share `derive_rows`, a visitor rooted at the primary
//! source that computes each local source's new row(s):
//!
//! 1. field mappings are evaluated over the entry's attributes and every
//!    value known so far;
//! 2. fields without a mapping of their own take their values across `=`
//!    relationships from sources already processed (known side into the
//!    dependent side), replacing any current value;
//! 3. multi-valued rows expand into one row per combination.
//!
//! A dependent source whose own field mappings all come out empty gets no
//! row at all.
//!
//! Sources excluded for the operation (read-only, or `include_on_*` off) are
//! still traversed so their values reach the sources behind them; they just
//! produce no statements.

pub mod add;
pub mod delete;
pub mod modify;
pub mod modrdn;

use crate::backend::{Backend, Statement};
use crate::error::{EngineError, Result};
use crate::graph::{Flow, GraphVisitor, NodeId, SourceGraph};
use crate::interpreter::Interpreter;
use crate::transform::flatten;
use crate::values::{Attributes, Row, SourceValues};
use std::collections::BTreeMap;
use std::convert::Infallible;
use tracing::{debug, warn};
use vdir_mapping::{
    append_and, Derivation, Filter, OperationKind, Operator, Partition, SourceConfig, Value,
};

/// New rows for one local source.
#[derive(Debug, Clone)]
pub struct SourceWrite {
    pub node: NodeId,
    pub alias: String,
    pub source_name: String,
    pub rows: Vec<Row>,
    /// Fields copied across `=` relationships rather than mapped.
    pub propagated: Vec<String>,
    /// Whether the operation writes to this source at all.
    pub included: bool,
}

/// Compute new rows for every local source, primary first.
///
/// `context` carries values of inherited sources; `seed` gives a starting row
/// per alias (the current row, for updates) that field mappings overwrite.
pub fn derive_rows(
    partition: &Partition,
    graph: &SourceGraph,
    interpreter: &mut dyn Interpreter,
    attributes: &Attributes,
    context: &SourceValues,
    seed: &BTreeMap<String, Row>,
    kind: OperationKind,
) -> Result<Vec<SourceWrite>> {
    let Some(primary) = graph.primary() else {
        return Ok(vec![]);
    };
    let mut visitor = DeriveVisitor {
        partition,
        interpreter,
        attributes,
        seed,
        kind,
        known: context.clone(),
        writes: vec![],
    };
    graph.traverse(primary, &mut visitor)?;
    Ok(visitor.writes)
}

struct DeriveVisitor<'a> {
    partition: &'a Partition,
    interpreter: &'a mut dyn Interpreter,
    attributes: &'a Attributes,
    seed: &'a BTreeMap<String, Row>,
    kind: OperationKind,
    known: SourceValues,
    writes: Vec<SourceWrite>,
}

impl GraphVisitor for DeriveVisitor<'_> {
    type Error = EngineError;

    fn visit_node(&mut self, graph: &SourceGraph, node: NodeId) -> Result<Flow> {
        let source = graph.node(node);
        if !source.local {
            return Ok(Flow::Prune);
        }
        let Some(mapping) = self.partition.effective_source(graph.entry(), &source.alias) else {
            return Ok(Flow::Prune);
        };

        let mut row = self.seed.get(&source.alias).cloned().unwrap_or_default();
        let mut mapped: Vec<&str> = Vec::new();
        let mut derived = false;
        self.interpreter.clear();
        self.interpreter.set_values(&self.known);
        self.interpreter.set_attributes(self.attributes);
        for field in &mapping.mapping.fields {
            match self.interpreter.eval(&field.derivation)? {
                Some(values) => {
                    row.set(field.name.clone(), values);
                    mapped.push(&field.name);
                    derived |= !matches!(field.derivation, Derivation::Constant(_));
                }
                None if !matches!(field.derivation, Derivation::Constant(_)) => {
                    row.remove(&field.name);
                }
                None => {}
            }
        }

        // Join keys always follow the known side, unless the field was
        // mapped explicitly.
        let mut propagated: Vec<String> = Vec::new();
        for (edge, other) in graph.neighbors(node) {
            if !self.known.contains_source(&graph.node(other).alias) {
                continue;
            }
            for rel in graph.relationships_from(edge, node) {
                if rel.operator != Operator::Eq
                    || mapped.iter().any(|m| m.eq_ignore_ascii_case(&rel.lhs.field))
                {
                    continue;
                }
                if let Some(values) = self.known.get(&rel.rhs.qualified()) {
                    debug!(from = %rel.rhs, to = %rel.lhs, "propagating join values");
                    row.set(rel.lhs.field.clone(), values.to_vec());
                    propagated.push(rel.lhs.field.clone());
                }
            }
        }

        // A dependent source holds a row only when one of its own derived
        // fields has a value; join keys and constants alone would leave an
        // orphan. Sources with nothing to derive (link tables) are made of
        // join keys.
        let derives_fields = mapping
            .mapping
            .fields
            .iter()
            .any(|f| !matches!(f.derivation, Derivation::Constant(_)));
        let has_row = graph.primary() == Some(node)
            || derived
            || (!derives_fields && !propagated.is_empty());
        let rows = if has_row {
            self.known.add_row(&source.alias, &row);
            let mut rows = flatten(&row);
            if rows.len() > 1 && self.seed.contains_key(&source.alias) {
                // Seeded fields would repeat the current row's key on every
                // new row.
                let mut own = Row::new();
                for field in mapped.iter().copied().chain(propagated.iter().map(String::as_str)) {
                    if let Some(values) = row.get(field) {
                        own.set(field.to_string(), values.to_vec());
                    }
                }
                rows = flatten(&own);
            }
            rows
        } else {
            debug!(source = %source.alias, "no values of its own; no row");
            vec![]
        };

        self.writes.push(SourceWrite {
            node,
            alias: source.alias.clone(),
            source_name: source.source_name.clone(),
            rows,
            propagated,
            included: mapping.mapping.includes(self.kind),
        });
        Ok(Flow::Descend)
    }
}

/// Local sources in primary-first traversal order.
pub fn local_order(graph: &SourceGraph) -> Vec<NodeId> {
    struct Order(Vec<NodeId>);

    impl GraphVisitor for Order {
        type Error = Infallible;

        fn visit_node(&mut self, graph: &SourceGraph, node: NodeId) -> Result<Flow, Infallible> {
            if !graph.node(node).local {
                return Ok(Flow::Prune);
            }
            self.0.push(node);
            Ok(Flow::Descend)
        }
    }

    let Some(primary) = graph.primary() else {
        return vec![];
    };
    let mut order = Order(vec![]);
    match graph.traverse(primary, &mut order) {
        Ok(()) => {}
        Err(never) => match never {},
    }
    order.0
}

// ============================================================================
// Statement helpers
// ============================================================================

/// Every field of `row` must exist on the physical source.
fn check_fields(source: &SourceConfig, row: &Row) -> Result<()> {
    for field in row.fields() {
        if source.field(field).is_none() {
            return Err(EngineError::UnknownField {
                source_name: source.name.clone(),
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

fn source_config<'p>(partition: &'p Partition, name: &str) -> Result<&'p SourceConfig> {
    partition
        .source_config(name)
        .ok_or_else(|| EngineError::ResolutionFailure(format!("unknown source `{name}`")))
}

fn assignments(row: &Row) -> Vec<(String, Option<Value>)> {
    row.iter()
        .map(|(field, values)| (field.to_string(), values.first().cloned()))
        .collect()
}

/// Filter selecting exactly `row`: its primary-key fields when it has them,
/// otherwise every field.
fn row_filter(source: &SourceConfig, row: &Row) -> Option<Filter> {
    let keys: Vec<&str> = source
        .primary_keys()
        .map(|f| f.name.as_str())
        .filter(|k| row.get(k).is_some())
        .collect();
    let fields: Vec<&str> = if keys.is_empty() {
        row.fields().collect()
    } else {
        keys
    };
    fields.into_iter().fold(None, |acc, field| {
        let value = row.first(field).map(ToString::to_string).unwrap_or_default();
        append_and(acc, Some(Filter::equal(field, value)))
    })
}

/// Run statements in order. The first failure stops the rest; statements
/// already executed stay applied.
pub fn execute(backend: &dyn Backend, statements: &[Statement]) -> Result<u64> {
    let mut affected = 0;
    for (executed, statement) in statements.iter().enumerate() {
        debug!(%statement, "executing");
        match backend.execute(statement) {
            Ok(n) => affected += n,
            Err(err) => {
                warn!(
                    executed,
                    remaining = statements.len() - executed,
                    source = %statement.source_name,
                    error = %err,
                    "write aborted part way; earlier statements remain applied"
                );
                return Err(EngineError::backend(&statement.source_name, err));
            }
        }
    }
    Ok(affected)
}
