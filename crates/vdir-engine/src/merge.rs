//! Merge: from a candidate's joined rows to a logical entry.
//!
//! The candidate's rows are narrowed to its primary key, then a visitor
//! rooted at the primary source collects, edge by edge, only the rows that
//! actually join the values gathered so far. Attribute mappings are then
//! evaluated over the merged values. A candidate whose mappings yield no
//! attribute at all is dropped.

use crate::error::{EngineError, Result};
use crate::graph::{EdgeId, Flow, GraphVisitor, NodeId, SourceGraph};
use crate::interpreter::Interpreter;
use crate::join::JoinEngine;
use crate::request::Entry;
use crate::search::EntryData;
use crate::values::{Attributes, SourceValues};
use ahash::AHashSet;
use tracing::debug;
use vdir_mapping::filter::OBJECT_CLASS;
use vdir_mapping::{append_and, append_or, Filter, Partition, Value};

pub fn merge(
    partition: &Partition,
    graph: &SourceGraph,
    join: JoinEngine<'_>,
    interpreter: &mut dyn Interpreter,
    data: &EntryData,
) -> Result<Option<Entry>> {
    let mapping = partition.entry(data.mapping);

    let rows: Vec<&SourceValues> = match key_filter(&data.primary_key) {
        Some(filter) => data.rows.iter().filter(|r| filter.matches(*r)).collect(),
        None => data.rows.iter().collect(),
    };

    let merged = match graph.primary() {
        Some(primary) => {
            let mut visitor = MergeVisitor {
                join,
                rows: &rows,
                merged: SourceValues::new(),
                reached: AHashSet::new(),
            };
            let alias = &graph.node(primary).alias;
            for row in &rows {
                visitor.merged.merge(&row.restricted([alias.as_str()]));
            }
            graph.traverse(primary, &mut visitor)?;
            let reached = visitor.reached;
            let mut merged = visitor.merged;
            // Sources the visitor never reached, and the parent context.
            for row in &rows {
                for alias in row.sources() {
                    if !reached.contains(alias) && !merged.contains_source(alias) {
                        merged.merge(&row.restricted([alias]));
                    }
                }
            }
            merged
        }
        None => rows.iter().fold(SourceValues::new(), |acc, r| acc.merged(r)),
    };

    interpreter.clear();
    interpreter.set_values(&merged);
    let mut attributes = Attributes::new();
    for attribute in &mapping.attributes {
        if let Some(values) = interpreter.eval(&attribute.derivation)? {
            attributes.add_all(attribute.name.clone(), values);
        }
    }
    if attributes.is_empty() {
        debug!(dn = %data.dn, "candidate yields no attributes, dropped");
        return Ok(None);
    }

    if let Some(rdn) = data.dn.rdn() {
        for (attr, value) in rdn.pairs() {
            if !attributes.contains(attr) {
                attributes.add(attr.clone(), Value::text(value.clone()));
            }
        }
    }
    for class in &mapping.object_classes {
        attributes.add(OBJECT_CLASS, Value::text(class.clone()));
    }

    Ok(Some(Entry {
        dn: data.dn.clone(),
        mapping: data.mapping,
        attributes,
        source_values: merged,
        rows: rows.into_iter().cloned().collect(),
    }))
}

/// `(&(|(k1=a)(k1=b))(k2=c))` over qualified key names.
fn key_filter(key: &SourceValues) -> Option<Filter> {
    key.iter().fold(None, |acc, (name, values)| {
        let any = values.iter().fold(None, |any, v| {
            append_or(any, Some(Filter::equal(name, v.to_string())))
        });
        append_and(acc, any)
    })
}

struct MergeVisitor<'a, 'r> {
    join: JoinEngine<'a>,
    rows: &'r [&'r SourceValues],
    merged: SourceValues,
    reached: AHashSet<String>,
}

impl GraphVisitor for MergeVisitor<'_, '_> {
    type Error = EngineError;

    fn visit_node(&mut self, _graph: &SourceGraph, _node: NodeId) -> Result<Flow> {
        Ok(Flow::Descend)
    }

    fn visit_edge(
        &mut self,
        graph: &SourceGraph,
        edge: EdgeId,
        from: NodeId,
        to: NodeId,
    ) -> Result<Flow> {
        let relationships = graph.relationships_from(edge, from);
        let alias = graph.node(to).alias.as_str();
        self.reached.insert(alias.to_string());
        let mut found = SourceValues::new();
        for row in self.rows {
            if row.contains_source(alias) && self.join.evaluate(&relationships, &self.merged, row) {
                found.merge(&row.restricted([alias]));
            }
        }
        if found.is_empty() {
            return Ok(Flow::Prune);
        }
        self.merged.merge(&found);
        Ok(Flow::Descend)
    }
}
