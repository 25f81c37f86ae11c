//! Delete: one delete per contributing source row, dependents before the
//! primary source.

use super::{local_order, row_filter, source_config};
use crate::backend::Statement;
use crate::error::Result;
use crate::graph::SourceGraph;
use crate::request::Entry;
use std::collections::VecDeque;
use vdir_mapping::{OperationKind, Partition};

pub fn plan(partition: &Partition, graph: &SourceGraph, entry: &Entry) -> Result<Vec<Statement>> {
    let mut statements = VecDeque::new();
    for node in local_order(graph) {
        let alias = &graph.node(node).alias;
        let Some(mapping) = partition.effective_source(graph.entry(), alias) else {
            continue;
        };
        if !mapping.mapping.includes(OperationKind::Delete) {
            continue;
        }
        let source = source_config(partition, &mapping.mapping.source_name)?;
        for row in entry.source_rows(alias) {
            statements.push_front(Statement::delete(
                &source.name,
                alias,
                row_filter(source, &row),
            ));
        }
    }
    Ok(statements.into())
}
