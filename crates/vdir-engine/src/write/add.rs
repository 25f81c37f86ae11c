//! Add: one insert per new source row, primary source first.

use super::{assignments, check_fields, derive_rows, source_config};
use crate::backend::Statement;
use crate::error::Result;
use crate::graph::SourceGraph;
use crate::interpreter::Interpreter;
use crate::values::{Attributes, SourceValues};
use std::collections::BTreeMap;
use vdir_mapping::{Dn, OperationKind, Partition, Value};

/// Statements adding `attributes` at `dn`. RDN values are added to the
/// attributes when missing; `parent` is the resolved parent's source values.
pub fn plan(
    partition: &Partition,
    graph: &SourceGraph,
    interpreter: &mut dyn Interpreter,
    dn: &Dn,
    attributes: &Attributes,
    parent: &SourceValues,
) -> Result<Vec<Statement>> {
    let mut attributes = attributes.clone();
    if let Some(rdn) = dn.rdn() {
        for (attr, value) in rdn.pairs() {
            if !attributes.contains(attr) {
                attributes.add(attr.clone(), Value::text(value.clone()));
            }
        }
    }

    let writes = derive_rows(
        partition,
        graph,
        interpreter,
        &attributes,
        parent,
        &BTreeMap::new(),
        OperationKind::Add,
    )?;

    let mut statements = Vec::new();
    for write in writes.iter().filter(|w| w.included) {
        let source = source_config(partition, &write.source_name)?;
        for row in &write.rows {
            check_fields(source, row)?;
            statements.push(Statement::insert(
                &write.source_name,
                &write.alias,
                assignments(row),
            ));
        }
    }
    Ok(statements)
}
