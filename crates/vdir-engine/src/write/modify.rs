//! Modify: apply modifications to the entry's attributes, derive the new
//! source rows, and diff them against the current ones.
//!
//! Per source, rows are matched by primary key (or, when the new rows carry
//! no key, by content). Unmatched current rows are deleted, unmatched new
//! rows inserted, matched rows updated when a field changed. A source with
//! exactly one current and one new row always gets a single update.

use super::{assignments, check_fields, derive_rows, row_filter, source_config};
use crate::backend::Statement;
use crate::error::{EngineError, Result};
use crate::graph::SourceGraph;
use crate::interpreter::Interpreter;
use crate::request::{Entry, Modification, ModifyOp};
use crate::values::{Attributes, Row};
use std::collections::BTreeMap;
use vdir_mapping::filter::OBJECT_CLASS;
use vdir_mapping::{OperationKind, Partition, SourceConfig, Value};

/// The attributes after `modifications`, applied in order.
pub fn apply(attributes: &Attributes, modifications: &[Modification]) -> Result<Attributes> {
    if modifications
        .iter()
        .any(|m| m.attribute.eq_ignore_ascii_case(OBJECT_CLASS))
    {
        return Err(EngineError::ObjectClassModificationProhibited);
    }

    let mut out = attributes.clone();
    for m in modifications {
        match m.op {
            ModifyOp::Add => out.add_all(m.attribute.clone(), m.values.iter().cloned()),
            ModifyOp::Delete if m.values.is_empty() => {
                out.remove(&m.attribute);
            }
            ModifyOp::Delete => out.remove_values(&m.attribute, &m.values),
            ModifyOp::Replace => out.set(m.attribute.clone(), m.values.clone()),
        }
    }
    Ok(out)
}

/// Statements turning `old` into an entry with `attributes`.
pub fn plan(
    partition: &Partition,
    graph: &SourceGraph,
    interpreter: &mut dyn Interpreter,
    old: &Entry,
    attributes: &Attributes,
    kind: OperationKind,
) -> Result<Vec<Statement>> {
    let inherited: Vec<&str> = graph
        .node_ids()
        .map(|n| graph.node(n))
        .filter(|n| !n.local)
        .map(|n| n.alias.as_str())
        .collect();
    let context = old.source_values.restricted(inherited);

    let mut current: BTreeMap<String, Vec<Row>> = BTreeMap::new();
    let mut seed: BTreeMap<String, Row> = BTreeMap::new();
    for node in graph.node_ids().filter(|&n| graph.node(n).local) {
        let alias = graph.node(node).alias.clone();
        let rows = old.source_rows(&alias);
        if let [only] = rows.as_slice() {
            seed.insert(alias.clone(), only.clone());
        }
        current.insert(alias, rows);
    }

    let writes = derive_rows(partition, graph, interpreter, attributes, &context, &seed, kind)?;

    let mut statements = Vec::new();
    for write in writes.iter().filter(|w| w.included) {
        let source = source_config(partition, &write.source_name)?;
        for row in &write.rows {
            check_fields(source, row)?;
        }
        let old_rows = current.get(&write.alias).map(Vec::as_slice).unwrap_or_default();
        statements.extend(diff(source, &write.alias, old_rows, &write.rows, &write.propagated));
    }
    Ok(statements)
}

/// Statements turning `old` rows of one source into `new` rows.
///
/// `new` rows are flattened, so every field holds one value. `propagated`
/// names join-key fields copied from other sources; they never identify a
/// row on their own.
pub fn diff(
    source: &SourceConfig,
    alias: &str,
    old: &[Row],
    new: &[Row],
    propagated: &[String],
) -> Vec<Statement> {
    if let ([before], [after]) = (old, new) {
        let changes = changed_fields(before, after, true);
        if changes.is_empty() {
            return vec![];
        }
        return vec![Statement::update(
            &source.name,
            alias,
            changes,
            row_filter(source, before),
        )];
    }

    let keys = identity_fields(source, new, propagated);
    let identity = |row: &Row| -> Vec<String> {
        keys.iter()
            .map(|k| {
                row.first(k)
                    .map(|v| v.to_string().to_lowercase())
                    .unwrap_or_default()
            })
            .collect()
    };

    let mut deletes = Vec::new();
    let mut updates = Vec::new();
    let mut inserts = Vec::new();
    let same = |a: &Row, b: &Row| !keys.is_empty() && identity(a) == identity(b);

    for before in old {
        if !new.iter().any(|after| same(after, before)) {
            deletes.push(Statement::delete(&source.name, alias, row_filter(source, before)));
        }
    }
    for after in new {
        match old.iter().find(|before| same(before, after)) {
            Some(before) => {
                let changes = changed_fields(before, after, false);
                if !changes.is_empty() {
                    updates.push(Statement::update(
                        &source.name,
                        alias,
                        changes,
                        row_filter(source, before),
                    ));
                }
            }
            None => inserts.push(Statement::insert(&source.name, alias, assignments(after))),
        }
    }
    deletes.into_iter().chain(updates).chain(inserts).collect()
}

/// Key fields carried by every new row; otherwise every mapped field of the
/// new rows. Empty when nothing identifies a row, in which case old rows are
/// all replaced.
fn identity_fields(source: &SourceConfig, new: &[Row], propagated: &[String]) -> Vec<String> {
    let keys: Vec<String> = source
        .primary_keys()
        .map(|f| f.name.clone())
        .filter(|k| !new.is_empty() && new.iter().all(|r| r.get(k).is_some()))
        .collect();
    if !keys.is_empty() {
        return keys;
    }
    let mut fields: Vec<String> = Vec::new();
    for row in new {
        for field in row.fields() {
            if propagated.iter().any(|p| p.eq_ignore_ascii_case(field)) {
                continue;
            }
            if !fields.iter().any(|f| f.eq_ignore_ascii_case(field)) {
                fields.push(field.to_string());
            }
        }
    }
    fields
}

/// Fields whose value differs. `after` is single-valued per field. With
/// `clear_missing`, fields present only in `before` are set to null.
fn changed_fields(before: &Row, after: &Row, clear_missing: bool) -> Vec<(String, Option<Value>)> {
    let mut out = Vec::new();
    for (field, values) in after.iter() {
        let same = before.get(field).is_some_and(|old| {
            old.len() == values.len()
                && old
                    .iter()
                    .zip(values)
                    .all(|(a, b)| vdir_mapping::compare(a, vdir_mapping::Operator::Eq, b))
        });
        if !same {
            out.push((field.to_string(), values.first().cloned()));
        }
    }
    if clear_missing {
        for field in before.fields() {
            if after.get(field).is_none() {
                out.push((field.to_string(), None));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StatementKind;
    use vdir_mapping::{FieldConfig, FieldType};

    fn emails() -> SourceConfig {
        SourceConfig::new(
            "emails",
            vec![
                FieldConfig::new("id", FieldType::Integer).primary_key(),
                FieldConfig::new("user_id", FieldType::Integer),
                FieldConfig::new("address", FieldType::Varchar),
            ],
        )
    }

    #[test]
    fn single_row_change_is_one_update() {
        let before = Row::from_pairs([("id", Value::Integer(1)), ("address", Value::text("a@x"))]);
        let after = Row::from_pairs([("id", Value::Integer(1)), ("address", Value::text("b@x"))]);

        let statements = diff(&emails(), "e", &[before], &[after], &[]);
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].kind, StatementKind::Update);
        assert_eq!(
            statements[0].assignments,
            vec![("address".to_string(), Some(Value::text("b@x")))]
        );
        assert_eq!(statements[0].filter.as_ref().map(ToString::to_string).as_deref(), Some("(id=1)"));
    }

    #[test]
    fn keyless_rows_diff_by_content() {
        let old = vec![
            Row::from_pairs([("id", Value::Integer(10)), ("address", Value::text("a"))]),
            Row::from_pairs([("id", Value::Integer(11)), ("address", Value::text("b"))]),
        ];
        let new = vec![
            Row::from_pairs([("address", Value::text("a"))]),
            Row::from_pairs([("address", Value::text("c"))]),
        ];

        let statements = diff(&emails(), "e", &old, &new, &[]);
        let kinds: Vec<StatementKind> = statements.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StatementKind::Delete, StatementKind::Insert]);
        assert_eq!(statements[0].filter.as_ref().map(ToString::to_string).as_deref(), Some("(id=11)"));
    }

    #[test]
    fn join_keys_alone_never_match_rows() {
        let old = vec![
            Row::from_pairs([("id", Value::Integer(10)), ("user_id", Value::Integer(1))]),
            Row::from_pairs([("id", Value::Integer(11)), ("user_id", Value::Integer(1))]),
        ];
        let new = vec![Row::from_pairs([("user_id", Value::Integer(1))])];

        let statements = diff(&emails(), "e", &old, &new, &["user_id".to_string()]);
        let kinds: Vec<StatementKind> = statements.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![StatementKind::Delete, StatementKind::Delete, StatementKind::Insert]
        );
    }

    #[test]
    fn object_class_cannot_be_modified() {
        let err = apply(
            &Attributes::new(),
            &[Modification::add("objectClass", vec![Value::text("person")])],
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ObjectClassModificationProhibited);
    }
}
