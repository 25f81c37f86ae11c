//! Per-source filters.
//!
//! Two ways a filter for one physical source comes about:
//!
//! - `generate_filter`: from relationships, substituting the known side's
//!   concrete values (`B.a_id = A.id` with `A.id ∈ {1, 2}` gives
//!   `(|(a_id=1)(a_id=2))` for `B`).
//! - `FilterProjector::project`: from the client's logical filter, renaming
//!   each leaf's attribute to the source field that carries it.
//!
//! A projected filter never excludes a row the logical filter would accept:
//! leaves a source cannot express are dropped, and a dropped leaf inside an
//! `Or` (or under a `Not`) drops the whole subtree. The logical filter is
//! checked again on the merged entry.

use crate::values::SourceValues;
use vdir_mapping::filter::OBJECT_CLASS;
use vdir_mapping::{append_and, append_or, Derivation, EntryId, Filter, Partition, Relationship};

// ============================================================================
// Relationship-generated filters
// ============================================================================

/// Filter on `target` from the known side of each relationship touching it.
///
/// Values are OR-combined within a relationship and relationships are
/// AND-combined. A relationship whose known side has no values contributes
/// nothing.
pub fn generate_filter(
    target: &str,
    relationships: &[Relationship],
    values: &SourceValues,
) -> Option<Filter> {
    let mut filter = None;
    for rel in relationships {
        if !rel.touches(target) {
            continue;
        }
        let rel = rel.oriented_from(target);
        if rel.rhs.source == target {
            continue;
        }
        let Some(known) = values.get(&rel.rhs.qualified()) else {
            continue;
        };
        let mut any = None;
        for value in known {
            any = append_or(
                any,
                Some(Filter::simple(&rel.lhs.field, rel.operator, value.to_string())),
            );
        }
        filter = append_and(filter, any);
    }
    filter
}

/// `generate_filter` for each row, OR-combined across rows.
pub fn generate_filter_for_rows(
    target: &str,
    relationships: &[Relationship],
    rows: &[SourceValues],
) -> Option<Filter> {
    rows.iter().fold(None, |acc, row| {
        append_or(acc, generate_filter(target, relationships, row))
    })
}

// ============================================================================
// Logical filter projection
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub filter: Filter,
    /// True when no leaf was dropped on the way.
    pub exact: bool,
}

#[derive(Clone, Copy)]
pub struct FilterProjector<'a> {
    partition: &'a Partition,
    entry: EntryId,
}

impl<'a> FilterProjector<'a> {
    pub fn new(partition: &'a Partition, entry: EntryId) -> Self {
        Self { partition, entry }
    }

    pub fn project(&self, alias: &str, filter: &Filter) -> Option<Projection> {
        match filter {
            Filter::And { children } => {
                let mut out = None;
                let mut exact = true;
                for child in children {
                    match self.project(alias, child) {
                        Some(p) => {
                            exact &= p.exact;
                            out = append_and(out, Some(p.filter));
                        }
                        None => exact = false,
                    }
                }
                out.map(|filter| Projection { filter, exact })
            }
            Filter::Or { children } => {
                let mut out = None;
                let mut exact = true;
                for child in children {
                    let p = self.project(alias, child)?;
                    exact &= p.exact;
                    out = append_or(out, Some(p.filter));
                }
                out.map(|filter| Projection { filter, exact })
            }
            Filter::Not { child } => {
                let p = self.project(alias, child)?;
                p.exact.then(|| Projection {
                    filter: Filter::not(p.filter),
                    exact: true,
                })
            }
            leaf => self.project_leaf(alias, leaf),
        }
    }

    fn project_leaf(&self, alias: &str, leaf: &Filter) -> Option<Projection> {
        let attribute = leaf.attribute()?;
        if attribute.eq_ignore_ascii_case(OBJECT_CLASS) {
            return None;
        }
        let fields = self.fields_for(alias, attribute);
        let mut out = None;
        for field in fields {
            let renamed = match leaf {
                Filter::Simple {
                    operator, value, ..
                } => Filter::simple(field, *operator, value.clone()),
                Filter::Substring {
                    initial, any, last, ..
                } => Filter::Substring {
                    attribute: field,
                    initial: initial.clone(),
                    any: any.clone(),
                    last: last.clone(),
                },
                Filter::Present { .. } => Filter::present(field),
                _ => return None,
            };
            out = append_and(out, Some(renamed));
        }
        out.map(|filter| Projection {
            filter,
            exact: true,
        })
    }

    /// Fields of `alias` that carry logical attribute `attribute` verbatim.
    pub fn fields_for(&self, alias: &str, attribute: &str) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        let mut push = |field: &str| {
            if !fields.iter().any(|f| f.eq_ignore_ascii_case(field)) {
                fields.push(field.to_string());
            }
        };

        if let Some(source) = self.partition.effective_source(self.entry, alias) {
            for fm in &source.mapping.fields {
                if let Derivation::Variable(v) = &fm.derivation {
                    if v.eq_ignore_ascii_case(attribute) {
                        push(&fm.name);
                    }
                }
            }
        }

        let mapping = self.partition.entry(self.entry);
        if let Some(attr) = mapping.attribute(attribute) {
            if let Derivation::Variable(v) = &attr.derivation {
                if let Some((a, field)) = v.split_once('.') {
                    if a == alias {
                        push(field);
                    }
                }
            }
        }
        fields
    }
}
