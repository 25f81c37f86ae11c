//! In-memory relational join of row batches on a relationship list.

use crate::values::SourceValues;
use vdir_mapping::{compare, convert, EntryId, FieldRef, FieldType, Partition, Relationship};

/// Joins are typed by the field metadata of the entry they run for.
#[derive(Clone, Copy)]
pub struct JoinEngine<'a> {
    partition: &'a Partition,
    entry: EntryId,
}

impl<'a> JoinEngine<'a> {
    pub fn new(partition: &'a Partition, entry: EntryId) -> Self {
        Self { partition, entry }
    }

    /// Every pair `(l, r)` with `evaluate(relationships, l, r)`, as `l ∪ r`.
    pub fn join(
        &self,
        left: &[SourceValues],
        right: &[SourceValues],
        relationships: &[Relationship],
    ) -> Vec<SourceValues> {
        let mut out = Vec::new();
        for l in left {
            for r in right {
                if self.evaluate(relationships, l, r) {
                    out.push(l.merged(r));
                }
            }
        }
        out
    }

    /// `join` plus every left row that matched nothing, on its own.
    pub fn left_join(
        &self,
        left: &[SourceValues],
        right: &[SourceValues],
        relationships: &[Relationship],
    ) -> Vec<SourceValues> {
        let mut out = Vec::new();
        for l in left {
            let before = out.len();
            for r in right {
                if self.evaluate(relationships, l, r) {
                    out.push(l.merged(r));
                }
            }
            if out.len() == before {
                out.push(l.clone());
            }
        }
        out
    }

    /// True when every relationship is satisfied by some pair of values.
    ///
    /// `lhs` is read from `a` and `rhs` from `b`; when neither is present the
    /// sides are swapped. A side that is still absent fails the relationship.
    pub fn evaluate(&self, relationships: &[Relationship], a: &SourceValues, b: &SourceValues) -> bool {
        relationships.iter().all(|rel| self.evaluate_one(rel, a, b))
    }

    fn evaluate_one(&self, rel: &Relationship, a: &SourceValues, b: &SourceValues) -> bool {
        let lhs_key = rel.lhs.qualified();
        let rhs_key = rel.rhs.qualified();

        let (lhs_values, rhs_values) = match (a.get(&lhs_key), b.get(&rhs_key)) {
            (None, None) => (b.get(&lhs_key), a.get(&rhs_key)),
            found => found,
        };
        let (Some(lhs_values), Some(rhs_values)) = (lhs_values, rhs_values) else {
            return false;
        };

        let lhs_type = self.field_type(&rel.lhs);
        let rhs_type = self.field_type(&rel.rhs);
        lhs_values.iter().any(|l| {
            let Some(l) = convert(l, lhs_type) else {
                return false;
            };
            rhs_values.iter().any(|r| {
                convert(r, rhs_type).is_some_and(|r| compare(&l, rel.operator, &r))
            })
        })
    }

    fn field_type(&self, field: &FieldRef) -> FieldType {
        self.partition
            .field_config(self.entry, &field.source, &field.field)
            .map(|f| f.field_type)
            .unwrap_or_default()
    }
}
