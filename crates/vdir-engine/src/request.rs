//! Operation requests and results as the protocol layer hands them over.

use crate::values::{Attributes, SourceValues};
use serde::{Deserialize, Serialize};
use vdir_mapping::{Dn, EntryId, Filter, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Base,
    OneLevel,
    #[default]
    Subtree,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub base: Dn,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default = "Filter::any_object")]
    pub filter: Filter,
    /// Requested attributes; empty or `*` means all.
    #[serde(default)]
    pub attributes: Vec<String>,
    /// Overrides the engine's configured limit.
    #[serde(default)]
    pub size_limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(base: Dn, scope: Scope) -> Self {
        Self {
            base,
            scope,
            filter: Filter::any_object(),
            attributes: vec![],
            size_limit: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_attributes<S: Into<String>>(mut self, attributes: impl IntoIterator<Item = S>) -> Self {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_size_limit(mut self, limit: usize) -> Self {
        self.size_limit = Some(limit);
        self
    }

    /// Only the DN was asked for (`dn` or the `1.1` no-attributes marker).
    pub fn is_dn_only(&self) -> bool {
        matches!(self.attributes.as_slice(), [a] if a.eq_ignore_ascii_case("dn") || a == "1.1")
    }

    pub fn wants_all_attributes(&self) -> bool {
        self.attributes.is_empty() || self.attributes.iter().any(|a| a == "*")
    }
}

// ============================================================================
// Modifications
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifyOp {
    Add,
    /// Remove the given values, or the whole attribute when none are given.
    Delete,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub op: ModifyOp,
    pub attribute: String,
    #[serde(default)]
    pub values: Vec<Value>,
}

impl Modification {
    pub fn add(attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            op: ModifyOp::Add,
            attribute: attribute.into(),
            values,
        }
    }

    pub fn delete(attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            op: ModifyOp::Delete,
            attribute: attribute.into(),
            values,
        }
    }

    pub fn replace(attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            op: ModifyOp::Replace,
            attribute: attribute.into(),
            values,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// A resolved logical entry. Built by merge, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub dn: Dn,
    pub mapping: EntryId,
    pub attributes: Attributes,
    /// Union of every source value that produced this entry.
    pub source_values: SourceValues,
    /// The joined rows behind `source_values`, one physical row per alias each.
    #[serde(skip)]
    pub rows: Vec<SourceValues>,
}

impl Entry {
    /// The distinct physical rows `alias` contributed.
    pub fn source_rows(&self, alias: &str) -> Vec<crate::values::Row> {
        let mut out: Vec<crate::values::Row> = Vec::new();
        for joined in &self.rows {
            let row = joined.row(alias);
            if !row.is_empty() && !out.contains(&row) {
                out.push(row);
            }
        }
        if out.is_empty() {
            let row = self.source_values.row(alias);
            if !row.is_empty() {
                out.push(row);
            }
        }
        out
    }
}
