//! Row store.
//!
//! - `SourceValues`: alias-qualified multi-valued map (`<alias>.<field>` keys),
//!   used for one joined row or an accumulated batch.
//! - `Row`: one physical row as returned by a backend, keyed by bare field name.
//! - `Attributes`: logical attributes of an entry, case-insensitive names.
//!
//! Values under a key keep insertion order and never repeat.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use vdir_mapping::{AttributeLookup, Value};

fn push_unique(values: &mut Vec<Value>, value: Value) {
    if !values.contains(&value) {
        values.push(value);
    }
}

// ============================================================================
// SourceValues
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SourceValues {
    values: BTreeMap<String, Vec<Value>>,
}

impl SourceValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn add(&mut self, key: impl Into<String>, value: Value) {
        push_unique(self.values.entry(key.into()).or_default(), value);
    }

    pub fn add_all(&mut self, key: impl Into<String>, values: impl IntoIterator<Item = Value>) {
        let mut values = values.into_iter().peekable();
        if values.peek().is_none() {
            return;
        }
        let slot = self.values.entry(key.into()).or_default();
        for value in values {
            push_unique(slot, value);
        }
    }

    /// Replace the values under `key`; an empty list removes it.
    pub fn set(&mut self, key: impl Into<String>, values: Vec<Value>) {
        let key = key.into();
        let mut unique = Vec::with_capacity(values.len());
        for v in values {
            push_unique(&mut unique, v);
        }
        if unique.is_empty() {
            self.values.remove(&key);
        } else {
            self.values.insert(key, unique);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<Value>> {
        self.values.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&[Value]> {
        self.values.get(key).map(Vec::as_slice)
    }

    pub fn first(&self, key: &str) -> Option<&Value> {
        self.values.get(key).and_then(|v| v.first())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// True when any `<alias>.` key is present.
    pub fn contains_source(&self, alias: &str) -> bool {
        let prefix = format!("{alias}.");
        self.values
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    pub fn remove_source(&mut self, alias: &str) {
        let prefix = format!("{alias}.");
        self.values.retain(|k, _| !k.starts_with(&prefix));
    }

    pub fn sources(&self) -> BTreeSet<&str> {
        self.values
            .keys()
            .filter_map(|k| k.split_once('.').map(|(alias, _)| alias))
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Union `other` into `self`.
    pub fn merge(&mut self, other: &SourceValues) {
        for (key, values) in &other.values {
            self.add_all(key.clone(), values.iter().cloned());
        }
    }

    pub fn merged(&self, other: &SourceValues) -> SourceValues {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Add a physical row under `alias`.
    pub fn add_row(&mut self, alias: &str, row: &Row) {
        for (field, values) in row.iter() {
            self.add_all(format!("{alias}.{field}"), values.iter().cloned());
        }
    }

    /// `base` plus `row` qualified by `alias`.
    pub fn with_row(base: &SourceValues, alias: &str, row: &Row) -> SourceValues {
        let mut out = base.clone();
        out.add_row(alias, row);
        out
    }

    /// The bare-field view of one source.
    pub fn row(&self, alias: &str) -> Row {
        let prefix = format!("{alias}.");
        let mut row = Row::new();
        for (key, values) in &self.values {
            if let Some(field) = key.strip_prefix(&prefix) {
                row.set(field, values.clone());
            }
        }
        row
    }

    /// Only the keys belonging to `aliases`.
    pub fn restricted<'a>(&self, aliases: impl IntoIterator<Item = &'a str>) -> SourceValues {
        let aliases: BTreeSet<&str> = aliases.into_iter().collect();
        SourceValues {
            values: self
                .values
                .iter()
                .filter(|(k, _)| {
                    k.split_once('.')
                        .is_some_and(|(alias, _)| aliases.contains(alias))
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl AttributeLookup for SourceValues {
    fn lookup(&self, name: &str) -> Option<&[Value]> {
        self.get(name)
    }
}

// ============================================================================
// Row
// ============================================================================

/// Accepts `{"id": 1}` as well as `{"id": [1, 2]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Value>),
    One(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, OneOrMany>", into = "BTreeMap<String, Vec<Value>>")]
pub struct Row {
    fields: BTreeMap<String, Vec<Value>>,
}

impl From<BTreeMap<String, OneOrMany>> for Row {
    fn from(raw: BTreeMap<String, OneOrMany>) -> Self {
        let mut row = Row::new();
        for (field, values) in raw {
            match values {
                OneOrMany::One(v) => row.add(field, v),
                OneOrMany::Many(vs) => row.set(field, vs),
            }
        }
        row
    }
}

impl From<Row> for BTreeMap<String, Vec<Value>> {
    fn from(row: Row) -> Self {
        row.fields
    }
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K: Into<String>, V: Into<Value>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        let mut row = Row::new();
        for (k, v) in pairs {
            row.add(k, v.into());
        }
        row
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn add(&mut self, field: impl Into<String>, value: Value) {
        push_unique(self.fields.entry(field.into()).or_default(), value);
    }

    pub fn set(&mut self, field: impl Into<String>, values: Vec<Value>) {
        let field = field.into();
        if values.is_empty() {
            self.fields.remove(&field);
            return;
        }
        let mut unique = Vec::with_capacity(values.len());
        for v in values {
            push_unique(&mut unique, v);
        }
        self.fields.insert(field, unique);
    }

    pub fn remove(&mut self, field: &str) -> Option<Vec<Value>> {
        let key = self.key_of(field)?.to_string();
        self.fields.remove(&key)
    }

    pub fn get(&self, field: &str) -> Option<&[Value]> {
        self.key_of(field)
            .and_then(|k| self.fields.get(k))
            .map(Vec::as_slice)
    }

    pub fn first(&self, field: &str) -> Option<&Value> {
        self.get(field).and_then(|v| v.first())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    fn key_of(&self, field: &str) -> Option<&str> {
        if self.fields.contains_key(field) {
            return Some(self.fields.get_key_value(field)?.0.as_str());
        }
        self.fields
            .keys()
            .find(|k| k.eq_ignore_ascii_case(field))
            .map(String::as_str)
    }
}

impl AttributeLookup for Row {
    fn lookup(&self, name: &str) -> Option<&[Value]> {
        self.get(name)
    }
}

// ============================================================================
// Attributes
// ============================================================================

/// Logical entry attributes. Names compare case-insensitively and keep the
/// spelling they were first added with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes {
    inner: Row,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K: Into<String>, V: Into<Value>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        let mut attrs = Attributes::new();
        for (k, v) in pairs {
            attrs.add(k, v.into());
        }
        attrs
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn add(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let key = self.inner.key_of(&name).map(str::to_string).unwrap_or(name);
        self.inner.add(key, value);
    }

    pub fn add_all(&mut self, name: impl Into<String>, values: impl IntoIterator<Item = Value>) {
        let name = name.into();
        for v in values {
            self.add(name.clone(), v);
        }
    }

    pub fn set(&mut self, name: impl Into<String>, values: Vec<Value>) {
        let name = name.into();
        let key = self.inner.key_of(&name).map(str::to_string).unwrap_or(name);
        self.inner.set(key, values);
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<Value>> {
        self.inner.remove(name)
    }

    /// Remove the given values; the attribute disappears when none remain.
    pub fn remove_values(&mut self, name: &str, values: &[Value]) {
        let Some(current) = self.inner.get(name) else {
            return;
        };
        let kept: Vec<Value> = current
            .iter()
            .filter(|v| !values.iter().any(|r| same_value(r, v)))
            .cloned()
            .collect();
        self.set(name.to_string(), kept);
    }

    pub fn get(&self, name: &str) -> Option<&[Value]> {
        self.inner.get(name)
    }

    pub fn first(&self, name: &str) -> Option<&Value> {
        self.inner.first(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.fields()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.inner.iter()
    }

    /// Keep only the named attributes.
    pub fn retain_names(&mut self, names: &[String]) {
        let drop: Vec<String> = self
            .names()
            .filter(|n| !names.iter().any(|w| w.eq_ignore_ascii_case(n)))
            .map(str::to_string)
            .collect();
        for name in drop {
            self.inner.remove(&name);
        }
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    vdir_mapping::compare(a, vdir_mapping::Operator::Eq, b)
}

impl AttributeLookup for Attributes {
    fn lookup(&self, name: &str) -> Option<&[Value]> {
        self.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_values_prefix_handling() {
        let mut sv = SourceValues::new();
        sv.add_row("u", &Row::from_pairs([("id", 1i64), ("name", 2i64)]));
        sv.add("us.id", Value::Integer(9));
        assert!(sv.contains_source("u"));
        assert!(sv.contains_source("us"));
        assert!(!sv.contains_source("x"));
        assert_eq!(sv.row("u").fields().collect::<Vec<_>>(), vec!["id", "name"]);
        sv.remove_source("u");
        assert!(!sv.contains_source("u"));
        assert!(sv.contains_source("us"));
    }

    #[test]
    fn values_are_unique_in_insertion_order() {
        let mut sv = SourceValues::new();
        sv.add_all("a.x", [Value::text("b"), Value::text("a"), Value::text("b")]);
        assert_eq!(sv.get("a.x").unwrap(), &[Value::text("b"), Value::text("a")]);
        sv.set("a.x", vec![]);
        assert!(!sv.contains_key("a.x"));
    }

    #[test]
    fn attributes_are_case_insensitive() {
        let mut attrs = Attributes::new();
        attrs.add("cn", Value::text("Alice"));
        attrs.add("CN", Value::text("Al"));
        assert_eq!(attrs.get("Cn").unwrap().len(), 2);
        attrs.remove_values("cn", &[Value::text("alice")]);
        assert_eq!(attrs.get("cn").unwrap(), &[Value::text("Al")]);
        assert_eq!(attrs.names().collect::<Vec<_>>(), vec!["cn"]);
    }

    #[test]
    fn row_accepts_scalar_or_list_json() {
        let row: Row = serde_json::from_str(r#"{"id": 1, "tags": ["a", "b"]}"#).unwrap();
        assert_eq!(row.get("id").unwrap(), &[Value::Integer(1)]);
        assert_eq!(row.get("tags").unwrap().len(), 2);
    }
}
