//! Entry mappings, source mappings, relationships and physical source configs.

use crate::dn::Dn;
use crate::error::MappingError;
use crate::filter::Filter;
use crate::value::{FieldType, Operator};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

// ============================================================================
// Qualified field references
// ============================================================================

/// `<alias>.<field>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldRef {
    pub source: String,
    pub field: String,
}

impl FieldRef {
    pub fn new(source: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            field: field.into(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, MappingError> {
        let text = text.trim();
        match text.split_once('.') {
            Some((source, field)) if !source.is_empty() && !field.is_empty() => {
                Ok(Self::new(source, field))
            }
            _ => Err(MappingError::InvalidFieldRef(text.to_string())),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.source, self.field)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.field)
    }
}

impl TryFrom<String> for FieldRef {
    type Error = MappingError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        FieldRef::parse(&text)
    }
}

impl From<FieldRef> for String {
    fn from(r: FieldRef) -> Self {
        r.qualified()
    }
}

// ============================================================================
// Relationships
// ============================================================================

/// `lhs <operator> rhs` between two qualified fields.
///
/// Stored as configured. Traversals that know which side is already resolved
/// call `oriented_from` to get a copy whose `lhs` is on the known side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub lhs: FieldRef,
    pub operator: Operator,
    pub rhs: FieldRef,
}

impl Relationship {
    pub fn new(lhs: FieldRef, operator: Operator, rhs: FieldRef) -> Self {
        Self { lhs, operator, rhs }
    }

    /// Parse `A.id = B.a_id` (any operator from `Operator::parse`).
    pub fn parse(text: &str) -> Result<Self, MappingError> {
        let invalid = || MappingError::InvalidRelationship(text.trim().to_string());
        let symbols = ["<>", "<=", ">=", "!=", "==", "=", "<", ">"];
        let (pos, symbol) = symbols
            .iter()
            .filter_map(|s| text.find(s).map(|p| (p, *s)))
            .min_by_key(|(p, s)| (*p, std::cmp::Reverse(s.len())))
            .ok_or_else(invalid)?;
        let operator = Operator::parse(symbol).ok_or_else(invalid)?;
        let lhs = FieldRef::parse(&text[..pos]).map_err(|_| invalid())?;
        let rhs = FieldRef::parse(&text[pos + symbol.len()..]).map_err(|_| invalid())?;
        Ok(Self::new(lhs, operator, rhs))
    }

    pub fn touches(&self, alias: &str) -> bool {
        self.lhs.source == alias || self.rhs.source == alias
    }

    /// Operands swapped, operator mirrored. Holds for exactly the same rows.
    pub fn reversed(&self) -> Self {
        Self {
            lhs: self.rhs.clone(),
            operator: self.operator.mirrored(),
            rhs: self.lhs.clone(),
        }
    }

    /// Copy whose `lhs` belongs to `alias`, when either side does.
    pub fn oriented_from(&self, alias: &str) -> Self {
        if self.lhs.source != alias && self.rhs.source == alias {
            self.reversed()
        } else {
            self.clone()
        }
    }

    /// `=` and `<>` are unaffected by operand order.
    pub fn is_symmetric(&self) -> bool {
        matches!(self.operator, Operator::Eq | Operator::Ne)
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.operator, self.rhs)
    }
}

// ============================================================================
// Derivations
// ============================================================================

/// How a field or attribute value is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivation {
    /// A fixed value.
    Constant(String),
    /// Copy of a variable: a logical attribute name or a qualified `alias.field`.
    Variable(String),
    /// Template with `${name}` placeholders.
    Expression(String),
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\s*([^}\s]+)\s*\}").expect("valid placeholder regex"))
}

impl Derivation {
    pub fn is_constant(&self) -> bool {
        matches!(self, Derivation::Constant(_))
    }

    /// Variables this derivation reads.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Derivation::Constant(_) => vec![],
            Derivation::Variable(name) => vec![name.as_str()],
            Derivation::Expression(template) => placeholder_regex()
                .captures_iter(template)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect(),
        }
    }

    /// Source aliases referenced through qualified variables.
    pub fn source_aliases(&self) -> Vec<&str> {
        self.variables()
            .into_iter()
            .filter_map(|v| v.split_once('.').map(|(alias, _)| alias))
            .collect()
    }

    /// Expand `${name}` placeholders with `resolve`; `None` if any is unbound.
    pub fn expand_template<F>(template: &str, mut resolve: F) -> Option<String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in placeholder_regex().captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            out.push_str(&resolve(name.as_str())?);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Some(out)
    }
}

// ============================================================================
// Field and attribute mappings
// ============================================================================

/// Derivation of one physical field of a source mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub name: String,
    pub derivation: Derivation,
}

/// Derivation of one logical attribute of an entry mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMapping {
    pub name: String,
    pub rdn: bool,
    pub derivation: Derivation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Add,
    Modify,
    ModRdn,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Add => "add",
            OperationKind::Modify => "modify",
            OperationKind::ModRdn => "modrdn",
            OperationKind::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludeFlags {
    pub add: bool,
    pub modify: bool,
    pub modrdn: bool,
    pub delete: bool,
}

impl Default for IncludeFlags {
    fn default() -> Self {
        Self {
            add: true,
            modify: true,
            modrdn: true,
            delete: true,
        }
    }
}

/// An aliased reference to a physical source inside one entry mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMapping {
    pub alias: String,
    pub source_name: String,
    pub fields: Vec<FieldMapping>,
    /// Inner-join when true, left-join when false.
    pub required: bool,
    pub read_only: bool,
    /// Explicit primary-source marker.
    pub primary: bool,
    /// Static filter ANDed into every fetch of this source.
    pub filter: Option<Filter>,
    pub include_on: IncludeFlags,
}

impl SourceMapping {
    pub fn new(alias: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            source_name: source_name.into(),
            fields: vec![],
            required: true,
            read_only: false,
            primary: false,
            filter: None,
            include_on: IncludeFlags::default(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Whether write operations of `kind` touch this source.
    pub fn includes(&self, kind: OperationKind) -> bool {
        if self.read_only {
            return false;
        }
        match kind {
            OperationKind::Add => self.include_on.add,
            OperationKind::Modify => self.include_on.modify,
            OperationKind::ModRdn => self.include_on.modrdn,
            OperationKind::Delete => self.include_on.delete,
        }
    }
}

/// A logical entry type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMapping {
    pub dn: Dn,
    pub object_classes: Vec<String>,
    pub attributes: Vec<AttributeMapping>,
    pub sources: Vec<SourceMapping>,
    pub relationships: Vec<Relationship>,
}

impl EntryMapping {
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            object_classes: vec![],
            attributes: vec![],
            sources: vec![],
            relationships: vec![],
        }
    }

    pub fn source(&self, alias: &str) -> Option<&SourceMapping> {
        self.sources.iter().find(|s| s.alias == alias)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeMapping> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn rdn_attributes(&self) -> impl Iterator<Item = &AttributeMapping> {
        self.attributes.iter().filter(|a| a.rdn)
    }
}

// ============================================================================
// Physical sources
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl FieldConfig {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            primary_key: false,
            case_sensitive: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub fields: Vec<FieldConfig>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, fields: Vec<FieldConfig>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &FieldConfig> {
        self.fields.iter().filter(|f| f.primary_key)
    }
}
