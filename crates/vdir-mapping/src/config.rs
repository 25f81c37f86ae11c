//! JSON partition configuration.
//!
//! ```json
//! {
//!   "name": "example",
//!   "sources": [{ "name": "users", "fields": [{ "name": "id", "type": "INTEGER", "primary_key": true }] }],
//!   "entries": [{
//!     "dn": "uid=...,ou=Users,dc=example,dc=com",
//!     "object_classes": ["person"],
//!     "attributes": [{ "name": "uid", "rdn": true, "variable": "u.name" }],
//!     "sources": [{ "alias": "u", "source": "users", "fields": [{ "name": "name", "variable": "uid" }] }],
//!     "relationships": ["u.id = g.user_id"]
//!   }]
//! }
//! ```

use crate::dn::Dn;
use crate::error::MappingError;
use crate::filter_parser::parse_filter;
use crate::mapping::{
    AttributeMapping, Derivation, EntryMapping, FieldMapping, IncludeFlags, Relationship,
    SourceConfig, SourceMapping,
};
use crate::partition::Partition;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub entries: Vec<EntryConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryConfig {
    pub dn: String,
    #[serde(default)]
    pub object_classes: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
    #[serde(default)]
    pub sources: Vec<SourceMappingConfig>,
    #[serde(default)]
    pub relationships: Vec<String>,
}

/// Exactly one of `constant`, `variable`, `expression` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl DerivationConfig {
    fn resolve(&self, entry: &str, name: &str) -> Result<Derivation, MappingError> {
        match (&self.constant, &self.variable, &self.expression) {
            (Some(c), None, None) => Ok(Derivation::Constant(c.clone())),
            (None, Some(v), None) => Ok(Derivation::Variable(v.clone())),
            (None, None, Some(e)) => Ok(Derivation::Expression(e.clone())),
            _ => Err(MappingError::InvalidDerivation {
                entry: entry.to_string(),
                name: name.to_string(),
                message: "needs exactly one of constant, variable, expression".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeConfig {
    pub name: String,
    #[serde(default)]
    pub rdn: bool,
    #[serde(flatten)]
    pub derivation: DerivationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldMappingConfig {
    pub name: String,
    #[serde(flatten)]
    pub derivation: DerivationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMappingConfig {
    pub alias: String,
    pub source: String,
    #[serde(default)]
    pub fields: Vec<FieldMappingConfig>,
    #[serde(default = "yes")]
    pub required: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default = "yes")]
    pub include_on_add: bool,
    #[serde(default = "yes")]
    pub include_on_modify: bool,
    #[serde(default = "yes")]
    pub include_on_modrdn: bool,
    #[serde(default = "yes")]
    pub include_on_delete: bool,
}

impl PartitionConfig {
    pub fn from_json(text: &str) -> Result<Self, MappingError> {
        serde_json::from_str(text).map_err(|e| MappingError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, MappingError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MappingError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn into_partition(self) -> Result<Partition, MappingError> {
        let entries = self
            .entries
            .iter()
            .map(EntryConfig::to_mapping)
            .collect::<Result<Vec<_>, _>>()?;
        Partition::new(self.name, self.sources, entries)
    }
}

impl EntryConfig {
    pub fn to_mapping(&self) -> Result<EntryMapping, MappingError> {
        let dn = Dn::parse(&self.dn)?;
        let entry = dn.to_string();
        let mut mapping = EntryMapping::new(dn);
        mapping.object_classes = self.object_classes.clone();

        for attr in &self.attributes {
            mapping.attributes.push(AttributeMapping {
                name: attr.name.clone(),
                rdn: attr.rdn,
                derivation: attr.derivation.resolve(&entry, &attr.name)?,
            });
        }

        for source in &self.sources {
            let mut sm = SourceMapping::new(&source.alias, &source.source);
            sm.required = source.required;
            sm.read_only = source.read_only;
            sm.primary = source.primary;
            sm.filter = source.filter.as_deref().map(parse_filter).transpose()?;
            sm.include_on = IncludeFlags {
                add: source.include_on_add,
                modify: source.include_on_modify,
                modrdn: source.include_on_modrdn,
                delete: source.include_on_delete,
            };
            for field in &source.fields {
                sm.fields.push(FieldMapping {
                    name: field.name.clone(),
                    derivation: field
                        .derivation
                        .resolve(&entry, &format!("{}.{}", source.alias, field.name))?,
                });
            }
            mapping.sources.push(sm);
        }

        mapping.relationships = self
            .relationships
            .iter()
            .map(|r| Relationship::parse(r))
            .collect::<Result<_, _>>()?;
        Ok(mapping)
    }
}

impl Partition {
    pub fn from_json(text: &str) -> Result<Self, MappingError> {
        PartitionConfig::from_json(text)?.into_partition()
    }

    pub fn load(path: &Path) -> Result<Self, MappingError> {
        PartitionConfig::load(path)?.into_partition()
    }
}
