//! Partitions: the tree of entry mappings plus the physical source catalog.
//!
//! A partition is built once at load time and shared read-only afterwards.
//! Entry mappings are addressed by `EntryId` (index into an arena); parents
//! are resolved by DN, so the parent of `uid=...,ou=Users,dc=x` is whichever
//! mapping is configured at `ou=Users,dc=x`.

use crate::dn::Dn;
use crate::error::MappingError;
use crate::mapping::{EntryMapping, FieldConfig, SourceConfig, SourceMapping};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub u32);

impl EntryId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct EntryNode {
    mapping: EntryMapping,
    parent: Option<EntryId>,
    children: Vec<EntryId>,
    /// Index into `mapping.sources`.
    primary: Option<usize>,
}

/// A source mapping as seen from some entry: either its own, or inherited
/// from an ancestor.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveSource<'a> {
    pub owner: EntryId,
    pub mapping: &'a SourceMapping,
    pub local: bool,
}

impl EffectiveSource<'_> {
    pub fn alias(&self) -> &str {
        &self.mapping.alias
    }
}

#[derive(Debug, Clone)]
pub struct Partition {
    name: String,
    entries: Vec<EntryNode>,
    sources: BTreeMap<String, SourceConfig>,
}

impl Partition {
    /// Build and validate a partition.
    pub fn new(
        name: impl Into<String>,
        sources: Vec<SourceConfig>,
        entries: Vec<EntryMapping>,
    ) -> Result<Self, MappingError> {
        let sources: BTreeMap<String, SourceConfig> =
            sources.into_iter().map(|s| (s.name.clone(), s)).collect();

        let mut nodes: Vec<EntryNode> = entries
            .into_iter()
            .map(|mapping| EntryNode {
                mapping,
                parent: None,
                children: vec![],
                primary: None,
            })
            .collect();

        let mut seen = BTreeSet::new();
        for node in &nodes {
            if !seen.insert(node.mapping.dn.normalized()) {
                return Err(MappingError::DuplicateEntry(node.mapping.dn.to_string()));
            }
        }

        // Parent links by DN.
        for i in 0..nodes.len() {
            let parent_dn = nodes[i].mapping.dn.parent();
            if nodes[i].mapping.dn.is_root() {
                continue;
            }
            let parent = nodes
                .iter()
                .position(|n| n.mapping.dn == parent_dn)
                .map(|p| EntryId(p as u32));
            nodes[i].parent = parent;
            if let Some(p) = parent {
                nodes[p.index()].children.push(EntryId(i as u32));
            }
        }

        let mut partition = Self {
            name: name.into(),
            entries: nodes,
            sources,
        };
        for id in partition.entry_ids().collect::<Vec<_>>() {
            let primary = partition.resolve_primary(id)?;
            partition.entries[id.index()].primary = primary;
        }
        partition.validate()?;
        Ok(partition)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_ids(&self) -> impl Iterator<Item = EntryId> {
        (0..self.entries.len() as u32).map(EntryId)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: EntryId) -> &EntryMapping {
        &self.entries[id.index()].mapping
    }

    pub fn parent(&self, id: EntryId) -> Option<EntryId> {
        self.entries[id.index()].parent
    }

    pub fn children(&self, id: EntryId) -> &[EntryId] {
        &self.entries[id.index()].children
    }

    /// Parent, grandparent, ... up to a root.
    pub fn ancestors(&self, id: EntryId) -> impl Iterator<Item = EntryId> + '_ {
        std::iter::successors(self.parent(id), move |p| self.parent(*p))
    }

    /// The mapping configured at exactly this DN pattern.
    pub fn entry_by_dn(&self, dn: &Dn) -> Option<EntryId> {
        self.entry_ids().find(|id| &self.entry(*id).dn == dn)
    }

    /// Mappings whose DN pattern matches a concrete DN.
    pub fn entries_matching(&self, dn: &Dn) -> Vec<EntryId> {
        self.entry_ids()
            .filter(|id| dn.matches(&self.entry(*id).dn))
            .collect()
    }

    pub fn source_config(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.get(name)
    }

    pub fn source_configs(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.values()
    }

    /// Own sources first, then each ancestor's, skipping aliases shadowed by a
    /// nearer entry.
    pub fn effective_sources(&self, id: EntryId) -> Vec<EffectiveSource<'_>> {
        let mut out: Vec<EffectiveSource<'_>> = Vec::new();
        for owner in std::iter::once(id).chain(self.ancestors(id)) {
            for mapping in &self.entry(owner).sources {
                if out.iter().any(|s| s.mapping.alias == mapping.alias) {
                    continue;
                }
                out.push(EffectiveSource {
                    owner,
                    mapping,
                    local: owner == id,
                });
            }
        }
        out
    }

    pub fn effective_source(&self, id: EntryId, alias: &str) -> Option<EffectiveSource<'_>> {
        self.effective_sources(id)
            .into_iter()
            .find(|s| s.mapping.alias == alias)
    }

    pub fn effective_relationships(&self, id: EntryId) -> Vec<&crate::mapping::Relationship> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .flat_map(|owner| self.entry(owner).relationships.iter())
            .collect()
    }

    /// Field metadata for `alias.field` as seen from entry `id`.
    pub fn field_config(&self, id: EntryId, alias: &str, field: &str) -> Option<&FieldConfig> {
        let source = self.effective_source(id, alias)?;
        self.source_config(&source.mapping.source_name)?.field(field)
    }

    pub fn primary_source(&self, id: EntryId) -> Option<&SourceMapping> {
        let node = &self.entries[id.index()];
        node.primary.map(|i| &node.mapping.sources[i])
    }

    /// No sources anywhere up the tree and only constant attributes.
    pub fn is_static(&self, id: EntryId) -> bool {
        self.effective_sources(id).is_empty()
            && std::iter::once(id)
                .chain(self.ancestors(id))
                .all(|e| {
                    self.entry(e)
                        .attributes
                        .iter()
                        .all(|a| a.derivation.is_constant())
                })
    }

    // ------------------------------------------------------------------------
    // Load-time resolution and validation
    // ------------------------------------------------------------------------

    /// Explicit `primary` flag; else the source read by the first RDN
    /// attribute; else the first declared source.
    fn resolve_primary(&self, id: EntryId) -> Result<Option<usize>, MappingError> {
        let mapping = self.entry(id);
        let flagged: Vec<usize> = mapping
            .sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.primary)
            .map(|(i, _)| i)
            .collect();
        if flagged.len() > 1 {
            return Err(MappingError::PrimarySource {
                entry: mapping.dn.to_string(),
                message: "more than one source is flagged primary".to_string(),
            });
        }
        if let Some(&i) = flagged.first() {
            return Ok(Some(i));
        }

        let from_rdn = mapping.rdn_attributes().next().and_then(|attr| {
            attr.derivation
                .source_aliases()
                .into_iter()
                .find_map(|alias| mapping.sources.iter().position(|s| s.alias == alias))
        });
        Ok(from_rdn.or(if mapping.sources.is_empty() { None } else { Some(0) }))
    }

    fn validate(&self) -> Result<(), MappingError> {
        for id in self.entry_ids() {
            let mapping = self.entry(id);
            let entry = mapping.dn.to_string();

            let mut aliases = BTreeSet::new();
            for source in &mapping.sources {
                if !aliases.insert(source.alias.as_str()) {
                    return Err(MappingError::DuplicateAlias {
                        entry,
                        alias: source.alias.clone(),
                    });
                }
                let Some(config) = self.source_config(&source.source_name) else {
                    return Err(MappingError::UnknownSource {
                        entry,
                        alias: source.alias.clone(),
                        source_name: source.source_name.clone(),
                    });
                };
                for field in &source.fields {
                    if config.field(&field.name).is_none() {
                        return Err(MappingError::UnknownField {
                            source_name: config.name.clone(),
                            field: field.name.clone(),
                        });
                    }
                }
            }

            let effective = self.effective_sources(id);
            for rel in &mapping.relationships {
                for side in [&rel.lhs, &rel.rhs] {
                    let Some(source) = effective.iter().find(|s| s.alias() == side.source) else {
                        return Err(MappingError::UnknownAlias {
                            entry,
                            alias: side.source.clone(),
                        });
                    };
                    let known = self
                        .source_config(&source.mapping.source_name)
                        .and_then(|c| c.field(&side.field));
                    if known.is_none() {
                        return Err(MappingError::UnknownField {
                            source_name: source.mapping.source_name.clone(),
                            field: side.field.clone(),
                        });
                    }
                }
            }

            for attr in &mapping.attributes {
                for alias in attr.derivation.source_aliases() {
                    if !effective.iter().any(|s| s.alias() == alias) {
                        return Err(MappingError::InvalidDerivation {
                            entry,
                            name: attr.name.clone(),
                            message: format!("reads unknown source alias `{alias}`"),
                        });
                    }
                }
            }

            if mapping.dn.rdn().is_some_and(|r| r.is_dynamic())
                && mapping.rdn_attributes().next().is_none()
            {
                return Err(MappingError::InvalidDerivation {
                    entry,
                    name: mapping
                        .dn
                        .rdn()
                        .and_then(|r| r.attributes().next())
                        .unwrap_or_default()
                        .to_string(),
                    message: "dynamic RDN has no rdn attribute mapping".to_string(),
                });
            }
        }
        Ok(())
    }
}
