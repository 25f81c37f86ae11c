//! Search execution for one entry mapping.
//!
//! ```text
//!   Start ──► LocalResolve ──► ParentResolve ──► group by DN ──► Merge ──► Done
//!     │           (local.rs)       (parent.rs)                 (merge.rs)
//!     └── static entry: DNs from parent values, no fetch
//! ```
//!
//! Every backend fetch goes through `Resolver::fetch`, which qualifies rows by
//! alias, prefixes them with the parent context and counts them against the
//! per-fetch size limit. Reloads of partial entries are not charged.

mod local;
mod parent;

pub use local::{LocalOutcome, LocalRunner};
pub use parent::ParentRunner;

use crate::backend::{Backend, FetchRequest};
use crate::config::EngineConfig;
use crate::context::OperationContext;
use crate::dns::compute_dns;
use crate::error::{EngineError, ErrorKind, Result};
use crate::graph::{EdgeId, Flow, NodeId, SourceGraph};
use crate::interpreter::Interpreter;
use crate::join::JoinEngine;
use crate::merge::merge;
use crate::planner::SearchPlan;
use crate::projection::generate_filter_for_rows;
use crate::request::Entry;
use crate::values::{Attributes, SourceValues};
use ahash::AHashMap;
use tracing::{debug, warn};
use vdir_mapping::filter::OBJECT_CLASS;
use vdir_mapping::{append_and, append_or, Dn, EntryId, Filter, Partition, Relationship, Value};

// ============================================================================
// Shared resolution state
// ============================================================================

/// Everything a search step needs besides the interpreter.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    pub partition: &'a Partition,
    pub graphs: &'a [SourceGraph],
    pub backend: &'a dyn Backend,
    pub config: &'a EngineConfig,
    pub context: &'a OperationContext,
}

impl<'a> Resolver<'a> {
    pub fn graph(&self, entry: EntryId) -> &'a SourceGraph {
        &self.graphs[entry.index()]
    }

    /// Fetch one source. Each row comes back as `base` plus the row under the
    /// node's alias.
    pub fn fetch(
        &self,
        graph: &SourceGraph,
        node: NodeId,
        filter: Option<&Filter>,
        base: &SourceValues,
    ) -> Result<Vec<SourceValues>> {
        let source = graph.node(node);
        let config = self
            .partition
            .source_config(&source.source_name)
            .ok_or_else(|| {
                EngineError::ResolutionFailure(format!("unknown source `{}`", source.source_name))
            })?;
        let order_by: Vec<String> = config.primary_keys().map(|f| f.name.clone()).collect();
        let request = FetchRequest {
            source: config,
            filter,
            order_by: &order_by,
        };

        let stream = self
            .backend
            .fetch(&request)
            .map_err(|e| EngineError::backend(&source.source_name, e))?;
        let mut rows = Vec::new();
        for row in stream {
            let row = row.map_err(|e| EngineError::backend(&source.source_name, e))?;
            self.context.count_row(rows.len() + 1)?;
            rows.push(SourceValues::with_row(base, &source.alias, &row));
        }

        debug!(
            source = %source.alias,
            filter = %filter.map(ToString::to_string).unwrap_or_default(),
            rows = rows.len(),
            "fetched"
        );
        Ok(rows)
    }

    /// The static filter configured on a source mapping.
    pub fn static_filter(&self, graph: &SourceGraph, node: NodeId) -> Option<&'a Filter> {
        self.partition
            .effective_source(graph.entry(), &graph.node(node).alias)
            .and_then(|s| s.mapping.filter.as_ref())
    }
}

/// One stacked traversal step: the filter for the next fetch and the
/// relationships that join it, `lhs` on the already-known side.
#[derive(Debug, Clone, Default)]
struct Frame {
    filter: Option<Filter>,
    relationships: Vec<Relationship>,
}

/// The fetch-and-join step both runners share.
struct Collector<'a, 'r> {
    resolver: Resolver<'a>,
    graph: &'a SourceGraph,
    plan: &'r SearchPlan,
    parent: &'r SourceValues,
    results: Vec<SourceValues>,
    started: bool,
    filtered: bool,
}

impl<'a, 'r> Collector<'a, 'r> {
    fn new(
        resolver: Resolver<'a>,
        graph: &'a SourceGraph,
        plan: &'r SearchPlan,
        parent: &'r SourceValues,
    ) -> Self {
        Self {
            resolver,
            graph,
            plan,
            parent,
            results: vec![],
            started: false,
            filtered: false,
        }
    }

    fn join_engine(&self) -> JoinEngine<'a> {
        JoinEngine::new(self.resolver.partition, self.graph.entry())
    }

    fn is_resolved(&self, node: NodeId) -> bool {
        let alias = &self.graph.node(node).alias;
        self.started
            && !self.results.is_empty()
            && self.results.iter().all(|r| r.contains_source(alias))
    }

    /// Resolve `node` into the running results.
    fn absorb(&mut self, node: NodeId, frame: &Frame) -> Result<Flow> {
        if self.is_resolved(node) {
            let join = self.join_engine();
            self.results
                .retain(|r| join.evaluate(&frame.relationships, r, r));
            return Ok(self.flow());
        }

        if self.plan.filter(node).is_some() {
            self.filtered = true;
        }
        let graph = self.graph;
        let source = graph.node(node);
        let filter = append_and(
            frame.filter.clone(),
            self.resolver.static_filter(self.graph, node).cloned(),
        );
        let fetched = match self
            .resolver
            .fetch(self.graph, node, filter.as_ref(), self.parent)
        {
            Ok(rows) => rows,
            Err(err)
                if self.started
                    && !source.required
                    && err.kind() == ErrorKind::BackendFailure
                    && self.resolver.config.absorb_optional_failures =>
            {
                warn!(source = %source.alias, error = %err, "optional source failed, contributing nothing");
                vec![]
            }
            Err(err) => return Err(err),
        };

        if !self.started {
            self.results = fetched;
            self.started = true;
        } else if source.required {
            self.results = self
                .join_engine()
                .join(&self.results, &fetched, &frame.relationships);
            self.close_cycles(node);
        } else {
            self.results = self
                .join_engine()
                .left_join(&self.results, &fetched, &frame.relationships);
        }
        Ok(self.flow())
    }

    /// Enforce edges from `node` back to sources resolved earlier. The
    /// traversal never follows those edges itself.
    fn close_cycles(&mut self, node: NodeId) {
        let graph = self.graph;
        let join = self.join_engine();
        for (edge, other) in graph.neighbors(node) {
            if other == node || !self.is_resolved(other) {
                continue;
            }
            let relationships = graph.relationships_from(edge, node);
            self.results
                .retain(|r| join.evaluate(&relationships, r, r));
        }
    }

    /// The frame for following `edge` into `to`, or `None` to prune.
    ///
    /// The fetch filter is generated from the values already known on the
    /// other side. No known values means no possible match: a required
    /// target then empties the results.
    fn enter(&mut self, edge: EdgeId, from: NodeId, to: NodeId) -> Option<Frame> {
        if self.results.is_empty() {
            return None;
        }
        let graph = self.graph;
        let relationships = graph.relationships_from(edge, from);
        if self.is_resolved(to) {
            return Some(Frame {
                filter: None,
                relationships,
            });
        }

        let target = graph.node(to);
        let generated = generate_filter_for_rows(&target.alias, &relationships, &self.results);
        if generated.is_none() {
            if target.required {
                debug!(source = %target.alias, "no join values for required source");
                self.results.clear();
            }
            return None;
        }
        Some(Frame {
            filter: append_and(generated, self.plan.filter(to).cloned()),
            relationships,
        })
    }

    fn flow(&self) -> Flow {
        if self.results.is_empty() {
            Flow::Prune
        } else {
            Flow::Descend
        }
    }
}

// ============================================================================
// Row resolution
// ============================================================================

/// Joined rows for one entry mapping, plus whether any fetch was narrowed by
/// the logical filter (in which case multi-row sources may be partial).
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    pub rows: Vec<SourceValues>,
    pub complete: bool,
}

/// Run the plan for `entry` against `parent` values.
pub fn resolve_rows(
    resolver: Resolver<'_>,
    entry: EntryId,
    plan: &SearchPlan,
    parent: &SourceValues,
) -> Result<RowBatch> {
    let graph = resolver.graph(entry);
    let sources = resolver.partition.effective_sources(entry);

    if sources.len() == 1 && sources[0].local {
        // Single local source: straight pass-through, every failure fatal.
        let node = NodeId(0);
        let start = plan.start(graph, parent);
        let filter = append_and(
            start.and_then(|s| s.filter),
            resolver.static_filter(graph, node).cloned(),
        );
        let rows = resolver.fetch(graph, node, filter.as_ref(), parent)?;
        return Ok(RowBatch {
            rows,
            complete: plan.filter(node).is_none(),
        });
    }

    let local = LocalRunner::new(resolver, graph, plan, parent).run()?;
    let complete = !local.filtered;
    let rows = ParentRunner::new(resolver, graph, plan, parent).run(local.rows, local.started)?;
    Ok(RowBatch { rows, complete })
}

// ============================================================================
// Grouping
// ============================================================================

/// A candidate entry assembled from every row that computes the same DN.
#[derive(Debug, Clone)]
pub struct EntryData {
    pub dn: Dn,
    pub mapping: EntryId,
    pub values: SourceValues,
    pub rows: Vec<SourceValues>,
    /// Primary-source key values, used to reload partial entries.
    pub primary_key: SourceValues,
    pub complete: bool,
}

/// Group rows by computed DN. Rows whose DN does not sit under `parent` are
/// dropped.
pub fn group_rows(
    resolver: Resolver<'_>,
    interpreter: &mut dyn Interpreter,
    entry: EntryId,
    parent: Option<&Dn>,
    batch: RowBatch,
) -> Result<Vec<EntryData>> {
    let partition = resolver.partition;
    let key_fields = primary_key_fields(resolver, entry);

    let mut out: Vec<EntryData> = Vec::new();
    let mut index: AHashMap<String, usize> = AHashMap::new();
    for row in batch.rows {
        for dn in compute_dns(partition, interpreter, entry, &row, parent)? {
            if parent.is_some_and(|p| dn.parent() != *p) {
                continue;
            }
            let slot = *index.entry(dn.normalized()).or_insert_with(|| {
                out.push(EntryData {
                    dn: dn.clone(),
                    mapping: entry,
                    values: SourceValues::new(),
                    rows: vec![],
                    primary_key: SourceValues::new(),
                    complete: batch.complete,
                });
                out.len() - 1
            });
            let data = &mut out[slot];
            data.values.merge(&row);
            for key in &key_fields {
                if let Some(values) = row.get(key) {
                    data.primary_key.add_all(key.clone(), values.iter().cloned());
                }
            }
            data.rows.push(row.clone());
        }
    }
    Ok(out)
}

/// Qualified primary-key fields of the entry's primary source.
fn primary_key_fields(resolver: Resolver<'_>, entry: EntryId) -> Vec<String> {
    let Some(primary) = resolver.partition.primary_source(entry) else {
        return vec![];
    };
    let Some(config) = resolver.partition.source_config(&primary.source_name) else {
        return vec![];
    };
    let mut keys: Vec<&str> = config.primary_keys().map(|f| f.name.as_str()).collect();
    if keys.is_empty() {
        keys = config.fields.iter().map(|f| f.name.as_str()).collect();
    }
    keys.into_iter()
        .map(|k| format!("{}.{k}", primary.alias))
        .collect()
}

/// Filter on the primary source selecting exactly the keyed rows.
fn key_filter(alias: &str, key: &SourceValues) -> Option<Filter> {
    let prefix = format!("{alias}.");
    let mut filter = None;
    for (qualified, values) in key.iter() {
        let Some(field) = qualified.strip_prefix(&prefix) else {
            continue;
        };
        let any = values.iter().fold(None, |acc, v| {
            append_or(acc, Some(Filter::equal(field, v.to_string())))
        });
        filter = append_and(filter, any);
    }
    filter
}

/// Re-resolve entries whose rows were narrowed by the logical filter, keyed
/// by primary key only, so every multi-valued source comes back whole.
fn reload(
    resolver: Resolver<'_>,
    interpreter: &mut dyn Interpreter,
    entry: EntryId,
    parent: &ParentContext,
    data: Vec<EntryData>,
) -> Result<Vec<EntryData>> {
    let graph = resolver.graph(entry);
    let Some(primary) = graph.primary() else {
        return Ok(data);
    };
    let alias = &graph.node(primary).alias;
    let keys = data
        .iter()
        .filter(|d| !d.complete)
        .fold(None, |acc, d| append_or(acc, key_filter(alias, &d.primary_key)));
    if keys.is_none() {
        return Ok(data);
    }

    debug!(entries = data.len(), "reloading partial entries");
    let mut plan = SearchPlan::build(resolver.partition, graph, None);
    plan.restrict_to(primary, keys);
    let mut batch = resolver
        .context
        .uncharged(|| resolve_rows(resolver, entry, &plan, &parent.values))?;
    batch.complete = true;
    group_rows(resolver, interpreter, entry, Some(&parent.dn), batch)
}

// ============================================================================
// Entry-level search
// ============================================================================

/// The resolved parent of the entries being searched.
#[derive(Debug, Clone, Default)]
pub struct ParentContext {
    pub dn: Dn,
    pub values: SourceValues,
}

impl ParentContext {
    pub fn new(dn: Dn, values: SourceValues) -> Self {
        Self { dn, values }
    }
}

impl From<&Entry> for ParentContext {
    fn from(entry: &Entry) -> Self {
        Self {
            dn: entry.dn.clone(),
            values: entry.source_values.clone(),
        }
    }
}

/// Every entry of `entry` directly under `parent`.
///
/// `pushdown` narrows source fetches; the caller still checks the logical
/// filter on the returned entries. With `dn_only`, entries carry no
/// attributes and skip completeness checks.
pub fn search_entry(
    resolver: Resolver<'_>,
    interpreter: &mut dyn Interpreter,
    entry: EntryId,
    parent: &ParentContext,
    pushdown: Option<&Filter>,
    dn_only: bool,
) -> Result<Vec<Entry>> {
    let partition = resolver.partition;
    let mapping = partition.entry(entry);

    if partition.is_static(entry) {
        return static_entries(resolver, interpreter, entry, parent);
    }

    let dynamic_rdn = mapping.dn.rdn().is_some_and(|r| r.is_dynamic());
    if dn_only && !dynamic_rdn {
        return Ok(compute_dns(partition, interpreter, entry, &parent.values, Some(&parent.dn))?
            .into_iter()
            .map(|dn| bare_entry(dn, entry, parent.values.clone(), vec![]))
            .collect());
    }

    let graph = resolver.graph(entry);
    let plan = SearchPlan::build(partition, graph, if dn_only { None } else { pushdown });
    let batch = resolve_rows(resolver, entry, &plan, &parent.values)?;
    let complete = batch.complete;
    let mut data = group_rows(resolver, interpreter, entry, Some(&parent.dn), batch)?;

    if dn_only {
        return Ok(data
            .into_iter()
            .map(|d| bare_entry(d.dn, entry, d.values, d.rows))
            .collect());
    }
    if !complete {
        data = reload(resolver, interpreter, entry, parent, data)?;
    }

    let join = JoinEngine::new(partition, entry);
    let mut out = Vec::with_capacity(data.len());
    for candidate in &data {
        if let Some(found) = merge(partition, graph, join, interpreter, candidate)? {
            out.push(found);
        }
    }
    Ok(out)
}

fn bare_entry(dn: Dn, mapping: EntryId, values: SourceValues, rows: Vec<SourceValues>) -> Entry {
    Entry {
        dn,
        mapping,
        attributes: Attributes::new(),
        source_values: values,
        rows,
    }
}

/// Entries of a mapping with no sources: DNs from the parent, constant
/// attributes only.
fn static_entries(
    resolver: Resolver<'_>,
    interpreter: &mut dyn Interpreter,
    entry: EntryId,
    parent: &ParentContext,
) -> Result<Vec<Entry>> {
    let mapping = resolver.partition.entry(entry);
    let dns = compute_dns(
        resolver.partition,
        interpreter,
        entry,
        &parent.values,
        Some(&parent.dn),
    )?;

    interpreter.clear();
    interpreter.set_values(&parent.values);
    let mut attributes = Attributes::new();
    for attribute in &mapping.attributes {
        if let Some(values) = interpreter.eval(&attribute.derivation)? {
            attributes.add_all(attribute.name.clone(), values);
        }
    }
    for class in &mapping.object_classes {
        attributes.add(OBJECT_CLASS, Value::text(class.clone()));
    }

    Ok(dns
        .into_iter()
        .map(|dn| {
            let mut attributes = attributes.clone();
            if let Some(rdn) = dn.rdn() {
                for (attr, value) in rdn.pairs() {
                    if !attributes.contains(attr) {
                        attributes.add(attr.clone(), Value::text(value.clone()));
                    }
                }
            }
            Entry {
                dn,
                mapping: entry,
                attributes,
                source_values: parent.values.clone(),
                rows: vec![],
            }
        })
        .collect())
}

/// `(&(a=x)(b=y))` from a concrete RDN.
pub fn rdn_filter(dn: &Dn) -> Option<Filter> {
    dn.rdn()?.pairs().iter().fold(None, |acc, (attr, value)| {
        append_and(acc, Some(Filter::equal(attr, value)))
    })
}
