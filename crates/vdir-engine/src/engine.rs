//! The engine facade: one method per logical operation.
//!
//! Source graphs are built once per entry mapping in `Engine::new` and shared
//! by every operation. Everything else (interpreter, operation context, row
//! batches) lives for one call.

use crate::backend::Backend;
use crate::config::EngineConfig;
use crate::context::OperationContext;
use crate::error::{EngineError, Result};
use crate::graph::SourceGraph;
use crate::interpreter::{DefaultInterpreterFactory, Interpreter, InterpreterFactory};
use crate::request::{Entry, Modification, Scope, SearchRequest};
use crate::search::{rdn_filter, search_entry, ParentContext, Resolver};
use crate::values::{Attributes, SourceValues};
use crate::write;
use ahash::AHashSet;
use std::sync::Arc;
use tracing::{debug, info, info_span};
use vdir_mapping::{Dn, EntryId, OperationKind, Partition, Rdn, Value};

/// Attribute compared by `bind`.
pub const PASSWORD_ATTRIBUTE: &str = "userPassword";

pub struct Engine {
    partition: Arc<Partition>,
    graphs: Vec<SourceGraph>,
    backend: Arc<dyn Backend>,
    interpreters: Arc<dyn InterpreterFactory>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(partition: Arc<Partition>, backend: Arc<dyn Backend>) -> Self {
        let graphs = partition
            .entry_ids()
            .map(|id| SourceGraph::build(&partition, id))
            .collect();
        Self {
            partition,
            graphs,
            backend,
            interpreters: Arc::new(DefaultInterpreterFactory),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_interpreters(mut self, interpreters: Arc<dyn InterpreterFactory>) -> Self {
        self.interpreters = interpreters;
        self
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self, entry: EntryId) -> &SourceGraph {
        &self.graphs[entry.index()]
    }

    fn resolver<'a>(&'a self, context: &'a OperationContext) -> Resolver<'a> {
        Resolver {
            partition: &self.partition,
            graphs: &self.graphs,
            backend: self.backend.as_ref(),
            config: &self.config,
            context,
        }
    }

    // ========================================================================
    // Read path
    // ========================================================================

    pub fn search(&self, request: &SearchRequest) -> Result<Vec<Entry>> {
        let context = OperationContext::new(request.size_limit.unwrap_or(self.config.size_limit));
        let span = info_span!("search", op_id = %context.id, base = %request.base, scope = ?request.scope);
        let _guard = span.enter();

        let resolver = self.resolver(&context);
        let mut interpreter = self.interpreters.create();
        let entries = Search {
            resolver,
            request,
            dn_only: self.config.dn_only_fast_path
                && request.is_dn_only()
                && request.filter.is_any_object(),
            seen: AHashSet::new(),
            out: vec![],
        }
        .run(interpreter.as_mut())?;

        info!(entries = entries.len(), rows = context.rows_fetched(), "search complete");
        Ok(entries)
    }

    /// Resolve one concrete DN.
    pub fn find(&self, dn: &Dn) -> Result<Entry> {
        let context = OperationContext::new(self.config.size_limit);
        let span = info_span!("find", op_id = %context.id, dn = %dn);
        let _guard = span.enter();

        let resolver = self.resolver(&context);
        let mut interpreter = self.interpreters.create();
        find(resolver, interpreter.as_mut(), dn)
    }

    /// Check `password` against the entry's `userPassword` values. Every
    /// failure, including an unknown DN, is `InvalidCredentials`.
    pub fn bind(&self, dn: &Dn, password: &str) -> Result<Entry> {
        let context = OperationContext::new(self.config.size_limit);
        let span = info_span!("bind", op_id = %context.id, dn = %dn);
        let _guard = span.enter();

        let resolver = self.resolver(&context);
        let mut interpreter = self.interpreters.create();
        let entry = match find(resolver, interpreter.as_mut(), dn) {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "bind target not resolved");
                return Err(EngineError::InvalidCredentials);
            }
        };
        let accepted = entry
            .attributes
            .get(PASSWORD_ATTRIBUTE)
            .is_some_and(|values| values.iter().any(|v| password_matches(v, password)));
        if !accepted {
            return Err(EngineError::InvalidCredentials);
        }
        info!("bind accepted");
        Ok(entry)
    }

    // ========================================================================
    // Write path
    // ========================================================================

    pub fn add(&self, dn: &Dn, attributes: &Attributes) -> Result<u64> {
        let context = OperationContext::new(self.config.size_limit);
        let span = info_span!("add", op_id = %context.id, dn = %dn);
        let _guard = span.enter();

        let resolver = self.resolver(&context);
        let mut interpreter = self.interpreters.create();
        let entry = self.writable_mapping(dn)?;

        let parent = match self.partition.parent(entry) {
            Some(p) => find_in(resolver, interpreter.as_mut(), p, &dn.parent())?
                .ok_or_else(|| EngineError::NotFound(dn.parent().to_string()))?
                .source_values,
            None => SourceValues::new(),
        };

        let statements = write::add::plan(
            &self.partition,
            self.graph(entry),
            interpreter.as_mut(),
            dn,
            attributes,
            &parent,
        )?;
        let affected = write::execute(self.backend.as_ref(), &statements)?;
        info!(statements = statements.len(), affected, "add complete");
        Ok(affected)
    }

    pub fn modify(&self, dn: &Dn, modifications: &[Modification]) -> Result<u64> {
        let context = OperationContext::new(self.config.size_limit);
        let span = info_span!("modify", op_id = %context.id, dn = %dn);
        let _guard = span.enter();

        let resolver = self.resolver(&context);
        let mut interpreter = self.interpreters.create();
        // Checked before anything is fetched.
        write::modify::apply(&Attributes::new(), modifications)?;

        let old = find(resolver, interpreter.as_mut(), dn)?;
        let attributes = write::modify::apply(&old.attributes, modifications)?;
        let statements = write::modify::plan(
            &self.partition,
            self.graph(old.mapping),
            interpreter.as_mut(),
            &old,
            &attributes,
            OperationKind::Modify,
        )?;
        let affected = write::execute(self.backend.as_ref(), &statements)?;
        info!(statements = statements.len(), affected, "modify complete");
        Ok(affected)
    }

    /// Rename the entry at `dn`, returning its new DN.
    pub fn modrdn(&self, dn: &Dn, new_rdn: &Rdn, delete_old_rdn: bool) -> Result<Dn> {
        let context = OperationContext::new(self.config.size_limit);
        let span = info_span!("modrdn", op_id = %context.id, dn = %dn, new_rdn = %new_rdn);
        let _guard = span.enter();

        let resolver = self.resolver(&context);
        let mut interpreter = self.interpreters.create();
        let old = find(resolver, interpreter.as_mut(), dn)?;
        let attributes = write::modrdn::renamed_attributes(&old, new_rdn, delete_old_rdn);
        let statements = write::modify::plan(
            &self.partition,
            self.graph(old.mapping),
            interpreter.as_mut(),
            &old,
            &attributes,
            OperationKind::ModRdn,
        )?;
        let affected = write::execute(self.backend.as_ref(), &statements)?;

        let renamed = write::modrdn::renamed_dn(dn, new_rdn);
        info!(statements = statements.len(), affected, new_dn = %renamed, "modrdn complete");
        Ok(renamed)
    }

    pub fn delete(&self, dn: &Dn) -> Result<u64> {
        let context = OperationContext::new(self.config.size_limit);
        let span = info_span!("delete", op_id = %context.id, dn = %dn);
        let _guard = span.enter();

        let resolver = self.resolver(&context);
        let mut interpreter = self.interpreters.create();
        let old = find(resolver, interpreter.as_mut(), dn)?;
        let statements = write::delete::plan(&self.partition, self.graph(old.mapping), &old)?;
        let affected = write::execute(self.backend.as_ref(), &statements)?;
        info!(statements = statements.len(), affected, "delete complete");
        Ok(affected)
    }

    /// The entry mapping a new entry at `dn` belongs to.
    fn writable_mapping(&self, dn: &Dn) -> Result<EntryId> {
        self.partition
            .entries_matching(dn)
            .into_iter()
            .find(|&id| !self.partition.is_static(id))
            .ok_or_else(|| {
                EngineError::ResolutionFailure(format!("no writable entry mapping matches `{dn}`"))
            })
    }
}

fn password_matches(value: &Value, password: &str) -> bool {
    match value {
        Value::Binary(bytes) => bytes.as_slice() == password.as_bytes(),
        other => other.to_string() == password,
    }
}

// ============================================================================
// Find
// ============================================================================

fn find(resolver: Resolver<'_>, interpreter: &mut dyn Interpreter, dn: &Dn) -> Result<Entry> {
    for entry in resolver.partition.entries_matching(dn) {
        if let Some(found) = find_in(resolver, interpreter, entry, dn)? {
            return Ok(found);
        }
    }
    Err(EngineError::NotFound(dn.to_string()))
}

/// Resolve `dn` as an instance of `entry`, resolving its parents first.
fn find_in(
    resolver: Resolver<'_>,
    interpreter: &mut dyn Interpreter,
    entry: EntryId,
    dn: &Dn,
) -> Result<Option<Entry>> {
    let parent = match resolver.partition.parent(entry) {
        Some(p) => match find_in(resolver, interpreter, p, &dn.parent())? {
            Some(found) => ParentContext::from(&found),
            None => return Ok(None),
        },
        None => ParentContext::new(dn.parent(), SourceValues::new()),
    };
    let filter = rdn_filter(dn);
    let entries = search_entry(resolver, interpreter, entry, &parent, filter.as_ref(), false)?;
    Ok(entries.into_iter().find(|e| e.dn == *dn))
}

// ============================================================================
// Search over scopes
// ============================================================================

struct Search<'a, 'q> {
    resolver: Resolver<'a>,
    request: &'q SearchRequest,
    dn_only: bool,
    seen: AHashSet<String>,
    out: Vec<Entry>,
}

impl Search<'_, '_> {
    fn run(mut self, interpreter: &mut dyn Interpreter) -> Result<Vec<Entry>> {
        let request = self.request;
        let base = &request.base;
        let mappings = self.resolver.partition.entries_matching(base);
        if mappings.is_empty() {
            debug!("base matches no entry mapping");
            return Ok(vec![]);
        }

        let mut found_base = false;
        for mapping in mappings {
            let Some(entry) = find_in(self.resolver, interpreter, mapping, base)? else {
                continue;
            };
            found_base = true;
            if request.scope != Scope::OneLevel {
                self.emit(entry.clone());
            }
            if request.scope != Scope::Base {
                self.children(interpreter, mapping, &entry)?;
            }
        }
        if !found_base {
            return Err(EngineError::NotFound(base.to_string()));
        }
        Ok(self.out)
    }

    /// Entries under `parent`, recursing for subtree scope.
    fn children(
        &mut self,
        interpreter: &mut dyn Interpreter,
        mapping: EntryId,
        parent: &Entry,
    ) -> Result<()> {
        let request = self.request;
        let partition = self.resolver.partition;
        let recurse = request.scope == Scope::Subtree;
        let context = ParentContext::from(parent);
        for &child in partition.children(mapping) {
            // Intermediate levels must come back whole to recurse below them.
            let has_children = !partition.children(child).is_empty();
            let pushdown = if recurse && has_children {
                None
            } else {
                Some(&request.filter)
            };
            let entries = search_entry(
                self.resolver,
                interpreter,
                child,
                &context,
                pushdown,
                self.dn_only,
            )?;
            for entry in entries {
                self.emit(entry.clone());
                if recurse {
                    self.children(interpreter, child, &entry)?;
                }
            }
        }
        Ok(())
    }

    fn emit(&mut self, mut entry: Entry) {
        if !self.dn_only && !self.request.filter.matches(&entry.attributes) {
            return;
        }
        if !self.seen.insert(entry.dn.normalized()) {
            return;
        }
        if self.dn_only || self.request.is_dn_only() {
            entry.attributes = Attributes::new();
        } else if !self.request.wants_all_attributes() {
            entry.attributes.retain_names(&self.request.attributes);
        }
        self.out.push(entry);
    }
}
