//! vdir reference storage
//!
//! A relational backend that keeps every source as a table of rows in memory:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      MEMORY BACKEND                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │   fetch(filter, order_by) ──► tables ◄── execute(statement)  │
//! │                                 │               │            │
//! │                                 ▼               ▼            │
//! │                         snapshot (JSON)      journal         │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Filter evaluation**: pushed-down filters are evaluated row by row
//! - **Journal**: every executed statement is kept in order
//! - **Fault injection**: a source can be marked failing
//! - **Snapshots**: tables load from and save to a JSON file

pub mod persistence;

#[cfg(test)]
mod tests;

use parking_lot::RwLock;
use persistence::Snapshot;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info};
use vdir_engine::{Backend, BackendError, FetchRequest, Row, RowStream, Statement, StatementKind};
use vdir_mapping::{compare, Filter, Operator, Value};

// ============================================================================
// Storage Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Snapshot file. Loaded on open when it exists.
    pub snapshot_path: Option<PathBuf>,
    /// Save the snapshot after every executed statement.
    pub auto_flush: bool,
}

// ============================================================================
// Memory Backend
// ============================================================================

pub struct MemoryBackend {
    config: StorageConfig,
    tables: RwLock<BTreeMap<String, Vec<Row>>>,
    journal: RwLock<Vec<Statement>>,
    failing: RwLock<BTreeSet<String>>,
}

impl MemoryBackend {
    pub fn new(config: StorageConfig) -> anyhow::Result<Self> {
        let tables = match &config.snapshot_path {
            Some(path) if path.exists() => persistence::load_snapshot(path)?.tables,
            _ => BTreeMap::new(),
        };
        info!(tables = tables.len(), "memory backend opened");
        Ok(Self {
            config,
            tables: RwLock::new(tables),
            journal: RwLock::new(Vec::new()),
            failing: RwLock::new(BTreeSet::new()),
        })
    }

    /// A backend with no snapshot file.
    pub fn in_memory() -> Self {
        Self::from_snapshot(Snapshot::default())
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            config: StorageConfig::default(),
            tables: RwLock::new(snapshot.tables),
            journal: RwLock::new(Vec::new()),
            failing: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn insert_row(&self, source: &str, row: Row) {
        self.tables
            .write()
            .entry(source.to_string())
            .or_default()
            .push(row);
    }

    pub fn rows(&self, source: &str) -> Vec<Row> {
        self.tables.read().get(source).cloned().unwrap_or_default()
    }

    /// Executed statements, oldest first.
    pub fn journal(&self) -> Vec<Statement> {
        self.journal.read().clone()
    }

    /// Make every fetch and write against `source` fail, or stop doing so.
    pub fn set_failing(&self, source: &str, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(source.to_string());
        } else {
            set.remove(source);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tables: self.tables.read().clone(),
        }
    }

    /// Save the snapshot to the configured path, if any.
    pub fn flush(&self) -> anyhow::Result<()> {
        let Some(path) = &self.config.snapshot_path else {
            return Ok(());
        };
        persistence::save_snapshot(path, &self.snapshot())
    }

    fn check_available(&self, source: &str) -> Result<(), BackendError> {
        if self.failing.read().contains(source) {
            return Err(BackendError::Failed(format!("source `{source}` is unavailable")));
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn fetch<'a>(&'a self, request: &FetchRequest<'_>) -> Result<RowStream<'a>, BackendError> {
        let source = &request.source.name;
        self.check_available(source)?;

        let tables = self.tables.read();
        let mut rows: Vec<Row> = tables
            .get(source)
            .map(|rows| {
                rows.iter()
                    .filter(|row| selects(request.filter, row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if !request.order_by.is_empty() {
            rows.sort_by(|a, b| order(a, b, request.order_by));
        }

        debug!(source = %source, rows = rows.len(), "memory fetch");
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn execute(&self, statement: &Statement) -> Result<u64, BackendError> {
        self.check_available(&statement.source_name)?;

        let affected = {
            let mut tables = self.tables.write();
            let rows = tables.entry(statement.source_name.clone()).or_default();
            match statement.kind {
                StatementKind::Insert => {
                    let mut row = Row::new();
                    for (field, value) in &statement.assignments {
                        if let Some(value) = value {
                            row.add(field.clone(), value.clone());
                        }
                    }
                    rows.push(row);
                    1
                }
                StatementKind::Update => {
                    let mut n = 0;
                    for row in rows.iter_mut().filter(|r| selects(statement.filter.as_ref(), r)) {
                        for (field, value) in &statement.assignments {
                            match value {
                                Some(v) => row.set(field.clone(), vec![v.clone()]),
                                None => {
                                    row.remove(field);
                                }
                            }
                        }
                        n += 1;
                    }
                    n
                }
                StatementKind::Delete => {
                    let before = rows.len();
                    rows.retain(|r| !selects(statement.filter.as_ref(), r));
                    (before - rows.len()) as u64
                }
            }
        };

        debug!(%statement, affected, "memory execute");
        self.journal.write().push(statement.clone());

        if self.config.auto_flush {
            self.flush()
                .map_err(|e| BackendError::Failed(format!("snapshot flush failed: {e:#}")))?;
        }
        Ok(affected)
    }
}

fn selects(filter: Option<&Filter>, row: &Row) -> bool {
    filter.map_or(true, |f| f.matches(row))
}

fn order(a: &Row, b: &Row, fields: &[String]) -> Ordering {
    for field in fields {
        let ordering = match (a.first(field), b.first(field)) {
            (Some(x), Some(y)) => compare_values(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    if compare(a, Operator::Lt, b) {
        Ordering::Less
    } else if compare(a, Operator::Gt, b) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}
