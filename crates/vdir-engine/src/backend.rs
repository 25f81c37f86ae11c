//! Backend adapter interface.
//!
//! The engine never talks to a physical store directly. It asks an adapter to
//! `fetch` rows matching a pushed-down filter and to `execute` opaque write
//! statements. Translating either into a physical query language is the
//! adapter's job.

use crate::values::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use vdir_mapping::{Filter, SourceConfig, Value};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown source `{0}`")]
    UnknownSource(String),

    #[error("{0}")]
    Failed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// One fetch against one physical source.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub source: &'a SourceConfig,
    pub filter: Option<&'a Filter>,
    pub order_by: &'a [String],
}

pub type RowStream<'a> = Box<dyn Iterator<Item = Result<Row, BackendError>> + 'a>;

pub trait Backend: Send + Sync {
    fn fetch<'a>(&'a self, request: &FetchRequest<'_>) -> Result<RowStream<'a>, BackendError>;

    /// Apply a write statement, returning the number of affected rows.
    fn execute(&self, statement: &Statement) -> Result<u64, BackendError>;
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
}

/// A write against one physical source. `None` assigns null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub source_name: String,
    pub alias: String,
    pub assignments: Vec<(String, Option<Value>)>,
    pub filter: Option<Filter>,
}

impl Statement {
    pub fn insert(source_name: &str, alias: &str, assignments: Vec<(String, Option<Value>)>) -> Self {
        Self {
            kind: StatementKind::Insert,
            source_name: source_name.to_string(),
            alias: alias.to_string(),
            assignments,
            filter: None,
        }
    }

    pub fn update(
        source_name: &str,
        alias: &str,
        assignments: Vec<(String, Option<Value>)>,
        filter: Option<Filter>,
    ) -> Self {
        Self {
            kind: StatementKind::Update,
            source_name: source_name.to_string(),
            alias: alias.to_string(),
            assignments,
            filter,
        }
    }

    pub fn delete(source_name: &str, alias: &str, filter: Option<Filter>) -> Self {
        Self {
            kind: StatementKind::Delete,
            source_name: source_name.to_string(),
            alias: alias.to_string(),
            assignments: vec![],
            filter,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
        };
        write!(f, "{kind} {} ({})", self.source_name, self.alias)?;
        if !self.assignments.is_empty() {
            f.write_str(" SET")?;
            for (i, (field, value)) in self.assignments.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                match value {
                    Some(v) => write!(f, "{sep}{field}={v}")?,
                    None => write!(f, "{sep}{field}=NULL")?,
                }
            }
        }
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {filter}")?;
        }
        Ok(())
    }
}
