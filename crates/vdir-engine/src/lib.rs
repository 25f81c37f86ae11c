//! vdir engine
//!
//! Resolves logical directory operations against physical sources:
//!
//! ```text
//!   search ──► SearchPlan ──► LocalRunner ──► ParentRunner ──► group by DN ──► merge ──► Entry
//!                                 │                │
//!                                 └── join / left_join (JoinEngine) ──┘
//!
//!   add / modify / modrdn / delete ──► derive_rows (primary first) ──► Statements ──► Backend
//! ```
//!
//! ## Key pieces
//!
//! - **SourceGraph**: the entry's effective sources and their relationships,
//!   built once per entry mapping, traversed with per-run state only
//! - **SourceValues**: alias-qualified multi-valued rows
//! - **JoinEngine**: typed inner/left joins with direction-independent
//!   relationship evaluation
//! - **SearchPlan**: per-source projected filters and the start-source choice
//! - **Backend / Interpreter**: collaborator traits; the engine never speaks
//!   a physical query language itself

pub mod backend;
pub mod config;
pub mod context;
pub mod dns;
pub mod engine;
pub mod error;
pub mod graph;
pub mod interpreter;
pub mod join;
pub mod merge;
pub mod planner;
pub mod projection;
pub mod request;
pub mod search;
pub mod transform;
pub mod values;
pub mod write;


pub use backend::{Backend, BackendError, FetchRequest, RowStream, Statement, StatementKind};
pub use config::{ConfigError, EngineConfig};
pub use context::OperationContext;
pub use dns::compute_dns;
pub use engine::{Engine, PASSWORD_ATTRIBUTE};
pub use error::{EngineError, ErrorKind, Result};
pub use graph::{EdgeId, Flow, GraphVisitor, NodeId, SourceGraph};
pub use interpreter::{DefaultInterpreter, DefaultInterpreterFactory, Interpreter, InterpreterFactory};
pub use join::JoinEngine;
pub use planner::{Connection, SearchPlan, Start};
pub use projection::{generate_filter, generate_filter_for_rows, FilterProjector, Projection};
pub use request::{Entry, Modification, ModifyOp, Scope, SearchRequest};
pub use values::{Attributes, Row, SourceValues};
