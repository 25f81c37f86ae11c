//! vdir mapping model
//!
//! Load-time description of a virtual directory: the tree of entry mappings,
//! the physical sources each entry draws from, the relationships between
//! source fields, and the filter/DN/value types the engine speaks.
//!
//! Everything here is immutable after `Partition::new` (or `Partition::load`)
//! returns and is shared read-only across concurrent operations.

pub mod config;
pub mod dn;
pub mod error;
pub mod filter;
pub mod filter_parser;
pub mod mapping;
pub mod partition;
pub mod value;

pub use config::PartitionConfig;
pub use dn::{Dn, Rdn};
pub use error::MappingError;
pub use filter::{append_and, append_or, AttributeLookup, Filter};
pub use filter_parser::parse_filter;
pub use mapping::{
    AttributeMapping, Derivation, EntryMapping, FieldConfig, FieldMapping, FieldRef,
    IncludeFlags, OperationKind, Relationship, SourceConfig, SourceMapping,
};
pub use partition::{EffectiveSource, EntryId, Partition};
pub use value::{compare, convert, FieldType, Operator, Value};
