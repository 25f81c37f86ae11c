//! Load-time errors for the mapping model.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("invalid DN `{dn}`: {message}")]
    InvalidDn { dn: String, message: String },

    #[error("invalid filter `{filter}`: {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("invalid field reference `{0}` (expected `<alias>.<field>`)")]
    InvalidFieldRef(String),

    #[error("invalid relationship `{0}`")]
    InvalidRelationship(String),

    #[error("entry `{entry}`: source mapping `{alias}` references unknown source `{source_name}`")]
    UnknownSource {
        entry: String,
        alias: String,
        source_name: String,
    },

    #[error("source `{source_name}` has no field `{field}`")]
    UnknownField { source_name: String, field: String },

    #[error("entry `{entry}`: unknown source alias `{alias}`")]
    UnknownAlias { entry: String, alias: String },

    #[error("entry `{entry}`: duplicate source alias `{alias}`")]
    DuplicateAlias { entry: String, alias: String },

    #[error("duplicate entry mapping `{0}`")]
    DuplicateEntry(String),

    #[error("entry `{entry}`: {message}")]
    PrimarySource { entry: String, message: String },

    #[error("entry `{entry}`: mapping `{name}` {message}")]
    InvalidDerivation {
        entry: String,
        name: String,
        message: String,
    },

    #[error("invalid partition config: {0}")]
    Config(String),
}
