//! Engine error kinds.

use crate::backend::BackendError;
use thiserror::Error;
use vdir_mapping::MappingError;

/// Coarse classification handed to the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidCredentials,
    SizeLimitExceeded,
    ObjectClassModificationProhibited,
    UnknownField,
    BackendFailure,
    ResolutionFailure,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("size limit of {limit} exceeded")]
    SizeLimitExceeded { limit: usize },

    #[error("objectClass cannot be modified")]
    ObjectClassModificationProhibited,

    #[error("source `{source_name}` has no field `{field}`")]
    UnknownField { source_name: String, field: String },

    #[error("backend failure on `{source_name}`")]
    BackendFailure {
        source_name: String,
        #[source]
        source: BackendError,
    },

    #[error("resolution failure: {0}")]
    ResolutionFailure(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::InvalidCredentials => ErrorKind::InvalidCredentials,
            EngineError::SizeLimitExceeded { .. } => ErrorKind::SizeLimitExceeded,
            EngineError::ObjectClassModificationProhibited => {
                ErrorKind::ObjectClassModificationProhibited
            }
            EngineError::UnknownField { .. } => ErrorKind::UnknownField,
            EngineError::BackendFailure { .. } => ErrorKind::BackendFailure,
            EngineError::ResolutionFailure(_) => ErrorKind::ResolutionFailure,
        }
    }

    pub fn backend(source_name: impl Into<String>, source: BackendError) -> Self {
        EngineError::BackendFailure {
            source_name: source_name.into(),
            source,
        }
    }
}

impl From<MappingError> for EngineError {
    fn from(err: MappingError) -> Self {
        match err {
            MappingError::UnknownField { source_name, field } => {
                EngineError::UnknownField { source_name, field }
            }
            other => EngineError::ResolutionFailure(other.to_string()),
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
