//! Per-operation context: correlation id and size-limit accounting.
//!
//! The size limit caps the rows any single backend fetch may return. Rows
//! are also totalled across the operation for logging.

use crate::error::{EngineError, Result};
use std::cell::Cell;
use uuid::Uuid;

/// Lives for exactly one logical operation on one thread.
#[derive(Debug)]
pub struct OperationContext {
    pub id: Uuid,
    size_limit: usize,
    fetched: Cell<usize>,
    exempt: Cell<bool>,
}

impl OperationContext {
    /// `size_limit == 0` means unlimited.
    pub fn new(size_limit: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            size_limit,
            fetched: Cell::new(0),
            exempt: Cell::new(false),
        }
    }

    /// Count one row pulled from a backend; `nth` is its position within
    /// the current fetch. The limit applies to each fetch on its own.
    pub fn count_row(&self, nth: usize) -> Result<()> {
        self.fetched.set(self.fetched.get() + 1);
        if self.size_limit > 0 && !self.exempt.get() && nth > self.size_limit {
            return Err(EngineError::SizeLimitExceeded {
                limit: self.size_limit,
            });
        }
        Ok(())
    }

    /// Run `f` with fetches not charged against the size limit. Used for
    /// re-fetching rows already admitted once.
    pub fn uncharged<T>(&self, f: impl FnOnce() -> T) -> T {
        let previous = self.exempt.replace(true);
        let out = f();
        self.exempt.set(previous);
        out
    }

    pub fn rows_fetched(&self) -> usize {
        self.fetched.get()
    }
}
