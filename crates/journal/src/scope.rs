//! Scoped transaction guard
//!
//! A [`TransactionScope`] owns one journal transaction. It commits when asked
//! to, and rolls the transaction back if it is dropped while still open, so
//! an early return or a panic never leaves an ACTIVE transaction behind.

use crate::error::{JournalError, Result};
use crate::journal::Journal;
use crate::operation::{Context, NewOperation, OperationType};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScopeState {
    Pending,
    Active(String),
    Committed(String),
    RolledBack(String),
}

/// Groups journal appends under a single transaction id
pub struct TransactionScope<'j> {
    journal: &'j Journal,
    state: ScopeState,
}

impl<'j> TransactionScope<'j> {
    /// Create a scope that has not started its transaction yet
    pub fn new(journal: &'j Journal) -> Self {
        Self {
            journal,
            state: ScopeState::Pending,
        }
    }

    /// Start the transaction. Entering an active scope again is a no-op.
    pub fn enter(&mut self, metadata: Option<Context>) -> Result<&str> {
        match &self.state {
            ScopeState::Pending => {
                let id = self.journal.start_transaction(metadata)?;
                self.state = ScopeState::Active(id);
            }
            ScopeState::Active(_) => {}
            ScopeState::Committed(id) | ScopeState::RolledBack(id) => {
                return Err(JournalError::ScopeClosed(id.clone()));
            }
        }
        self.active_id()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match &self.state {
            ScopeState::Pending => None,
            ScopeState::Active(id) | ScopeState::Committed(id) | ScopeState::RolledBack(id) => {
                Some(id)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ScopeState::Active(_))
    }

    fn active_id(&self) -> Result<&str> {
        match &self.state {
            ScopeState::Pending => Err(JournalError::ScopeNotEntered),
            ScopeState::Active(id) => Ok(id),
            ScopeState::Committed(id) | ScopeState::RolledBack(id) => {
                Err(JournalError::ScopeClosed(id.clone()))
            }
        }
    }

    /// Append an operation under this scope's transaction
    pub fn log(&self, op: NewOperation) -> Result<i64> {
        let id = self.active_id()?;
        self.journal.log_operation(op.transaction(id))
    }

    pub fn log_move(&self, source: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<i64> {
        self.log(
            NewOperation::new(OperationType::Move, source.as_ref())
                .destination(destination.as_ref()),
        )
    }

    pub fn log_rename(
        &self,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
    ) -> Result<i64> {
        self.log(
            NewOperation::new(OperationType::Rename, source.as_ref())
                .destination(destination.as_ref()),
        )
    }

    pub fn log_copy(&self, source: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<i64> {
        self.log(
            NewOperation::new(OperationType::Copy, source.as_ref())
                .destination(destination.as_ref()),
        )
    }

    pub fn log_delete(&self, path: impl AsRef<Path>) -> Result<i64> {
        self.log(NewOperation::new(OperationType::Delete, path.as_ref()))
    }

    pub fn log_create(&self, path: impl AsRef<Path>) -> Result<i64> {
        self.log(NewOperation::new(OperationType::Create, path.as_ref()))
    }

    /// Commit the transaction.
    ///
    /// Returns false if the scope was never entered or is already closed.
    pub fn commit(&mut self) -> Result<bool> {
        let id = match &self.state {
            ScopeState::Active(id) => id.clone(),
            _ => return Ok(false),
        };

        let committed = self.journal.commit_transaction(&id)?;
        self.state = ScopeState::Committed(id);
        Ok(committed)
    }

    /// Roll the transaction back.
    ///
    /// Returns false if the scope was never entered or is already closed.
    pub fn rollback(&mut self) -> Result<bool> {
        let id = match &self.state {
            ScopeState::Active(id) => id.clone(),
            _ => return Ok(false),
        };

        let rolled_back = self.journal.rollback_transaction(&id)?;
        self.state = ScopeState::RolledBack(id);
        Ok(rolled_back)
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if let ScopeState::Active(id) = &self.state {
            tracing::warn!("Transaction scope {} dropped while open, rolling back", id);
            if let Err(e) = self.journal.rollback_transaction(id) {
                tracing::warn!("Rollback of abandoned transaction {} failed: {}", id, e);
            }
        }
    }
}

impl Journal {
    /// Create and enter a transaction scope in one call
    pub fn begin(&self, metadata: Option<Context>) -> Result<TransactionScope<'_>> {
        let mut scope = TransactionScope::new(self);
        scope.enter(metadata)?;
        Ok(scope)
    }

    /// Run `f` inside a transaction scope.
    ///
    /// Commits when `f` returns `Ok`. On `Err` the transaction is rolled back
    /// and the closure's error is returned unchanged.
    pub fn transaction<T, E, F>(&self, metadata: Option<Context>, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut TransactionScope<'_>) -> std::result::Result<T, E>,
        E: From<JournalError>,
    {
        let mut scope = self.begin(metadata)?;
        match f(&mut scope) {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = scope.rollback() {
                    tracing::warn!("Rollback after failed scope errored: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}
