//! `SchemaStore` - the relational store the migrator talks to
//!
//! The migrator only ever asks a store for three alterations. [`PgStore`]
//! turns them into PostgreSQL DDL on a single connection; the in-memory
//! [`memory::MemoryStore`] (feature `mock`) models the same contract for tests.

use crate::migration::change::{ColumnType, Conversion, ForeignKeyDef};
use crate::migration::MigrationError;
use std::fmt;

#[cfg(any(test, feature = "mock"))]
pub mod memory;
mod postgres;

pub use postgres::PgStore;

/// What a step did to the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The statement ran and changed (or may have changed) the schema
    Applied,
    /// Nothing to do, e.g. dropping a constraint that is already gone
    Skipped,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Applied => f.write_str("applied"),
            StepOutcome::Skipped => f.write_str("skipped"),
        }
    }
}

/// Trait for stores that can apply schema alterations
///
/// Implementations issue each alteration as one independent statement and map
/// store failures onto [`MigrationError`].
pub trait SchemaStore {
    /// Remove `constraint` from `table`; succeeds silently when it is absent.
    fn drop_constraint_if_exists(
        &mut self,
        table: &str,
        constraint: &str,
    ) -> Result<StepOutcome, MigrationError>;

    /// Add a foreign key; fails on a name clash or on orphaned child rows.
    fn add_foreign_key(&mut self, fk: &ForeignKeyDef) -> Result<StepOutcome, MigrationError>;

    /// Change a column's type, converting every stored value or none of them.
    fn widen_column_type(
        &mut self,
        table: &str,
        column: &str,
        new_type: &ColumnType,
        conversion: &Conversion,
    ) -> Result<StepOutcome, MigrationError>;
}

/// Log a warning when `new_type` cannot hold every value `old_type` can.
///
/// The step still runs; whether it succeeds depends on the rows actually stored.
/// Returns whether a warning was emitted.
pub(crate) fn warn_unless_widening(
    table: &str,
    column: &str,
    old_type: &ColumnType,
    new_type: &ColumnType,
) -> bool {
    if new_type.is_widening_of(old_type) {
        return false;
    }
    log::warn!(
        "{} does not accept every value of {}; {}.{} converts only if current rows fit",
        new_type,
        old_type,
        table,
        column
    );
    true
}

/// Raw failure reported by a store, with the SQLSTATE when the server sent one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub sqlstate: Option<String>,
    pub message: String,
}

impl StoreError {
    pub fn new(sqlstate: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            sqlstate: sqlstate.map(str::to_string),
            message: message.into(),
        }
    }

    /// Connection exceptions (class 08) and operator intervention (57P)
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        self.sqlstate
            .as_deref()
            .is_some_and(|code| code.starts_with("08") || code.starts_with("57P"))
    }

    /// First double-quoted name in the message, e.g. `relation "projects" does not exist`
    #[must_use]
    pub fn quoted_name(&self) -> Option<&str> {
        let start = self.message.find('"')? + 1;
        let len = self.message[start..].find('"')?;
        Some(&self.message[start..start + len])
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(code) => write!(f, "{} (SQLSTATE {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<may_postgres::Error> for StoreError {
    fn from(err: may_postgres::Error) -> Self {
        let sqlstate = err.code().map(|state| state.code().to_string());
        let message = match err.as_db_error() {
            Some(db) => db.message().to_string(),
            None => err.to_string(),
        };
        Self { sqlstate, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_with_sqlstate() {
        let err = StoreError::new(Some("42710"), "constraint \"fk\" already exists");
        assert_eq!(
            err.to_string(),
            "constraint \"fk\" already exists (SQLSTATE 42710)"
        );
    }

    #[test]
    fn test_store_error_quoted_name() {
        let err = StoreError::new(Some("42P01"), "relation \"projects\" does not exist");
        assert_eq!(err.quoted_name(), Some("projects"));
        assert_eq!(StoreError::new(None, "no quotes").quoted_name(), None);
    }

    #[test]
    fn test_connection_failure_classes() {
        assert!(StoreError::new(Some("08006"), "connection failure").is_connection_failure());
        assert!(StoreError::new(Some("57P01"), "admin shutdown").is_connection_failure());
        assert!(!StoreError::new(Some("23503"), "fk violation").is_connection_failure());
        assert!(!StoreError::new(None, "closed").is_connection_failure());
    }

    #[test]
    fn test_warns_only_for_narrowing() {
        assert!(!warn_unless_widening("expenses", "category", &ColumnType::Varchar(10), &ColumnType::Text));
        assert!(!warn_unless_widening("expenses", "category", &ColumnType::Text, &ColumnType::Text));
        assert!(warn_unless_widening("expenses", "category", &ColumnType::Text, &ColumnType::Varchar(5)));
    }

    #[test]
    fn test_step_outcome_display() {
        assert_eq!(StepOutcome::Applied.to_string(), "applied");
        assert_eq!(StepOutcome::Skipped.to_string(), "skipped");
    }
}
