//! Migration-specific error types

use crate::connection::ConnectionError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors raised while validating or applying a schema change.
///
/// Every variant is fatal for the run that hit it; the migrator never retries.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A constraint with the target name already exists
    #[error("Constraint '{constraint}' already exists on table '{table}'; refusing to overwrite it")]
    ConstraintConflict { table: String, constraint: String },

    /// Existing rows break the foreign key being added (or a delete would orphan rows)
    #[error(
        "Rows in '{table}' violate foreign key '{constraint}': {detail}\n\
         Clean up the orphaned rows before re-running the migration."
    )]
    ReferentialIntegrityViolation {
        table: String,
        constraint: String,
        detail: String,
    },

    /// A stored value has no lossless image under the new column type
    #[error("Cannot convert '{table}.{column}' to {new_type}: {detail}")]
    DataConversionError {
        table: String,
        column: String,
        new_type: String,
        detail: String,
    },

    /// The store is unreachable
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Target table does not exist
    #[error("Table '{0}' does not exist")]
    MissingTable(String),

    /// Target column does not exist
    #[error("Column '{column}' does not exist on table '{table}'")]
    MissingColumn { table: String, column: String },

    /// The plan itself is malformed
    #[error("Invalid migration plan: {0}")]
    InvalidPlan(String),

    /// Any other store failure
    #[error("Database error: {0}")]
    Database(#[from] StoreError),
}

impl MigrationError {
    /// Short machine-friendly name of the error class, used in log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::ConstraintConflict { .. } => "constraint_conflict",
            MigrationError::ReferentialIntegrityViolation { .. } => "referential_integrity_violation",
            MigrationError::DataConversionError { .. } => "data_conversion_error",
            MigrationError::Connection(_) => "connection_error",
            MigrationError::MissingTable(_) => "missing_table",
            MigrationError::MissingColumn { .. } => "missing_column",
            MigrationError::InvalidPlan(_) => "invalid_plan",
            MigrationError::Database(_) => "database_error",
        }
    }
}
