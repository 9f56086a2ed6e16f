//! # Shiftguard
//!
//! Re-runnable schema migrations for the shiftguard timesheet backend.
//!
//! A [`migration::MigrationPlan`] is an ordered list of [`migration::SchemaChange`]s
//! (drop a constraint, add a foreign key, widen a column). The
//! [`migration::Migrator`] applies it step by step against a [`store::SchemaStore`],
//! stopping at the first failure.

pub mod config;
pub mod connection;
pub mod migration;
pub mod store;

pub use connection::{connect, ConnectionError};
pub use migration::{MigrationError, MigrationPlan, Migrator, SchemaChange, StepFailure};
pub use store::{PgStore, SchemaStore, StoreError};

#[cfg(any(test, feature = "mock"))]
pub use store::memory::MemoryStore;
