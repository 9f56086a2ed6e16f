//! Shiftguard Migration Library
//!
//! Plan loading and setting resolution for the `shiftguard-migrate` CLI.
//! The binary (main.rs) wires these to the library's `Migrator`.

pub mod plan_loader;
pub mod settings;

/// Every step completed
pub const EXIT_OK: i32 = 0;
/// A step failed; earlier steps stay applied
pub const EXIT_STEP_FAILED: i32 = 1;
/// Configuration, plan or connection problem; no step was attempted
pub const EXIT_SETUP_FAILED: i32 = 2;
