//! Loads migration plans from TOML files, or falls back to the built-in plan

use anyhow::{bail, Context, Result};
use shiftguard::migration::{timesheet_plan, MigrationPlan};
use std::fs;
use std::path::Path;

/// Parse and validate a plan from TOML text
pub fn parse_plan(source: &str) -> Result<MigrationPlan> {
    let plan: MigrationPlan = toml::from_str(source).context("plan is not valid TOML")?;
    plan.validate()?;
    Ok(plan)
}

/// Read the plan at `path`, or the built-in timesheet plan when `path` is `None`
pub fn load_plan(path: Option<&Path>) -> Result<MigrationPlan> {
    let Some(path) = path else {
        log::debug!("no plan file given, using the built-in timesheet plan");
        return Ok(timesheet_plan());
    };

    if !path.exists() {
        bail!("Plan file does not exist: {}", path.display());
    }
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read plan file {}", path.display()))?;
    parse_plan(&source).with_context(|| format!("invalid plan file {}", path.display()))
}
