//! Migrator - applies a plan step by step

use crate::migration::change::SchemaChange;
use crate::migration::plan::MigrationPlan;
use crate::migration::MigrationError;
use crate::store::{SchemaStore, StepOutcome};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result of one completed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// 1-based position in the plan
    pub index: usize,
    pub name: String,
    pub description: String,
    pub outcome: StepOutcome,
    pub elapsed: Duration,
}

/// Summary of a run in which every step succeeded
#[derive(Debug, Clone)]
pub struct RunReport {
    pub fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Applied)
            .count()
    }

    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.steps.len() - self.applied_count()
    }

    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} step(s) completed: {} applied, {} skipped in {}ms (plan {})",
            self.steps.len(),
            self.applied_count(),
            self.skipped_count(),
            (self.finished_at - self.started_at).num_milliseconds(),
            &self.fingerprint[..12.min(self.fingerprint.len())]
        )
    }
}

/// The step that stopped a run
///
/// Steps before `index` completed and were not rolled back; later steps
/// were never attempted.
#[derive(Debug, Error)]
#[error("Step {index} ({name}) failed: {source}")]
pub struct StepFailure {
    pub index: usize,
    pub name: String,
    pub sql: String,
    #[source]
    pub source: MigrationError,
    pub completed: Vec<StepReport>,
}

impl StepFailure {
    fn before_any_step(source: MigrationError) -> Self {
        Self {
            index: 0,
            name: "plan validation".to_string(),
            sql: String::new(),
            source,
            completed: Vec::new(),
        }
    }
}

/// Core migration execution engine
///
/// Steps run strictly in declaration order and the first failure halts the
/// run. Individual steps are safe to repeat: drops are guarded by `IF EXISTS`
/// and adds fail fast instead of duplicating.
pub struct Migrator {
    plan: MigrationPlan,
}

impl Migrator {
    pub fn new(plan: MigrationPlan) -> Self {
        Self { plan }
    }

    #[must_use]
    pub fn plan(&self) -> &MigrationPlan {
        &self.plan
    }

    /// Rendered SQL for every step, without touching any store
    #[must_use]
    pub fn dry_run(&self) -> Vec<String> {
        self.plan.steps().iter().map(|s| s.change.to_sql()).collect()
    }

    /// Apply the whole plan
    pub fn run(&self, store: &mut dyn SchemaStore) -> Result<RunReport, StepFailure> {
        self.run_with_progress(store, |_| {})
    }

    /// Apply the whole plan, calling `on_step` after each completed step
    pub fn run_with_progress(
        &self,
        store: &mut dyn SchemaStore,
        mut on_step: impl FnMut(&StepReport),
    ) -> Result<RunReport, StepFailure> {
        self.plan.validate().map_err(StepFailure::before_any_step)?;

        let fingerprint = self.plan.fingerprint();
        let started_at = Utc::now();
        let mut completed = Vec::with_capacity(self.plan.len());
        log::info!(
            "running {} migration step(s), plan {}",
            self.plan.len(),
            fingerprint
        );

        for (i, step) in self.plan.steps().iter().enumerate() {
            let index = i + 1;

            #[cfg(feature = "tracing")]
            let _span = tracing::info_span!(
                "migration_step",
                index,
                name = %step.name,
                table = step.change.table()
            )
            .entered();

            log::debug!(
                "step {} ({}) on {}: {}",
                index,
                step.name,
                step.change.table(),
                step.change.to_sql()
            );
            let start = Instant::now();

            match apply(&step.change, store) {
                Ok(outcome) => {
                    let report = StepReport {
                        index,
                        name: step.name.clone(),
                        description: step.change.describe(),
                        outcome,
                        elapsed: start.elapsed(),
                    };
                    match outcome {
                        StepOutcome::Applied => {
                            log::info!("step {} ({}) applied: {}", index, step.name, report.description)
                        }
                        StepOutcome::Skipped => {
                            log::warn!("step {} ({}) had nothing to do: {}", index, step.name, report.description)
                        }
                    }
                    on_step(&report);
                    completed.push(report);
                }
                Err(source) => {
                    log::error!(
                        "step {} ({}) failed [{}]: {}",
                        index,
                        step.name,
                        source.kind(),
                        source
                    );
                    return Err(StepFailure {
                        index,
                        name: step.name.clone(),
                        sql: step.change.to_sql(),
                        source,
                        completed,
                    });
                }
            }
        }

        let report = RunReport {
            fingerprint,
            started_at,
            finished_at: Utc::now(),
            steps: completed,
        };
        log::info!("{}", report.summary());
        Ok(report)
    }
}

/// Dispatch one change to the store
fn apply(change: &SchemaChange, store: &mut dyn SchemaStore) -> Result<StepOutcome, MigrationError> {
    match change {
        SchemaChange::DropConstraint { table, name } => store.drop_constraint_if_exists(table, name),
        SchemaChange::AddForeignKey(fk) => store.add_foreign_key(fk),
        SchemaChange::AlterColumnType {
            table,
            column,
            new_type,
            conversion,
        } => store.widen_column_type(table, column, new_type, conversion),
    }
}
