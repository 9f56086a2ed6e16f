//! Ordered migration plans

use crate::migration::change::{ColumnType, Conversion, ForeignKeyDef, OnDelete, SchemaChange};
use crate::migration::MigrationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid"));

/// A named step of a plan
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanStep {
    #[serde(rename = "step")]
    pub name: String,
    #[serde(flatten)]
    pub change: SchemaChange,
}

/// Steps applied strictly in declaration order
///
/// Plans deserialize from TOML as an array of `[[steps]]` tables:
///
/// ```toml
/// [[steps]]
/// step = "drop_timesheets_project_fk"
/// kind = "drop_constraint"
/// table = "timesheets"
/// name = "timesheets_project_id_fkey"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationPlan {
    #[serde(default)]
    steps: Vec<PlanStep>,
}

impl MigrationPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    #[must_use]
    pub fn step(mut self, name: impl Into<String>, change: SchemaChange) -> Self {
        self.steps.push(PlanStep {
            name: name.into(),
            change,
        });
        self
    }

    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check the plan before anything reaches the store.
    ///
    /// Rejects empty plans, duplicate step names and anything that is not a
    /// plain SQL identifier.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.steps.is_empty() {
            return Err(MigrationError::InvalidPlan(
                "plan contains no steps".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(MigrationError::InvalidPlan(format!(
                    "step {} has an empty name",
                    i + 1
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(MigrationError::InvalidPlan(format!(
                    "step name '{}' is used more than once",
                    step.name
                )));
            }
            if let Some(bad) = step
                .change
                .identifiers()
                .into_iter()
                .find(|id| !IDENTIFIER.is_match(id))
            {
                return Err(MigrationError::InvalidPlan(format!(
                    "step '{}' uses invalid identifier '{}'",
                    step.name, bad
                )));
            }
        }

        Ok(())
    }

    /// SHA-256 over every step name and its rendered SQL
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for step in &self.steps {
            hasher.update(step.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(step.change.to_sql().as_bytes());
            hasher.update([b'\n']);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// The timesheet backend's schema fixes.
///
/// Deleting a project removes its timesheets, and expense categories become
/// free-form text instead of a fixed enum.
#[must_use]
pub fn timesheet_plan() -> MigrationPlan {
    MigrationPlan::new()
        .step(
            "drop_timesheets_project_fk",
            SchemaChange::drop_constraint("timesheets", "timesheets_project_id_fkey"),
        )
        .step(
            "add_timesheets_project_fk_cascade",
            SchemaChange::add_foreign_key(ForeignKeyDef::new(
                "timesheets_project_id_fkey",
                ("timesheets", "project_id"),
                ("projects", "id"),
                OnDelete::Cascade,
            )),
        )
        .step(
            "widen_expenses_category",
            SchemaChange::alter_column_type(
                "expenses",
                "category",
                ColumnType::Text,
                Conversion::AsText,
            ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timesheet_plan_is_valid() {
        let plan = timesheet_plan();
        assert_eq!(plan.len(), 3);
        plan.validate().unwrap();
        assert_eq!(plan.steps()[0].name, "drop_timesheets_project_fk");
        assert!(matches!(plan.steps()[1].change, SchemaChange::AddForeignKey(_)));
    }

    #[test]
    fn test_empty_plan_rejected() {
        let err = MigrationPlan::new().validate().unwrap_err();
        assert!(matches!(err, MigrationError::InvalidPlan(_)));
    }

    #[test]
    fn test_duplicate_step_name_rejected() {
        let plan = MigrationPlan::new()
            .step("same", SchemaChange::drop_constraint("a", "fk_a"))
            .step("same", SchemaChange::drop_constraint("b", "fk_b"));
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_injection_shaped_identifier_rejected() {
        let plan = MigrationPlan::new().step(
            "evil",
            SchemaChange::drop_constraint("timesheets; DROP TABLE users", "fk"),
        );
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("invalid identifier"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_order_sensitive() {
        let a = timesheet_plan();
        assert_eq!(a.fingerprint(), timesheet_plan().fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut reversed = MigrationPlan::new();
        for step in a.steps().iter().rev() {
            reversed = reversed.step(step.name.clone(), step.change.clone());
        }
        assert_ne!(a.fingerprint(), reversed.fingerprint());
    }

    #[test]
    fn test_misspelled_delete_action_is_rejected() {
        let result: Result<MigrationPlan, _> = toml::from_str(
            r#"
            [[steps]]
            step = "add_fk"
            kind = "add_foreign_key"
            name = "timesheets_project_id_fkey"
            table = "timesheets"
            column = "project_id"
            ref_table = "projects"
            ref_column = "id"
            on_delet = "cascade"
            "#,
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("on_delet"), "{}", err);
    }

    #[test]
    fn test_unknown_key_in_alter_step_is_rejected() {
        let result: Result<MigrationPlan, _> = toml::from_str(
            r#"
            [[steps]]
            step = "widen"
            kind = "alter_column_type"
            table = "expenses"
            column = "category"
            new_type = "text"
            conversion = "as_text"
            default = "Other"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_top_level_table_is_rejected() {
        let result: Result<MigrationPlan, _> = toml::from_str("[[step]]\nkind = \"drop_constraint\"\n");
        assert!(result.is_err());
    }
}
