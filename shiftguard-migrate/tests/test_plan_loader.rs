//! Tests for plan_loader module

use shiftguard::migration::{timesheet_plan, ColumnType, Conversion, OnDelete, SchemaChange};
use shiftguard_migrate::plan_loader;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_plan(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("plan.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_bundled_plan_file_matches_builtin_plan() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("plans/timesheets.toml");
    let plan = plan_loader::load_plan(Some(&path)).unwrap();
    assert_eq!(plan, timesheet_plan());
    assert_eq!(plan.fingerprint(), timesheet_plan().fingerprint());
}

#[test]
fn test_load_plan_nonexistent_file() {
    let result = plan_loader::load_plan(Some(Path::new("/nonexistent/plan.toml")));
    match result {
        Err(e) => assert!(e.to_string().contains("does not exist")),
        Ok(_) => panic!("Expected error for nonexistent plan file"),
    }
}

#[test]
fn test_load_plan_with_structured_types() {
    let dir = TempDir::new().unwrap();
    let path = write_plan(
        &dir,
        r#"
        [[steps]]
        step = "widen_badge"
        kind = "alter_column_type"
        table = "employees"
        column = "badge"
        new_type = { varchar = 64 }
        conversion = "cast"

        [[steps]]
        step = "users_fk"
        kind = "add_foreign_key"
        name = "timesheets_user_id_fkey"
        table = "timesheets"
        column = "user_id"
        ref_table = "users"
        ref_column = "id"

        [[steps]]
        step = "trim_notes"
        kind = "alter_column_type"
        table = "timesheets"
        column = "notes"
        new_type = "text"
        conversion = { expression = "btrim(notes)" }
        "#,
    );

    let plan = plan_loader::load_plan(Some(&path)).unwrap();
    let steps = plan.steps();
    assert_eq!(steps.len(), 3);

    assert_eq!(
        steps[0].change,
        SchemaChange::alter_column_type("employees", "badge", ColumnType::Varchar(64), Conversion::Cast)
    );
    match &steps[1].change {
        SchemaChange::AddForeignKey(fk) => {
            assert_eq!(fk.name, "timesheets_user_id_fkey");
            // delete action defaults like PostgreSQL does
            assert_eq!(fk.on_delete, OnDelete::NoAction);
        }
        other => panic!("unexpected change {:?}", other),
    }
    assert_eq!(
        steps[2].change.to_sql(),
        r#"ALTER TABLE "timesheets" ALTER COLUMN "notes" TYPE text USING btrim(notes)"#
    );
}

#[test]
fn test_load_plan_rejects_duplicate_step_names() {
    let dir = TempDir::new().unwrap();
    let path = write_plan(
        &dir,
        r#"
        [[steps]]
        step = "drop"
        kind = "drop_constraint"
        table = "timesheets"
        name = "a"

        [[steps]]
        step = "drop"
        kind = "drop_constraint"
        table = "timesheets"
        name = "b"
        "#,
    );

    let err = plan_loader::load_plan(Some(&path)).unwrap_err();
    assert!(format!("{:#}", err).contains("more than once"));
}

#[test]
fn test_load_plan_rejects_empty_file() {
    let dir = TempDir::new().unwrap();
    let path = write_plan(&dir, "");
    let err = plan_loader::load_plan(Some(&path)).unwrap_err();
    assert!(format!("{:#}", err).contains("no steps"));
}

#[test]
fn test_load_plan_rejects_misspelled_delete_action() {
    let dir = TempDir::new().unwrap();
    let path = write_plan(
        &dir,
        r#"
        [[steps]]
        step = "drop_timesheets_project_fk"
        kind = "drop_constraint"
        table = "timesheets"
        name = "timesheets_project_id_fkey"

        [[steps]]
        step = "add_timesheets_project_fk_cascade"
        kind = "add_foreign_key"
        name = "timesheets_project_id_fkey"
        table = "timesheets"
        column = "project_id"
        ref_table = "projects"
        ref_column = "id"
        on_delet = "cascade"
        "#,
    );

    let err = plan_loader::load_plan(Some(&path)).unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("unknown field"), "{}", message);
    assert!(message.contains("on_delet"), "{}", message);
}
