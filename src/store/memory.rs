//! In-memory `SchemaStore`
//!
//! Models just enough of a relational store to exercise migrations without a
//! server: typed columns, a single-column primary key per table, named foreign
//! keys checked on insert, and delete actions applied in one operation.
//! Every alteration request is recorded as the SQL `PgStore` would send.

use super::{warn_unless_widening, SchemaStore, StepOutcome, StoreError};
use crate::migration::change::{
    add_foreign_key_sql, alter_column_type_sql, drop_constraint_sql, ColumnType, Conversion,
    ForeignKeyDef, OnDelete,
};
use crate::migration::MigrationError;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// A stored value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Text(s) => f.write_str(s),
        }
    }
}

type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
struct Column {
    name: String,
    ty: ColumnType,
}

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<Column>,
    primary_key: String,
    rows: Vec<Row>,
}

impl Table {
    fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: BTreeMap<String, Table>,
    constraints: BTreeMap<String, ForeignKeyDef>,
    attempted: Vec<String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table; `primary_key` must name one of `columns`.
    pub fn create_table(
        &mut self,
        name: &str,
        primary_key: &str,
        columns: &[(&str, ColumnType)],
    ) -> Result<(), MigrationError> {
        if self.tables.contains_key(name) {
            return Err(StoreError::new(
                Some("42P07"),
                format!("relation \"{}\" already exists", name),
            )
            .into());
        }
        if !columns.iter().any(|(c, _)| *c == primary_key) {
            return Err(MigrationError::MissingColumn {
                table: name.to_string(),
                column: primary_key.to_string(),
            });
        }

        self.tables.insert(
            name.to_string(),
            Table {
                columns: columns
                    .iter()
                    .map(|(c, ty)| Column {
                        name: c.to_string(),
                        ty: ty.clone(),
                    })
                    .collect(),
                primary_key: primary_key.to_string(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    /// Insert a row, enforcing column types, primary key uniqueness and foreign keys.
    ///
    /// Columns left out are stored as `NULL`.
    pub fn insert(&mut self, table: &str, values: &[(&str, Value)]) -> Result<(), MigrationError> {
        let target = self.table(table)?;

        let mut row = Row::new();
        for column in &target.columns {
            row.insert(column.name.clone(), Value::Null);
        }
        for (name, value) in values {
            let column = target.column(name).ok_or_else(|| MigrationError::MissingColumn {
                table: table.to_string(),
                column: name.to_string(),
            })?;
            check_accepts(&column.ty, value).map_err(|detail| MigrationError::DataConversionError {
                table: table.to_string(),
                column: column.name.clone(),
                new_type: column.ty.to_string(),
                detail,
            })?;
            row.insert(name.to_string(), value.clone());
        }

        let key = row.get(&target.primary_key).cloned().unwrap_or(Value::Null);
        if key == Value::Null {
            return Err(StoreError::new(
                Some("23502"),
                format!("null value in column \"{}\" violates not-null constraint", target.primary_key),
            )
            .into());
        }
        if target.rows.iter().any(|r| r.get(&target.primary_key) == Some(&key)) {
            return Err(StoreError::new(
                Some("23505"),
                format!("duplicate key value violates unique constraint on \"{}\"", table),
            )
            .into());
        }

        for fk in self.constraints.values().filter(|fk| fk.table == table) {
            let value = row.get(&fk.column).unwrap_or(&Value::Null);
            if *value == Value::Null {
                continue;
            }
            let parent_has_key = self
                .tables
                .get(&fk.ref_table)
                .is_some_and(|p| p.rows.iter().any(|r| r.get(&fk.ref_column) == Some(value)));
            if !parent_has_key {
                return Err(MigrationError::ReferentialIntegrityViolation {
                    table: table.to_string(),
                    constraint: fk.name.clone(),
                    detail: format!(
                        "Key ({})=({}) is not present in table \"{}\"",
                        fk.column, value, fk.ref_table
                    ),
                });
            }
        }

        if let Some(t) = self.tables.get_mut(table) {
            t.rows.push(row);
        }
        Ok(())
    }

    /// Delete the row with primary key `key`, applying every delete action it triggers.
    ///
    /// Either all affected rows change or none do. Returns the number of rows
    /// removed, cascaded children included.
    pub fn delete(&mut self, table: &str, key: impl Into<Value>) -> Result<usize, MigrationError> {
        let key = key.into();
        let target = self.table(table)?;
        let Some(start) = target
            .rows
            .iter()
            .position(|r| r.get(&target.primary_key) == Some(&key))
        else {
            return Ok(0);
        };

        let mut doomed: BTreeSet<(String, usize)> = BTreeSet::new();
        let mut nulled: Vec<(String, usize, String)> = Vec::new();
        let mut blocked: Vec<(&ForeignKeyDef, usize, Value)> = Vec::new();
        let mut queue = VecDeque::new();

        doomed.insert((table.to_string(), start));
        queue.push_back((table.to_string(), start));

        while let Some((parent_table, index)) = queue.pop_front() {
            let Some(parent_row) = self.tables.get(&parent_table).and_then(|t| t.rows.get(index))
            else {
                continue;
            };
            for fk in self.constraints.values().filter(|fk| fk.ref_table == parent_table) {
                let Some(parent_key) = parent_row.get(&fk.ref_column) else {
                    continue;
                };
                if *parent_key == Value::Null {
                    continue;
                }
                let Some(child) = self.tables.get(&fk.table) else {
                    continue;
                };
                for (ci, child_row) in child.rows.iter().enumerate() {
                    if child_row.get(&fk.column) != Some(parent_key) {
                        continue;
                    }
                    match fk.on_delete {
                        OnDelete::Cascade => {
                            if doomed.insert((fk.table.clone(), ci)) {
                                queue.push_back((fk.table.clone(), ci));
                            }
                        }
                        // no column defaults are modelled, so SET DEFAULT lands on NULL
                        OnDelete::SetNull | OnDelete::SetDefault => {
                            nulled.push((fk.table.clone(), ci, fk.column.clone()));
                        }
                        OnDelete::NoAction | OnDelete::Restrict => {
                            blocked.push((fk, ci, parent_key.clone()));
                        }
                    }
                }
            }
        }

        if let Some((fk, _, parent_key)) = blocked
            .into_iter()
            .find(|(fk, ci, _)| !doomed.contains(&(fk.table.clone(), *ci)))
        {
            return Err(MigrationError::ReferentialIntegrityViolation {
                table: fk.table.clone(),
                constraint: fk.name.clone(),
                detail: format!(
                    "Key ({})=({}) is still referenced from table \"{}\"",
                    fk.ref_column, parent_key, fk.table
                ),
            });
        }

        for (t, ci, column) in nulled {
            if doomed.contains(&(t.clone(), ci)) {
                continue;
            }
            if let Some(row) = self.tables.get_mut(&t).and_then(|t| t.rows.get_mut(ci)) {
                row.insert(column, Value::Null);
            }
        }

        for (name, t) in self.tables.iter_mut() {
            let mut index = 0;
            t.rows.retain(|_| {
                let keep = !doomed.contains(&(name.clone(), index));
                index += 1;
                keep
            });
        }

        Ok(doomed.len())
    }

    /// Values of `column` in insertion order
    #[must_use]
    pub fn values(&self, table: &str, column: &str) -> Vec<Value> {
        self.tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|r| r.get(column).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rows of `table` whose `column` equals `value`
    #[must_use]
    pub fn count_where(&self, table: &str, column: &str, value: &Value) -> usize {
        self.tables
            .get(table)
            .map(|t| t.rows.iter().filter(|r| r.get(column) == Some(value)).count())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.rows.len())
    }

    #[must_use]
    pub fn constraint(&self, name: &str) -> Option<&ForeignKeyDef> {
        self.constraints.get(name)
    }

    #[must_use]
    pub fn column_type(&self, table: &str, column: &str) -> Option<&ColumnType> {
        self.tables.get(table)?.column(column).map(|c| &c.ty)
    }

    /// SQL of every alteration requested so far, failed ones included
    #[must_use]
    pub fn attempted(&self) -> &[String] {
        &self.attempted
    }

    fn table(&self, name: &str) -> Result<&Table, MigrationError> {
        self.tables
            .get(name)
            .ok_or_else(|| MigrationError::MissingTable(name.to_string()))
    }
}

impl SchemaStore for MemoryStore {
    fn drop_constraint_if_exists(
        &mut self,
        table: &str,
        constraint: &str,
    ) -> Result<StepOutcome, MigrationError> {
        self.attempted.push(drop_constraint_sql(table, constraint));
        self.table(table)?;

        let present = self
            .constraints
            .get(constraint)
            .is_some_and(|fk| fk.table == table);
        if present {
            self.constraints.remove(constraint);
            Ok(StepOutcome::Applied)
        } else {
            Ok(StepOutcome::Skipped)
        }
    }

    fn add_foreign_key(&mut self, fk: &ForeignKeyDef) -> Result<StepOutcome, MigrationError> {
        self.attempted.push(add_foreign_key_sql(fk));

        // same order as the server: child table, name clash, parent, columns, keys, rows
        let child = self.table(&fk.table)?;
        if self.constraints.contains_key(&fk.name) {
            return Err(MigrationError::ConstraintConflict {
                table: fk.table.clone(),
                constraint: fk.name.clone(),
            });
        }
        let parent = self.table(&fk.ref_table)?;
        if child.column(&fk.column).is_none() {
            return Err(MigrationError::MissingColumn {
                table: fk.table.clone(),
                column: fk.column.clone(),
            });
        }
        if parent.column(&fk.ref_column).is_none() {
            return Err(MigrationError::MissingColumn {
                table: fk.ref_table.clone(),
                column: fk.ref_column.clone(),
            });
        }
        if parent.primary_key != fk.ref_column {
            return Err(StoreError::new(
                Some("42830"),
                format!(
                    "there is no unique constraint matching given keys for referenced table \"{}\"",
                    fk.ref_table
                ),
            )
            .into());
        }

        let keys: BTreeSet<&Value> = parent
            .rows
            .iter()
            .filter_map(|r| r.get(&fk.ref_column))
            .collect();
        if let Some(orphan) = child
            .rows
            .iter()
            .filter_map(|r| r.get(&fk.column))
            .find(|v| **v != Value::Null && !keys.contains(v))
        {
            return Err(MigrationError::ReferentialIntegrityViolation {
                table: fk.table.clone(),
                constraint: fk.name.clone(),
                detail: format!(
                    "Key ({})=({}) is not present in table \"{}\"",
                    fk.column, orphan, fk.ref_table
                ),
            });
        }

        self.constraints.insert(fk.name.clone(), fk.clone());
        Ok(StepOutcome::Applied)
    }

    fn widen_column_type(
        &mut self,
        table: &str,
        column: &str,
        new_type: &ColumnType,
        conversion: &Conversion,
    ) -> Result<StepOutcome, MigrationError> {
        self.attempted
            .push(alter_column_type_sql(table, column, new_type, conversion));

        let target = self.table(table)?;
        let old_type = target
            .column(column)
            .map(|c| c.ty.clone())
            .ok_or_else(|| MigrationError::MissingColumn {
                table: table.to_string(),
                column: column.to_string(),
            })?;
        if let Conversion::Expression(expr) = conversion {
            return Err(StoreError::new(
                None,
                format!("conversion expression `{}` cannot be evaluated in memory", expr),
            )
            .into());
        }
        let conversion_error = |detail: String| MigrationError::DataConversionError {
            table: table.to_string(),
            column: column.to_string(),
            new_type: new_type.to_string(),
            detail,
        };

        warn_unless_widening(table, column, &old_type, new_type);

        // convert everything before touching anything
        let converted = target
            .rows
            .iter()
            .map(|r| {
                let value = r.get(column).unwrap_or(&Value::Null);
                convert(value, new_type, conversion)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(conversion_error)?;

        if let Some(t) = self.tables.get_mut(table) {
            if let Some(c) = t.columns.iter_mut().find(|c| c.name == column) {
                c.ty = new_type.clone();
            }
            for (row, value) in t.rows.iter_mut().zip(converted) {
                row.insert(column.to_string(), value);
            }
        }
        Ok(StepOutcome::Applied)
    }
}

/// Reinterpret one value; the result must read back exactly as the original.
fn convert(value: &Value, new_type: &ColumnType, conversion: &Conversion) -> Result<Value, String> {
    if *value == Value::Null {
        return Ok(Value::Null);
    }

    let converted = match conversion {
        Conversion::AsText => match new_type {
            ColumnType::Text | ColumnType::Varchar(_) => Value::Text(value.to_string()),
            other => {
                return Err(format!(
                    "column is of type {} but expression is of type text",
                    other
                ))
            }
        },
        Conversion::Cast => cast(value, new_type)?,
        Conversion::Expression(expr) => {
            return Err(format!("cannot evaluate expression `{}`", expr))
        }
    };

    check_accepts(new_type, &converted)?;
    if converted.to_string() != value.to_string() {
        return Err(format!("value '{}' would be stored as '{}'", value, converted));
    }
    Ok(converted)
}

fn cast(value: &Value, ty: &ColumnType) -> Result<Value, String> {
    match ty {
        ColumnType::Text | ColumnType::Varchar(_) | ColumnType::Enum { .. } => {
            Ok(Value::Text(value.to_string()))
        }
        ColumnType::Integer | ColumnType::BigInt => match value {
            Value::Integer(i) => Ok(Value::Integer(*i)),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| format!("invalid input syntax for type {}: \"{}\"", ty, s)),
            Value::Null => Ok(Value::Null),
        },
    }
}

/// Whether a column of type `ty` can hold `value` as is
fn check_accepts(ty: &ColumnType, value: &Value) -> Result<(), String> {
    match (ty, value) {
        (_, Value::Null) => Ok(()),
        (ColumnType::Integer, Value::Integer(i)) => i32::try_from(*i)
            .map(|_| ())
            .map_err(|_| format!("value {} is out of range for type integer", i)),
        (ColumnType::BigInt, Value::Integer(_)) => Ok(()),
        (ColumnType::Text, Value::Text(_)) => Ok(()),
        (ColumnType::Varchar(n), Value::Text(s)) => {
            if s.chars().count() <= *n as usize {
                Ok(())
            } else {
                Err(format!("value too long for type varchar({})", n))
            }
        }
        (ColumnType::Enum { name, variants }, Value::Text(s)) => {
            if variants.iter().any(|v| v == s) {
                Ok(())
            } else {
                Err(format!("invalid input value for enum {}: \"{}\"", name, s))
            }
        }
        (ty, value) => Err(format!("value '{}' is not of type {}", value, ty)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projects_and_timesheets(on_delete: OnDelete) -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .create_table("projects", "id", &[("id", ColumnType::Integer), ("name", ColumnType::Text)])
            .unwrap();
        store
            .create_table(
                "timesheets",
                "id",
                &[("id", ColumnType::Integer), ("project_id", ColumnType::Integer)],
            )
            .unwrap();
        store
            .add_foreign_key(&ForeignKeyDef::new(
                "timesheets_project_id_fkey",
                ("timesheets", "project_id"),
                ("projects", "id"),
                on_delete,
            ))
            .unwrap();
        store.insert("projects", &[("id", 1.into()), ("name", "Payroll".into())]).unwrap();
        store.insert("timesheets", &[("id", 10.into()), ("project_id", 1.into())]).unwrap();
        store
    }

    #[test]
    fn test_insert_rejects_unknown_parent() {
        let mut store = projects_and_timesheets(OnDelete::NoAction);
        let err = store
            .insert("timesheets", &[("id", 11.into()), ("project_id", 99.into())])
            .unwrap_err();
        assert!(matches!(err, MigrationError::ReferentialIntegrityViolation { .. }));
        assert_eq!(store.row_count("timesheets"), 1);
    }

    #[test]
    fn test_insert_rejects_duplicate_primary_key() {
        let mut store = projects_and_timesheets(OnDelete::NoAction);
        let err = store.insert("projects", &[("id", 1.into())]).unwrap_err();
        assert!(err.to_string().contains("23505"));
    }

    #[test]
    fn test_insert_checks_enum_membership() {
        let mut store = MemoryStore::new();
        store
            .create_table(
                "expenses",
                "id",
                &[
                    ("id", ColumnType::Integer),
                    (
                        "category",
                        ColumnType::Enum {
                            name: "expense_category".to_string(),
                            variants: vec!["Travel".to_string()],
                        },
                    ),
                ],
            )
            .unwrap();
        store.insert("expenses", &[("id", 1.into()), ("category", "Travel".into())]).unwrap();
        let err = store
            .insert("expenses", &[("id", 2.into()), ("category", "Gym".into())])
            .unwrap_err();
        assert!(matches!(err, MigrationError::DataConversionError { .. }));
    }

    #[test]
    fn test_delete_blocked_without_cascade() {
        let mut store = projects_and_timesheets(OnDelete::NoAction);
        let err = store.delete("projects", 1).unwrap_err();
        assert!(matches!(err, MigrationError::ReferentialIntegrityViolation { .. }));
        assert_eq!(store.row_count("projects"), 1);
        assert_eq!(store.row_count("timesheets"), 1);
    }

    #[test]
    fn test_delete_set_null_keeps_child() {
        let mut store = projects_and_timesheets(OnDelete::SetNull);
        assert_eq!(store.delete("projects", 1).unwrap(), 1);
        assert_eq!(store.values("timesheets", "project_id"), vec![Value::Null]);
    }

    #[test]
    fn test_delete_cascades_through_chain() {
        let mut store = projects_and_timesheets(OnDelete::Cascade);
        store
            .create_table(
                "timesheet_entries",
                "id",
                &[("id", ColumnType::Integer), ("timesheet_id", ColumnType::Integer)],
            )
            .unwrap();
        store
            .add_foreign_key(&ForeignKeyDef::new(
                "entries_timesheet_id_fkey",
                ("timesheet_entries", "timesheet_id"),
                ("timesheets", "id"),
                OnDelete::Cascade,
            ))
            .unwrap();
        store
            .insert("timesheet_entries", &[("id", 100.into()), ("timesheet_id", 10.into())])
            .unwrap();

        assert_eq!(store.delete("projects", 1).unwrap(), 3);
        assert_eq!(store.row_count("timesheets"), 0);
        assert_eq!(store.row_count("timesheet_entries"), 0);
    }

    #[test]
    fn test_delete_missing_key_is_zero() {
        let mut store = projects_and_timesheets(OnDelete::Cascade);
        assert_eq!(store.delete("projects", 42).unwrap(), 0);
    }

    #[test]
    fn test_foreign_key_must_target_primary_key() {
        let mut store = projects_and_timesheets(OnDelete::Cascade);
        let err = store
            .add_foreign_key(&ForeignKeyDef::new(
                "bad_fk",
                ("timesheets", "project_id"),
                ("projects", "name"),
                OnDelete::Cascade,
            ))
            .unwrap_err();
        assert!(err.to_string().contains("42830"));
    }

    #[test]
    fn test_cast_text_to_integer_is_lossless_only() {
        assert_eq!(cast(&"42".into(), &ColumnType::BigInt).unwrap(), Value::Integer(42));
        assert!(cast(&"forty".into(), &ColumnType::BigInt).is_err());
        // parses, but reads back differently
        assert!(convert(&" 42".into(), &ColumnType::BigInt, &Conversion::Cast).is_err());
    }

    #[test]
    fn test_integer_widens_to_text() {
        let v = convert(&Value::Integer(-7), &ColumnType::Text, &Conversion::AsText).unwrap();
        assert_eq!(v, Value::Text("-7".to_string()));
    }

    #[test]
    fn test_missing_table_reported_before_name_clash() {
        let mut store = projects_and_timesheets(OnDelete::Cascade);
        let err = store
            .add_foreign_key(&ForeignKeyDef::new(
                "timesheets_project_id_fkey",
                ("payslips", "project_id"),
                ("projects", "id"),
                OnDelete::Cascade,
            ))
            .unwrap_err();
        assert!(matches!(err, MigrationError::MissingTable(ref t) if t == "payslips"));
    }

    #[test]
    fn test_missing_column_reported_before_unsupported_expression() {
        let mut store = projects_and_timesheets(OnDelete::Cascade);
        let err = store
            .widen_column_type(
                "projects",
                "budget",
                &ColumnType::Text,
                &Conversion::Expression("budget::text".to_string()),
            )
            .unwrap_err();
        assert!(matches!(err, MigrationError::MissingColumn { ref column, .. } if column == "budget"));

        let err = store
            .widen_column_type("invoices", "status", &ColumnType::Text, &Conversion::Expression("x".to_string()))
            .unwrap_err();
        assert!(matches!(err, MigrationError::MissingTable(_)));
    }

    #[test]
    fn test_expression_conversion_is_unsupported() {
        let mut store = projects_and_timesheets(OnDelete::Cascade);
        let err = store
            .widen_column_type(
                "projects",
                "name",
                &ColumnType::Text,
                &Conversion::Expression("upper(name)".to_string()),
            )
            .unwrap_err();
        assert!(matches!(err, MigrationError::Database(_)));
    }
}
