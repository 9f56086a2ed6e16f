//! Schema changes and their PostgreSQL rendering

use sea_query::{Alias, ForeignKey, ForeignKeyAction, PostgresQueryBuilder};
use serde::Deserialize;
use std::fmt;

/// What happens to child rows when their parent row is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl OnDelete {
    fn to_sea_query(self) -> ForeignKeyAction {
        match self {
            OnDelete::NoAction => ForeignKeyAction::NoAction,
            OnDelete::Restrict => ForeignKeyAction::Restrict,
            OnDelete::Cascade => ForeignKeyAction::Cascade,
            OnDelete::SetNull => ForeignKeyAction::SetNull,
            OnDelete::SetDefault => ForeignKeyAction::SetDefault,
        }
    }
}

impl fmt::Display for OnDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OnDelete::NoAction => "NO ACTION",
            OnDelete::Restrict => "RESTRICT",
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
            OnDelete::SetDefault => "SET DEFAULT",
        };
        f.write_str(s)
    }
}

/// A named foreign key from `table.column` to `ref_table.ref_column`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeignKeyDef {
    pub name: String,
    pub table: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
    #[serde(default)]
    pub on_delete: OnDelete,
}

impl ForeignKeyDef {
    pub fn new(
        name: impl Into<String>,
        (table, column): (&str, &str),
        (ref_table, ref_column): (&str, &str),
        on_delete: OnDelete,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.to_string(),
            column: column.to_string(),
            ref_table: ref_table.to_string(),
            ref_column: ref_column.to_string(),
            on_delete,
        }
    }
}

/// Declared column types the migrator knows how to reason about
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    BigInt,
    Text,
    Varchar(u32),
    /// A PostgreSQL enum type with its allowed labels
    Enum { name: String, variants: Vec<String> },
}

impl ColumnType {
    /// Whether every value `old` accepts is also accepted, verbatim, by `self`.
    ///
    /// Equal types count as widening so re-running an already applied step is safe.
    #[must_use]
    pub fn is_widening_of(&self, old: &ColumnType) -> bool {
        match (self, old) {
            (ColumnType::Text, _) => true,
            (ColumnType::Varchar(n), ColumnType::Varchar(m)) => m <= n,
            (ColumnType::Varchar(n), ColumnType::Enum { variants, .. }) => variants
                .iter()
                .all(|v| v.chars().count() <= *n as usize),
            // widest rendering of each integer type, sign included
            (ColumnType::Varchar(n), ColumnType::Integer) => *n >= 11,
            (ColumnType::Varchar(n), ColumnType::BigInt) => *n >= 20,
            (ColumnType::BigInt, ColumnType::Integer | ColumnType::BigInt) => true,
            (ColumnType::Integer, ColumnType::Integer) => true,
            (ColumnType::Enum { variants: new, .. }, ColumnType::Enum { variants: old, .. }) => {
                old.iter().all(|v| new.contains(v))
            }
            _ => false,
        }
    }

    /// SQL spelling used in DDL
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            ColumnType::Integer => "integer".to_string(),
            ColumnType::BigInt => "bigint".to_string(),
            ColumnType::Text => "text".to_string(),
            ColumnType::Varchar(n) => format!("varchar({})", n),
            ColumnType::Enum { name, .. } => quote_ident(name),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Enum { name, .. } => write!(f, "enum {}", name),
            other => f.write_str(&other.to_sql()),
        }
    }
}

/// How existing values are reinterpreted when a column changes type
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
    /// `USING col::text`
    AsText,
    /// `USING col::<new type>`
    Cast,
    /// `USING <expression>`, taken verbatim
    Expression(String),
}

/// One step of schema evolution
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum SchemaChange {
    DropConstraint {
        table: String,
        name: String,
    },
    AddForeignKey(ForeignKeyDef),
    AlterColumnType {
        table: String,
        column: String,
        new_type: ColumnType,
        conversion: Conversion,
    },
}

impl SchemaChange {
    pub fn drop_constraint(table: &str, name: &str) -> Self {
        SchemaChange::DropConstraint {
            table: table.to_string(),
            name: name.to_string(),
        }
    }

    pub fn add_foreign_key(fk: ForeignKeyDef) -> Self {
        SchemaChange::AddForeignKey(fk)
    }

    pub fn alter_column_type(
        table: &str,
        column: &str,
        new_type: ColumnType,
        conversion: Conversion,
    ) -> Self {
        SchemaChange::AlterColumnType {
            table: table.to_string(),
            column: column.to_string(),
            new_type,
            conversion,
        }
    }

    /// The table this change alters
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            SchemaChange::DropConstraint { table, .. }
            | SchemaChange::AlterColumnType { table, .. } => table,
            SchemaChange::AddForeignKey(fk) => &fk.table,
        }
    }

    /// Every identifier the change will put into SQL
    pub(crate) fn identifiers(&self) -> Vec<&str> {
        match self {
            SchemaChange::DropConstraint { table, name } => vec![table.as_str(), name.as_str()],
            SchemaChange::AddForeignKey(fk) => vec![
                fk.name.as_str(),
                fk.table.as_str(),
                fk.column.as_str(),
                fk.ref_table.as_str(),
                fk.ref_column.as_str(),
            ],
            SchemaChange::AlterColumnType {
                table,
                column,
                new_type,
                ..
            } => {
                let mut ids = vec![table.as_str(), column.as_str()];
                if let ColumnType::Enum { name, .. } = new_type {
                    ids.push(name.as_str());
                }
                ids
            }
        }
    }

    /// One-line human description for progress output
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            SchemaChange::DropConstraint { table, name } => {
                format!("drop constraint {} on {} (if exists)", name, table)
            }
            SchemaChange::AddForeignKey(fk) => format!(
                "add foreign key {} on {}.{} -> {}.{} (ON DELETE {})",
                fk.name, fk.table, fk.column, fk.ref_table, fk.ref_column, fk.on_delete
            ),
            SchemaChange::AlterColumnType {
                table,
                column,
                new_type,
                ..
            } => format!("widen {}.{} to {}", table, column, new_type),
        }
    }

    /// The single PostgreSQL statement that applies this change
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            SchemaChange::DropConstraint { table, name } => drop_constraint_sql(table, name),
            SchemaChange::AddForeignKey(fk) => add_foreign_key_sql(fk),
            SchemaChange::AlterColumnType {
                table,
                column,
                new_type,
                conversion,
            } => alter_column_type_sql(table, column, new_type, conversion),
        }
    }
}

/// Double-quote an identifier, doubling embedded quotes
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn drop_constraint_sql(table: &str, name: &str) -> String {
    // sea-query has no IF EXISTS form for dropping constraints
    format!(
        "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
        quote_ident(table),
        quote_ident(name)
    )
}

pub fn add_foreign_key_sql(fk: &ForeignKeyDef) -> String {
    ForeignKey::create()
        .name(fk.name.as_str())
        .from(Alias::new(fk.table.as_str()), Alias::new(fk.column.as_str()))
        .to(Alias::new(fk.ref_table.as_str()), Alias::new(fk.ref_column.as_str()))
        .on_delete(fk.on_delete.to_sea_query())
        .to_owned()
        .build(PostgresQueryBuilder)
}

pub fn alter_column_type_sql(
    table: &str,
    column: &str,
    new_type: &ColumnType,
    conversion: &Conversion,
) -> String {
    let column_ident = quote_ident(column);
    let using = match conversion {
        Conversion::AsText => format!("{}::text", column_ident),
        Conversion::Cast => format!("{}::{}", column_ident, new_type.to_sql()),
        Conversion::Expression(expr) => expr.clone(),
    };
    format!(
        "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}",
        quote_ident(table),
        column_ident,
        new_type.to_sql(),
        using
    )
}
