//! PostgreSQL-backed `SchemaStore`

use super::{warn_unless_widening, SchemaStore, StepOutcome, StoreError};
use crate::connection::{connect, redact, ConnectionError};
use crate::migration::change::{
    add_foreign_key_sql, alter_column_type_sql, drop_constraint_sql, ColumnType, Conversion,
    ForeignKeyDef,
};
use crate::migration::MigrationError;
use may_postgres::Client;
use std::time::Instant;

/// SQLSTATEs raised when a value has no image under the new type
const CONVERSION_STATES: &[&str] = &[
    "22P02", // invalid_text_representation
    "22001", // string_data_right_truncation
    "22003", // numeric_value_out_of_range
    "22007", // invalid_datetime_format
    "22008", // datetime_field_overflow
    "22018", // invalid_character_value_for_cast
    "42804", // datatype_mismatch
    "42846", // cannot_coerce
];

const COLUMN_TYPE_SQL: &str = "SELECT data_type::text, character_maximum_length::int4, \
     udt_schema::text, udt_name::text \
     FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2";

const ENUM_LABELS_SQL: &str = "SELECT e.enumlabel::text \
     FROM pg_enum e \
     JOIN pg_type t ON t.oid = e.enumtypid \
     JOIN pg_namespace n ON n.oid = t.typnamespace \
     WHERE n.nspname = $1 AND t.typname = $2 \
     ORDER BY e.enumsortorder";

/// One PostgreSQL connection, held for the lifetime of a run.
///
/// The connection closes when the store is dropped, whether the run
/// succeeded or not.
pub struct PgStore {
    client: Client,
}

impl PgStore {
    /// Wrap an already established client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect and apply the session `statement_timeout` (`0` leaves the server default).
    pub fn open(connection_string: &str, statement_timeout_seconds: u64) -> Result<Self, MigrationError> {
        log::info!("connecting to {}", redact(connection_string));
        let store = Self::new(connect(connection_string)?);

        if statement_timeout_seconds > 0 {
            let sql = format!("SET statement_timeout = '{}s'", statement_timeout_seconds);
            store.execute(&sql).map_err(|e| {
                if e.is_connection_failure() {
                    MigrationError::Connection(ConnectionError::Lost(e.message))
                } else {
                    MigrationError::Database(e)
                }
            })?;
        }

        Ok(store)
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Current type of `table.column` in the session's schema.
    ///
    /// `None` when the column is absent or its type is not one the migrator models.
    pub fn column_type(&self, table: &str, column: &str) -> Result<Option<ColumnType>, StoreError> {
        let rows = self.client.query(COLUMN_TYPE_SQL, &[&table, &column])?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let data_type: String = row.try_get(0)?;
        let max_length: Option<i32> = row.try_get(1)?;
        let udt_schema: String = row.try_get(2)?;
        let udt_name: String = row.try_get(3)?;

        let labels = if data_type == "USER-DEFINED" {
            self.client
                .query(ENUM_LABELS_SQL, &[&udt_schema, &udt_name])?
                .iter()
                .map(|r| r.try_get::<_, String>(0))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        Ok(column_type_from_catalog(&data_type, max_length, &udt_name, labels))
    }

    fn execute(&self, sql: &str) -> Result<u64, StoreError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("execute_ddl", sql = %sql).entered();

        let start = Instant::now();
        log::debug!("executing: {}", sql);
        let result = self.client.execute(sql, &[]).map_err(StoreError::from);
        log::debug!("statement finished in {:?}", start.elapsed());
        result
    }
}

impl SchemaStore for PgStore {
    fn drop_constraint_if_exists(
        &mut self,
        table: &str,
        constraint: &str,
    ) -> Result<StepOutcome, MigrationError> {
        // the server does not say whether IF EXISTS found anything
        self.execute(&drop_constraint_sql(table, constraint))
            .map(|_| StepOutcome::Applied)
            .map_err(|e| classify_common(e, table, None))
    }

    fn add_foreign_key(&mut self, fk: &ForeignKeyDef) -> Result<StepOutcome, MigrationError> {
        self.execute(&add_foreign_key_sql(fk))
            .map(|_| StepOutcome::Applied)
            .map_err(|e| match e.sqlstate.clone().as_deref() {
                Some("42710") => MigrationError::ConstraintConflict {
                    table: fk.table.clone(),
                    constraint: fk.name.clone(),
                },
                Some("23503") => MigrationError::ReferentialIntegrityViolation {
                    table: fk.table.clone(),
                    constraint: fk.name.clone(),
                    detail: e.message,
                },
                _ => classify_common(e, &fk.table, Some(&fk.column)),
            })
    }

    fn widen_column_type(
        &mut self,
        table: &str,
        column: &str,
        new_type: &ColumnType,
        conversion: &Conversion,
    ) -> Result<StepOutcome, MigrationError> {
        match self.column_type(table, column) {
            Ok(Some(old_type)) => {
                warn_unless_widening(table, column, &old_type, new_type);
            }
            Ok(None) => log::debug!("current type of {}.{} not recognised, skipping widening check", table, column),
            Err(e) => log::debug!("could not read current type of {}.{}: {}", table, column, e),
        }

        // a single ALTER ... USING either rewrites every row or none
        self.execute(&alter_column_type_sql(table, column, new_type, conversion))
            .map(|_| StepOutcome::Applied)
            .map_err(|e| match e.sqlstate.clone().as_deref() {
                Some(code) if CONVERSION_STATES.contains(&code) => {
                    MigrationError::DataConversionError {
                        table: table.to_string(),
                        column: column.to_string(),
                        new_type: new_type.to_string(),
                        detail: e.message,
                    }
                }
                _ => classify_common(e, table, Some(column)),
            })
    }
}

/// Map an `information_schema.columns` entry onto a modelled type
fn column_type_from_catalog(
    data_type: &str,
    max_length: Option<i32>,
    udt_name: &str,
    labels: Vec<String>,
) -> Option<ColumnType> {
    match data_type {
        "integer" => Some(ColumnType::Integer),
        "bigint" => Some(ColumnType::BigInt),
        "text" => Some(ColumnType::Text),
        // varchar without a length limit behaves like text
        "character varying" => match max_length {
            Some(n) => u32::try_from(n).ok().map(ColumnType::Varchar),
            None => Some(ColumnType::Text),
        },
        "USER-DEFINED" if !labels.is_empty() => Some(ColumnType::Enum {
            name: udt_name.to_string(),
            variants: labels,
        }),
        _ => None,
    }
}

/// Failures any alteration can hit
fn classify_common(err: StoreError, table: &str, column: Option<&str>) -> MigrationError {
    if err.is_connection_failure() {
        return MigrationError::Connection(ConnectionError::Lost(err.message));
    }
    match err.sqlstate.clone().as_deref() {
        Some("42P01") => {
            MigrationError::MissingTable(err.quoted_name().unwrap_or(table).to_string())
        }
        Some("42703") => MigrationError::MissingColumn {
            table: table.to_string(),
            column: err
                .quoted_name()
                .or(column)
                .unwrap_or_default()
                .to_string(),
        },
        _ => MigrationError::Database(err),
    }
}
