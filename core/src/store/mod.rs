//! SQLite warehouse layer.
//!
//! RULE: Only the store talks to the database.
//! The pipeline hands tables to a `Warehouse`; it never executes SQL itself.

use crate::{
    error::{EtlError, EtlResult},
    schema::{ColumnKind, TableSchema},
    table::{Table, TableSet},
    value::Value,
};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

mod bookkeeping;

pub use bookkeeping::{QualityResultRow, RunRecord, RunStatus};

/// How a table write treats what is already in the warehouse.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Drop and recreate. Idempotent per table, so re-processing after a
    /// crash between load and watermark commit is harmless.
    #[default]
    Replace,
    /// Create if absent, then insert-or-replace by primary key. Rows from
    /// earlier runs are kept; a re-processed row overwrites its own key.
    Upsert,
}

/// The sink the loader writes to and the quality gate reads back from.
pub trait Warehouse {
    fn write(&mut self, schema: &TableSchema, table: &Table, mode: WriteMode) -> EtlResult<()>;

    fn read(&self, schema: &'static TableSchema) -> EtlResult<Table>;

    /// Whether a table for `schema` has been written yet.
    fn contains(&self, schema: &TableSchema) -> EtlResult<bool>;

    /// Read every output table, in load order.
    fn read_all(&self) -> EtlResult<TableSet> {
        TableSet::try_build(|schema| self.read(schema))
    }
}

pub struct SqliteWarehouse {
    conn: Connection,
}

impl SqliteWarehouse {
    /// Open (or create) the warehouse database at `path`.
    pub fn open(path: &str) -> EtlResult<Self> {
        if path == ":memory:" {
            return Self::in_memory();
        }
        let conn = Connection::open(path)?;
        // WAL lets readers query the warehouse while a run is loading.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EtlResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Apply all bookkeeping migrations in order.
    pub fn migrate(&self) -> EtlResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> EtlResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn row_count(&self, name: &str) -> EtlResult<i64> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote(name)), [], |row| row.get(0))?;
        Ok(count)
    }

    /// Column names of an existing table, in declaration order.
    fn existing_columns(tx: &Transaction<'_>, name: &str) -> EtlResult<Vec<String>> {
        let mut stmt = tx.prepare(&format!("PRAGMA table_info({})", quote(name)))?;
        let cols = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cols)
    }

    fn replace(&mut self, schema: &TableSchema, table: &Table) -> EtlResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {}; {}",
            quote(schema.name),
            create_sql(schema, false)
        ))?;
        insert_rows(&tx, schema, table, "INSERT")?;
        tx.commit()?;
        Ok(())
    }

    fn upsert(&mut self, schema: &TableSchema, table: &Table) -> EtlResult<()> {
        let Some(key) = schema.primary_key else {
            return Err(EtlError::load(schema.name, "upsert needs a primary key"));
        };
        // INSERT OR REPLACE would keep only the last of two rows sharing a key.
        let mut seen = HashSet::new();
        if let Some(dup) = table
            .column_values(key)
            .filter(|v| !v.is_null())
            .find(|v| !seen.insert(*v))
        {
            return Err(EtlError::load(
                schema.name,
                format!("batch repeats {key} {dup}; upsert would drop rows"),
            ));
        }
        let tx = self.conn.transaction()?;
        tx.execute_batch(&create_sql(schema, true))?;
        let existing = Self::existing_columns(&tx, schema.name)?;
        if existing != schema.column_names() {
            return Err(EtlError::load(
                schema.name,
                format!(
                    "schema mismatch: warehouse has {existing:?}, expected {:?}",
                    schema.column_names()
                ),
            ));
        }
        insert_rows(&tx, schema, table, "INSERT OR REPLACE")?;
        tx.commit()?;
        Ok(())
    }
}

impl Warehouse for SqliteWarehouse {
    fn write(&mut self, schema: &TableSchema, table: &Table, mode: WriteMode) -> EtlResult<()> {
        if table.columns != schema.column_names() {
            return Err(EtlError::load(
                schema.name,
                format!("table columns {:?} do not match schema", table.columns),
            ));
        }
        let result = match mode {
            WriteMode::Replace => self.replace(schema, table),
            WriteMode::Upsert => self.upsert(schema, table),
        };
        result.map_err(|e| match e {
            EtlError::Load { .. } => e,
            other => EtlError::load(schema.name, other.to_string()),
        })?;
        log::info!(
            "Successfully saved {} ({} rows, {:?}) to the warehouse",
            schema.name,
            table.len(),
            mode
        );
        Ok(())
    }

    fn read(&self, schema: &'static TableSchema) -> EtlResult<Table> {
        let cols: Vec<String> = schema.columns.iter().map(|c| quote(c.name)).collect();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY rowid",
            cols.join(", "),
            quote(schema.name)
        ))?;
        let rows = stmt
            .query_map([], |row| {
                schema
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, def)| Ok(from_sql(row.get_ref(i)?, def.kind)))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Table::from_rows(schema, rows))
    }

    fn contains(&self, schema: &TableSchema) -> EtlResult<bool> {
        self.table_exists(schema.name)
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn create_sql(schema: &TableSchema, keyed: bool) -> String {
    let mut defs: Vec<String> = schema
        .columns
        .iter()
        .map(|c| format!("{} {}", quote(c.name), c.kind.sql_type()))
        .collect();
    let mut sql = String::from("CREATE TABLE ");
    if keyed {
        sql.push_str("IF NOT EXISTS ");
        if let Some(key) = schema.primary_key {
            defs.push(format!("PRIMARY KEY ({})", quote(key)));
        }
    }
    sql.push_str(&format!("{} ({});", quote(schema.name), defs.join(", ")));
    sql
}

fn insert_rows(tx: &Transaction<'_>, schema: &TableSchema, table: &Table, verb: &str) -> EtlResult<()> {
    let cols: Vec<String> = schema.columns.iter().map(|c| quote(c.name)).collect();
    let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
    let mut stmt = tx.prepare(&format!(
        "{verb} INTO {} ({}) VALUES ({})",
        quote(schema.name),
        cols.join(", "),
        placeholders.join(", ")
    ))?;
    for row in &table.rows {
        stmt.execute(params_from_iter(row.iter()))?;
    }
    Ok(())
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Date(_) | Value::Timestamp(_) => ToSqlOutput::Owned(SqlValue::Text(self.to_string())),
        })
    }
}

/// Map a stored cell back to a typed value using the schema's column kind.
fn from_sql(cell: ValueRef<'_>, kind: ColumnKind) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => match kind {
            ColumnKind::Boolean => Value::Bool(i != 0),
            ColumnKind::Real => Value::Float(i as f64),
            _ => Value::Int(i),
        },
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            let s = String::from_utf8_lossy(t);
            match kind {
                ColumnKind::Text => Value::Text(s.into_owned()),
                other => Value::parse_as(&s, other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DIM_TIME, FACT_DEPOSITS};

    fn deposits(rows: &[(i64, &str, f64)]) -> Table {
        Table::from_rows(
            &FACT_DEPOSITS,
            rows.iter()
                .map(|(id, ts, amount)| {
                    vec![
                        Value::Int(*id),
                        Value::text(*ts).to_timestamp(),
                        Value::text("u1"),
                        Value::Float(*amount),
                        Value::text("USD"),
                        Value::text("complete"),
                    ]
                })
                .collect(),
        )
    }

    #[test]
    fn replace_round_trips_typed_values() {
        let mut wh = SqliteWarehouse::in_memory().unwrap();
        let table = deposits(&[(1, "2024-01-01 10:00:00.5", 12.5), (2, "2024-01-02", 100.0)]);
        wh.write(&FACT_DEPOSITS, &table, WriteMode::Replace).unwrap();
        assert_eq!(wh.read(&FACT_DEPOSITS).unwrap(), table);
    }

    #[test]
    fn replace_supersedes_previous_contents() {
        let mut wh = SqliteWarehouse::in_memory().unwrap();
        wh.write(&FACT_DEPOSITS, &deposits(&[(1, "2024-01-01", 1.0), (2, "2024-01-01", 2.0)]), WriteMode::Replace)
            .unwrap();
        wh.write(&FACT_DEPOSITS, &deposits(&[(3, "2024-01-02", 3.0)]), WriteMode::Replace)
            .unwrap();
        assert_eq!(wh.row_count("fact_deposits").unwrap(), 1);
    }

    #[test]
    fn upsert_merges_by_primary_key() {
        let mut wh = SqliteWarehouse::in_memory().unwrap();
        wh.write(&FACT_DEPOSITS, &deposits(&[(1, "2024-01-01", 1.0), (2, "2024-01-01", 2.0)]), WriteMode::Upsert)
            .unwrap();
        wh.write(&FACT_DEPOSITS, &deposits(&[(2, "2024-01-02", 20.0), (3, "2024-01-02", 3.0)]), WriteMode::Upsert)
            .unwrap();

        let back = wh.read(&FACT_DEPOSITS).unwrap();
        assert_eq!(back.len(), 3);
        let amounts: Vec<_> = back.column_values("amount").cloned().collect();
        assert_eq!(amounts, [Value::Float(1.0), Value::Float(20.0), Value::Float(3.0)]);
    }

    #[test]
    fn upsert_refuses_a_batch_that_repeats_a_key() {
        let mut wh = SqliteWarehouse::in_memory().unwrap();
        wh.write(&FACT_DEPOSITS, &deposits(&[(9, "2024-01-01", 9.0)]), WriteMode::Upsert)
            .unwrap();

        let batch = deposits(&[(1, "2024-01-02", 1.0), (1, "2024-01-02", 2.0)]);
        let err = wh.write(&FACT_DEPOSITS, &batch, WriteMode::Upsert).unwrap_err();
        assert!(
            matches!(err, EtlError::Load { ref table, ref reason } if table == "fact_deposits" && reason.contains("repeats id 1")),
            "unexpected error: {err}"
        );
        // Nothing from the refused batch reached the table.
        assert_eq!(wh.row_count("fact_deposits").unwrap(), 1);
    }

    #[test]
    fn upsert_rejects_schema_mismatch() {
        let mut wh = SqliteWarehouse::in_memory().unwrap();
        wh.conn
            .execute_batch("CREATE TABLE fact_deposits (id INTEGER, amount REAL);")
            .unwrap();
        let err = wh
            .write(&FACT_DEPOSITS, &deposits(&[(1, "2024-01-01", 1.0)]), WriteMode::Upsert)
            .unwrap_err();
        assert!(matches!(err, EtlError::Load { ref table, ref reason } if table == "fact_deposits" && reason.contains("schema mismatch")));
    }

    #[test]
    fn mis_shaped_table_is_a_load_error() {
        let mut wh = SqliteWarehouse::in_memory().unwrap();
        let err = wh
            .write(&DIM_TIME, &deposits(&[]), WriteMode::Replace)
            .unwrap_err();
        assert!(matches!(err, EtlError::Load { .. }));
        assert!(!wh.table_exists("dim_time").unwrap());
    }

    #[test]
    fn booleans_and_dates_survive_storage() {
        let mut wh = SqliteWarehouse::in_memory().unwrap();
        let dim = crate::dimension::dim_time(
            chrono::NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2024, 3, 3).unwrap(),
        );
        wh.write(&DIM_TIME, &dim, WriteMode::Replace).unwrap();
        assert_eq!(wh.read(&DIM_TIME).unwrap(), dim);
    }
}
