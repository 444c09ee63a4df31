//! In-memory row sets: raw datasets from the extractor and the fact and
//! dimension tables produced by a run.

use crate::{
    schema::{self, TableSchema},
    value::Value,
};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;

pub type Row = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// An empty table shaped like `schema`.
    pub fn empty(schema: &TableSchema) -> Self {
        Self::new(
            schema.name,
            schema.column_names().into_iter().map(String::from).collect(),
        )
    }

    pub fn from_rows(schema: &TableSchema, rows: Vec<Row>) -> Self {
        let mut table = Self::empty(schema);
        table.rows = rows;
        table
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Values of one column, in row order. Empty when the column is absent.
    pub fn column_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Value> + 'a {
        let idx = self.column_index(name);
        self.rows
            .iter()
            .filter_map(move |row| idx.and_then(|i| row.get(i)))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    pub fn retain(&mut self, f: impl FnMut(&Row) -> bool) {
        self.rows.retain(f);
    }

    /// Rewrite one column in place. No-op when the column is absent.
    pub fn map_column(&mut self, name: &str, f: impl Fn(&Value) -> Value) {
        if let Some(idx) = self.column_index(name) {
            for row in &mut self.rows {
                row[idx] = f(&row[idx]);
            }
        }
    }

    /// Drop rows where any of `columns` is null.
    pub fn drop_nulls(&mut self, columns: &[&str]) {
        let idx: Vec<usize> = columns
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect();
        self.rows.retain(|row| idx.iter().all(|&i| !row[i].is_null()));
    }

    /// Keep the first row for each distinct value of `column`.
    pub fn dedup_by_column(&mut self, column: &str) {
        let Some(idx) = self.column_index(column) else {
            return;
        };
        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(row[idx].clone()));
    }

    /// Keep the first of each group of identical rows.
    pub fn dedup_rows(&mut self) {
        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(row.clone()));
    }

    /// Project onto `schema`, in schema column order. Errors with the list of
    /// missing columns when the input lacks any of them.
    pub fn project(&self, schema: &TableSchema) -> Result<Table, Vec<&'static str>> {
        let mut indices = Vec::with_capacity(schema.columns.len());
        let mut missing = Vec::new();
        for col in schema.columns {
            match self.column_index(col.name) {
                Some(i) => indices.push(i),
                None => missing.push(col.name),
            }
        }
        if !missing.is_empty() {
            return Err(missing);
        }
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(Table::from_rows(schema, rows))
    }

    /// Columns from `required` that this table lacks.
    pub fn missing_columns<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|c| !self.has_column(c))
            .collect()
    }

    pub fn min_timestamp(&self, column: &str) -> Option<NaiveDateTime> {
        self.column_values(column).filter_map(Value::as_timestamp).min()
    }

    pub fn max_timestamp(&self, column: &str) -> Option<NaiveDateTime> {
        self.column_values(column).filter_map(Value::as_timestamp).max()
    }
}

/// The eight output tables of one run, as produced or as read back.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSet {
    pub fact_withdrawals: Table,
    pub fact_deposits: Table,
    pub fact_events: Table,
    pub dim_user: Table,
    pub dim_currency: Table,
    pub dim_interface: Table,
    pub dim_time: Table,
    pub dim_event_type: Table,
}

impl TableSet {
    pub fn empty() -> Self {
        Self {
            fact_withdrawals: Table::empty(&schema::FACT_WITHDRAWALS),
            fact_deposits: Table::empty(&schema::FACT_DEPOSITS),
            fact_events: Table::empty(&schema::FACT_EVENTS),
            dim_user: Table::empty(&schema::DIM_USER),
            dim_currency: Table::empty(&schema::DIM_CURRENCY),
            dim_interface: Table::empty(&schema::DIM_INTERFACE),
            dim_time: Table::empty(&schema::DIM_TIME),
            dim_event_type: Table::empty(&schema::DIM_EVENT_TYPE),
        }
    }

    /// Build every table by calling `f` once per schema, in load order.
    pub fn try_build<E>(mut f: impl FnMut(&'static TableSchema) -> Result<Table, E>) -> Result<Self, E> {
        Ok(Self {
            fact_withdrawals: f(&schema::FACT_WITHDRAWALS)?,
            fact_deposits: f(&schema::FACT_DEPOSITS)?,
            fact_events: f(&schema::FACT_EVENTS)?,
            dim_user: f(&schema::DIM_USER)?,
            dim_currency: f(&schema::DIM_CURRENCY)?,
            dim_interface: f(&schema::DIM_INTERFACE)?,
            dim_time: f(&schema::DIM_TIME)?,
            dim_event_type: f(&schema::DIM_EVENT_TYPE)?,
        })
    }

    /// `(schema, table)` pairs in load order: facts first.
    pub fn iter(&self) -> impl Iterator<Item = (&'static TableSchema, &Table)> {
        [
            (&schema::FACT_WITHDRAWALS, &self.fact_withdrawals),
            (&schema::FACT_DEPOSITS, &self.fact_deposits),
            (&schema::FACT_EVENTS, &self.fact_events),
            (&schema::DIM_USER, &self.dim_user),
            (&schema::DIM_CURRENCY, &self.dim_currency),
            (&schema::DIM_INTERFACE, &self.dim_interface),
            (&schema::DIM_TIME, &self.dim_time),
            (&schema::DIM_EVENT_TYPE, &self.dim_event_type),
        ]
        .into_iter()
    }

    pub fn facts(&self) -> [&Table; 3] {
        [&self.fact_withdrawals, &self.fact_deposits, &self.fact_events]
    }
}
