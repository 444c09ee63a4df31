//! Dimension synthesis: lookup tables derived from the fact outputs.
//!
//! Surrogate keys are positional: the 1-based index of each distinct value
//! in first-seen order. They are stable within a run only, which is why
//! dimension tables are always fully replaced on load. When facts are
//! upserted, the pipeline feeds these builders every stored fact.
//!
//! An empty input produces an empty dimension. No placeholder rows.

use crate::{
    extract::EVENT_TIMESTAMP,
    schema::{TableSchema, DIM_CURRENCY, DIM_EVENT_TYPE, DIM_INTERFACE, DIM_TIME},
    table::Table,
    value::Value,
};
use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;

/// Distinct values of `column` across `facts`, in first-seen order, keyed
/// 1..=n. Facts lacking the column contribute nothing.
fn ordinal_dimension(schema: &TableSchema, facts: &[&Table], column: &str) -> Table {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for value in facts.iter().flat_map(|t| t.column_values(column)) {
        if seen.insert(value) {
            rows.push(vec![value.clone(), Value::Int(rows.len() as i64 + 1)]);
        }
    }
    log::info!("{} built with {} rows", schema.name, rows.len());
    Table::from_rows(schema, rows)
}

/// Currencies referenced by withdrawals and deposits, withdrawals first.
pub fn dim_currency(withdrawals: &Table, deposits: &Table) -> Table {
    ordinal_dimension(&DIM_CURRENCY, &[withdrawals, deposits], "currency")
}

pub fn dim_interface(withdrawals: &Table) -> Table {
    ordinal_dimension(&DIM_INTERFACE, &[withdrawals], "interface")
}

pub fn dim_event_type(events: &Table) -> Table {
    ordinal_dimension(&DIM_EVENT_TYPE, &[events], "event_name")
}

/// Earliest and latest event date across all `facts`.
pub fn fact_date_range(facts: &[&Table]) -> Option<(NaiveDate, NaiveDate)> {
    let min = facts.iter().filter_map(|t| t.min_timestamp(EVENT_TIMESTAMP)).min()?;
    let max = facts.iter().filter_map(|t| t.max_timestamp(EVENT_TIMESTAMP)).max()?;
    Some((min.date(), max.date()))
}

/// One row per calendar day in `[min, max]`. Empty when `max < min`.
pub fn dim_time(min: NaiveDate, max: NaiveDate) -> Table {
    let rows: Vec<_> = min
        .iter_days()
        .take_while(|d| *d <= max)
        .enumerate()
        .map(|(i, date)| {
            let day_of_week = date.weekday().num_days_from_monday();
            vec![
                Value::Date(date),
                Value::Int(date.year() as i64),
                Value::Int(date.month() as i64),
                Value::Int(date.day() as i64),
                Value::Int(((date.month() - 1) / 3 + 1) as i64),
                Value::Int(day_of_week as i64),
                Value::Bool(day_of_week >= 5),
                Value::Int(i as i64 + 1),
            ]
        })
        .collect();
    log::info!("{} built with {} days ({min} to {max})", DIM_TIME.name, rows.len());
    Table::from_rows(&DIM_TIME, rows)
}

/// Time dimension spanning the facts, or empty when no fact has a timestamp.
pub fn dim_time_for(facts: &[&Table]) -> Table {
    match fact_date_range(facts) {
        Some((min, max)) => dim_time(min, max),
        None => {
            log::info!("{} is empty: no fact timestamps in this run", DIM_TIME.name);
            Table::empty(&DIM_TIME)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FACT_DEPOSITS, FACT_WITHDRAWALS};

    fn withdrawal(currency: &str, interface: &str, ts: &str) -> Vec<Value> {
        vec![
            Value::Int(1),
            Value::text(ts).to_timestamp(),
            Value::text("u1"),
            Value::Float(10.0),
            Value::text(interface),
            Value::text(currency),
            Value::text("ok"),
        ]
    }

    fn deposit(currency: &str, ts: &str) -> Vec<Value> {
        vec![
            Value::Int(1),
            Value::text(ts).to_timestamp(),
            Value::text("u1"),
            Value::Float(10.0),
            Value::text(currency),
            Value::text("complete"),
        ]
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn currency_keys_are_dense_and_first_seen() {
        let w = Table::from_rows(
            &FACT_WITHDRAWALS,
            vec![
                withdrawal("USD", "web", "2024-01-01"),
                withdrawal("EUR", "app", "2024-01-01"),
                withdrawal("USD", "web", "2024-01-01"),
            ],
        );
        let d = Table::from_rows(
            &FACT_DEPOSITS,
            vec![deposit("GBP", "2024-01-01"), deposit("EUR", "2024-01-01")],
        );
        let dim = dim_currency(&w, &d);

        assert_eq!(dim.columns, ["currency_name", "currency_id"]);
        let names: Vec<_> = dim.column_values("currency_name").cloned().collect();
        assert_eq!(names, [Value::text("USD"), Value::text("EUR"), Value::text("GBP")]);
        let ids: Vec<_> = dim.column_values("currency_id").cloned().collect();
        assert_eq!(ids, [Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn empty_facts_give_empty_dimensions() {
        let w = Table::empty(&FACT_WITHDRAWALS);
        let d = Table::empty(&FACT_DEPOSITS);
        assert!(dim_currency(&w, &d).is_empty());
        assert!(dim_interface(&w).is_empty());
        assert!(dim_time_for(&[&w, &d]).is_empty());
    }

    #[test]
    fn time_dimension_covers_every_day_inclusive() {
        // 2024-03-01 is a Friday.
        let dim = dim_time(date("2024-03-01"), date("2024-03-04"));
        assert_eq!(dim.len(), 4);
        assert_eq!(dim.rows[0][0], Value::Date(date("2024-03-01")));
        assert_eq!(dim.rows[0][4], Value::Int(1), "quarter");
        assert_eq!(dim.rows[0][5], Value::Int(4), "friday");
        assert_eq!(dim.rows[0][6], Value::Bool(false));
        assert_eq!(dim.rows[1][6], Value::Bool(true), "saturday");
        assert_eq!(dim.rows[2][5], Value::Int(6), "sunday");
        assert_eq!(dim.rows[3][5], Value::Int(0), "monday");
        assert_eq!(dim.rows[3][7], Value::Int(4), "time_id");
    }

    #[test]
    fn time_range_uses_calendar_dates_across_all_facts() {
        let w = Table::from_rows(&FACT_WITHDRAWALS, vec![withdrawal("USD", "web", "2024-01-02 23:00:00")]);
        let d = Table::from_rows(&FACT_DEPOSITS, vec![deposit("USD", "2024-01-05 01:00:00")]);
        assert_eq!(
            fact_date_range(&[&w, &d]),
            Some((date("2024-01-02"), date("2024-01-05")))
        );
        assert_eq!(dim_time_for(&[&w, &d]).len(), 4);
    }
}
