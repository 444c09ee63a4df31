//! Quality gate: post-load checks over the warehouse tables.
//!
//! Every check is a pure function returning a `CheckResult`. Checks never
//! raise, never abort a run, and never roll anything back. A violation is
//! advisory: the run that produced it has already committed its watermark,
//! so remediation is manual.

use crate::{
    config::QualityConfig,
    extract::EVENT_TIMESTAMP,
    schema::{
        TableSchema, DIM_CURRENCY, DIM_EVENT_TYPE, DIM_INTERFACE, FACT_DEPOSITS,
        FACT_EVENTS, FACT_WITHDRAWALS,
    },
    table::{Table, TableSet},
    value::Value,
};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Schema,
    Null,
    Duplicate,
    Range,
    Type,
    Referential,
    DateWindow,
}

impl CheckKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Null => "null",
            Self::Duplicate => "duplicate",
            Self::Range => "range",
            Self::Type => "type",
            Self::Referential => "referential",
            Self::DateWindow => "date_window",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Violation,
}

impl CheckStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Violation => "violation",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub check: CheckKind,
    pub table: String,
    pub column: Option<String>,
    pub status: CheckStatus,
    /// Number of offending rows (or cells, for the type check).
    pub violations: usize,
    pub detail: String,
}

impl CheckResult {
    fn new(check: CheckKind, table: &str, column: Option<&str>, violations: usize, detail: String) -> Self {
        Self {
            check,
            table: table.to_string(),
            column: column.map(String::from),
            status: if violations == 0 {
                CheckStatus::Passed
            } else {
                CheckStatus::Violation
            },
            violations,
            detail,
        }
    }

    fn missing_column(check: CheckKind, table: &str, column: &str) -> Self {
        Self::new(check, table, Some(column), 1, format!("column '{column}' is not present"))
    }

    pub fn is_violation(&self) -> bool {
        self.status == CheckStatus::Violation
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.check.name(), self.table)?;
        if let Some(col) = &self.column {
            write!(f, ".{col}")?;
        }
        write!(f, ": {}", self.detail)
    }
}

/// Column list must equal the schema, in order.
pub fn check_schema(table: &Table, schema: &TableSchema) -> CheckResult {
    let expected = schema.column_names();
    if table.columns == expected {
        CheckResult::new(CheckKind::Schema, schema.name, None, 0, "schema is valid".into())
    } else {
        CheckResult::new(
            CheckKind::Schema,
            schema.name,
            None,
            1,
            format!("schema is INVALID: expected {expected:?}, found {:?}", table.columns),
        )
    }
}

/// One result per column: the number of null cells must be zero.
pub fn check_nulls(table: &Table, columns: &[&str]) -> Vec<CheckResult> {
    columns
        .iter()
        .map(|&col| {
            if !table.has_column(col) {
                return CheckResult::missing_column(CheckKind::Null, &table.name, col);
            }
            let nulls = table.column_values(col).filter(|v| v.is_null()).count();
            let detail = if nulls == 0 {
                "no null values".to_string()
            } else {
                format!("{nulls} null values")
            };
            CheckResult::new(CheckKind::Null, &table.name, Some(col), nulls, detail)
        })
        .collect()
}

/// Rows whose `key` repeats an earlier row's.
pub fn check_duplicates(table: &Table, key: &str) -> CheckResult {
    if !table.has_column(key) {
        return CheckResult::missing_column(CheckKind::Duplicate, &table.name, key);
    }
    let mut seen = HashSet::new();
    let dupes = table.column_values(key).filter(|v| !seen.insert(*v)).count();
    let detail = if dupes == 0 {
        "no duplicates found".to_string()
    } else {
        format!("{dupes} duplicate records found")
    };
    CheckResult::new(CheckKind::Duplicate, &table.name, Some(key), dupes, detail)
}

/// Numeric values must lie in `[min, max]`. Nulls are the null check's
/// business; non-numeric values count as out of range.
pub fn check_range(table: &Table, column: &str, min: f64, max: f64) -> CheckResult {
    if !table.has_column(column) {
        return CheckResult::missing_column(CheckKind::Range, &table.name, column);
    }
    let out = table
        .column_values(column)
        .filter(|v| !v.is_null())
        .filter(|v| v.as_f64().map_or(true, |x| x < min || x > max))
        .count();
    let detail = if out == 0 {
        format!("all values within {min} to {max}")
    } else {
        format!("{out} rows have values outside the range {min} to {max}")
    };
    CheckResult::new(CheckKind::Range, &table.name, Some(column), out, detail)
}

/// Every non-null cell must match its schema column kind.
pub fn check_types(table: &Table, schema: &TableSchema) -> CheckResult {
    let mut bad = 0;
    let mut offenders = Vec::new();
    for def in schema.columns {
        let Some(idx) = table.column_index(def.name) else {
            continue;
        };
        let n = table.rows.iter().filter(|r| !r[idx].matches_kind(def.kind)).count();
        if n > 0 {
            offenders.push(format!("{} ({n} not {:?})", def.name, def.kind));
            bad += n;
        }
    }
    let detail = if bad == 0 {
        "all values match declared types".to_string()
    } else {
        format!("unexpected types in {}", offenders.join(", "))
    };
    CheckResult::new(CheckKind::Type, schema.name, None, bad, detail)
}

/// Every `fact_col` value must appear in the dimension's `dim_col`.
pub fn check_membership(fact: &Table, fact_col: &str, dim: &Table, dim_col: &str) -> CheckResult {
    if !fact.has_column(fact_col) {
        return CheckResult::missing_column(CheckKind::Referential, &fact.name, fact_col);
    }
    if !dim.has_column(dim_col) {
        return CheckResult::missing_column(CheckKind::Referential, &dim.name, dim_col);
    }
    let known: HashSet<&Value> = dim.column_values(dim_col).collect();
    let unmatched = fact.column_values(fact_col).filter(|v| !known.contains(v)).count();
    let detail = if unmatched == 0 {
        format!("all values match {}.{dim_col}", dim.name)
    } else {
        format!("{unmatched} values not found in {}.{dim_col}", dim.name)
    };
    CheckResult::new(CheckKind::Referential, &fact.name, Some(fact_col), unmatched, detail)
}

/// Timestamps must fall inside `[start, end]`. Nulls are ignored.
pub fn check_date_window(
    table: &Table,
    column: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> CheckResult {
    if !table.has_column(column) {
        return CheckResult::missing_column(CheckKind::DateWindow, &table.name, column);
    }
    let out = table
        .column_values(column)
        .filter_map(Value::as_timestamp)
        .filter(|ts| *ts < start || *ts > end)
        .count();
    let detail = if out == 0 {
        "all dates within the window".to_string()
    } else {
        format!("{out} rows have values outside the range {start} to {end}")
    };
    CheckResult::new(CheckKind::DateWindow, &table.name, Some(column), out, detail)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityReport {
    pub results: Vec<CheckResult>,
}

impl QualityReport {
    pub fn push(&mut self, result: CheckResult) {
        self.results.push(result);
    }

    pub fn violations(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.is_violation())
    }

    pub fn violation_count(&self) -> usize {
        self.violations().count()
    }

    pub fn is_clean(&self) -> bool {
        self.violation_count() == 0
    }

    /// Emit every result: passes at info, violations at warn.
    pub fn log(&self) {
        for result in &self.results {
            if result.is_violation() {
                log::warn!("{result}");
            } else {
                log::info!("{result}");
            }
        }
        log::info!(
            "Quality gate finished: {} checks, {} violations",
            self.results.len(),
            self.violation_count()
        );
    }
}

/// The full battery run after every load.
pub fn standard_checks(tables: &TableSet, config: &QualityConfig) -> QualityReport {
    let mut report = QualityReport::default();
    let facts = [
        (&FACT_WITHDRAWALS, &tables.fact_withdrawals),
        (&FACT_DEPOSITS, &tables.fact_deposits),
        (&FACT_EVENTS, &tables.fact_events),
    ];

    log::info!("Running schema validation...");
    for (schema, table) in facts {
        report.push(check_schema(table, schema));
    }

    log::info!("Running null value checks...");
    let critical: [&[&str]; 3] = [
        &["user_id", EVENT_TIMESTAMP, "amount"],
        &["user_id", EVENT_TIMESTAMP, "amount"],
        &["user_id", EVENT_TIMESTAMP, "event_name"],
    ];
    for ((_, table), cols) in facts.iter().zip(critical) {
        report.results.extend(check_nulls(table, cols));
    }

    log::info!("Running duplicate checks...");
    for (schema, table) in facts {
        if let Some(key) = schema.primary_key {
            report.push(check_duplicates(table, key));
        }
    }

    log::info!("Running consistency checks...");
    for (_, table) in facts {
        report.push(check_membership(table, "user_id", &tables.dim_user, "user_id"));
    }
    report.push(check_membership(
        &tables.fact_events,
        "event_name",
        &tables.dim_event_type,
        DIM_EVENT_TYPE.columns[0].name,
    ));
    for fact in [&tables.fact_withdrawals, &tables.fact_deposits] {
        report.push(check_membership(
            fact,
            "currency",
            &tables.dim_currency,
            DIM_CURRENCY.columns[0].name,
        ));
    }
    report.push(check_membership(
        &tables.fact_withdrawals,
        "interface",
        &tables.dim_interface,
        DIM_INTERFACE.columns[0].name,
    ));

    log::info!("Running range checks for amounts...");
    for fact in [&tables.fact_withdrawals, &tables.fact_deposits] {
        report.push(check_range(fact, "amount", config.amount_min, config.amount_max));
    }

    log::info!("Running data type validation...");
    for (schema, table) in facts {
        report.push(check_types(table, schema));
    }

    log::info!("Running date consistency checks...");
    let (start, end) = config.date_window();
    for (_, table) in facts {
        report.push(check_date_window(table, EVENT_TIMESTAMP, start, end));
    }

    report
}
