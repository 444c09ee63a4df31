//! Table transformers: raw datasets in, warehouse-shaped tables out.
//!
//! Every transformer is a pure function with the same shape:
//!   1. normalize `event_timestamp` to a UTC-naive instant
//!   2. drop rows missing any critical field
//!   3. coerce numeric fields (failures become null and are dropped)
//!   4. apply the table's own filters
//!   5. project onto the table's schema
//!
//! A transformer only fails when its input lacks a column it needs. That
//! failure is fatal for the run and happens before anything is loaded.
//!
//! Outlier policy differs on purpose between the two amount-bearing facts:
//! withdrawals are trimmed at a per-batch percentile, deposits at a fixed
//! ceiling. Do not unify them without a business decision.

use crate::{
    error::{EtlError, EtlResult},
    extract::EVENT_TIMESTAMP,
    schema::{TableSchema, DIM_USER, FACT_DEPOSITS, FACT_EVENTS, FACT_WITHDRAWALS},
    table::Table,
    value::Value,
};
use std::collections::{HashMap, HashSet};

/// Withdrawals above this quantile of the surviving batch are dropped.
pub const WITHDRAWAL_OUTLIER_QUANTILE: f64 = 0.99;

/// Deposits above this amount are dropped.
pub const DEPOSIT_AMOUNT_CEILING: f64 = 1e9;

pub const COMPLETE_STATUS: &str = "complete";

/// Steps 1 and 2 of the common shape, plus id normalization.
fn prepare(raw: &Table, schema: &TableSchema, critical: &[&str]) -> EtlResult<Table> {
    let missing = raw.missing_columns(&schema.column_names());
    if !missing.is_empty() {
        return Err(EtlError::transform(
            schema.name,
            format!("input is missing columns: {}", missing.join(", ")),
        ));
    }

    let mut table = raw.clone();
    table.map_column(EVENT_TIMESTAMP, Value::to_timestamp);
    table.drop_nulls(critical);
    table.map_column("id", Value::infer_integer);
    Ok(table)
}

fn finish(table: &Table, schema: &TableSchema, input_rows: usize) -> EtlResult<Table> {
    let out = table.project(schema).map_err(|missing| {
        EtlError::transform(schema.name, format!("cannot project, missing: {}", missing.join(", ")))
    })?;
    log::info!(
        "{} transformation completed: {} of {input_rows} rows kept",
        schema.name,
        out.len()
    );
    Ok(out)
}

/// Keep rows whose coerced `amount` is strictly positive.
fn keep_positive_amounts(table: &mut Table) {
    table.map_column("amount", Value::to_numeric);
    if let Some(idx) = table.column_index("amount") {
        table.retain(|row| row[idx].as_f64().is_some_and(|a| a > 0.0));
    }
}

fn amounts(table: &Table) -> Vec<f64> {
    table.column_values("amount").filter_map(Value::as_f64).collect()
}

/// Quantile with linear interpolation between the closest ranks.
/// `None` for an empty input.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

pub fn fact_withdrawals(raw: &Table) -> EtlResult<Table> {
    log::info!("Starting transformation for {}...", FACT_WITHDRAWALS.name);
    let mut table = prepare(raw, &FACT_WITHDRAWALS, &["user_id", EVENT_TIMESTAMP, "amount"])?;
    keep_positive_amounts(&mut table);

    if let Some(limit) = quantile(&amounts(&table), WITHDRAWAL_OUTLIER_QUANTILE) {
        log::debug!("{} outlier cutoff: {limit}", FACT_WITHDRAWALS.name);
        if let Some(idx) = table.column_index("amount") {
            table.retain(|row| row[idx].as_f64().is_some_and(|a| a <= limit));
        }
    }

    finish(&table, &FACT_WITHDRAWALS, raw.len())
}

pub fn fact_deposits(raw: &Table) -> EtlResult<Table> {
    log::info!("Starting transformation for {}...", FACT_DEPOSITS.name);
    let mut table = prepare(raw, &FACT_DEPOSITS, &["user_id", EVENT_TIMESTAMP])?;
    keep_positive_amounts(&mut table);

    if let Some(idx) = table.column_index("tx_status") {
        table.retain(|row| row[idx].as_str() == Some(COMPLETE_STATUS));
    }
    table.dedup_by_column("id");
    if let Some(idx) = table.column_index("amount") {
        table.retain(|row| row[idx].as_f64().is_some_and(|a| a <= DEPOSIT_AMOUNT_CEILING));
    }

    finish(&table, &FACT_DEPOSITS, raw.len())
}

pub fn fact_events(raw: &Table) -> EtlResult<Table> {
    log::info!("Starting transformation for {}...", FACT_EVENTS.name);
    let table = prepare(raw, &FACT_EVENTS, &["user_id", EVENT_TIMESTAMP, "event_name"])?;
    finish(&table, &FACT_EVENTS, raw.len())
}

/// Build the user dimension (type-1: latest tier wins, no history).
///
/// Tier rows are stably sorted by `event_timestamp` with nulls last, and the
/// last row per `user_id` wins, so ties go to the later source row. The
/// result is left-joined onto the identity rows in identity order.
pub fn dim_user(identity: &Table, levels: &Table) -> EtlResult<Table> {
    log::info!("Starting transformation for {}...", DIM_USER.name);
    let require = |t: &Table, cols: &[&str]| -> EtlResult<()> {
        let missing = t.missing_columns(cols);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EtlError::transform(
                DIM_USER.name,
                format!("{} input is missing columns: {}", t.name, missing.join(", ")),
            ))
        }
    };
    require(identity, &["user_id", "jurisdiction"])?;
    require(levels, &["user_id", EVENT_TIMESTAMP, "level"])?;

    let col = |t: &Table, name: &str| t.column_index(name).unwrap_or_default();
    let (lvl_user, lvl_ts, lvl_level) = (
        col(levels, "user_id"),
        col(levels, EVENT_TIMESTAMP),
        col(levels, "level"),
    );

    let mut order: Vec<usize> = (0..levels.len()).collect();
    order.sort_by_key(|&i| {
        let ts = levels.rows[i][lvl_ts].to_timestamp().as_timestamp();
        (ts.is_none(), ts)
    });

    let mut latest: HashMap<&Value, &Value> = HashMap::new();
    for i in order {
        let row = &levels.rows[i];
        if !row[lvl_user].is_null() {
            latest.insert(&row[lvl_user], &row[lvl_level]);
        }
    }

    let (id_user, id_juris) = (col(identity, "user_id"), col(identity, "jurisdiction"));
    let rows = identity
        .rows
        .iter()
        .map(|row| {
            let user = &row[id_user];
            let level = if user.is_null() {
                Value::Null
            } else {
                latest.get(user).map(|v| (*v).clone()).unwrap_or(Value::Null)
            };
            vec![user.clone(), row[id_juris].clone(), level]
        })
        .collect();

    let mut table = Table::from_rows(&DIM_USER, rows);
    table.dedup_rows();
    log::info!(
        "{} transformation completed: {} users from {} identity rows",
        DIM_USER.name,
        table.len(),
        identity.len()
    );
    Ok(table)
}

/// Fold a batch's `dim_user` into the one already stored.
///
/// Stored users absent from the batch keep their row. A batch user replaces
/// every stored row for that `user_id`; a null batch level falls back to the
/// stored level, since the batch may carry an identity row without a newer
/// tier.
pub fn merge_dim_user(stored: &Table, batch: &Table) -> Table {
    // DIM_USER column order.
    let (user, level) = (0, 2);
    let fresh: HashSet<&Value> = batch
        .rows
        .iter()
        .map(|row| &row[user])
        .filter(|u| !u.is_null())
        .collect();
    let known_levels: HashMap<&Value, &Value> = stored
        .rows
        .iter()
        .filter(|row| !row[user].is_null() && !row[level].is_null())
        .map(|row| (&row[user], &row[level]))
        .collect();

    let mut rows: Vec<_> = stored
        .rows
        .iter()
        .filter(|row| !fresh.contains(&row[user]))
        .cloned()
        .collect();
    rows.extend(batch.rows.iter().map(|row| {
        let mut row = row.clone();
        if row[level].is_null() {
            if let Some(known) = known_levels.get(&row[user]) {
                row[level] = (*known).clone();
            }
        }
        row
    }));

    let mut table = Table::from_rows(&DIM_USER, rows);
    table.dedup_rows();
    log::info!(
        "{} merged: {} stored, {} in batch, {} after merge",
        DIM_USER.name,
        stored.len(),
        batch.len(),
        table.len()
    );
    table
}
