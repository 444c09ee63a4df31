//! Incremental extraction: read a raw CSV source and keep only the rows
//! newer than the committed watermark.
//!
//! Timestamps that fail to parse become null here. Deciding what to do with
//! them is the transformers' job, so extraction never fails on bad cells,
//! only on sources it cannot read at all.

use crate::{
    error::{EtlError, EtlResult},
    source::Source,
    table::Table,
    value::Value,
    watermark::Watermark,
};
use std::path::Path;

pub const EVENT_TIMESTAMP: &str = "event_timestamp";

/// Read `path` as the raw dataset for `source`, filtered by `watermark`.
///
/// With a watermark, only rows with `event_timestamp > watermark` survive
/// (null timestamps cannot be ordered and are dropped). Without one, every
/// row is returned. A record wider than the header is an `Extraction`
/// error; a shorter one is padded with nulls.
pub fn extract(source: Source, path: &Path, watermark: Option<&Watermark>) -> EtlResult<Table> {
    let fail = |reason: String| EtlError::Extraction {
        source_name: source.name().to_string(),
        path: path.display().to_string(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| fail(e.to_string()))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| fail(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut table = Table::new(source.name(), headers);
    let ts_idx = table
        .column_index(EVENT_TIMESTAMP)
        .ok_or_else(|| fail(format!("missing required column '{EVENT_TIMESTAMP}'")))?;

    for record in reader.records() {
        let record = record.map_err(|e| fail(e.to_string()))?;
        if record.len() > table.columns.len() {
            let line = record.position().map_or(0, |p| p.line());
            return Err(fail(format!(
                "line {line} has {} fields, header has {}",
                record.len(),
                table.columns.len()
            )));
        }
        let mut row: Vec<Value> = record.iter().map(Value::from_raw).collect();
        // Short records are padded so every row matches the header width.
        row.resize(table.columns.len(), Value::Null);
        row[ts_idx] = row[ts_idx].to_timestamp();
        table.rows.push(row);
    }

    let read = table.len();
    if let Some(wm) = watermark {
        let cutoff = wm.as_datetime();
        table.retain(|row| row[ts_idx].as_timestamp().is_some_and(|ts| ts > cutoff));
    }

    log::info!(
        "Extracted {} of {read} rows from {} ({})",
        table.len(),
        source.name(),
        path.display()
    );
    Ok(table)
}
