//! A failed load must never advance the watermark.

mod common;

use common::*;
use etl_core::{
    error::{EtlError, EtlResult},
    pipeline::Pipeline,
    schema::TableSchema,
    store::{SqliteWarehouse, Warehouse, WriteMode},
    table::Table,
    watermark::{FileWatermarkStore, MemoryWatermarkStore, WatermarkStore},
};

// ── Test helpers ────────────────────────────────────────────────────────────

/// Delegates to SQLite but refuses to write one named table.
struct FailingWarehouse {
    inner: SqliteWarehouse,
    fail_on: &'static str,
    writes: Vec<String>,
}

impl Warehouse for FailingWarehouse {
    fn write(&mut self, schema: &TableSchema, table: &Table, mode: WriteMode) -> EtlResult<()> {
        if schema.name == self.fail_on {
            return Err(EtlError::load(schema.name, "disk full"));
        }
        self.writes.push(schema.name.to_string());
        self.inner.write(schema, table, mode)
    }

    fn read(&self, schema: &'static TableSchema) -> EtlResult<Table> {
        self.inner.read(schema)
    }

    fn contains(&self, schema: &TableSchema) -> EtlResult<bool> {
        self.inner.contains(schema)
    }
}

fn failing(fail_on: &'static str) -> FailingWarehouse {
    FailingWarehouse {
        inner: warehouse(),
        fail_on,
        writes: Vec::new(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn failed_dimension_load_keeps_previous_watermark() {
    let dir = source_dir();
    let start = wm("2024-01-01");
    let mut pipeline = Pipeline::new(
        "fail".into(),
        config_for(dir.path()),
        failing("dim_time"),
        MemoryWatermarkStore::new(Some(start)),
    );

    let err = pipeline.run().unwrap_err();

    assert!(
        matches!(&err, EtlError::Load { table, .. } if table == "dim_time"),
        "unexpected error: {err}"
    );
    assert_eq!(pipeline.watermark_store().read().unwrap(), Some(start));
    // Facts load before dimensions, so they were attempted first.
    assert_eq!(
        pipeline.warehouse().writes[..3],
        ["fact_withdrawals", "fact_deposits", "fact_events"]
    );
}

#[test]
fn failed_first_run_writes_no_state_file() {
    let dir = source_dir();
    let config = config_for(dir.path());
    let state = config.state_file.clone();
    let mut pipeline = Pipeline::new(
        "fail".into(),
        config,
        failing("fact_events"),
        FileWatermarkStore::new(&state),
    );

    assert!(pipeline.run().is_err());
    assert!(!state.exists());
    assert_eq!(FileWatermarkStore::new(&state).read().unwrap(), None);
}

#[test]
fn transform_failure_happens_before_any_load() {
    let dir = source_dir();
    write_source(
        dir.path(),
        etl_core::source::Source::Deposits,
        "id,event_timestamp,user_id,amount\n1,2024-01-02,u1,10\n",
    );
    let mut pipeline = Pipeline::new(
        "fail".into(),
        config_for(dir.path()),
        failing("never"),
        MemoryWatermarkStore::new(None),
    );

    let err = pipeline.run().unwrap_err();

    assert!(matches!(&err, EtlError::Transform { table, .. } if table == "fact_deposits"));
    assert!(pipeline.warehouse().writes.is_empty());
    assert_eq!(pipeline.watermark_store().read().unwrap(), None);
}
