//! Re-processing the same batch must leave the warehouse unchanged.
//! This is what makes a crash between load and watermark commit harmless.

mod common;

use common::*;
use etl_core::{
    error::EtlError,
    source::Source,
    store::{Warehouse, WriteMode},
    value::Value,
    watermark::WatermarkStore,
};

#[test]
fn replace_mode_reload_produces_identical_tables() {
    let dir = source_dir();

    let mut first = memory_pipeline(config_for(dir.path()), warehouse(), None);
    let summary = first.run().unwrap();
    let after_first = first.warehouse().read_all().unwrap();
    assert_eq!(after_first, summary.outputs);

    // Same batch again, as after a crash before the watermark was written.
    let (wh, _) = first.into_parts();
    let mut second = memory_pipeline(config_for(dir.path()), wh, None);
    second.run().unwrap();
    let after_second = second.warehouse().read_all().unwrap();

    assert_eq!(after_first, after_second);
}

#[test]
fn upsert_mode_reload_does_not_duplicate_facts() {
    let dir = source_dir();
    let mut config = config_for(dir.path());
    config.load.fact_mode = WriteMode::Upsert;

    let mut first = memory_pipeline(config.clone(), warehouse(), None);
    first.run().unwrap();
    let after_first = first.warehouse().read_all().unwrap();

    let (wh, _) = first.into_parts();
    let mut second = memory_pipeline(config, wh, None);
    second.run().unwrap();
    let after_second = second.warehouse().read_all().unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(after_second.fact_deposits.len(), 3);
}

#[test]
fn upsert_mode_accumulates_facts_across_batches() {
    let dir = source_dir();
    let mut config = config_for(dir.path());
    config.load.fact_mode = WriteMode::Upsert;

    let mut pipeline = memory_pipeline(config, warehouse(), None);
    pipeline.run().unwrap();

    append_source(
        dir.path(),
        Source::Events,
        "105,2024-01-12 09:00:00,u1,logout\n",
    );
    let summary = pipeline.run().unwrap();
    assert_eq!(summary.outputs.fact_events.len(), 1);

    let stored = pipeline.warehouse().read_all().unwrap();
    assert_eq!(stored.fact_events.len(), 4);
    assert_eq!(stored.fact_deposits.len(), 3);
    // Dimensions cover every stored fact, not only the latest batch.
    let event_types: Vec<_> = stored.dim_event_type.column_values("event_type_name").cloned().collect();
    assert_eq!(
        event_types,
        [Value::text("login"), Value::text("deposit_viewed"), Value::text("logout")]
    );
    assert_eq!(stored.dim_currency.len(), 3);
    assert_eq!(stored.dim_user.len(), 3);
    assert_eq!(summary.outputs.dim_event_type, stored.dim_event_type);
    assert_eq!(summary.rows_loaded["fact_events"], 1);
    assert_eq!(summary.rows_loaded["dim_event_type"], 3);
}

#[test]
fn upsert_mode_second_batch_passes_the_quality_gate() {
    let dir = source_dir();
    let mut config = config_for(dir.path());
    config.load.fact_mode = WriteMode::Upsert;

    let mut pipeline = memory_pipeline(config, warehouse(), None);
    pipeline.run().unwrap();

    append_source(
        dir.path(),
        Source::UserIdentity,
        "u4,FR,2024-01-12 00:00:00
",
    );
    append_source(
        dir.path(),
        Source::UserLevel,
        "u4,silver,2024-01-12 00:00:00
",
    );
    append_source(
        dir.path(),
        Source::Withdrawals,
        "4,2024-01-12 10:00:00,u4,40,kiosk,CHF,ok
",
    );
    append_source(
        dir.path(),
        Source::Events,
        "106,2024-01-12 11:00:00,u4,logout
",
    );
    let summary = pipeline.run().unwrap();
    assert_eq!(summary.watermark_after, Some(wm("2024-01-12 11:00:00")));

    let report = pipeline.validate().unwrap();
    assert!(
        report.is_clean(),
        "unexpected violations: {:?}",
        report.violations().collect::<Vec<_>>()
    );

    let stored = pipeline.warehouse().read_all().unwrap();
    assert_eq!(stored.fact_withdrawals.len(), 3);
    assert_eq!(stored.dim_user.len(), 4);
    let interfaces: Vec<_> = stored.dim_interface.column_values("interface_name").cloned().collect();
    assert_eq!(interfaces, [Value::text("web"), Value::text("app"), Value::text("kiosk")]);
    let days = stored.dim_time.len();
    assert_eq!(days, 11, "2024-01-02 through 2024-01-12");
}

#[test]
fn upsert_mode_refuses_a_batch_with_repeated_withdrawal_ids() {
    let dir = source_dir();
    append_source(
        dir.path(),
        Source::Withdrawals,
        "1,2024-01-08 10:00:00,u1,50,web,USD,ok
",
    );
    let mut config = config_for(dir.path());
    config.load.fact_mode = WriteMode::Upsert;

    let mut pipeline = memory_pipeline(config, warehouse(), None);
    let err = pipeline.run().unwrap_err();

    assert!(
        matches!(&err, EtlError::Load { table, reason } if table == "fact_withdrawals" && reason.contains("repeats id 1")),
        "unexpected error: {err}"
    );
    assert_eq!(pipeline.watermark_store().read().unwrap(), None);
}
