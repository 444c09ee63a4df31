#![allow(dead_code)]

use etl_core::{
    config::PipelineConfig,
    pipeline::Pipeline,
    source::Source,
    store::SqliteWarehouse,
    watermark::{MemoryWatermarkStore, Watermark},
};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

// ── Fixture data ────────────────────────────────────────────────────────────

pub const USER_IDENTITY: &str = "\
user_id,jurisdiction,event_timestamp
u1,US,2024-01-01 00:00:00
u2,DE,2024-01-01 00:00:00
u3,GB,2024-01-02 00:00:00
";

pub const USER_LEVEL: &str = "\
user_id,level,event_timestamp
u1,bronze,2024-01-01 00:00:00
u1,gold,2024-01-05 00:00:00
u2,silver,2024-01-03 00:00:00
u3,bronze,2024-01-02 00:00:00
";

pub const WITHDRAWALS: &str = "\
id,event_timestamp,user_id,amount,interface,currency,tx_status
1,2024-01-03 10:00:00,u1,100,web,USD,ok
2,2024-01-04 11:00:00,u2,-5,app,EUR,ok
3,2024-01-06 12:30:00,u3,100,app,EUR,ok
";

pub const DEPOSITS: &str = "\
id,event_timestamp,user_id,amount,currency,tx_status
10,2024-01-02 09:00:00,u1,500,USD,complete
11,2024-01-04 09:00:00,u2,75,GBP,pending
11,2024-01-04 09:00:00,u2,75,GBP,complete
12,2024-01-07 18:00:00,u3,1200,EUR,complete
";

pub const EVENTS: &str = "\
id,event_timestamp,user_id,event_name
100,2024-01-09 08:00:00,u1,login
101,2024-01-11 08:00:00,u2,deposit_viewed
102,2024-01-11 08:00:00,u3,login
";

pub const LATEST_TIMESTAMP: &str = "2024-01-11 08:00:00";

// ── Test helpers ────────────────────────────────────────────────────────────

pub fn write_source(dir: &Path, source: Source, body: &str) {
    let mut file = std::fs::File::create(dir.join(source.default_file_name())).unwrap();
    file.write_all(body.as_bytes()).unwrap();
}

pub fn append_source(dir: &Path, source: Source, lines: &str) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(dir.join(source.default_file_name()))
        .unwrap();
    file.write_all(lines.as_bytes()).unwrap();
}

/// A temp directory holding all five sources.
pub fn source_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_source(dir.path(), Source::UserIdentity, USER_IDENTITY);
    write_source(dir.path(), Source::UserLevel, USER_LEVEL);
    write_source(dir.path(), Source::Withdrawals, WITHDRAWALS);
    write_source(dir.path(), Source::Deposits, DEPOSITS);
    write_source(dir.path(), Source::Events, EVENTS);
    dir
}

pub fn config_for(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default_test();
    config.input_data_path = dir.to_path_buf();
    config.state_file = dir.join("last_update.json");
    config
}

pub fn warehouse() -> SqliteWarehouse {
    let warehouse = SqliteWarehouse::in_memory().unwrap();
    warehouse.migrate().unwrap();
    warehouse
}

pub fn memory_pipeline(
    config: PipelineConfig,
    warehouse: SqliteWarehouse,
    start: Option<Watermark>,
) -> Pipeline<SqliteWarehouse, MemoryWatermarkStore> {
    Pipeline::new(
        "test-run".into(),
        config,
        warehouse,
        MemoryWatermarkStore::new(start),
    )
}

pub fn wm(s: &str) -> Watermark {
    s.parse().unwrap()
}
