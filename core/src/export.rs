//! CSV export of run outputs, one `<table>.csv` per table.

use crate::{
    error::{EtlError, EtlResult},
    table::{Table, TableSet},
};
use std::path::{Path, PathBuf};

pub fn write_table_csv(dir: &Path, table: &Table) -> EtlResult<PathBuf> {
    let path = dir.join(format!("{}.csv", table.name));
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(path)
}

/// Export every table of `tables` into `dir`, creating it if needed.
pub fn export_csv(dir: &Path, tables: &TableSet) -> EtlResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for (schema, table) in tables.iter() {
        let path = write_table_csv(dir, table)
            .map_err(|e| EtlError::load(schema.name, format!("CSV export to {} failed: {e}", dir.display())))?;
        log::info!("Successfully saved {} to {}", schema.name, path.display());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dimension::dim_time, value::Value};
    use chrono::NaiveDate;

    #[test]
    fn exports_every_table_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = TableSet::empty();
        tables.dim_time = dim_time(
            NaiveDate::from_ymd_opt(2024, 1, 6).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
        );

        let written = export_csv(&dir.path().join("out"), &tables).unwrap();
        assert_eq!(written.len(), 8);

        let body = std::fs::read_to_string(dir.path().join("out/dim_time.csv")).unwrap();
        let mut lines = body.lines();
        assert_eq!(
            lines.next(),
            Some("date,year,month,day,quarter,day_of_week,is_weekend,time_id")
        );
        assert_eq!(lines.next(), Some("2024-01-06,2024,1,6,1,5,true,1"));

        let empty = std::fs::read_to_string(dir.path().join("out/fact_events.csv")).unwrap();
        assert_eq!(empty.trim_end(), "id,event_timestamp,user_id,event_name");
    }

    #[test]
    fn nulls_export_as_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = Table::new("t", vec!["a".into(), "b".into()]);
        table.rows.push(vec![Value::Null, Value::Float(2.5)]);
        let path = write_table_csv(dir.path(), &table).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a,b\n,2.5\n");
    }
}
