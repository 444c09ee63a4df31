use super::SqliteWarehouse;
use crate::{
    error::{EtlError, EtlResult},
    quality::QualityReport,
    value::{format_timestamp, parse_timestamp},
};
use chrono::NaiveDateTime;
use rusqlite::params;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Self {
        if raw == "succeeded" {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }
}

/// One row of `etl_run`: the outcome of a single pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub status: RunStatus,
    pub watermark_before: Option<String>,
    pub watermark_after: Option<String>,
    pub rows_loaded: BTreeMap<String, usize>,
    pub error: Option<String>,
}

/// One persisted quality-gate result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityResultRow {
    pub run_id: String,
    pub check_kind: String,
    pub table_name: String,
    pub column_name: Option<String>,
    pub status: String,
    pub violations: i64,
    pub detail: String,
}

impl SqliteWarehouse {
    // ── Run history ───────────────────────────────────────────────

    pub fn record_run(&self, run: &RunRecord) -> EtlResult<()> {
        let rows_loaded = serde_json::to_string(&run.rows_loaded)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO etl_run
                (run_id, started_at, finished_at, status, watermark_before, watermark_after, rows_loaded, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.run_id,
                format_timestamp(&run.started_at),
                run.finished_at.as_ref().map(format_timestamp),
                run.status.name(),
                run.watermark_before,
                run.watermark_after,
                rows_loaded,
                run.error,
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> EtlResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, started_at, finished_at, status, watermark_before, watermark_after, rows_loaded, error
             FROM etl_run ORDER BY started_at DESC, rowid DESC LIMIT ?1",
        )?;
        let raw = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(
                |(run_id, started, finished, status, wm_before, wm_after, rows_loaded, error)| -> EtlResult<RunRecord> {
                    let started_at = parse_timestamp(&started).ok_or_else(|| {
                        EtlError::Other(anyhow::anyhow!("etl_run {run_id}: bad started_at '{started}'"))
                    })?;
                    Ok(RunRecord {
                        started_at,
                        finished_at: finished.as_deref().and_then(parse_timestamp),
                        status: RunStatus::parse(&status),
                        watermark_before: wm_before,
                        watermark_after: wm_after,
                        rows_loaded: serde_json::from_str(&rows_loaded)?,
                        error,
                        run_id,
                    })
                },
            )
            .collect()
    }

    pub fn last_run(&self) -> EtlResult<Option<RunRecord>> {
        Ok(self.recent_runs(1)?.into_iter().next())
    }

    // ── Quality results ───────────────────────────────────────────

    pub fn record_quality_report(&mut self, run_id: &str, report: &QualityReport) -> EtlResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO etl_quality_result
                    (run_id, check_kind, table_name, column_name, status, violations, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in &report.results {
                stmt.execute(params![
                    run_id,
                    r.check.name(),
                    r.table,
                    r.column,
                    r.status.name(),
                    r.violations as i64,
                    r.detail,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn quality_results(&self, run_id: &str) -> EtlResult<Vec<QualityResultRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, check_kind, table_name, column_name, status, violations, detail
             FROM etl_quality_result WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(QualityResultRow {
                run_id: row.get(0)?,
                check_kind: row.get(1)?,
                table_name: row.get(2)?,
                column_name: row.get(3)?,
                status: row.get(4)?,
                violations: row.get(5)?,
                detail: row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Violation count recorded for a run, or `None` if the run never
    /// reached the quality gate.
    pub fn recorded_violations(&self, run_id: &str) -> EtlResult<Option<i64>> {
        let (checks, violations): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'violation' THEN 1 ELSE 0 END), 0)
             FROM etl_quality_result WHERE run_id = ?1",
            params![run_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((checks > 0).then_some(violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{check_duplicates, check_schema};
    use crate::schema::FACT_EVENTS;
    use crate::table::Table;

    fn wh() -> SqliteWarehouse {
        let wh = SqliteWarehouse::in_memory().unwrap();
        wh.migrate().unwrap();
        wh
    }

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    #[test]
    fn runs_come_back_newest_first() {
        let wh = wh();
        for (id, started, status) in [
            ("a", "2024-01-01 00:00:00", RunStatus::Succeeded),
            ("b", "2024-01-02 00:00:00", RunStatus::Failed),
        ] {
            wh.record_run(&RunRecord {
                run_id: id.into(),
                started_at: ts(started),
                finished_at: Some(ts(started)),
                status,
                watermark_before: None,
                watermark_after: None,
                rows_loaded: BTreeMap::from([("fact_events".to_string(), 3)]),
                error: (status == RunStatus::Failed).then(|| "boom".to_string()),
            })
            .unwrap();
        }

        let runs = wh.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "b");
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error.as_deref(), Some("boom"));
        assert_eq!(runs[1].rows_loaded["fact_events"], 3);
        assert_eq!(wh.last_run().unwrap().unwrap().run_id, "b");
    }

    #[test]
    fn quality_results_persist_per_run() {
        let mut wh = wh();
        let mut report = QualityReport::default();
        let events = Table::empty(&FACT_EVENTS);
        report.push(check_schema(&events, &FACT_EVENTS));
        report.push(check_duplicates(&events, "id"));
        let broken = Table::new("fact_events", vec!["id".into()]);
        report.push(check_schema(&broken, &FACT_EVENTS));

        wh.record_quality_report("run-1", &report).unwrap();

        let rows = wh.quality_results("run-1").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].check_kind, "schema");
        assert_eq!(rows[2].status, "violation");
        assert_eq!(wh.recorded_violations("run-1").unwrap(), Some(1));
        assert_eq!(wh.recorded_violations("run-2").unwrap(), None);
    }
}
