//! One incremental ETL run, end to end.
//!
//! EXECUTION ORDER (fixed, never reordered):
//!   1. Read the committed watermark
//!   2. Extract all five raw sources past the watermark
//!   3. Transform the facts and the user dimension
//!   4. Synthesize the remaining dimensions from the facts
//!   5. Load facts, then dimensions
//!   6. Export CSV copies (when configured)
//!   7. Advance the watermark
//!
//! RULES:
//!   - Any failure in steps 1-6 aborts the run and leaves the watermark
//!     exactly where it was.
//!   - Facts load with the configured write mode; dimensions are always
//!     replaced.
//!   - In upsert mode the dimensions are rebuilt over every fact the
//!     warehouse holds after the merge, so earlier rows keep their keys.
//!   - The quality gate is a separate pass and never affects the run.

use crate::{
    config::PipelineConfig,
    dimension,
    error::EtlResult,
    export,
    quality::{standard_checks, QualityReport},
    schema::{DIM_USER, FACT_DEPOSITS, FACT_EVENTS, FACT_WITHDRAWALS},
    source::Source,
    store::{Warehouse, WriteMode},
    table::{Table, TableSet},
    transform,
    types::RunId,
    watermark::{self, Watermark, WatermarkStore},
};
use std::collections::BTreeMap;

/// The five raw datasets of one run, as extracted.
#[derive(Debug, Clone)]
pub struct RawSources {
    pub user_identity: Table,
    pub user_level: Table,
    pub withdrawals: Table,
    pub deposits: Table,
    pub events: Table,
}

impl RawSources {
    pub fn extract(config: &PipelineConfig, watermark: Option<&Watermark>) -> EtlResult<Self> {
        let read = |source: Source| crate::extract::extract(source, &config.source_path(source), watermark);
        Ok(Self {
            user_identity: read(Source::UserIdentity)?,
            user_level: read(Source::UserLevel)?,
            withdrawals: read(Source::Withdrawals)?,
            deposits: read(Source::Deposits)?,
            events: read(Source::Events)?,
        })
    }
}

/// Turn raw datasets into the eight output tables. Pure: no I/O.
pub fn build_outputs(raw: &RawSources) -> EtlResult<TableSet> {
    let mut outputs = TableSet {
        fact_withdrawals: transform::fact_withdrawals(&raw.withdrawals)?,
        fact_deposits: transform::fact_deposits(&raw.deposits)?,
        fact_events: transform::fact_events(&raw.events)?,
        dim_user: transform::dim_user(&raw.user_identity, &raw.user_level)?,
        ..TableSet::empty()
    };
    synthesize_dimensions(&mut outputs);
    Ok(outputs)
}

/// Rebuild the four fact-derived dimensions from the facts in `tables`.
fn synthesize_dimensions(tables: &mut TableSet) {
    tables.dim_currency = dimension::dim_currency(&tables.fact_withdrawals, &tables.fact_deposits);
    tables.dim_interface = dimension::dim_interface(&tables.fact_withdrawals);
    tables.dim_event_type = dimension::dim_event_type(&tables.fact_events);
    tables.dim_time =
        dimension::dim_time_for(&[&tables.fact_withdrawals, &tables.fact_deposits, &tables.fact_events]);
}

/// What a successful run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    pub watermark_before: Option<Watermark>,
    /// The watermark committed at the end of the run. Equal to
    /// `watermark_before` when the run saw no newer fact rows.
    pub watermark_after: Option<Watermark>,
    pub rows_loaded: BTreeMap<String, usize>,
    /// What the run wrote: this batch's facts and the dimensions as loaded.
    pub outputs: TableSet,
}

impl RunSummary {
    pub fn advanced(&self) -> bool {
        self.watermark_after != self.watermark_before
    }
}

pub struct Pipeline<W: Warehouse, S: WatermarkStore> {
    pub run_id: RunId,
    config: PipelineConfig,
    warehouse: W,
    watermark_store: S,
}

impl<W: Warehouse, S: WatermarkStore> Pipeline<W, S> {
    pub fn new(run_id: RunId, config: PipelineConfig, warehouse: W, watermark_store: S) -> Self {
        Self {
            run_id,
            config,
            warehouse,
            watermark_store,
        }
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    pub fn warehouse_mut(&mut self) -> &mut W {
        &mut self.warehouse
    }

    pub fn watermark_store(&self) -> &S {
        &self.watermark_store
    }

    pub fn into_parts(self) -> (W, S) {
        (self.warehouse, self.watermark_store)
    }

    /// Execute one run. Errors are logged here with their context and
    /// returned unchanged.
    pub fn run(&mut self) -> EtlResult<RunSummary> {
        log::info!("Starting ETL run {}", self.run_id);
        match self.run_inner() {
            Ok(summary) => {
                log::info!(
                    "ETL run {} completed: {} rows loaded, watermark {}",
                    self.run_id,
                    summary.rows_loaded.values().sum::<usize>(),
                    describe(summary.watermark_after.as_ref())
                );
                Ok(summary)
            }
            Err(e) => {
                log::error!("ETL run {} failed: {e}", self.run_id);
                Err(e)
            }
        }
    }

    fn run_inner(&mut self) -> EtlResult<RunSummary> {
        let before = self.watermark_store.read()?;
        log::info!("Last update timestamp: {}", describe(before.as_ref()));

        let raw = RawSources::extract(&self.config, before.as_ref())?;
        let batch = build_outputs(&raw)?;
        let outputs = self.load(&batch)?;
        let rows_loaded = outputs
            .iter()
            .map(|(schema, table)| (schema.name.to_string(), table.len()))
            .collect();

        if let Some(dir) = &self.config.output_data_path {
            export::export_csv(dir, &outputs)?;
        }

        let after = match watermark::advance(before.as_ref(), &outputs.facts()) {
            Some(next) => {
                self.watermark_store.write(&next)?;
                log::info!("Watermark advanced to {next}");
                Some(next)
            }
            None => {
                log::info!("No new fact rows; watermark unchanged");
                before
            }
        };

        Ok(RunSummary {
            run_id: self.run_id.clone(),
            watermark_before: before,
            watermark_after: after,
            rows_loaded,
            outputs,
        })
    }

    /// Load facts, then dimensions. Returns the tables as written.
    fn load(&mut self, batch: &TableSet) -> EtlResult<TableSet> {
        let fact_mode = self.config.load.fact_mode;
        for (schema, table) in batch.iter().filter(|(schema, _)| schema.is_fact()) {
            self.warehouse.write(schema, table, fact_mode)?;
        }

        let written = match fact_mode {
            WriteMode::Replace => batch.clone(),
            WriteMode::Upsert => self.merged_dimensions(batch)?,
        };
        for (schema, table) in written.iter().filter(|(schema, _)| !schema.is_fact()) {
            self.warehouse.write(schema, table, WriteMode::Replace)?;
        }
        Ok(written)
    }

    /// Dimensions over every stored fact, paired with the batch's facts.
    fn merged_dimensions(&self, batch: &TableSet) -> EtlResult<TableSet> {
        let dim_user = if self.warehouse.contains(&DIM_USER)? {
            transform::merge_dim_user(&self.warehouse.read(&DIM_USER)?, &batch.dim_user)
        } else {
            batch.dim_user.clone()
        };
        let mut merged = TableSet {
            fact_withdrawals: self.warehouse.read(&FACT_WITHDRAWALS)?,
            fact_deposits: self.warehouse.read(&FACT_DEPOSITS)?,
            fact_events: self.warehouse.read(&FACT_EVENTS)?,
            dim_user,
            ..TableSet::empty()
        };
        synthesize_dimensions(&mut merged);
        log::info!(
            "Rebuilt dimensions over {} stored fact rows",
            merged.facts().iter().map(|t| t.len()).sum::<usize>()
        );

        merged.fact_withdrawals = batch.fact_withdrawals.clone();
        merged.fact_deposits = batch.fact_deposits.clone();
        merged.fact_events = batch.fact_events.clone();
        Ok(merged)
    }

    /// Run the standard quality battery over what the warehouse holds now.
    pub fn validate(&self) -> EtlResult<QualityReport> {
        let tables = self.warehouse.read_all()?;
        let report = standard_checks(&tables, &self.config.quality);
        report.log();
        Ok(report)
    }
}

fn describe(wm: Option<&Watermark>) -> String {
    wm.map_or_else(|| "none (full load)".to_string(), ToString::to_string)
}
