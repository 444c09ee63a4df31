//! Shared primitive types used across the pipeline.

/// The canonical run identifier (a v4 UUID rendered as text).
pub type RunId = String;

/// Canonical text form for timestamps written to the warehouse and the
/// watermark file. Fractional seconds are printed only when present.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Canonical text form for calendar dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn new_run_id() -> RunId {
    uuid::Uuid::new_v4().to_string()
}
