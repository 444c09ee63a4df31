use thiserror::Error;

/// Every fatal failure a pipeline run can hit.
///
/// Data-quality findings are not errors: the quality gate reports them as
/// `CheckStatus::Violation` values and never raises.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Extraction failed for source '{source_name}' ({path}): {reason}")]
    Extraction {
        source_name: String,
        path: String,
        reason: String,
    },

    #[error("Transform failed for table '{table}': {reason}")]
    Transform { table: String, reason: String },

    #[error("Load failed for table '{table}': {reason}")]
    Load { table: String, reason: String },

    #[error("Watermark error: {0}")]
    Watermark(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EtlError {
    pub fn transform(table: &str, reason: impl Into<String>) -> Self {
        Self::Transform {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    pub fn load(table: &str, reason: impl Into<String>) -> Self {
        Self::Load {
            table: table.to_string(),
            reason: reason.into(),
        }
    }
}

pub type EtlResult<T> = Result<T, EtlError>;
