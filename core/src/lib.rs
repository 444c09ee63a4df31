//! etl-core: incremental extract-transform-load into an SQLite warehouse,
//! with a watermark for incremental runs and a post-load quality gate.

pub mod config;
pub mod dimension;
pub mod error;
pub mod export;
pub mod extract;
pub mod pipeline;
pub mod quality;
pub mod schema;
pub mod source;
pub mod store;
pub mod table;
pub mod transform;
pub mod types;
pub mod value;
pub mod watermark;
