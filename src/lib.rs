pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod time_utils;
pub mod types;

pub use error::{DatasetError, Result};
pub use pipeline::report::DataQualityReport;
pub use pipeline::{Pipeline, PipelineResult};
