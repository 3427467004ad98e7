//! CSV datasets, JSON configuration and JSON reports for sylva.

mod config;
mod error;
mod experiment;
mod reader;
mod writer;

pub use config::load_config;
pub use error::IoError;
pub use experiment::ExperimentName;
pub use reader::DatasetReader;
pub use writer::ReportWriter;
