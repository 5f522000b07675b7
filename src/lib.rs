pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{cli::LocalStorage, Cli, Command, ConvertArgs, FlagArgs};

pub use config::toml_config::MappingConfig;
pub use core::{
    etl::EtlEngine, mapping::MappingSet, pipeline::ConversionPipeline,
    preprocess::KeywordFlagger, writer::CsvWriter,
};
pub use domain::model::{Document, DocumentFormat, FormatFamily, Record, Table};
pub use utils::error::{EtlError, Result};
