use crate::domain::model::{DocumentFormat, DocumentRecords, TransformResult};
use crate::utils::error::Result;

/// Byte storage addressed by relative paths.
pub trait Storage {
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;
    /// Human-readable location of `path`, for logs and the run summary.
    fn location(&self, path: &str) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLayout {
    /// One table per category across all input documents.
    #[default]
    Merged,
    /// One table per category for every input document.
    PerDocument,
}

pub trait ConfigProvider {
    fn input_files(&self) -> &[String];
    fn output_path(&self) -> &str;
    /// `None` detects the format of each document.
    fn forced_format(&self) -> Option<DocumentFormat>;
    fn output_layout(&self) -> OutputLayout;
    fn missing_value(&self) -> &str;
    fn archive_name(&self) -> Option<&str>;
}

pub trait Pipeline {
    fn extract(&self) -> Result<Vec<DocumentRecords>>;
    fn transform(&self, data: Vec<DocumentRecords>) -> Result<TransformResult>;
    fn load(&self, result: TransformResult) -> Result<Vec<String>>;
}
