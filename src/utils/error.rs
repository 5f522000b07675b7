use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Failed to parse document '{document}': {message}")]
    ParseError { document: String, message: String },

    #[error("Missing element '{path}' in document '{document}' (category: {category})")]
    ExtractionError {
        document: String,
        category: String,
        path: String,
    },

    #[error("IO error on '{}': {source}", path.display())]
    FileError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Extraction,
    Output,
    Configuration,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::ParseError { .. } => ErrorCategory::Input,
            EtlError::ExtractionError { .. } => ErrorCategory::Extraction,
            EtlError::FileError { .. }
            | EtlError::IoError(_)
            | EtlError::CsvError(_)
            | EtlError::ZipError(_)
            | EtlError::SerializationError(_) => ErrorCategory::Output,
            EtlError::ConfigValidationError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. } => ErrorCategory::Configuration,
            EtlError::ProcessingError { .. } | EtlError::ValidationError { .. } => {
                ErrorCategory::Processing
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Input | ErrorCategory::Extraction => ErrorSeverity::High,
            ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::Processing => ErrorSeverity::Medium,
            ErrorCategory::Output => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            EtlError::ParseError { document, .. } => format!(
                "Check that '{}' is well-formed and matches its declared format (use --format to override detection)",
                document
            ),
            EtlError::ExtractionError { path, category, .. } => format!(
                "Add '{}' to the document or mark the field as optional in the '{}' mapping",
                path, category
            ),
            EtlError::FileError { path, .. } => format!(
                "Make sure '{}' exists and is readable/writable",
                path.display()
            ),
            EtlError::IoError(_) => "Check file permissions and available disk space".to_string(),
            EtlError::CsvError(_) => "Check that the CSV file is well-formed".to_string(),
            EtlError::ZipError(_) => "Check the archive name and output directory".to_string(),
            EtlError::SerializationError(_) => "Check the JSON content".to_string(),
            EtlError::ConfigValidationError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. } => {
                "Review the command line arguments and the mapping file".to_string()
            }
            EtlError::ProcessingError { .. } => {
                "Check that categories sharing a name also share a schema".to_string()
            }
            EtlError::ValidationError { .. } => "Check the input arguments".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Input => format!("Input document could not be read: {}", self),
            ErrorCategory::Extraction => format!("Required data is missing: {}", self),
            ErrorCategory::Output => format!("Output could not be written: {}", self),
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::Processing => format!("Processing failed: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_error_names_path() {
        let err = EtlError::ExtractionError {
            document: "bundle.json".to_string(),
            category: "medications".to_string(),
            path: "entry[2].resource".to_string(),
        };

        let message = err.to_string();
        assert!(message.contains("entry[2].resource"));
        assert!(message.contains("bundle.json"));
        assert_eq!(err.category(), ErrorCategory::Extraction);
        assert_eq!(err.severity(), ErrorSeverity::High);
    }

    #[test]
    fn test_file_error_is_output_error() {
        let err = EtlError::FileError {
            path: PathBuf::from("/nope/out.csv"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };

        assert_eq!(err.category(), ErrorCategory::Output);
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(err.recovery_suggestion().contains("/nope/out.csv"));
    }
}
