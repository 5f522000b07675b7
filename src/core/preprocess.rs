use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{self, Validate};
use std::fs;
use std::path::Path;

/// Adds a boolean column telling whether a text column mentions any of a set of words.
///
/// The inspected column is lowercased in place; matching ignores case.
#[derive(Debug, Clone)]
pub struct KeywordFlagger {
    pub column: String,
    pub words: Vec<String>,
    pub result_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSummary {
    pub rows: usize,
    pub flagged: usize,
}

impl KeywordFlagger {
    pub fn new(column: impl Into<String>, words: Vec<String>, result_column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            words,
            result_column: result_column.into(),
        }
    }

    /// Rewrites the CSV at `path` in place.
    pub fn apply(&self, path: &Path) -> Result<FlagSummary> {
        self.validate()?;

        let input = fs::read(path).map_err(|source| EtlError::FileError {
            path: path.to_path_buf(),
            source,
        })?;
        let (output, summary) = self.apply_to_bytes(&input)?;
        fs::write(path, output).map_err(|source| EtlError::FileError {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!(
            "🏷️  Flagged {}/{} rows of {} in column '{}'",
            summary.flagged,
            summary.rows,
            path.display(),
            self.result_column
        );
        Ok(summary)
    }

    pub fn apply_to_bytes(&self, input: &[u8]) -> Result<(Vec<u8>, FlagSummary)> {
        let words: Vec<String> = self
            .words
            .iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        let mut reader = csv::Reader::from_reader(input);
        let mut headers = reader.headers()?.clone();

        let column_index = headers
            .iter()
            .position(|h| h == self.column)
            .ok_or_else(|| EtlError::ValidationError {
                message: format!("column '{}' not found in CSV header", self.column),
            })?;
        let result_index = headers.iter().position(|h| h == self.result_column);
        if result_index.is_none() {
            headers.push_field(&self.result_column);
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&headers)?;

        let mut summary = FlagSummary { rows: 0, flagged: 0 };
        for row in reader.records() {
            let row = row?;
            let mut cells: Vec<String> = row.iter().map(str::to_string).collect();

            let lowered = cells
                .get(column_index)
                .map(|cell| cell.to_lowercase())
                .unwrap_or_default();
            let matched = words.iter().any(|word| lowered.contains(word.as_str()));
            if let Some(cell) = cells.get_mut(column_index) {
                *cell = lowered;
            }

            let flag = matched.to_string();
            match result_index {
                Some(index) if index < cells.len() => cells[index] = flag,
                _ => cells.push(flag),
            }

            summary.rows += 1;
            if matched {
                summary.flagged += 1;
            }
            writer.write_record(&cells)?;
        }

        let output = writer
            .into_inner()
            .map_err(|e| EtlError::IoError(e.into_error()))?;
        Ok((output, summary))
    }
}

impl Validate for KeywordFlagger {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("column", &self.column)?;
        validation::validate_non_empty_string("result_column", &self.result_column)?;
        validation::validate_non_empty_list("words", &self.words)?;
        if self.column == self.result_column {
            return Err(EtlError::InvalidConfigValueError {
                field: "result_column".to_string(),
                value: self.result_column.clone(),
                reason: "must differ from the inspected column".to_string(),
            });
        }
        Ok(())
    }
}
