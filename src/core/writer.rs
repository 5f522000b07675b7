use crate::domain::model::{FormatFamily, Record, Table};
use crate::utils::error::{EtlError, Result};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

pub const DEFAULT_MISSING_VALUE: &str = "N/A";

/// Serializes tables as CSV: a header row with the schema, then one row per record.
#[derive(Debug, Clone)]
pub struct CsvWriter {
    missing_value: String,
}

impl Default for CsvWriter {
    fn default() -> Self {
        Self::new(DEFAULT_MISSING_VALUE)
    }
}

impl CsvWriter {
    pub fn new(missing_value: impl Into<String>) -> Self {
        Self {
            missing_value: missing_value.into(),
        }
    }

    pub fn missing_value(&self) -> &str {
        &self.missing_value
    }

    fn write_rows<W: Write>(&self, table: &Table, out: W) -> Result<W> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(table.schema())?;

        for record in table.records() {
            let row = table.schema().iter().map(|field| {
                record
                    .display_value(field)
                    .unwrap_or_else(|| self.missing_value.clone())
            });
            writer.write_record(row)?;
        }

        writer
            .into_inner()
            .map_err(|e| EtlError::IoError(e.into_error()))
    }

    pub fn to_csv_bytes(&self, table: &Table) -> Result<Vec<u8>> {
        self.write_rows(table, Vec::new())
    }

    /// Writes `table` to `path`, creating parent directories.
    pub fn write_table(&self, table: &Table, path: &Path) -> Result<()> {
        let file_error = |source: std::io::Error| EtlError::FileError {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(file_error)?;
        }
        let file = File::create(path).map_err(file_error)?;
        let mut out = self.write_rows(table, BufWriter::new(file))?;
        out.flush().map_err(file_error)?;

        tracing::debug!(
            "Wrote {} rows of '{}' to {}",
            table.len(),
            table.category(),
            path.display()
        );
        Ok(())
    }

    /// Reads a CSV written by this writer back into a table of strings.
    pub fn read_table(&self, family: FormatFamily, category: &str, path: &Path) -> Result<Table> {
        let file = File::open(path).map_err(|source| EtlError::FileError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = csv::Reader::from_reader(file);
        let schema: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut table = Table::new(family, category, schema.clone());
        for row in reader.records() {
            let row = row?;
            let data: HashMap<String, serde_json::Value> = schema
                .iter()
                .zip(row.iter())
                .map(|(field, cell)| {
                    let value = if cell == self.missing_value {
                        serde_json::Value::Null
                    } else {
                        serde_json::Value::String(cell.to_string())
                    };
                    (field.clone(), value)
                })
                .collect();
            table.push(Record { data })?;
        }
        Ok(table)
    }
}
