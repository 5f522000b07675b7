use crate::domain::model::{FormatFamily, Record, Table};
use crate::utils::error::{EtlError, Result};

/// Merges per-category record batches into one table per `(family, category)`.
///
/// Append-only: records keep document order, then extraction order, and
/// tables keep the order in which their category was first seen.
#[derive(Debug, Default)]
pub struct TableAssembler {
    tables: Vec<Table>,
}

impl TableAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        family: FormatFamily,
        category: &str,
        schema: &[String],
        records: Vec<Record>,
    ) -> Result<()> {
        let position = self
            .tables
            .iter()
            .position(|t| t.family() == family && t.category() == category);

        let table = match position {
            Some(index) => {
                let table = &mut self.tables[index];
                if table.schema() != schema {
                    return Err(EtlError::ProcessingError {
                        message: format!(
                            "category '{}' was extracted with schema {:?} and {:?}",
                            category,
                            table.schema(),
                            schema
                        ),
                    });
                }
                table
            }
            None => {
                self.tables
                    .push(Table::new(family, category, schema.to_vec()));
                let last = self.tables.len() - 1;
                &mut self.tables[last]
            }
        };

        for record in records {
            table.push(record)?;
        }
        Ok(())
    }

    pub fn into_tables(self) -> Vec<Table> {
        self.tables
    }
}
