use crate::core::assembler::TableAssembler;
use crate::core::extractor::FieldExtractor;
use crate::core::mapping::MappingSet;
use crate::core::parser;
use crate::core::writer::CsvWriter;
use crate::core::{ConfigProvider, OutputLayout, Pipeline, Storage};
use crate::domain::model::{
    CategoryRecords, Document, DocumentRecords, FormatFamily, Table, TableOutput, TransformResult,
};
use crate::utils::error::Result;
use std::collections::BTreeSet;
use std::io::Write;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Converts a batch of clinical documents into per-category CSV files.
///
/// Every document is parsed and extracted before anything is written, so a
/// failing document leaves the output untouched.
pub struct ConversionPipeline<R: Storage, W: Storage, C: ConfigProvider> {
    source: R,
    sink: W,
    config: C,
    mappings: MappingSet,
}

impl<R: Storage, W: Storage, C: ConfigProvider> ConversionPipeline<R, W, C> {
    pub fn new(source: R, sink: W, config: C, mappings: MappingSet) -> Self {
        Self {
            source,
            sink,
            config,
            mappings,
        }
    }

    fn extract_document(&self, name: &str) -> Result<DocumentRecords> {
        let bytes = self.source.read_file(name)?;
        let document = Document::from_bytes(name, self.config.forced_format(), bytes)?;
        let parsed = parser::parse(&document)?;
        let family = document.format().family();

        let mut categories = Vec::new();
        for category in self.mappings.for_family(family) {
            let records = FieldExtractor::new(document.name(), category).extract(&parsed)?;
            categories.push(CategoryRecords {
                category: category.name.clone(),
                schema: category.schema(),
                sort_by: category.sort_by.clone(),
                records,
            });
        }

        Ok(DocumentRecords {
            document: document.name().to_string(),
            stem: document.stem().to_string(),
            family,
            categories,
        })
    }

    fn assemble(documents: &[DocumentRecords]) -> Result<Vec<Table>> {
        let mut assembler = TableAssembler::new();
        for document in documents {
            for category in &document.categories {
                assembler.append(
                    document.family,
                    &category.category,
                    &category.schema,
                    category.records.clone(),
                )?;
            }
        }

        let mut tables = assembler.into_tables();
        for table in &mut tables {
            if let Some(field) = sort_key(documents, table.family(), table.category()) {
                table.sort_by_field(field);
            }
        }
        Ok(tables)
    }

    fn write_archive(&self, archive_name: &str, outputs: &[TableOutput], writer: &CsvWriter) -> Result<String> {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for output in outputs {
            zip.start_file(output.relative_path.as_str(), SimpleFileOptions::default())?;
            zip.write_all(&writer.to_csv_bytes(&output.table)?)?;
        }
        let zip_data = zip.finish()?.into_inner();

        tracing::debug!(
            "Writing archive with {} tables ({} bytes)",
            outputs.len(),
            zip_data.len()
        );
        self.sink.write_file(archive_name, &zip_data)?;
        Ok(self.sink.location(archive_name))
    }
}

fn sort_key<'d>(documents: &'d [DocumentRecords], family: FormatFamily, category: &str) -> Option<&'d str> {
    documents
        .iter()
        .filter(|d| d.family == family)
        .flat_map(|d| d.categories.iter())
        .find(|c| c.category == category)
        .and_then(|c| c.sort_by.as_deref())
}

/// Hands out one output stem per document, unique within its family.
///
/// Same-named inputs from different directories get `_<n>` suffixes that
/// skip every stem another input already owns.
struct OutputStems {
    reserved: BTreeSet<(FormatFamily, String)>,
    taken: BTreeSet<(FormatFamily, String)>,
}

impl OutputStems {
    fn new(documents: &[DocumentRecords]) -> Self {
        Self {
            reserved: documents
                .iter()
                .map(|d| (d.family, d.stem.clone()))
                .collect(),
            taken: BTreeSet::new(),
        }
    }

    fn claim(&mut self, document: &DocumentRecords) -> String {
        let mut candidate = document.stem.clone();
        let mut suffix = 0;
        while self.taken.contains(&(document.family, candidate.clone()))
            || (suffix > 0 && self.reserved.contains(&(document.family, candidate.clone())))
        {
            suffix += 1;
            candidate = format!("{}_{}", document.stem, suffix);
        }
        self.taken.insert((document.family, candidate.clone()));
        candidate
    }
}

fn merged_path(table: &Table) -> String {
    format!("{}/{}.csv", table.family(), table.category())
}

fn per_document_path(stem: &str, table: &Table) -> String {
    format!(
        "{}/{}/{}_{}_data.csv",
        table.family(),
        table.category(),
        stem,
        table.category()
    )
}

impl<R: Storage, W: Storage, C: ConfigProvider> Pipeline for ConversionPipeline<R, W, C> {
    fn extract(&self) -> Result<Vec<DocumentRecords>> {
        let mut documents = Vec::new();
        for name in self.config.input_files() {
            tracing::debug!("Reading document: {}", name);
            let extracted = self.extract_document(name)?;
            tracing::info!(
                "📄 {} ({}): {}",
                extracted.document,
                extracted.family,
                extracted
                    .categories
                    .iter()
                    .map(|c| format!("{} {}", c.records.len(), c.category))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            documents.push(extracted);
        }
        Ok(documents)
    }

    fn transform(&self, data: Vec<DocumentRecords>) -> Result<TransformResult> {
        let outputs = match self.config.output_layout() {
            OutputLayout::Merged => Self::assemble(&data)?
                .into_iter()
                .map(|table| TableOutput {
                    relative_path: merged_path(&table),
                    table,
                })
                .collect(),
            OutputLayout::PerDocument => {
                let mut outputs = Vec::new();
                let mut stems = OutputStems::new(&data);
                for document in &data {
                    let stem = stems.claim(document);
                    for table in Self::assemble(std::slice::from_ref(document))? {
                        outputs.push(TableOutput {
                            relative_path: per_document_path(&stem, &table),
                            table,
                        });
                    }
                }
                outputs
            }
        };

        Ok(TransformResult { outputs })
    }

    fn load(&self, result: TransformResult) -> Result<Vec<String>> {
        let writer = CsvWriter::new(self.config.missing_value());
        tracing::info!(
            "Writing {} tables under {}",
            result.outputs.len(),
            self.config.output_path()
        );

        if let Some(archive_name) = self.config.archive_name() {
            let location = self.write_archive(archive_name, &result.outputs, &writer)?;
            return Ok(vec![location]);
        }

        let mut written = Vec::with_capacity(result.outputs.len());
        for output in &result.outputs {
            let bytes = writer.to_csv_bytes(&output.table)?;
            self.sink.write_file(&output.relative_path, &bytes)?;
            tracing::debug!(
                "Saved {} rows to {}",
                output.table.len(),
                output.relative_path
            );
            written.push(self.sink.location(&output.relative_path));
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::toml_config::MappingConfig;
    use crate::domain::model::DocumentFormat;
    use crate::utils::error::EtlError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        fn with_files(files: &[(&str, &str)]) -> Self {
            let storage = Self::default();
            {
                let mut map = storage.files.lock().unwrap();
                for (name, content) in files {
                    map.insert(name.to_string(), content.as_bytes().to_vec());
                }
            }
            storage
        }

        fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().unwrap().get(path).cloned()
        }

        fn file_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
            names.sort();
            names
        }
    }

    impl Storage for MockStorage {
        fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            self.get_file(path).ok_or_else(|| {
                EtlError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                ))
            })
        }

        fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), data.to_vec());
            Ok(())
        }

        fn location(&self, path: &str) -> String {
            format!("mock://{}", path)
        }
    }

    struct MockConfig {
        input_files: Vec<String>,
        format: Option<DocumentFormat>,
        layout: OutputLayout,
        archive: Option<String>,
    }

    impl MockConfig {
        fn new(input_files: &[&str]) -> Self {
            Self {
                input_files: input_files.iter().map(|s| s.to_string()).collect(),
                format: None,
                layout: OutputLayout::Merged,
                archive: None,
            }
        }
    }

    impl ConfigProvider for MockConfig {
        fn input_files(&self) -> &[String] {
            &self.input_files
        }

        fn output_path(&self) -> &str {
            "test_output"
        }

        fn forced_format(&self) -> Option<DocumentFormat> {
            self.format
        }

        fn output_layout(&self) -> OutputLayout {
            self.layout
        }

        fn missing_value(&self) -> &str {
            "N/A"
        }

        fn archive_name(&self) -> Option<&str> {
            self.archive.as_deref()
        }
    }

    fn mappings() -> MappingSet {
        MappingConfig::builtin().unwrap().compile().unwrap()
    }

    fn medication_bundle(id: &str, authored: &str) -> String {
        format!(
            r#"{{"resourceType": "Bundle", "entry": [
                {{"resource": {{"resourceType": "Patient", "id": "{id}",
                    "name": [{{"given": ["Pat"], "family": "{id}"}}]}}}},
                {{"resource": {{"resourceType": "MedicationRequest", "status": "active",
                    "subject": {{"reference": "urn:uuid:{id}"}},
                    "medicationCodeableConcept": {{"text": "Drug {id}"}},
                    "authoredOn": "{authored}"}}}}
            ]}}"#
        )
    }

    fn run(pipeline: &ConversionPipeline<MockStorage, MockStorage, MockConfig>) -> Result<Vec<String>> {
        let extracted = pipeline.extract()?;
        let transformed = pipeline.transform(extracted)?;
        pipeline.load(transformed)
    }

    #[test]
    fn test_merged_layout_writes_one_file_per_category() {
        let a = medication_bundle("a", "2020-03-01T09:00:00Z");
        let b = medication_bundle("b", "2019-01-01T09:00:00Z");
        let source = MockStorage::with_files(&[("a.json", &a), ("b.json", &b)]);
        let sink = MockStorage::default();
        let pipeline = ConversionPipeline::new(
            source,
            sink.clone(),
            MockConfig::new(&["a.json", "b.json"]),
            mappings(),
        );

        let written = run(&pipeline).unwrap();

        assert_eq!(
            written,
            vec![
                "mock://fhir/observations.csv",
                "mock://fhir/conditions.csv",
                "mock://fhir/medications.csv"
            ]
        );
        let csv = String::from_utf8(sink.get_file("fhir/medications.csv").unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("encounter_id,patient_id,"));
        // sorted by authorized_date
        assert!(lines[1].contains("Drug b"));
        assert!(lines[2].contains("Drug a"));
        assert!(lines[2].ends_with(",Pat a"));

        let observations =
            String::from_utf8(sink.get_file("fhir/observations.csv").unwrap()).unwrap();
        assert_eq!(observations.lines().count(), 1);
    }

    #[test]
    fn test_per_document_layout() {
        let a = medication_bundle("a", "2020-03-01");
        let source = MockStorage::with_files(&[("in/a.json", &a), ("other/a.json", &a)]);
        let sink = MockStorage::default();
        let mut config = MockConfig::new(&["in/a.json", "other/a.json"]);
        config.layout = OutputLayout::PerDocument;
        let pipeline = ConversionPipeline::new(source, sink.clone(), config, mappings());

        let written = run(&pipeline).unwrap();

        assert_eq!(written.len(), 6);
        let names = sink.file_names();
        assert!(names.contains(&"fhir/medications/a_medications_data.csv".to_string()));
        assert!(names.contains(&"fhir/medications/a_1_medications_data.csv".to_string()));
    }

    #[test]
    fn test_per_document_suffix_skips_existing_stems() {
        let one = medication_bundle("one", "2020-03-01");
        let two = medication_bundle("two", "2020-03-01");
        let three = medication_bundle("three", "2020-03-01");
        let source = MockStorage::with_files(&[
            ("x/a.json", &one),
            ("y/a.json", &two),
            ("a_1.json", &three),
        ]);
        let sink = MockStorage::default();
        let mut config = MockConfig::new(&["x/a.json", "y/a.json", "a_1.json"]);
        config.layout = OutputLayout::PerDocument;
        let pipeline = ConversionPipeline::new(source, sink.clone(), config, mappings());

        let written = run(&pipeline).unwrap();

        let unique: BTreeSet<&String> = written.iter().collect();
        assert_eq!(written.len(), 9);
        assert_eq!(unique.len(), 9);

        let medications = |stem: &str| {
            let path = format!("fhir/medications/{}_medications_data.csv", stem);
            String::from_utf8(sink.get_file(&path).unwrap()).unwrap()
        };
        assert!(medications("a").contains("Drug one"));
        assert!(medications("a_2").contains("Drug two"));
        assert!(medications("a_1").contains("Drug three"));
    }

    #[test]
    fn test_malformed_document_writes_nothing() {
        let good = medication_bundle("a", "2020-03-01");
        let source = MockStorage::with_files(&[
            ("good.json", &good),
            ("cut.xml", "<ClinicalDocument><component>"),
        ]);
        let sink = MockStorage::default();
        let pipeline = ConversionPipeline::new(
            source,
            sink.clone(),
            MockConfig::new(&["good.json", "cut.xml"]),
            mappings(),
        );

        let err = run(&pipeline).unwrap_err();

        assert!(matches!(err, EtlError::ParseError { ref document, .. } if document == "cut.xml"));
        assert!(sink.file_names().is_empty());
    }

    #[test]
    fn test_archive_output() {
        let a = medication_bundle("a", "2020-03-01");
        let source = MockStorage::with_files(&[("a.json", &a)]);
        let sink = MockStorage::default();
        let mut config = MockConfig::new(&["a.json"]);
        config.archive = Some("clinical_tables.zip".to_string());
        let pipeline = ConversionPipeline::new(source, sink.clone(), config, mappings());

        let written = run(&pipeline).unwrap();

        assert_eq!(written, vec!["mock://clinical_tables.zip"]);
        assert_eq!(sink.file_names(), vec!["clinical_tables.zip"]);

        let zip_bytes = sink.get_file("clinical_tables.zip").unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_bytes)).unwrap();
        let mut file_names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        file_names.sort();
        assert_eq!(
            file_names,
            vec![
                "fhir/conditions.csv",
                "fhir/medications.csv",
                "fhir/observations.csv"
            ]
        );
    }

    #[test]
    fn test_forced_format() {
        let source = MockStorage::with_files(&[("record.dat", r#"<ClinicalDocument xmlns="urn:hl7-org:v3"/>"#)]);
        let sink = MockStorage::default();
        let mut config = MockConfig::new(&["record.dat"]);
        config.format = Some(DocumentFormat::Ccda);
        let pipeline = ConversionPipeline::new(source, sink.clone(), config, mappings());

        let written = run(&pipeline).unwrap();

        assert_eq!(written.len(), 3);
        let problems = String::from_utf8(sink.get_file("ccda/problems.csv").unwrap()).unwrap();
        assert_eq!(problems.lines().count(), 1);
    }

    #[test]
    fn test_missing_input_file() {
        let pipeline = ConversionPipeline::new(
            MockStorage::default(),
            MockStorage::default(),
            MockConfig::new(&["absent.json"]),
            mappings(),
        );
        assert!(matches!(pipeline.extract(), Err(EtlError::IoError(_))));
    }
}
