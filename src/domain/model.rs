use crate::utils::error::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Encoding of an input document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentFormat {
    FhirJson,
    FhirXml,
    Ccda,
}

/// Clinical standard of a document, independent of its encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatFamily {
    Fhir,
    Ccda,
}

impl DocumentFormat {
    pub fn family(self) -> FormatFamily {
        match self {
            DocumentFormat::FhirJson | DocumentFormat::FhirXml => FormatFamily::Fhir,
            DocumentFormat::Ccda => FormatFamily::Ccda,
        }
    }

    /// Guesses the format from the file extension and the first element of the content.
    pub fn detect(name: &str, content: &str) -> Option<DocumentFormat> {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        if extension.as_deref() == Some("json") {
            return Some(DocumentFormat::FhirJson);
        }

        let trimmed = content.trim_start_matches('\u{feff}').trim_start();
        if trimmed.starts_with('{') {
            return Some(DocumentFormat::FhirJson);
        }
        if trimmed.starts_with('<') {
            return match root_element_name(trimmed) {
                Some("ClinicalDocument") => Some(DocumentFormat::Ccda),
                Some(_) => Some(DocumentFormat::FhirXml),
                None => None,
            };
        }
        None
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFormat::FhirJson => write!(f, "fhir-json"),
            DocumentFormat::FhirXml => write!(f, "fhir-xml"),
            DocumentFormat::Ccda => write!(f, "ccda"),
        }
    }
}

impl fmt::Display for FormatFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatFamily::Fhir => write!(f, "fhir"),
            FormatFamily::Ccda => write!(f, "ccda"),
        }
    }
}

// Local name of the first start tag, skipping the prolog, comments and doctype.
fn root_element_name(content: &str) -> Option<&str> {
    let mut rest = content;
    while let Some(start) = rest.find('<') {
        rest = &rest[start + 1..];
        if rest.starts_with('?') || rest.starts_with('!') {
            continue;
        }
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        let qualified = &rest[..end];
        return Some(qualified.rsplit(':').next().unwrap_or(qualified));
    }
    None
}

/// Raw input document. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Document {
    name: String,
    format: DocumentFormat,
    content: String,
}

impl Document {
    pub fn new(name: impl Into<String>, format: DocumentFormat, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format,
            content: content.into(),
        }
    }

    /// Decodes UTF-8 bytes; `format` of `None` means detect.
    pub fn from_bytes(name: &str, format: Option<DocumentFormat>, bytes: Vec<u8>) -> Result<Self> {
        let mut content = String::from_utf8(bytes).map_err(|e| EtlError::ParseError {
            document: name.to_string(),
            message: format!("content is not valid UTF-8: {}", e),
        })?;
        if content.starts_with('\u{feff}') {
            content.replace_range(..'\u{feff}'.len_utf8(), "");
        }

        let format = match format {
            Some(format) => format,
            None => DocumentFormat::detect(name, &content).ok_or_else(|| EtlError::ParseError {
                document: name.to_string(),
                message: "unable to detect document format".to_string(),
            })?,
        };

        Ok(Self {
            name: name.to_string(),
            format,
            content,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// File name without directories and extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.name)
    }
}

/// One flat clinical fact. Values are JSON scalars; `Null` marks a missing field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: HashMap<String, serde_json::Value>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.data.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(|v| v.as_str())
    }

    /// Cell text, or `None` for a missing value.
    pub fn display_value(&self, field: &str) -> Option<String> {
        match self.data.get(field)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn has_schema(&self, schema: &[String]) -> bool {
        self.data.len() == schema.len() && schema.iter().all(|f| self.data.contains_key(f))
    }
}

/// Records of one category sharing a fixed schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    family: FormatFamily,
    category: String,
    schema: Vec<String>,
    records: Vec<Record>,
}

impl Table {
    pub fn new(family: FormatFamily, category: impl Into<String>, schema: Vec<String>) -> Self {
        Self {
            family,
            category: category.into(),
            schema,
            records: Vec::new(),
        }
    }

    pub fn family(&self) -> FormatFamily {
        self.family
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: Record) -> Result<()> {
        if !record.has_schema(&self.schema) {
            let mut fields: Vec<&String> = record.data.keys().collect();
            fields.sort();
            return Err(EtlError::ProcessingError {
                message: format!(
                    "record fields {:?} do not match the schema {:?} of table '{}'",
                    fields, self.schema, self.category
                ),
            });
        }
        self.records.push(record);
        Ok(())
    }

    /// Stable ascending sort on one field's text; missing values go last.
    pub fn sort_by_field(&mut self, field: &str) {
        self.records.sort_by(|a, b| {
            match (a.display_value(field), b.display_value(field)) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
    }
}

/// One table with the storage-relative path it is written to.
#[derive(Debug, Clone)]
pub struct TableOutput {
    pub relative_path: String,
    pub table: Table,
}

/// Extracted records of one document, per category, in mapping order.
#[derive(Debug, Clone)]
pub struct DocumentRecords {
    pub document: String,
    pub stem: String,
    pub family: FormatFamily,
    pub categories: Vec<CategoryRecords>,
}

#[derive(Debug, Clone)]
pub struct CategoryRecords {
    pub category: String,
    pub schema: Vec<String>,
    pub sort_by: Option<String>,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone)]
pub struct TransformResult {
    pub outputs: Vec<TableOutput>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        Record {
            data: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(
            DocumentFormat::detect("a.json", ""),
            Some(DocumentFormat::FhirJson)
        );
        assert_eq!(
            DocumentFormat::detect("a.xml", "<?xml version=\"1.0\"?>\n<!-- c -->\n<ClinicalDocument xmlns=\"urn:hl7-org:v3\">"),
            Some(DocumentFormat::Ccda)
        );
        assert_eq!(
            DocumentFormat::detect("a.xml", "<Bundle xmlns=\"http://hl7.org/fhir\">"),
            Some(DocumentFormat::FhirXml)
        );
        assert_eq!(
            DocumentFormat::detect("a.dat", "  {\"resourceType\":\"Bundle\"}"),
            Some(DocumentFormat::FhirJson)
        );
        assert_eq!(DocumentFormat::detect("a.txt", "hello"), None);
    }

    #[test]
    fn test_document_from_invalid_utf8() {
        let err = Document::from_bytes("bad.json", None, vec![0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, EtlError::ParseError { .. }));
    }

    #[test]
    fn test_document_from_bytes_strips_bom() {
        let bytes = "\u{feff}{\"resourceType\": \"Bundle\"}".as_bytes().to_vec();
        let doc = Document::from_bytes("bom.json", None, bytes).unwrap();
        assert_eq!(doc.format(), DocumentFormat::FhirJson);
        assert_eq!(doc.content(), "{\"resourceType\": \"Bundle\"}");
    }

    #[test]
    fn test_document_stem() {
        let doc = Document::new("dir/patient_1.json", DocumentFormat::FhirJson, "{}");
        assert_eq!(doc.stem(), "patient_1");
    }

    #[test]
    fn test_table_rejects_schema_mismatch() {
        let mut table = Table::new(
            FormatFamily::Fhir,
            "medications",
            vec!["a".to_string(), "b".to_string()],
        );

        assert!(table.push(record(&[("a", json!("1")), ("b", json!(null))])).is_ok());
        assert!(table.push(record(&[("a", json!("1"))])).is_err());
        assert!(table
            .push(record(&[("a", json!("1")), ("c", json!("2"))]))
            .is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_sort_by_field_puts_missing_last() {
        let schema = vec!["id".to_string(), "date".to_string()];
        let mut table = Table::new(FormatFamily::Ccda, "problems", schema);
        table.push(record(&[("id", json!("1")), ("date", json!(null))])).unwrap();
        table.push(record(&[("id", json!("2")), ("date", json!("2020-01-02"))])).unwrap();
        table.push(record(&[("id", json!("3")), ("date", json!("2019-05-01"))])).unwrap();
        table.push(record(&[("id", json!("4")), ("date", json!("2020-01-02"))])).unwrap();

        table.sort_by_field("date");

        let ids: Vec<&str> = table
            .records()
            .iter()
            .map(|r| r.get_str("id").unwrap())
            .collect();
        assert_eq!(ids, vec!["3", "2", "4", "1"]);
    }

    #[test]
    fn test_display_value() {
        let r = record(&[("n", json!(6.3)), ("s", json!("x")), ("m", json!(null))]);
        assert_eq!(r.display_value("n").as_deref(), Some("6.3"));
        assert_eq!(r.display_value("s").as_deref(), Some("x"));
        assert_eq!(r.display_value("m"), None);
        assert_eq!(r.display_value("absent"), None);
    }
}
