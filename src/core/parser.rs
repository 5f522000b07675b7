use crate::core::xml::{fhir_xml_to_json, parse_xml, XmlElement};
use crate::domain::model::{Document, DocumentFormat, FormatFamily};
use crate::utils::error::{EtlError, Result};

/// In-memory tree of a parsed document. FHIR XML is normalised to the FHIR JSON shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedDocument {
    Fhir(serde_json::Value),
    Ccda(XmlElement),
}

impl ParsedDocument {
    pub fn family(&self) -> FormatFamily {
        match self {
            ParsedDocument::Fhir(_) => FormatFamily::Fhir,
            ParsedDocument::Ccda(_) => FormatFamily::Ccda,
        }
    }
}

pub fn parse(document: &Document) -> Result<ParsedDocument> {
    tracing::debug!(
        "Parsing '{}' as {} ({} bytes)",
        document.name(),
        document.format(),
        document.content().len()
    );

    // a leading byte order mark is not part of the JSON text
    let content = document.content().trim_start_matches('\u{feff}');

    match document.format() {
        DocumentFormat::FhirJson => {
            let value: serde_json::Value =
                serde_json::from_str(content).map_err(|e| EtlError::ParseError {
                    document: document.name().to_string(),
                    message: format!("invalid JSON: {}", e),
                })?;
            if !value.is_object() {
                return Err(EtlError::ParseError {
                    document: document.name().to_string(),
                    message: "top-level JSON value must be an object".to_string(),
                });
            }
            Ok(ParsedDocument::Fhir(value))
        }
        DocumentFormat::FhirXml => {
            let root = parse_xml(document.name(), content)?;
            Ok(ParsedDocument::Fhir(fhir_xml_to_json(&root)))
        }
        DocumentFormat::Ccda => {
            let root = parse_xml(document.name(), content)?;
            Ok(ParsedDocument::Ccda(root))
        }
    }
}
