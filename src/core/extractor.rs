use crate::core::mapping::{CategorySpec, FieldScope, FieldSource, FieldSpec, Selector};
use crate::core::parser::ParsedDocument;
use crate::core::path::FieldPath;
use crate::core::transform::Transform;
use crate::core::xml::XmlElement;
use crate::domain::model::Record;
use crate::utils::error::{EtlError, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Produces the records of one category from a parsed document.
pub struct FieldExtractor<'a> {
    document: &'a str,
    category: &'a CategorySpec,
}

/// Node a record is read from, with the document-level nodes around it.
enum Context<'t> {
    Fhir {
        root: &'t Value,
        entry: &'t Value,
        entry_path: String,
        patient: Option<&'t Value>,
    },
    Ccda {
        root: &'t XmlElement,
        entry: &'t XmlElement,
        patient: Option<&'t XmlElement>,
    },
}

impl<'a> FieldExtractor<'a> {
    pub fn new(document: &'a str, category: &'a CategorySpec) -> Self {
        Self { document, category }
    }

    pub fn extract(&self, parsed: &ParsedDocument) -> Result<Vec<Record>> {
        if parsed.family() != self.category.family {
            return Err(EtlError::ProcessingError {
                message: format!(
                    "category '{}' maps {} documents but '{}' is {}",
                    self.category.name,
                    self.category.family,
                    self.document,
                    parsed.family()
                ),
            });
        }

        let records = match parsed {
            ParsedDocument::Fhir(root) => self.extract_fhir(root)?,
            ParsedDocument::Ccda(root) => self.extract_ccda(root)?,
        };

        tracing::debug!(
            "Extracted {} '{}' records from '{}'",
            records.len(),
            self.category.name,
            self.document
        );
        Ok(records)
    }

    fn missing(&self, path: impl Into<String>) -> EtlError {
        EtlError::ExtractionError {
            document: self.document.to_string(),
            category: self.category.name.clone(),
            path: path.into(),
        }
    }

    fn extract_fhir(&self, root: &Value) -> Result<Vec<Record>> {
        let Selector::ResourceType(resource_type) = &self.category.selector else {
            return Err(self.selector_mismatch());
        };

        let resources = fhir_resources(root).map_err(|path| self.missing(path))?;
        let patients: Vec<&Value> = if self.category.uses_patient_scope() {
            resources
                .iter()
                .filter(|(_, r)| r.get("resourceType").and_then(Value::as_str) == Some("Patient"))
                .map(|(_, r)| *r)
                .collect()
        } else {
            Vec::new()
        };

        let mut records = Vec::new();
        for (entry_path, resource) in resources {
            if resource.get("resourceType").and_then(Value::as_str) != Some(resource_type.as_str()) {
                continue;
            }
            let patient = self
                .category
                .patient_reference
                .as_ref()
                .filter(|_| !patients.is_empty())
                .and_then(|reference| find_patient(&patients, reference, resource));
            let context = Context::Fhir {
                root,
                entry: resource,
                entry_path,
                patient,
            };
            records.push(self.build_record(&context)?);
        }
        Ok(records)
    }

    fn extract_ccda(&self, root: &XmlElement) -> Result<Vec<Record>> {
        if root.name != "ClinicalDocument" {
            return Err(self.missing("ClinicalDocument"));
        }

        let entries: Vec<&XmlElement> = match &self.category.selector {
            Selector::Elements(name) => root.find_all_outermost(name),
            Selector::SectionTable(title) => section_table_rows(root, title),
            Selector::ResourceType(_) => return Err(self.selector_mismatch()),
        };

        let patient = root.find("patientRole");
        entries
            .into_iter()
            .map(|entry| {
                self.build_record(&Context::Ccda {
                    root,
                    entry,
                    patient,
                })
            })
            .collect()
    }

    fn selector_mismatch(&self) -> EtlError {
        EtlError::ProcessingError {
            message: format!(
                "category '{}' has a selector that does not apply to {} documents",
                self.category.name, self.category.family
            ),
        }
    }

    fn build_record(&self, context: &Context<'_>) -> Result<Record> {
        let mut data = HashMap::with_capacity(self.category.fields.len());
        for field in &self.category.fields {
            let value = self.resolve_field(field, context)?;
            data.insert(field.name.clone(), value);
        }
        Ok(Record { data })
    }

    fn resolve_field(&self, field: &FieldSpec, context: &Context<'_>) -> Result<Value> {
        let paths = match &field.source {
            FieldSource::Constant(value) => return Ok(Value::String(value.clone())),
            FieldSource::Paths(paths) => paths,
        };

        let pieces: Vec<String> = paths
            .iter()
            .filter_map(|path| resolve_path(path, field.scope, context))
            .collect();

        let value = if pieces.is_empty() {
            None
        } else if let Some(transform) = field.transform {
            transform.apply(&pieces.join(field.separator.as_str())).map(Value::String)
        } else if paths.len() == 1 {
            // JSON numbers and booleans keep their type
            single_scalar(&paths[0], field.scope, context)
                .or_else(|| Some(Value::String(pieces.join(field.separator.as_str()))))
        } else {
            Some(Value::String(pieces.join(field.separator.as_str())))
        };

        match value {
            Some(value) => Ok(value),
            None if field.required => Err(self.missing(describe_path(field, context))),
            None => Ok(Value::Null),
        }
    }
}

fn describe_path(field: &FieldSpec, context: &Context<'_>) -> String {
    let paths = match &field.source {
        FieldSource::Paths(paths) => paths
            .iter()
            .map(FieldPath::as_str)
            .collect::<Vec<_>>()
            .join(" + "),
        FieldSource::Constant(_) => field.name.clone(),
    };
    match (field.scope, context) {
        (FieldScope::Entry, Context::Fhir { entry_path, .. }) if !entry_path.is_empty() => {
            format!("{}.{}", entry_path, paths)
        }
        (FieldScope::Patient, _) => format!("patient:{}", paths),
        _ => paths,
    }
}

fn scope_json<'t>(scope: FieldScope, context: &Context<'t>) -> Option<&'t Value> {
    match (scope, context) {
        (FieldScope::Entry, Context::Fhir { entry, .. }) => Some(*entry),
        (FieldScope::Document, Context::Fhir { root, .. }) => Some(*root),
        (FieldScope::Patient, Context::Fhir { patient, .. }) => *patient,
        _ => None,
    }
}

fn resolve_path(path: &FieldPath, scope: FieldScope, context: &Context<'_>) -> Option<String> {
    match context {
        Context::Fhir { .. } => scalar_text(path.resolve_json(scope_json(scope, context)?)?),
        Context::Ccda {
            root,
            entry,
            patient,
        } => {
            let node = match scope {
                FieldScope::Entry => *entry,
                FieldScope::Document => *root,
                FieldScope::Patient => (*patient)?,
            };
            non_blank(path.resolve_xml(node)?)
        }
    }
}

fn single_scalar(path: &FieldPath, scope: FieldScope, context: &Context<'_>) -> Option<Value> {
    match path.resolve_json(scope_json(scope, context)?)? {
        value @ (Value::Number(_) | Value::Bool(_)) => Some(value.clone()),
        _ => None,
    }
}

fn non_blank(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == text.len() {
        Some(text)
    } else {
        Some(trimmed.to_string())
    }
}

/// Scalar text of a JSON value; arrays of scalars are joined by a space.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Object(_) => None,
        Value::String(s) => non_blank(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter(|item| !item.is_array())
                .filter_map(scalar_text)
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
    }
}

/// Resources of a FHIR document with their paths; a Bundle yields its entries.
fn fhir_resources(root: &Value) -> std::result::Result<Vec<(String, &Value)>, String> {
    let resource_type = root
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or_else(|| "resourceType".to_string())?;

    if resource_type != "Bundle" {
        return Ok(vec![(String::new(), root)]);
    }

    let entries = match root.get("entry") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries.iter().collect::<Vec<_>>(),
        Some(single) => vec![single],
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let path = format!("entry[{}].resource", i);
            let resource = entry
                .get("resource")
                .filter(|r| r.is_object())
                .ok_or_else(|| path.clone())?;
            if resource.get("resourceType").and_then(Value::as_str).is_none() {
                return Err(format!("{}.resourceType", path));
            }
            Ok((path, resource))
        })
        .collect()
}

fn find_patient<'t>(
    patients: &[&'t Value],
    reference: &FieldPath,
    resource: &Value,
) -> Option<&'t Value> {
    let reference = scalar_text(reference.resolve_json(resource)?)?;
    let id = Transform::ReferenceId.apply(&reference)?;
    patients
        .iter()
        .copied()
        .find(|patient| patient.get("id").and_then(Value::as_str) == Some(id.as_str()))
}

/// Body rows of the first table in the section titled `title`.
fn section_table_rows<'t>(root: &'t XmlElement, title: &str) -> Vec<&'t XmlElement> {
    let wanted = title.trim().to_lowercase();
    let section = root.find_all("section").into_iter().find(|section| {
        section
            .child("title")
            .map(|t| t.text().trim().to_lowercase() == wanted)
            .unwrap_or(false)
    });

    let Some(table) = section.and_then(|s| s.find("table")) else {
        return Vec::new();
    };

    match table.child("tbody") {
        Some(tbody) => tbody.children_named("tr").collect(),
        None => table.children_named("tr").collect(),
    }
}
