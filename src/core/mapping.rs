use crate::core::path::FieldPath;
use crate::core::transform::Transform;
use crate::domain::model::FormatFamily;
use serde::{Deserialize, Serialize};

/// How the records of a category are located in a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// FHIR resources with this `resourceType`, top-level or inside a Bundle.
    ResourceType(String),
    /// CCDA elements with this local name, outermost matches only.
    Elements(String),
    /// Rows of the narrative table in the CCDA section with this title.
    SectionTable(String),
}

/// Node a field path is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldScope {
    #[default]
    Entry,
    Document,
    Patient,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldSource {
    Constant(String),
    /// Present results are joined by the field's separator.
    Paths(Vec<FieldPath>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub source: FieldSource,
    pub scope: FieldScope,
    pub transform: Option<Transform>,
    pub required: bool,
    pub separator: String,
}

pub const DEFAULT_SEPARATOR: &str = " ";

#[derive(Debug, Clone, PartialEq)]
pub struct CategorySpec {
    pub name: String,
    pub family: FormatFamily,
    pub selector: Selector,
    /// FHIR only: reference from a record to its Patient resource.
    pub patient_reference: Option<FieldPath>,
    pub sort_by: Option<String>,
    pub fields: Vec<FieldSpec>,
}

impl CategorySpec {
    pub fn schema(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn uses_patient_scope(&self) -> bool {
        self.fields.iter().any(|f| f.scope == FieldScope::Patient)
    }
}

/// Compiled categories for every format family, in configuration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MappingSet {
    categories: Vec<CategorySpec>,
}

impl MappingSet {
    pub fn new(categories: Vec<CategorySpec>) -> Self {
        Self { categories }
    }

    pub fn for_family(&self, family: FormatFamily) -> impl Iterator<Item = &CategorySpec> {
        self.categories.iter().filter(move |c| c.family == family)
    }

    pub fn get(&self, family: FormatFamily, name: &str) -> Option<&CategorySpec> {
        self.for_family(family).find(|c| c.name == name)
    }
}
