use crate::core::mapping::{
    CategorySpec, FieldScope, FieldSource, FieldSpec, MappingSet, Selector, DEFAULT_SEPARATOR,
};
use crate::core::path::FieldPath;
use crate::core::transform::Transform;
use crate::domain::model::FormatFamily;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

const BUILTIN_MAPPINGS: &str = include_str!("builtin_mappings.toml");

/// Category mappings as written in a TOML mapping file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    pub fhir: Option<FamilyConfig>,
    pub ccda: Option<FamilyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FamilyConfig {
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryConfig {
    pub name: String,
    pub resource_type: Option<String>,
    pub elements: Option<String>,
    pub section_table: Option<String>,
    pub patient_reference: Option<String>,
    pub sort_by: Option<String>,
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    pub path: Option<PathConfig>,
    pub value: Option<String>,
    pub scope: Option<FieldScope>,
    pub transform: Option<Transform>,
    pub required: Option<bool>,
    /// Joins the results of several paths; a single space by default.
    pub separator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathConfig {
    Single(String),
    Multiple(Vec<String>),
}

impl PathConfig {
    fn as_slice(&self) -> &[String] {
        match self {
            PathConfig::Single(path) => std::slice::from_ref(path),
            PathConfig::Multiple(paths) => paths,
        }
    }
}

impl MappingConfig {
    /// 從 TOML 檔案載入映射設定
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| EtlError::FileError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_MAPPINGS)
    }

    /// 替換環境變數 (例如 ${SECTION_TITLE})
    fn substitute_env_vars(content: &str) -> String {
        let re = Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern");

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
    }

    /// Fills families this file leaves out from the built-in mappings.
    pub fn with_builtin_fallback(mut self) -> Result<Self> {
        if self.fhir.is_some() && self.ccda.is_some() {
            return Ok(self);
        }
        let builtin = Self::builtin()?;
        if self.fhir.is_none() {
            self.fhir = builtin.fhir;
        }
        if self.ccda.is_none() {
            self.ccda = builtin.ccda;
        }
        Ok(self)
    }

    /// Loads `path` (or the built-in mappings) and compiles it.
    pub fn load(path: Option<&str>) -> Result<MappingSet> {
        let config = match path {
            Some(path) => {
                tracing::info!("📁 Loading mapping file: {}", path);
                Self::from_file(path)?.with_builtin_fallback()?
            }
            None => Self::builtin()?,
        };
        config.compile()
    }

    pub fn compile(&self) -> Result<MappingSet> {
        let mut categories = Vec::new();
        for (family, config) in [(FormatFamily::Fhir, &self.fhir), (FormatFamily::Ccda, &self.ccda)] {
            let Some(config) = config else { continue };
            validation::validate_unique_names(
                &format!("{}.categories", family),
                config.categories.iter().map(|c| c.name.as_str()),
            )?;
            for category in &config.categories {
                categories.push(category.compile(family)?);
            }
        }
        Ok(MappingSet::new(categories))
    }
}

impl CategoryConfig {
    fn compile(&self, family: FormatFamily) -> Result<CategorySpec> {
        let prefix = format!("{}.categories.{}", family, self.name);
        validation::validate_non_empty_string(&format!("{}.categories.name", family), &self.name)?;
        validation::validate_non_empty_list(&format!("{}.fields", prefix), &self.fields)?;
        validation::validate_unique_names(
            &format!("{}.fields", prefix),
            self.fields.iter().map(|f| f.name.as_str()),
        )?;

        let selector = match (family, &self.resource_type, &self.elements, &self.section_table) {
            (FormatFamily::Fhir, Some(resource_type), None, None) => {
                validation::validate_non_empty_string(&format!("{}.resource_type", prefix), resource_type)?;
                Selector::ResourceType(resource_type.clone())
            }
            (FormatFamily::Ccda, None, Some(elements), None) => {
                validation::validate_non_empty_string(&format!("{}.elements", prefix), elements)?;
                Selector::Elements(elements.clone())
            }
            (FormatFamily::Ccda, None, None, Some(title)) => {
                validation::validate_non_empty_string(&format!("{}.section_table", prefix), title)?;
                Selector::SectionTable(title.clone())
            }
            (FormatFamily::Fhir, ..) => {
                return Err(EtlError::ConfigValidationError {
                    field: prefix,
                    message: "FHIR categories need exactly `resource_type`".to_string(),
                })
            }
            (FormatFamily::Ccda, ..) => {
                return Err(EtlError::ConfigValidationError {
                    field: prefix,
                    message: "CCDA categories need exactly one of `elements` or `section_table`"
                        .to_string(),
                })
            }
        };

        let patient_reference = match (family, &self.patient_reference) {
            (FormatFamily::Fhir, Some(path)) => Some(FieldPath::parse(family, path)?),
            (FormatFamily::Fhir, None) => Some(FieldPath::parse(family, "subject.reference")?),
            (FormatFamily::Ccda, Some(_)) => {
                return Err(EtlError::ConfigValidationError {
                    field: format!("{}.patient_reference", prefix),
                    message: "only FHIR categories resolve patients by reference".to_string(),
                })
            }
            (FormatFamily::Ccda, None) => None,
        };

        if let Some(sort_by) = &self.sort_by {
            if !self.fields.iter().any(|f| &f.name == sort_by) {
                return Err(EtlError::InvalidConfigValueError {
                    field: format!("{}.sort_by", prefix),
                    value: sort_by.clone(),
                    reason: "not a field of this category".to_string(),
                });
            }
        }

        let fields = self
            .fields
            .iter()
            .map(|field| field.compile(family, &prefix))
            .collect::<Result<Vec<_>>>()?;

        Ok(CategorySpec {
            name: self.name.clone(),
            family,
            selector,
            patient_reference,
            sort_by: self.sort_by.clone(),
            fields,
        })
    }
}

impl FieldConfig {
    fn compile(&self, family: FormatFamily, prefix: &str) -> Result<FieldSpec> {
        let field = format!("{}.fields.{}", prefix, self.name);
        validation::validate_non_empty_string(&format!("{}.fields.name", prefix), &self.name)?;

        let source = match (&self.path, &self.value) {
            (Some(paths), None) => {
                let paths = paths.as_slice();
                validation::validate_non_empty_list(&format!("{}.path", field), paths)?;
                let compiled = paths
                    .iter()
                    .map(|p| FieldPath::parse(family, p))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| EtlError::ConfigValidationError {
                        field: format!("{}.path", field),
                        message: e.to_string(),
                    })?;
                FieldSource::Paths(compiled)
            }
            (None, Some(value)) => FieldSource::Constant(value.clone()),
            _ => {
                return Err(EtlError::ConfigValidationError {
                    field,
                    message: "set exactly one of `path` or `value`".to_string(),
                })
            }
        };

        Ok(FieldSpec {
            name: self.name.clone(),
            source,
            scope: self.scope.unwrap_or_default(),
            transform: self.transform,
            required: self.required.unwrap_or(false),
            separator: self
                .separator
                .clone()
                .unwrap_or_else(|| DEFAULT_SEPARATOR.to_string()),
        })
    }
}

impl Validate for MappingConfig {
    fn validate(&self) -> Result<()> {
        self.compile().map(|_| ())
    }
}
