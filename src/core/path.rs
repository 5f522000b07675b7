use crate::core::xml::XmlElement;
use crate::domain::model::FormatFamily;
use crate::utils::error::{EtlError, Result};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Child { name: String, index: Option<usize> },
    Descendant { name: String, index: Option<usize> },
    Attribute(String),
    Text,
}

/// Compiled element path.
///
/// FHIR paths are `.`-separated (`code.coding[0].code`). CCDA paths are
/// `/`-separated element steps, where an empty step (`//name`) searches all
/// descendants, `@attr` reads an attribute and `text()` reads element text.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    raw: String,
    steps: Vec<Step>,
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn invalid(raw: &str, reason: &str) -> EtlError {
    EtlError::InvalidConfigValueError {
        field: "path".to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_segment(raw: &str, segment: &str) -> Result<(String, Option<usize>)> {
    let (name, index) = match segment.find('[') {
        Some(open) => {
            let close = segment
                .strip_suffix(']')
                .ok_or_else(|| invalid(raw, "unterminated index"))?;
            let index = close[open + 1..]
                .parse::<usize>()
                .map_err(|_| invalid(raw, "index must be a non-negative integer"))?;
            (&segment[..open], Some(index))
        }
        None => (segment, None),
    };

    if name.is_empty() {
        return Err(invalid(raw, "empty element name"));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid(raw, "element names may only contain letters, digits, '_' and '-'"));
    }
    Ok((name.to_string(), index))
}

impl FieldPath {
    pub fn parse(family: FormatFamily, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(invalid(raw, "path cannot be empty"));
        }
        let steps = match family {
            FormatFamily::Fhir => Self::parse_json_steps(raw)?,
            FormatFamily::Ccda => Self::parse_xml_steps(raw)?,
        };
        Ok(Self {
            raw: raw.to_string(),
            steps,
        })
    }

    fn parse_json_steps(raw: &str) -> Result<Vec<Step>> {
        raw.split('.')
            .map(|segment| {
                let (name, index) = parse_segment(raw, segment)?;
                Ok(Step::Child { name, index })
            })
            .collect()
    }

    fn parse_xml_steps(raw: &str) -> Result<Vec<Step>> {
        let segments: Vec<&str> = raw.split('/').collect();
        let mut steps = Vec::new();
        let mut descendant = false;

        for (position, segment) in segments.iter().enumerate() {
            let last = position + 1 == segments.len();
            match *segment {
                "" if last => return Err(invalid(raw, "path cannot end with '/'")),
                "" => descendant = true,
                "." => {}
                "text()" if last => steps.push(Step::Text),
                "text()" => return Err(invalid(raw, "text() must be the last step")),
                attr if attr.starts_with('@') => {
                    if !last {
                        return Err(invalid(raw, "an attribute must be the last step"));
                    }
                    let name = &attr[1..];
                    if name.is_empty() {
                        return Err(invalid(raw, "empty attribute name"));
                    }
                    steps.push(Step::Attribute(name.to_string()));
                }
                segment => {
                    let (name, index) = parse_segment(raw, segment)?;
                    if descendant {
                        steps.push(Step::Descendant { name, index });
                    } else {
                        steps.push(Step::Child { name, index });
                    }
                    descendant = false;
                }
            }
        }

        if descendant {
            return Err(invalid(raw, "'//' must be followed by an element name"));
        }
        Ok(steps)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Walks a JSON tree. Name steps through an array use its first item and
    /// `[0]` on a single value selects the value itself.
    pub fn resolve_json<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for step in &self.steps {
            let (name, index) = match step {
                Step::Child { name, index } | Step::Descendant { name, index } => (name, index),
                Step::Attribute(_) | Step::Text => return None,
            };

            let target = match current {
                Value::Array(items) => items.first()?.get(name.as_str())?,
                other => other.get(name.as_str())?,
            };

            current = match (index, target) {
                (None, value) => value,
                (Some(i), Value::Array(items)) => items.get(*i)?,
                (Some(0), value) => value,
                (Some(_), _) => return None,
            };
        }
        Some(current)
    }

    /// Walks an XML tree; a path ending on an element yields its text.
    pub fn resolve_xml(&self, root: &XmlElement) -> Option<String> {
        let mut current = root;
        for step in &self.steps {
            current = match step {
                Step::Child { name, index } => current
                    .elements()
                    .filter(|element| element.name == *name)
                    .nth(index.unwrap_or(0))?,
                Step::Descendant { name, index } => {
                    *current.find_all(name).get(index.unwrap_or(0))?
                }
                Step::Attribute(name) => return current.attribute(name).map(str::to_string),
                Step::Text => return Some(current.text()),
            };
        }
        Some(current.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::xml::parse_xml;
    use serde_json::json;

    fn fhir(raw: &str) -> FieldPath {
        FieldPath::parse(FormatFamily::Fhir, raw).unwrap()
    }

    fn ccda(raw: &str) -> FieldPath {
        FieldPath::parse(FormatFamily::Ccda, raw).unwrap()
    }

    #[test]
    fn test_parse_json_path() {
        assert_eq!(
            fhir("code.coding[1].code").steps(),
            &[
                Step::Child { name: "code".to_string(), index: None },
                Step::Child { name: "coding".to_string(), index: Some(1) },
                Step::Child { name: "code".to_string(), index: None },
            ]
        );
    }

    #[test]
    fn test_parse_xml_path() {
        assert_eq!(
            ccda("//patientRole/patient/administrativeGenderCode/@code").steps(),
            &[
                Step::Descendant { name: "patientRole".to_string(), index: None },
                Step::Child { name: "patient".to_string(), index: None },
                Step::Child { name: "administrativeGenderCode".to_string(), index: None },
                Step::Attribute("code".to_string()),
            ]
        );
        assert_eq!(ccda("td[2]/text()").steps().len(), 2);
    }

    #[test]
    fn test_invalid_paths() {
        assert!(FieldPath::parse(FormatFamily::Fhir, "").is_err());
        assert!(FieldPath::parse(FormatFamily::Fhir, "code..text").is_err());
        assert!(FieldPath::parse(FormatFamily::Fhir, "coding[x]").is_err());
        assert!(FieldPath::parse(FormatFamily::Fhir, "coding[0").is_err());
        assert!(FieldPath::parse(FormatFamily::Ccda, "value/").is_err());
        assert!(FieldPath::parse(FormatFamily::Ccda, "@code/value").is_err());
        assert!(FieldPath::parse(FormatFamily::Ccda, "text()/value").is_err());
    }

    #[test]
    fn test_resolve_json() {
        let resource = json!({
            "code": {"coding": [{"code": "a"}, {"code": "b"}], "text": "Glucose"},
            "category": [{"coding": [{"display": "Laboratory"}]}],
            "valueQuantity": {"value": 6.3}
        });

        assert_eq!(fhir("code.coding[1].code").resolve_json(&resource), Some(&json!("b")));
        assert_eq!(fhir("code.coding.code").resolve_json(&resource), Some(&json!("a")));
        assert_eq!(
            fhir("category[0].coding[0].display").resolve_json(&resource),
            Some(&json!("Laboratory"))
        );
        assert_eq!(fhir("code.text[0]").resolve_json(&resource), Some(&json!("Glucose")));
        assert_eq!(fhir("code.coding[5].code").resolve_json(&resource), None);
        assert_eq!(fhir("code.text[1]").resolve_json(&resource), None);
        assert_eq!(fhir("valueQuantity.value").resolve_json(&resource), Some(&json!(6.3)));
        assert_eq!(fhir("missing.value").resolve_json(&resource), None);
    }

    #[test]
    fn test_resolve_xml() {
        let root = parse_xml(
            "x.xml",
            r#"<observation><code code="2345-7" displayName="Glucose"/><value value="95" unit="mg/dL"/><tr><td>a</td><td> b </td></tr></observation>"#,
        )
        .unwrap();

        assert_eq!(ccda("code/@displayName").resolve_xml(&root).as_deref(), Some("Glucose"));
        assert_eq!(ccda("value/@unit").resolve_xml(&root).as_deref(), Some("mg/dL"));
        assert_eq!(ccda("tr/td[1]").resolve_xml(&root).as_deref(), Some("b"));
        assert_eq!(ccda("//td[1]/text()").resolve_xml(&root).as_deref(), Some("b"));
        assert_eq!(ccda("value/@missing").resolve_xml(&root), None);
        assert_eq!(ccda("tr/td[2]").resolve_xml(&root), None);
        assert_eq!(ccda("//tr/td").resolve_xml(&root).as_deref(), Some("a"));
    }
}
