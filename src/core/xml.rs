use crate::utils::error::{EtlError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// Element of a parsed XML tree. Names are local names with the namespace prefix stripped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    pub fn children_named(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        let name = name.to_string();
        self.elements().filter(move |element| element.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|element| element.name == name)
    }

    /// First descendant with the given name, depth-first, excluding `self`.
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        for element in self.elements() {
            if element.name == name {
                return Some(element);
            }
            if let Some(found) = element.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// Every descendant with the given name, depth-first.
    pub fn find_all(&self, name: &str) -> Vec<&XmlElement> {
        let mut found = Vec::new();
        self.collect_all(name, &mut found);
        found
    }

    fn collect_all<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        for element in self.elements() {
            if element.name == name {
                found.push(element);
            }
            element.collect_all(name, found);
        }
    }

    /// Every descendant with the given name that is not itself inside a match.
    pub fn find_all_outermost(&self, name: &str) -> Vec<&XmlElement> {
        let mut found = Vec::new();
        self.collect_outermost(name, &mut found);
        found
    }

    fn collect_outermost<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        for element in self.elements() {
            if element.name == name {
                found.push(element);
            } else {
                element.collect_outermost(name, found);
            }
        }
    }

    /// Descendant text, each piece trimmed, joined by single spaces.
    pub fn text(&self) -> String {
        let mut pieces = Vec::new();
        self.collect_text(&mut pieces);
        pieces.join(" ")
    }

    fn collect_text<'a>(&'a self, pieces: &mut Vec<&'a str>) {
        for node in &self.children {
            match node {
                XmlNode::Text(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        pieces.push(text);
                    }
                }
                XmlNode::Element(element) => element.collect_text(pieces),
            }
        }
    }
}

fn parse_error(document: &str, message: String) -> EtlError {
    EtlError::ParseError {
        document: document.to_string(),
        message,
    }
}

fn start_element(document: &str, start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();

    for attribute in start.attributes() {
        let attribute = attribute
            .map_err(|e| parse_error(document, format!("invalid attribute in <{}>: {}", name, e)))?;
        let raw_key = attribute.key.as_ref();
        if raw_key == b"xmlns" || raw_key.starts_with(b"xmlns:") {
            continue;
        }
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| parse_error(document, format!("invalid value for '{}': {}", key, e)))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(XmlElement {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn attach(
    document: &str,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlNode::Element(element));
        return Ok(());
    }
    if root.is_some() {
        return Err(parse_error(
            document,
            format!("unexpected element <{}> after the root element", element.name),
        ));
    }
    *root = Some(element);
    Ok(())
}

/// Builds an element tree; truncated or unbalanced markup is a parse error.
pub fn parse_xml(document: &str, content: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                if root.is_some() {
                    return Err(parse_error(
                        document,
                        format!(
                            "unexpected content after the root element at byte {}",
                            reader.buffer_position()
                        ),
                    ));
                }
                stack.push(start_element(document, &start)?);
            }
            Ok(Event::Empty(start)) => {
                let element = start_element(document, &start)?;
                attach(document, &mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(|| {
                    parse_error(
                        document,
                        format!("unmatched end tag at byte {}", reader.buffer_position()),
                    )
                })?;
                attach(document, &mut stack, &mut root, element)?;
            }
            Ok(Event::Text(text)) => {
                let text = text
                    .unescape()
                    .map_err(|e| parse_error(document, format!("invalid text: {}", e)))?;
                if text.trim().is_empty() {
                    continue;
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XmlNode::Text(text.into_owned())),
                    None => {
                        return Err(parse_error(
                            document,
                            format!(
                                "text outside the root element at byte {}",
                                reader.buffer_position()
                            ),
                        ))
                    }
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    parent.children.push(XmlNode::Text(text));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(parse_error(
                    document,
                    format!("{} at byte {}", e, reader.buffer_position()),
                ))
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(parse_error(
            document,
            format!("unexpected end of document: <{}> is not closed", open.name),
        ));
    }

    root.ok_or_else(|| parse_error(document, "document has no root element".to_string()))
}

/// Rewrites a FHIR XML resource into the shape of its FHIR JSON counterpart.
pub fn fhir_xml_to_json(resource: &XmlElement) -> Value {
    let mut object = Map::new();
    object.insert(
        "resourceType".to_string(),
        Value::String(resource.name.clone()),
    );
    insert_children(resource, &mut object);
    Value::Object(object)
}

fn element_to_json(element: &XmlElement) -> Value {
    match element.name.as_str() {
        "div" => return Value::String(element.text()),
        "resource" | "contained" => {
            if let Some(inner) = element.elements().next() {
                return fhir_xml_to_json(inner);
            }
        }
        _ => {}
    }

    if let Some(value) = element.attribute("value") {
        return Value::String(value.to_string());
    }

    let mut object = Map::new();
    for (key, value) in &element.attributes {
        object.insert(key.clone(), Value::String(value.clone()));
    }
    insert_children(element, &mut object);
    Value::Object(object)
}

fn insert_children(element: &XmlElement, object: &mut Map<String, Value>) {
    for child in element.elements() {
        let value = element_to_json(child);
        match object.get_mut(&child.name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                object.insert(child.name.clone(), value);
            }
        }
    }
}
