//! Minimal XML element model used by the projection.
//!
//! Only elements and attributes are kept. Text, comments, and processing
//! instructions are dropped on read, and the writer never emits them.

use crate::error::{Error, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    pub name: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing an existing one of the same name in place.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        match self.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// First child element called `name`.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn push(&mut self, child: XmlElement) {
        self.children.push(child);
    }

    /// Whether `name` appears as a child element or an attribute.
    pub fn has(&self, name: &str) -> bool {
        self.child(name).is_some() || self.attribute(name).is_some()
    }

    /// Parse a document and return its root element.
    pub fn parse(text: &str) -> Result<XmlElement> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root = None;
        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(start) => stack.push(element_from(&start)?),
                Event::Empty(start) => attach(&mut stack, &mut root, element_from(&start)?)?,
                Event::End(_) => {
                    let done = stack
                        .pop()
                        .ok_or_else(|| Error::Xml("closing tag without an open element".into()))?;
                    attach(&mut stack, &mut root, done)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }
        if let Some(open) = stack.last() {
            return Err(Error::Xml(format!("element <{}> is never closed", open.name)));
        }
        root.ok_or_else(|| Error::Xml("document has no root element".into()))
    }

    /// Serialize with an XML declaration and two-space indentation.
    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_error)?;
        self.write(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(xml_error)
    }

    fn write(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (k, v) in &self.attributes {
            start.push_attribute((k.as_str(), v.as_str()));
        }
        if self.children.is_empty() {
            writer.write_event(Event::Empty(start)).map_err(xml_error)?;
            return Ok(());
        }
        writer.write_event(Event::Start(start)).map_err(xml_error)?;
        for child in &self.children {
            child.write(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(xml_error)?;
        Ok(())
    }
}

fn xml_error(e: impl Display) -> Error {
    Error::Xml(e.to_string())
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = std::str::from_utf8(start.name().as_ref()).map_err(xml_error)?.to_string();
    let mut element = XmlElement::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(xml_error)?.to_string();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(Error::Xml("document has more than one root element".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_elements() {
        let doc = XmlElement::parse(r#"<root a="1"><d a="2"><d a="3"/></d><x/></root>"#).unwrap();
        assert_eq!(doc.name, "root");
        assert_eq!(doc.attribute("a"), Some("1"));
        let d = doc.child("d").unwrap();
        assert_eq!(d.attribute("a"), Some("2"));
        assert_eq!(d.child("d").unwrap().attribute("a"), Some("3"));
        assert!(doc.has("x"));
        assert!(doc.has("a"));
        assert!(!doc.has("y"));
    }

    #[test]
    fn test_write_and_read_back() {
        let mut root = XmlElement::new("root");
        root.set_attribute("name", "a<b & \"c\"");
        root.set_attribute("name", "a<b & \"c\"");
        let mut item = XmlElement::new("item");
        item.set_attribute("value", "1");
        root.push(item.clone());
        root.push(item);
        let text = root.to_xml_string().unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        let back = XmlElement::parse(&text).unwrap();
        assert_eq!(back, root);
        assert_eq!(back.children_named("item").count(), 2);
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(XmlElement::parse(""), Err(Error::Xml(_))));
        assert!(matches!(XmlElement::parse("<a><b></a>"), Err(Error::Xml(_))));
        assert!(matches!(XmlElement::parse("<a/><b/>"), Err(Error::Xml(_))));
        assert!(matches!(XmlElement::parse("<a>"), Err(Error::Xml(_))));
    }
}
