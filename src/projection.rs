//! XML projection of a tree.
//!
//! Scalars become attributes named by their key, or `value` when they stand in
//! for a whole element (sequence items, the root). Structs become child
//! elements and sequences become one child element per item, named by the
//! sequence key. Conditionals and switches contribute their active branch under
//! the branch name. Constants and rebuild fields are left out, since `build`
//! regenerates them.

use crate::error::{Error, Result};
use crate::tree::{Kind, NodeId, Tree};
use crate::value::{from_hex, to_hex, Value};
use crate::xml::XmlElement;

/// Attribute name for a scalar that is the whole element.
const VALUE_ATTR: &str = "value";
/// Element name for items of a sequence that is itself the element.
const ITEM_ELEMENT: &str = "item";

impl Tree {
    /// Export the tree under a root element called `root_name`.
    pub fn build_xml(&self, root_name: &str) -> Result<XmlElement> {
        let mut root = XmlElement::new(root_name);
        self.export(self.root(), None, &mut root)?;
        Ok(root)
    }

    /// Replace the tree's content with the projection in `root`.
    ///
    /// Sequences are resized to the number of matching elements, and lazy nodes
    /// are instantiated. A switch selects the first case whose name is present,
    /// or failing that the first case that exports nothing.
    pub fn parse_xml(&mut self, root: &XmlElement) -> Result<()> {
        let id = self.root();
        self.import(id, None, root)
    }

    /// `name` is the node's key in `into`; `None` means the node is `into` itself.
    fn export(&self, id: NodeId, name: Option<&str>, into: &mut XmlElement) -> Result<()> {
        let attr = name.unwrap_or(VALUE_ATTR);
        match &self.slot(id)?.kind {
            Kind::Number { value, .. } => into.set_attribute(attr, value.to_text()),
            Kind::Enum { variants, value, .. } => {
                let label = value
                    .as_i128()
                    .and_then(|v| variants.iter().find(|(_, n)| *n == v))
                    .map(|(label, _)| label.clone())
                    .unwrap_or_else(|| value.to_string());
                into.set_attribute(attr, label);
            }
            Kind::Bytes { value, .. } => into.set_attribute(attr, to_hex(value)),
            Kind::CString { value, .. } | Kind::PascalString { value, .. } => into.set_attribute(attr, value.clone()),
            Kind::PaddedString { value, .. } => into.set_attribute(attr, value.trim_end_matches('\0')),
            Kind::Const { .. } | Kind::BytesConst { .. } | Kind::Rebuild { .. } => {}
            Kind::Struct { fields } => match name {
                Some(name) => {
                    let mut element = XmlElement::new(name);
                    for (key, child) in fields {
                        self.export(*child, Some(key.as_str()), &mut element)
                            .map_err(|e| e.at(key))?;
                    }
                    into.push(element);
                }
                None => {
                    for (key, child) in fields {
                        self.export(*child, Some(key.as_str()), into).map_err(|e| e.at(key))?;
                    }
                }
            },
            Kind::Array { items, .. } | Kind::RepeatUntil { items, .. } | Kind::Area { items, .. } => {
                let element_name = name.unwrap_or(ITEM_ELEMENT);
                for (i, item) in items.iter().enumerate() {
                    let mut element = XmlElement::new(element_name);
                    self.export(*item, None, &mut element).map_err(|e| e.at_index(i))?;
                    into.push(element);
                }
            }
            Kind::IfThenElse { then, otherwise, .. } => {
                let active = self.active_branch(id)?;
                let branch = then
                    .iter()
                    .chain(otherwise.iter())
                    .find(|(_, child)| Some(*child) == active);
                if let Some((branch_name, child)) = branch {
                    self.export(*child, Some(branch_name.as_str()), into)?;
                }
            }
            Kind::Switch { cases, selected, .. } => {
                if let Some((index, child)) = selected {
                    let case = cases
                        .get(*index)
                        .ok_or_else(|| Error::Navigation(format!("switch has no case {index}")))?;
                    self.export(*child, Some(case.name.as_str()), into)?;
                }
            }
            Kind::Lazy { child, .. } => {
                if let Some(child) = child {
                    self.export(*child, name, into)?;
                }
            }
            Kind::Pointer { target: child, .. } | Kind::Aligned { child, .. } => self.export(*child, name, into)?,
        }
        Ok(())
    }

    fn import(&mut self, id: NodeId, name: Option<&str>, from: &XmlElement) -> Result<()> {
        let attr = name.unwrap_or(VALUE_ATTR);
        match &self.slot(id)?.kind {
            Kind::Number { ty, .. } => {
                let value = Value::parse_number(required(from, attr)?, ty.kind)?;
                self.assign(id, value)
            }
            Kind::Enum { ty, variants, .. } => {
                let text = required(from, attr)?;
                let value = if variants.iter().any(|(label, _)| label == text) {
                    Value::from(text)
                } else {
                    Value::parse_number(text, ty.kind)?
                };
                self.assign(id, value)
            }
            Kind::Bytes { .. } => {
                let text = required(from, attr)?;
                let bytes = from_hex(text)
                    .ok_or_else(|| Error::Xml(format!("attribute '{attr}' is not hex: '{text}'")))?;
                self.assign(id, Value::Bytes(bytes))
            }
            Kind::CString { .. } | Kind::PaddedString { .. } | Kind::PascalString { .. } => {
                let text = required(from, attr)?;
                self.assign(id, Value::from(text))
            }
            Kind::Const { .. } | Kind::BytesConst { .. } | Kind::Rebuild { .. } => Ok(()),
            Kind::Struct { fields } => {
                let fields: Vec<(String, NodeId)> = fields.iter().map(|(k, v)| (k.clone(), *v)).collect();
                let element = match name {
                    Some(name) => from
                        .child(name)
                        .ok_or_else(|| Error::Xml(format!("<{}> has no element <{name}>", from.name)))?,
                    None => from,
                };
                for (key, child) in fields {
                    self.import(child, Some(key.as_str()), element).map_err(|e| e.at(&key))?;
                }
                Ok(())
            }
            Kind::Array { .. } | Kind::RepeatUntil { .. } | Kind::Area { .. } => {
                let elements: Vec<&XmlElement> = from.children_named(name.unwrap_or(ITEM_ELEMENT)).collect();
                let items = self.init_items_at(id, elements.len())?;
                for (i, (item, element)) in items.into_iter().zip(elements).enumerate() {
                    self.import(item, None, element).map_err(|e| e.at_index(i))?;
                }
                Ok(())
            }
            Kind::IfThenElse { then, otherwise, .. } => {
                let branch = match then {
                    Some((branch_name, child)) if from.has(branch_name) => Some((branch_name.clone(), *child)),
                    _ => otherwise
                        .as_ref()
                        .filter(|(branch_name, _)| from.has(branch_name))
                        .map(|(branch_name, child)| (branch_name.clone(), *child)),
                };
                match branch {
                    Some((branch_name, child)) => self.import(child, Some(branch_name.as_str()), from),
                    None => Ok(()),
                }
            }
            Kind::Switch { cases, .. } => {
                let names: Vec<String> = cases.iter().map(|case| case.name.clone()).collect();
                let index = match names.iter().position(|name| from.has(name)) {
                    Some(index) => index,
                    None => self.silent_case(id, &names, &from.name)?,
                };
                let branch = self.select_case(id, index)?;
                self.import(branch, Some(names[index].as_str()), from)
            }
            Kind::Lazy { .. } => {
                let child = self.refresh_lazy(id)?;
                self.import(child, name, from)
            }
            Kind::Pointer { target: child, .. } | Kind::Aligned { child, .. } => {
                let child = *child;
                self.import(child, name, from)
            }
        }
    }

    /// First case whose default instance exports nothing, so its absence from `element` is expected.
    fn silent_case(&mut self, id: NodeId, names: &[String], element: &str) -> Result<usize> {
        for (index, name) in names.iter().enumerate() {
            let branch = self.select_case(id, index)?;
            let mut scratch = XmlElement::new(element);
            self.export(branch, Some(name.as_str()), &mut scratch)?;
            if scratch.attributes.is_empty() && scratch.children.is_empty() {
                return Ok(index);
            }
        }
        Err(Error::Xml(format!("<{element}> holds none of the switch cases")))
    }
}

fn required<'a>(element: &'a XmlElement, name: &str) -> Result<&'a str> {
    element
        .attribute(name)
        .ok_or_else(|| Error::Xml(format!("<{}> has no attribute '{name}'", element.name)))
}
