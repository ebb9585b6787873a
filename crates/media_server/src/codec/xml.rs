//! Minimal element tree over quick-xml events.
//!
//! Plex answers with attribute-heavy markup where only attributes and nesting
//! matter, so the tree keeps exactly that and drops text nodes.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::errors::MediaServerError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attrs: HashMap<String, String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn from_start(start: &BytesStart<'_>) -> Self {
        let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
        let mut attrs = HashMap::new();
        // a single broken attribute must not take the whole element down
        for attr in start.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = match attr.unescape_value() {
                Ok(v) => v.to_string(),
                Err(_) => String::from_utf8_lossy(&attr.value).to_string(),
            };
            attrs.insert(key, value);
        }
        Element {
            name,
            attrs,
            children: Vec::new(),
        }
    }
}

pub fn parse_document(xml: &str) -> Result<Element, MediaServerError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(Element::from_start(e)),
            Ok(Event::Empty(ref e)) => {
                let element = Element::from_start(e);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => {
                        if root.is_none() {
                            root = Some(element);
                        }
                    }
                }
            }
            Ok(Event::End(_)) => {
                let Some(element) = stack.pop() else {
                    return Err(MediaServerError::decode("unbalanced closing tag"));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => {
                        if root.is_none() {
                            root = Some(element);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(MediaServerError::decode(e)),
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(MediaServerError::decode("unexpected end of document"));
    }
    root.ok_or_else(|| MediaServerError::decode("empty document"))
}
