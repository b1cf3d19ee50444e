//! ZAPI element tree
//!
//! An owned XML element used both to build ZAPI requests and to walk the
//! parsed `results` of a response.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};

use crate::error::OntapError;

/// One XML element: name, attributes, optional text content and children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ZapiElement {
    name: String,
    attrs: Vec<(String, String)>,
    content: Option<String>,
    children: Vec<ZapiElement>,
}

impl ZapiElement {
    /// Create an empty element
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create an element holding text content
    pub fn with_content(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = Some(content.into());
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    pub fn children(&self) -> &[ZapiElement] {
        &self.children
    }

    /// Append a child element
    pub fn add_child(&mut self, child: ZapiElement) -> &mut Self {
        self.children.push(child);
        self
    }

    /// Append a child holding text content
    pub fn add_new_child(&mut self, name: impl Into<String>, content: impl Into<String>) -> &mut Self {
        self.add_child(ZapiElement::with_content(name, content))
    }

    /// Builder form of [`add_new_child`](Self::add_new_child)
    #[must_use]
    pub fn with_child(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.add_new_child(name, content);
        self
    }

    /// Builder form of [`add_child`](Self::add_child)
    #[must_use]
    pub fn with_element(mut self, child: ZapiElement) -> Self {
        self.add_child(child);
        self
    }

    /// First direct child with the given name
    pub fn child(&self, name: &str) -> Option<&ZapiElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Text content of the first direct child with the given name
    pub fn child_content(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(ZapiElement::content)
    }

    /// Walk a `/`-separated path of child names, e.g.
    /// `"aggr-raid-attributes/raid-size"`.
    pub fn get_path(&self, path: &str) -> Option<&ZapiElement> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Text content at a `/`-separated path
    pub fn path_content(&self, path: &str) -> Option<&str> {
        self.get_path(path).and_then(ZapiElement::content)
    }

    /// Mutable access to the element at `path`, creating missing elements.
    pub fn path_mut(&mut self, path: &str) -> &mut ZapiElement {
        let mut node = self;
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            let index = match node.children.iter().position(|c| c.name == segment) {
                Some(index) => index,
                None => {
                    node.children.push(ZapiElement::new(segment));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[index];
        }
        node
    }

    /// Serialize without an XML declaration
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.content.is_none() && self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        if let Some(content) = &self.content {
            out.push_str(&escape(content.as_str()));
        }
        for child in &self.children {
            child.write_xml(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    /// Parse a document into its root element
    pub fn parse(xml: &str) -> Result<ZapiElement, OntapError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<ZapiElement> = Vec::new();
        let mut root: Option<ZapiElement> = None;

        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(start) => stack.push(element_from_start(&start)?),
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element);
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| OntapError::Xml("unbalanced closing tag".to_string()))?;
                    attach(&mut stack, &mut root, element);
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(xml_error)?;
                    if let Some(current) = stack.last_mut() {
                        current.content.get_or_insert_with(String::new).push_str(&text);
                    }
                }
                Event::CData(data) => {
                    let data = data.into_inner();
                    if let Some(current) = stack.last_mut() {
                        current
                            .content
                            .get_or_insert_with(String::new)
                            .push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(OntapError::Xml(format!("unclosed element <{}>", open.name)));
        }
        root.ok_or_else(|| OntapError::Xml("empty document".to_string()))
    }
}

fn attach(stack: &mut [ZapiElement], root: &mut Option<ZapiElement>, element: ZapiElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<ZapiElement, OntapError> {
    let mut element = ZapiElement::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|e| OntapError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn xml_error(err: quick_xml::Error) -> OntapError {
    OntapError::Xml(err.to_string())
}
