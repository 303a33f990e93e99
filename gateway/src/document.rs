//! Response documents.
//!
//! Backends answer every call with a small XML document rooted at
//! `<response>`, carrying a `<returncode>` of `SUCCESS` or `FAILED` and, on
//! failure, a `<messageKey>` / `<message>` pair. The gateway needs to read
//! these documents, splice fragments of several of them together and render
//! its own, so they are held as a plain element tree rather than typed structs:
//! remote payloads pass through without the gateway knowing their schema.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

pub const ROOT: &str = "response";
pub const RETURN_CODE: &str = "returncode";
pub const MESSAGE_KEY: &str = "messageKey";
pub const MESSAGE: &str = "message";

pub const SUCCESS: &str = "SUCCESS";
pub const FAILED: &str = "FAILED";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DocumentError {
    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("document has no root element")]
    Empty,

    #[error("could not encode document: {0}")]
    Encode(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// `<response><returncode>SUCCESS</returncode></response>`
    pub fn success() -> Self {
        Element::new(ROOT).child_element(Element::with_text(RETURN_CODE, SUCCESS))
    }

    pub fn failure(key: &str, message: &str) -> Self {
        Element::new(ROOT)
            .child_element(Element::with_text(RETURN_CODE, FAILED))
            .child_element(Element::with_text(MESSAGE_KEY, key))
            .child_element(Element::with_text(MESSAGE, message))
    }

    /// Builder-style append.
    pub fn child_element(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn is_success(&self) -> bool {
        self.child_text(RETURN_CODE) == Some(SUCCESS)
    }

    pub fn is_failure(&self) -> bool {
        self.child_text(RETURN_CODE) == Some(FAILED)
    }

    pub fn to_xml(&self) -> Result<Vec<u8>, DocumentError> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(encode_error)?;
        self.write_into(&mut writer)?;
        Ok(writer.into_inner())
    }

    fn write_into(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), DocumentError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.text.is_empty() && self.children.is_empty() {
            return writer.write_event(Event::Empty(start)).map_err(encode_error);
        }

        writer.write_event(Event::Start(start)).map_err(encode_error)?;
        if !self.text.is_empty() {
            writer
                .write_event(Event::Text(BytesText::new(&self.text)))
                .map_err(encode_error)?;
        }
        for child in &self.children {
            child.write_into(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(encode_error)
    }
}

/// Parses a complete document and returns its root element.
pub fn parse(input: &[u8]) -> Result<Element, DocumentError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf).map_err(malformed)? {
            Event::Start(start) => stack.push(open_element(&start)?),
            Event::Empty(start) => {
                let element = open_element(&start)?;
                close_element(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DocumentError::Malformed("unbalanced end tag".into()))?;
                close_element(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&text.unescape().map_err(malformed)?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(DocumentError::Malformed("unclosed element".into()));
    }
    root.ok_or(DocumentError::Empty)
}

fn open_element(start: &BytesStart<'_>) -> Result<Element, DocumentError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(malformed)?
        .to_string();

    let mut element = Element::new(name);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(malformed)?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(malformed)?
            .to_string();
        let value = attribute
            .unescape_value()
            .map_err(malformed)?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn malformed<E: std::fmt::Display>(e: E) -> DocumentError {
    DocumentError::Malformed(e.to_string())
}

fn encode_error<E: std::fmt::Display>(e: E) -> DocumentError {
    DocumentError::Encode(e.to_string())
}

fn close_element(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), DocumentError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(DocumentError::Malformed(
            "multiple root elements".to_string(),
        )),
    }
}
