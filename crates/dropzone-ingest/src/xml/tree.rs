//! Generic XML element tree, built incrementally from an async byte stream

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tokio::io::AsyncBufRead;

use crate::error::{IngestError, Result};

/// One element of an untyped XML document
///
/// Names are local names: a `ns:invoice` element is stored as `invoice`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    /// Concatenated text and CDATA content directly inside this element
    pub text: String,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// First direct child with the given name
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All direct children with the given name, in document order
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Read a whole document from `source` into a tree
///
/// Bytes are pulled from `source` as parsing proceeds; the caller keeps
/// ownership of the stream and decides when it is dropped.
pub async fn read_tree<R>(source: R) -> Result<XmlElement>
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut open: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event_into_async(&mut buf).await? {
            Event::Start(start) => {
                if open.is_empty() && root.is_some() {
                    return Err(IngestError::MalformedXml(
                        "document has more than one root element".to_string(),
                    ));
                }
                open.push(element_from_start(&start)?);
            },
            Event::Empty(start) => {
                let element = element_from_start(&start)?;
                attach(&mut open, &mut root, element)?;
            },
            Event::End(_) => {
                // End-name mismatches are rejected by the reader itself
                let element = open.pop().ok_or_else(|| {
                    IngestError::MalformedXml("closing tag without an open element".to_string())
                })?;
                attach(&mut open, &mut root, element)?;
            },
            Event::Text(text) => {
                let text = text.unescape()?;
                match open.last_mut() {
                    Some(current) => current.text.push_str(&text),
                    None => {
                        return Err(IngestError::MalformedXml(format!(
                            "text outside the root element: '{}'",
                            text.trim()
                        )))
                    },
                }
            },
            Event::CData(cdata) => {
                if let Some(current) = open.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&cdata.into_inner()));
                }
            },
            Event::Eof => break,
            // Declarations, comments, processing instructions, doctype
            _ => {},
        }
        buf.clear();
    }

    if let Some(unclosed) = open.last() {
        return Err(IngestError::MalformedXml(format!(
            "unexpected end of document inside <{}>",
            unclosed.name
        )));
    }

    root.ok_or_else(|| IngestError::MalformedXml("document has no root element".to_string()))
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.local_name().as_ref()));

    for attr in start.attributes() {
        let attr = attr.map_err(|e| IngestError::MalformedXml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }

    Ok(element)
}

fn attach(
    open: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<()> {
    match open.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_some() => {
            return Err(IngestError::MalformedXml(
                "document has more than one root element".to_string(),
            ))
        },
        None => *root = Some(element),
    }
    Ok(())
}
