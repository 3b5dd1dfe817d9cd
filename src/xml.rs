//! Minimal element tree on top of the `xmlparser` tokenizer.
//!
//! Block maps are small, flat documents, so the whole file is parsed into
//! an owned tree. Entity references are not expanded; none of the values a
//! bmap carries (numbers, hex digests) contain them.

use xmlparser::{ElementEnd, Token, Tokenizer};

use crate::{Result, SimgError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Concatenated character data directly inside this element.
    pub text: String,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }
}

/// Parse `text` and return its root element.
pub fn parse(text: &str) -> Result<Element> {
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    for token in Tokenizer::from(text) {
        match token? {
            Token::ElementStart { local, .. } => {
                if root.is_some() {
                    return Err(SimgError::Xml("content after root element".into()));
                }
                stack.push(Element {
                    name: local.as_str().to_string(),
                    ..Element::default()
                });
            }
            Token::Attribute { local, value, .. } => {
                let current = stack
                    .last_mut()
                    .ok_or_else(|| SimgError::Xml("attribute outside element".into()))?;
                current
                    .attributes
                    .push((local.as_str().to_string(), value.as_str().to_string()));
            }
            Token::ElementEnd { end, .. } => match end {
                ElementEnd::Open => {}
                ElementEnd::Empty => close(&mut stack, &mut root, None)?,
                ElementEnd::Close(_, local) => close(&mut stack, &mut root, Some(local.as_str()))?,
            },
            Token::Text { text } => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(text.as_str());
                }
            }
            Token::Cdata { text, .. } => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(text.as_str());
                }
            }
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(SimgError::Xml("unexpected end of document".into()));
    }
    root.ok_or_else(|| SimgError::Xml("document has no root element".into()))
}

fn close(stack: &mut Vec<Element>, root: &mut Option<Element>, name: Option<&str>) -> Result<()> {
    let element = stack
        .pop()
        .ok_or_else(|| SimgError::Xml("unbalanced closing tag".into()))?;
    if let Some(name) = name {
        if name != element.name {
            return Err(SimgError::Xml(format!(
                "expected </{}>, found </{}>",
                element.name, name
            )));
        }
    }
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
    Ok(())
}
