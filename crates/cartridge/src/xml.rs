//! Owned XML tree shared by the manifest model and payload rewriters.
//!
//! Parsing resolves namespace prefixes once and records the resulting
//! [`NamespaceKind`] on every element, so later passes never have to re-derive
//! provenance from tag strings. Whitespace-only text is dropped while parsing
//! and element-only content is indented when writing; the two rules together
//! make `parse(write(tree)) == tree` for every tree this crate produces.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};

use crate::error::CartridgeError;
use crate::manifest::NamespaceKind;

pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    /// Returns the declared prefix when this attribute is an `xmlns` binding.
    /// The default namespace yields `Some(None)`.
    pub fn namespace_declaration(&self) -> Option<Option<&str>> {
        if self.name == "xmlns" {
            Some(None)
        } else {
            self.name.strip_prefix("xmlns:").map(Some)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    /// Qualified name exactly as written (`prefix:local` or `local`).
    pub name: String,
    /// Namespace URI the name resolved to at parse time.
    pub namespace: Option<String>,
    pub kind: NamespaceKind,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            kind: NamespaceKind::Unknown,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.set_text(text);
        self
    }

    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|attr| attr.name == name) {
            Some(existing) => existing.value = value.to_string(),
            None => self.attributes.push(Attribute::new(name, value)),
        }
    }

    /// Direct child elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    /// First direct child with the given local name.
    pub fn child(&self, local: &str) -> Option<&Element> {
        self.elements().find(|el| el.local_name() == local)
    }

    pub fn child_mut(&mut self, local: &str) -> Option<&mut Element> {
        self.elements_mut().find(|el| el.local_name() == local)
    }

    /// First descendant (excluding `self`) with the given local name, in document order.
    pub fn find(&self, local: &str) -> Option<&Element> {
        for child in self.elements() {
            if child.local_name() == local {
                return Some(child);
            }
            if let Some(found) = child.find(local) {
                return Some(found);
            }
        }
        None
    }

    /// Every descendant (excluding `self`) with the given local name, in document order.
    pub fn find_all(&self, local: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        self.collect_descendants(local, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, local: &str, found: &mut Vec<&'a Element>) {
        for child in self.elements() {
            if child.local_name() == local {
                found.push(child);
            }
            child.collect_descendants(local, found);
        }
    }

    /// Visits `self` and every descendant element in document order.
    pub fn walk_mut<F: FnMut(&mut Element)>(&mut self, visit: &mut F) {
        visit(self);
        for child in self.elements_mut() {
            child.walk_mut(visit);
        }
    }

    /// Concatenated text of this element and all descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.push_text(&mut out);
        out
    }

    fn push_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(text) | Node::CData(text) => out.push_str(text),
                Node::Element(el) => el.push_text(out),
                Node::Comment(_) => {}
            }
        }
    }

    /// Replaces all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.children.clear();
        if !text.is_empty() {
            self.children.push(Node::Text(text));
        }
    }

    /// Removes every descendant element matching `predicate`, returning how many
    /// subtrees were dropped. Matching elements are not searched further.
    pub fn remove_descendants<P: Fn(&Element) -> bool>(&mut self, predicate: &P) -> usize {
        let before = self.children.len();
        self.children
            .retain(|node| !matches!(node, Node::Element(el) if predicate(el)));
        let mut removed = before - self.children.len();
        for child in self.elements_mut() {
            removed += child.remove_descendants(predicate);
        }
        removed
    }

    fn has_text_children(&self) -> bool {
        self.children
            .iter()
            .any(|node| matches!(node, Node::Text(_) | Node::CData(_)))
    }
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

/// Root element name and namespace, read without building a full tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootTag {
    pub local: String,
    pub namespace: Option<String>,
}

type Scope = BTreeMap<Option<String>, String>;

/// Parses a complete document and returns its root element.
pub fn parse(bytes: &[u8]) -> Result<Element, CartridgeError> {
    let bytes = strip_bom(bytes);
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut scopes: Vec<Scope> = vec![Scope::new()];
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| xml_error(&reader, err))?;
        match event {
            Event::Start(start) => {
                let (element, scope) = open_element(&start, current_scope(&scopes))?;
                scopes.push(scope);
                stack.push(element);
            }
            Event::Empty(start) => {
                let (element, _) = open_element(&start, current_scope(&scopes))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                scopes.pop();
                let element = stack.pop().ok_or_else(|| {
                    CartridgeError::Xml("closing tag without matching start tag".into())
                })?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map_err(|err| CartridgeError::Xml(err.to_string()))?;
                if !value.trim().is_empty() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(value.into_owned()));
                    }
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    let value = String::from_utf8_lossy(&data).into_owned();
                    parent.children.push(Node::CData(value));
                }
            }
            Event::Comment(comment) => {
                if let Some(parent) = stack.last_mut() {
                    let value = String::from_utf8_lossy(&comment).into_owned();
                    parent.children.push(Node::Comment(value));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(CartridgeError::Xml(format!(
            "unexpected end of document inside <{}>",
            stack.last().map(|el| el.name.as_str()).unwrap_or_default()
        )));
    }
    root.ok_or_else(|| CartridgeError::Xml("document has no root element".into()))
}

/// Reads only as far as the root start tag. Returns `None` for anything that is
/// not well-formed enough to have one.
pub fn sniff_root(bytes: &[u8]) -> Option<RootTag> {
    let mut reader = Reader::from_reader(strip_bom(bytes));
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).ok()? {
            Event::Start(start) | Event::Empty(start) => {
                let (element, _) = open_element(&start, &Scope::new()).ok()?;
                return Some(RootTag {
                    local: element.local_name().to_string(),
                    namespace: element.namespace,
                });
            }
            Event::Eof => return None,
            _ => {}
        }
        buf.clear();
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

fn current_scope(scopes: &[Scope]) -> &Scope {
    static EMPTY: Scope = Scope::new();
    scopes.last().unwrap_or(&EMPTY)
}

fn xml_error(reader: &Reader<&[u8]>, err: quick_xml::Error) -> CartridgeError {
    CartridgeError::Xml(format!("{err} at byte {}", reader.buffer_position()))
}

fn open_element(start: &BytesStart<'_>, parent: &Scope) -> Result<(Element, Scope), CartridgeError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| CartridgeError::Xml(format!("<{name}>: {err}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| CartridgeError::Xml(format!("<{name} {key}>: {err}")))?
            .into_owned();
        attributes.push(Attribute::new(key, value));
    }

    let mut scope = parent.clone();
    for attr in &attributes {
        if let Some(prefix) = attr.namespace_declaration() {
            scope.insert(prefix.map(str::to_string), attr.value.clone());
        }
    }

    let prefix = name.split_once(':').map(|(prefix, _)| prefix.to_string());
    let namespace = scope.get(&prefix).cloned();
    let kind = NamespaceKind::classify(namespace.as_deref());
    Ok((
        Element {
            name,
            namespace,
            kind,
            attributes,
            children: Vec::new(),
        },
        scope,
    ))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), CartridgeError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(CartridgeError::Xml(format!(
            "second root element <{}>",
            element.name
        ))),
    }
}

/// Serializes `root` as a standalone UTF-8 document with an XML declaration.
pub fn write(root: &Element) -> String {
    let mut out = String::from(XML_DECLARATION);
    out.push('\n');
    write_block(&mut out, root, 0);
    out.push('\n');
    out
}

fn write_block(out: &mut String, element: &Element, depth: usize) {
    push_indent(out, depth);
    open_tag(out, element);
    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    if element.has_text_children() {
        for node in &element.children {
            write_inline(out, node);
        }
    } else {
        for node in &element.children {
            out.push('\n');
            match node {
                Node::Element(child) => write_block(out, child, depth + 1),
                other => {
                    push_indent(out, depth + 1);
                    write_inline(out, other);
                }
            }
        }
        out.push('\n');
        push_indent(out, depth);
    }
    close_tag(out, element);
}

fn write_inline(out: &mut String, node: &Node) {
    match node {
        Node::Element(element) => {
            open_tag(out, element);
            if element.children.is_empty() {
                out.push_str("/>");
            } else {
                out.push('>');
                for child in &element.children {
                    write_inline(out, child);
                }
                close_tag(out, element);
            }
        }
        Node::Text(text) => out.push_str(&escape(text.as_str())),
        Node::CData(text) => {
            out.push_str("<![CDATA[");
            out.push_str(&text.replace("]]>", "]]]]><![CDATA[>"));
            out.push_str("]]>");
        }
        Node::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
    }
}

fn open_tag(out: &mut String, element: &Element) {
    out.push('<');
    out.push_str(&element.name);
    for attr in &element.attributes {
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        out.push_str(&escape(attr.value.as_str()));
        out.push('"');
    }
}

fn close_tag(out: &mut String, element: &Element) {
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_resolves_prefixes_against_enclosing_scope() {
        let doc = br#"<?xml version="1.0"?>
<manifest xmlns="http://www.imsglobal.org/xsd/imsccv1p1/imscp_v1p1" xmlns:lom="http://ltsc.ieee.org/xsd/imsccv1p1/LOM/manifest">
  <metadata><lom:lom><lom:general/></lom:lom></metadata>
</manifest>"#;
        let root = parse(doc).unwrap();
        assert_eq!(root.local_name(), "manifest");
        assert_eq!(root.kind, NamespaceKind::Core);

        let lom = root.find("lom").unwrap();
        assert_eq!(lom.prefix(), Some("lom"));
        assert_eq!(lom.kind, NamespaceKind::Metadata);
        assert_eq!(
            lom.namespace.as_deref(),
            Some("http://ltsc.ieee.org/xsd/imsccv1p1/LOM/manifest")
        );
    }

    #[test]
    fn whitespace_only_text_is_dropped_but_content_survives() {
        let root = parse(b"<a>\n  <b> keep me </b>\n  <c/>\n</a>").unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.child("b").unwrap().text_content(), " keep me ");
    }

    #[test]
    fn write_then_parse_is_stable() {
        let source = br#"<root xmlns:x="urn:x" a="1 &amp; 2"><x:item ident="q&lt;1">text &lt;b&gt;</x:item><empty/><![CDATA[raw <data>]]><!-- note --></root>"#;
        let first = parse(source).unwrap();
        let written = write(&first);
        let second = parse(written.as_bytes()).unwrap();
        assert_eq!(first, second);
        assert_eq!(write(&second), written);
    }

    #[test]
    fn sniff_root_reads_default_namespace() {
        let tag = sniff_root(
            br#"<?xml version="1.0"?><questestinterop xmlns="http://www.imsglobal.org/xsd/ims_qtiasiv1p2"><x/></questestinterop>"#,
        )
        .unwrap();
        assert_eq!(tag.local, "questestinterop");
        assert_eq!(
            tag.namespace.as_deref(),
            Some("http://www.imsglobal.org/xsd/ims_qtiasiv1p2")
        );
        assert!(sniff_root(b"not xml at all").is_none());
    }

    #[test]
    fn parse_rejects_mismatched_tags() {
        let err = parse(b"<a><b></a>").expect_err("mismatched end tag");
        assert!(matches!(err, CartridgeError::Xml(_)));
    }

    #[test]
    fn remove_descendants_counts_dropped_subtrees() {
        let mut root = parse(b"<a><variant/><b><variant><variant/></variant></b></a>").unwrap();
        let removed = root.remove_descendants(&|el: &Element| el.local_name() == "variant");
        assert_eq!(removed, 2);
        assert!(root.find("variant").is_none());
    }
}
