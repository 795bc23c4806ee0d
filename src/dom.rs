//! SVG DOM - Owned Element Tree
//!
//! Both parsers (strict XML and lenient markup) produce the same owned tree,
//! which can be edited freely and serialized back deterministically.

use std::borrow::Cow;
use std::fmt;

use roxmltree::{Document, ParsingOptions};
use thiserror::Error;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Markup parse error: {0}")]
    Markup(String),
}

/// Qualified name as written in the markup (`xlink:href`, `rect`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(local: impl Into<String>) -> Self {
        Self { prefix: None, local: local.into() }
    }

    pub fn prefixed(prefix: impl Into<String>, local: impl Into<String>) -> Self {
        Self { prefix: Some(prefix.into()), local: local.into() }
    }

    /// Split a raw `prefix:local` name.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((prefix, local)) if !prefix.is_empty() && !local.is_empty() => {
                Self::prefixed(prefix, local)
            }
            _ => Self::new(raw),
        }
    }

    pub fn is_namespace_decl(&self) -> bool {
        match self.prefix.as_deref() {
            Some(prefix) => prefix == "xmlns",
            None => self.local == "xmlns",
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => f.write_str(&self.local),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: QName) -> Self {
        Self { name, attributes: vec![], children: vec![] }
    }

    pub fn local_name(&self) -> &str {
        &self.name.local
    }

    /// Unprefixed attribute lookup.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.prefix.is_none() && a.name.local == local)
            .map(|a| a.value.as_str())
    }

    /// Unprefixed attribute lookup ignoring ASCII case (`viewBox` vs `viewbox`).
    pub fn attr_ignore_case(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.prefix.is_none() && a.name.local.eq_ignore_ascii_case(local))
            .map(|a| a.value.as_str())
    }

    pub fn set_attr(&mut self, local: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|a| a.name.prefix.is_none() && a.name.local == local)
        {
            Some(existing) => existing.value = value,
            None => self.attributes.push(Attribute { name: QName::new(local), value }),
        }
    }

    pub fn remove_attr(&mut self, local: &str) -> Option<String> {
        let index = self
            .attributes
            .iter()
            .position(|a| a.name.prefix.is_none() && a.name.local == local)?;
        Some(self.attributes.remove(index).value)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Pre-order walk over this element and all descendant elements.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Element)) {
        visit(self);
        for child in self.child_elements() {
            child.walk(visit);
        }
    }

    /// Mutable pre-order walk, same order as [`Element::walk`].
    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut Element)) {
        visit(self);
        for child in self.children.iter_mut() {
            if let Node::Element(e) = child {
                e.walk_mut(visit);
            }
        }
    }

    /// First element (self included) in document order matching `pred`.
    pub fn find(&self, pred: &impl Fn(&Element) -> bool) -> Option<&Element> {
        if pred(self) {
            return Some(self);
        }
        self.child_elements().find_map(|c| c.find(pred))
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Replace every child with a single text node.
    pub fn set_text(&mut self, content: &str) {
        self.children.clear();
        if !content.is_empty() {
            self.children.push(Node::Text(content.to_string()));
        }
    }

    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        self.write_markup(&mut out);
        out
    }

    fn write_markup(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name.to_string());
        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.name.to_string());
            out.push_str("=\"");
            escape_attr(&attr.value, out);
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Text(t) => escape_text(t, out),
                Node::Element(e) => e.write_markup(out),
            }
        }
        out.push_str("</");
        out.push_str(&self.name.to_string());
        out.push('>');
    }
}

// `=` is escaped in text and attribute values alike, so a literal `=` in
// serialized output only ever follows an attribute name.
fn escape_text(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '=' => out.push_str("&#61;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

// Whitespace is escaped so attribute-value normalization on reparse is a no-op.
fn escape_attr(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '=' => out.push_str("&#61;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

// --- Strict XML ---

/// Parse well-formed XML. DTDs are rejected outright, so no entity is ever
/// expanded or fetched.
pub fn parse_strict(markup: &str) -> Result<Element, ParseError> {
    let options = ParsingOptions {
        allow_dtd: false,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(markup, options)?;
    Ok(build_strict(doc.root_element()))
}

fn build_strict(node: roxmltree::Node<'_, '_>) -> Element {
    let tag = node.tag_name();
    let mut element = Element::new(qualify(node, tag.namespace(), tag.name(), true));

    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|p| p.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    for ns in node.namespaces() {
        if ns.name() == Some("xml") || inherited.contains(&(ns.name(), ns.uri())) {
            continue;
        }
        let name = match ns.name() {
            Some(prefix) => QName::prefixed("xmlns", prefix),
            None => QName::new("xmlns"),
        };
        element.attributes.push(Attribute { name, value: ns.uri().to_string() });
    }

    for attr in node.attributes() {
        element.attributes.push(Attribute {
            name: qualify(node, attr.namespace(), attr.name(), false),
            value: attr.value().to_string(),
        });
    }

    for child in node.children() {
        if child.is_element() {
            element.children.push(Node::Element(build_strict(child)));
        } else if child.is_text() {
            if let Some(text) = child.text() {
                element.children.push(Node::Text(text.to_string()));
            }
        }
    }

    element
}

fn qualify(
    node: roxmltree::Node<'_, '_>,
    namespace: Option<&str>,
    local: &str,
    allow_default: bool,
) -> QName {
    let prefix = match namespace {
        None => None,
        Some(XML_NS) => Some("xml".to_string()),
        Some(uri) => {
            let is_default = allow_default
                && node.namespaces().any(|ns| ns.uri() == uri && ns.name().is_none());
            if is_default {
                None
            } else {
                node.namespaces()
                    .filter(|ns| ns.uri() == uri)
                    .find_map(|ns| ns.name())
                    .map(str::to_string)
            }
        }
    };
    QName { prefix, local: local.to_string() }
}

// --- Lenient markup ---

/// Parse arbitrary markup in HTML mode and return the first `svg` element.
/// Names that use an undeclared namespace prefix are dropped.
pub fn parse_lenient_svg(markup: &str) -> Result<Option<Element>, ParseError> {
    let dom = tl::parse(markup, tl::ParserOptions::default())
        .map_err(|e| ParseError::Markup(format!("{e:?}")))?;
    let parser = dom.parser();

    for handle in dom.children() {
        if let Some(tag) = find_svg_tag(*handle, parser) {
            return Ok(build_lenient(tag, parser, &[]));
        }
    }
    Ok(None)
}

fn find_svg_tag<'p, 'buf>(
    handle: tl::NodeHandle,
    parser: &'p tl::Parser<'buf>,
) -> Option<&'p tl::HTMLTag<'buf>> {
    let tl::Node::Tag(tag) = handle.get(parser)? else {
        return None;
    };
    if QName::parse(&tag.name().as_utf8_str()).local.eq_ignore_ascii_case("svg") {
        return Some(tag);
    }
    for child in tag.children().top().iter() {
        if let Some(found) = find_svg_tag(*child, parser) {
            return Some(found);
        }
    }
    None
}

fn build_lenient(
    tag: &tl::HTMLTag<'_>,
    parser: &tl::Parser<'_>,
    scope: &[String],
) -> Option<Element> {
    let mut declared = scope.to_vec();
    let mut attributes: Vec<Attribute> = vec![];

    for (key, value) in tag.attributes().iter() {
        let key_str: &str = key.as_ref();
        let name = QName::parse(key_str);
        if attributes.iter().any(|a| a.name == name) {
            continue;
        }
        if name.prefix.as_deref() == Some("xmlns") {
            declared.push(name.local.clone());
        }
        let value = value.map(|v| unescape(&v).into_owned()).unwrap_or_default();
        attributes.push(Attribute { name, value });
    }
    if let Some(id) = tag.attributes().id() {
        if !attributes.iter().any(|a| a.name == QName::new("id")) {
            let id = unescape(&id.as_utf8_str()).into_owned();
            attributes.push(Attribute { name: QName::new("id"), value: id });
        }
    }

    let name = QName::parse(&tag.name().as_utf8_str());
    if let Some(prefix) = &name.prefix {
        if !is_declared(prefix, &declared) {
            return None;
        }
    }
    attributes.retain(|a| match a.name.prefix.as_deref() {
        None | Some("xmlns") | Some("xml") => true,
        Some(prefix) => is_declared(prefix, &declared),
    });
    // Attribute storage order is not guaranteed by the markup parser.
    attributes.sort_by_key(|a| (!a.name.is_namespace_decl(), a.name.to_string()));

    let mut element = Element { name, attributes, children: vec![] };
    for child in tag.children().top().iter() {
        match child.get(parser) {
            Some(tl::Node::Tag(child_tag)) => {
                if let Some(e) = build_lenient(child_tag, parser, &declared) {
                    element.children.push(Node::Element(e));
                }
            }
            Some(tl::Node::Raw(bytes)) => {
                let text = unescape(&bytes.as_utf8_str()).into_owned();
                if !text.is_empty() {
                    element.children.push(Node::Text(text));
                }
            }
            _ => {}
        }
    }
    Some(element)
}

fn is_declared(prefix: &str, declared: &[String]) -> bool {
    prefix == "xml" || declared.iter().any(|d| d == prefix)
}

fn unescape(s: &str) -> Cow<'_, str> {
    if s.contains('&') {
        Cow::Owned(htmlize::unescape(s).into_owned())
    } else {
        Cow::Borrowed(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_roundtrip_is_stable() {
        let src = r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" viewBox="0 0 10 10"><g><text x="1" title="a&#10;b">Hi &amp; bye</text><rect width="2"/></g></svg>"#;
        let first = parse_strict(src).unwrap().to_markup();
        let second = parse_strict(&first).unwrap().to_markup();
        assert_eq!(first, second);
        assert!(first.contains(r#"xmlns="http://www.w3.org/2000/svg""#));
        assert!(first.contains(r#"xmlns:xlink="http://www.w3.org/1999/xlink""#));
        assert!(first.contains("Hi &amp; bye"));
        assert!(first.contains("a&#10;b"));
    }

    #[test]
    fn strict_rejects_doctype() {
        let src = r#"<!DOCTYPE svg [<!ENTITY x SYSTEM "file:///etc/passwd">]><svg>&x;</svg>"#;
        assert!(parse_strict(src).is_err());
    }

    #[test]
    fn prefixed_attributes_keep_their_prefix() {
        let src = r#"<svg xmlns:xlink="http://www.w3.org/1999/xlink"><a xlink:title="t"/></svg>"#;
        let root = parse_strict(src).unwrap();
        let a = root.child_elements().next().unwrap();
        assert_eq!(a.attributes[0].name.to_string(), "xlink:title");
    }

    #[test]
    fn walk_visits_in_document_order() {
        let root = parse_strict("<svg><g><text/></g><text/></svg>").unwrap();
        let mut names = vec![];
        root.walk(&mut |e| names.push(e.local_name().to_string()));
        assert_eq!(names, ["svg", "g", "text", "text"]);
    }

    #[test]
    fn lenient_finds_nested_svg() {
        let src = "<html><body><p>x</p><svg viewBox=\"0 0 5 5\"><rect width=\"5\"></rect></svg></body></html>";
        let svg = parse_lenient_svg(src).unwrap().unwrap();
        assert!(svg.local_name().eq_ignore_ascii_case("svg"));
        assert_eq!(svg.child_elements().count(), 1);
    }

    #[test]
    fn set_text_clears_children() {
        let mut root = parse_strict("<text>a<tspan>b</tspan></text>").unwrap();
        assert_eq!(root.text_content(), "ab");
        root.set_text("c < d");
        assert_eq!(root.to_markup(), "<text>c &lt; d</text>");
        root.set_text("");
        assert_eq!(root.to_markup(), "<text/>");
    }
}
