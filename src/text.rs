//! Text Registry / Mutator
//!
//! The registry numbers `<text>` elements in document order and writes the
//! generated ids back into the tree, so addressing a node by id stays stable
//! across repeated extraction. The mutator re-enters through the registry
//! before applying updates.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dom::{self, Element, ParseError};

const TEXT_TAG: &str = "text";

#[derive(Debug, Error)]
pub enum TextError {
    #[error("Malformed markup: {0}")]
    MalformedInput(#[from] ParseError),

    #[error("No text element matched any of the {requested} requested ids")]
    NoMatchingElements { requested: usize },
}

/// Stable identifier of a text node (`text-0`, or the element's own `id`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextNodeId(String);

impl TextNodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generated(index: usize) -> Self {
        Self(format!("text-{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric ids double as positional indices.
    pub fn as_index(&self) -> Option<usize> {
        self.0.parse().ok()
    }
}

impl From<&str> for TextNodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for TextNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub id: TextNodeId,
    pub content: String,
    pub x: f64,
    pub y: f64,
    pub font_family: Option<String>,
    pub font_size: Option<String>,
    pub fill: Option<String>,
    pub style_map: BTreeMap<String, String>,
}

impl TextNode {
    fn from_element(id: TextNodeId, element: &Element) -> Self {
        let style_map = element.attr("style").map(parse_style).unwrap_or_default();
        // Attribute is the base value, inline style overrides it.
        let resolve = |key: &str| {
            style_map
                .get(key)
                .cloned()
                .or_else(|| element.attr(key).map(str::to_string))
        };
        Self {
            content: element.text_content(),
            x: element.attr("x").map(first_number).unwrap_or(0.0),
            y: element.attr("y").map(first_number).unwrap_or(0.0),
            font_family: resolve("font-family"),
            font_size: resolve("font-size"),
            fill: resolve("fill"),
            id,
            style_map,
        }
    }
}

/// Parse `key: value; key: value` into a map with lowercase keys.
pub fn parse_style(style: &str) -> BTreeMap<String, String> {
    style
        .split(';')
        .filter_map(|decl| decl.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect()
}

fn first_number(raw: &str) -> f64 {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .find(|p| !p.is_empty())
        .and_then(|p| p.parse().ok())
        .unwrap_or(0.0)
}

/// Working tree plus its text nodes, ids already written back.
#[derive(Debug, Clone)]
pub struct TextRegistry {
    root: Element,
    nodes: Vec<TextNode>,
}

impl TextRegistry {
    pub fn from_markup(markup: &str) -> Result<Self, TextError> {
        let mut root = dom::parse_strict(markup)?;
        let nodes = register(&mut root);
        Ok(Self { root, nodes })
    }

    pub fn nodes(&self) -> &[TextNode] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<TextNode> {
        self.nodes
    }

    pub fn get(&self, id: &TextNodeId) -> Option<&TextNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Markup of the working tree, including any ids assigned.
    pub fn markup(&self) -> String {
        self.root.to_markup()
    }

    /// Resolve an id to a position: by id first, then as a numeric index.
    fn position_of(&self, id: &TextNodeId) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| &n.id == id)
            .or_else(|| id.as_index().filter(|i| *i < self.nodes.len()))
    }

    fn apply(&mut self, id: &TextNodeId, content: &str) -> UpdateStatus {
        let Some(index) = self.position_of(id) else {
            return UpdateStatus::NotFound;
        };
        if self.nodes[index].content == content {
            return UpdateStatus::Unchanged;
        }

        let mut seen = 0;
        self.root.walk_mut(&mut |e| {
            if e.local_name() == TEXT_TAG {
                if seen == index {
                    e.set_text(content);
                }
                seen += 1;
            }
        });
        self.nodes[index].content = content.to_string();
        UpdateStatus::Applied
    }
}

/// Shorthand for [`TextRegistry::from_markup`].
pub fn extract_text(markup: &str) -> Result<TextRegistry, TextError> {
    TextRegistry::from_markup(markup)
}

fn register(root: &mut Element) -> Vec<TextNode> {
    let mut taken: HashSet<String> = HashSet::new();
    root.walk(&mut |e| {
        if let Some(id) = e.attr("id") {
            taken.insert(id.to_string());
        }
    });

    let mut nodes = vec![];
    root.walk_mut(&mut |e| {
        if e.local_name() != TEXT_TAG {
            return;
        }
        let index = nodes.len();
        let id = match e.attr("id").filter(|id| !id.is_empty()) {
            Some(existing) => TextNodeId::new(existing),
            None => {
                let id = unique_id(index, &taken);
                taken.insert(id.as_str().to_string());
                e.set_attr("id", id.as_str());
                id
            }
        };
        nodes.push(TextNode::from_element(id, e));
    });
    nodes
}

fn unique_id(index: usize, taken: &HashSet<String>) -> TextNodeId {
    let base = TextNodeId::generated(index);
    if !taken.contains(base.as_str()) {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.contains(&candidate) {
            return TextNodeId::new(candidate);
        }
        n += 1;
    }
}

/// Batch of content updates keyed by text node id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextUpdates(BTreeMap<TextNodeId, String>);

impl TextUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, id: impl Into<TextNodeId>, content: impl Into<String>) -> Self {
        self.0.insert(id.into(), content.into());
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TextNodeId, &String)> {
        self.0.iter()
    }
}

impl FromIterator<(TextNodeId, String)> for TextUpdates {
    fn from_iter<I: IntoIterator<Item = (TextNodeId, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Applied,
    Unchanged,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUpdateReport {
    pub markup: String,
    pub statuses: BTreeMap<TextNodeId, UpdateStatus>,
}

impl TextUpdateReport {
    pub fn status(&self, id: &TextNodeId) -> Option<UpdateStatus> {
        self.statuses.get(id).copied()
    }

    pub fn not_found(&self) -> Vec<&TextNodeId> {
        self.statuses
            .iter()
            .filter(|(_, s)| **s == UpdateStatus::NotFound)
            .map(|(id, _)| id)
            .collect()
    }
}

/// Apply a batch of updates. Fails only when nothing in the batch matched.
pub fn update_text(markup: &str, updates: &TextUpdates) -> Result<TextUpdateReport, TextError> {
    let mut registry = TextRegistry::from_markup(markup)?;

    let statuses: BTreeMap<TextNodeId, UpdateStatus> = updates
        .iter()
        .map(|(id, content)| (id.clone(), registry.apply(id, content)))
        .collect();

    if statuses.values().all(|s| *s == UpdateStatus::NotFound) {
        return Err(TextError::NoMatchingElements { requested: updates.len() });
    }

    debug!(
        requested = updates.len(),
        missed = statuses.values().filter(|s| **s == UpdateStatus::NotFound).count(),
        "applied text updates"
    );

    Ok(TextUpdateReport { markup: registry.markup(), statuses })
}
