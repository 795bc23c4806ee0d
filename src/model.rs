//! Design Model - Views, Layers, Designs

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewName {
    Front,
    Back,
    Left,
    Right,
}

impl ViewName {
    pub const ALL: [ViewName; 4] = [ViewName::Front, ViewName::Back, ViewName::Left, ViewName::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewName::Front => "front",
            ViewName::Back => "back",
            ViewName::Left => "left",
            ViewName::Right => "right",
        }
    }
}

impl Default for ViewName {
    fn default() -> Self {
        ViewName::Front
    }
}

impl fmt::Display for ViewName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ViewName::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown view: {s}"))
    }
}

pub type DesignId = String;
pub type TemplateId = String;

pub fn generate_design_id() -> DesignId {
    format!("design-{}", Uuid::new_v4())
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn fresh() -> Self {
        Self(format!("layer-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LayerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Placement of a layer on the canvas. Angle is in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    pub left: f64,
    pub top: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub angle: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self { left: 0.0, top: 0.0, scale_x: 1.0, scale_y: 1.0, angle: 0.0 }
    }
}

impl Transform {
    pub fn at(left: f64, top: f64) -> Self {
        Self { left, top, ..Self::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Svg,
    Image,
    Text,
}

/// Text styling carried by a text layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    pub text: String,
    pub font_family: String,
    pub font_size: f64,
    pub fill: String,
}

impl TextStyle {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font_family: "Arial".to_string(),
            font_size: 24.0,
            fill: "#000000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerPayload {
    Svg { svg_content: String },
    Image { src: String },
    Text(TextStyle),
}

impl LayerPayload {
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerPayload::Svg { .. } => LayerKind::Svg,
            LayerPayload::Image { .. } => LayerKind::Image,
            LayerPayload::Text(_) => LayerKind::Text,
        }
    }
}

/// A user-added asset in one view. Index 0 of a view's stack sits directly
/// above the template.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub id: LayerId,
    pub transform: Transform,
    pub payload: LayerPayload,
}

impl Layer {
    pub fn new(payload: LayerPayload, transform: Transform) -> Self {
        Self { id: LayerId::fresh(), transform, payload }
    }

    pub fn kind(&self) -> LayerKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    pub id: DesignId,
    pub template_id: TemplateId,
    pub current_view: ViewName,
    views: BTreeMap<ViewName, Vec<Layer>>,
}

impl Design {
    pub fn new(id: impl Into<DesignId>, template_id: impl Into<TemplateId>) -> Self {
        Self {
            id: id.into(),
            template_id: template_id.into(),
            current_view: ViewName::Front,
            views: ViewName::ALL.into_iter().map(|v| (v, vec![])).collect(),
        }
    }

    pub fn with_generated_id(template_id: impl Into<TemplateId>) -> Self {
        Self::new(generate_design_id(), template_id)
    }

    /// Bottom-to-top layer stack of a view.
    pub fn layers(&self, view: ViewName) -> &[Layer] {
        self.views.get(&view).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_layers(&mut self, view: ViewName, layers: Vec<Layer>) {
        self.views.insert(view, layers);
    }

    pub fn views(&self) -> impl Iterator<Item = (ViewName, &[Layer])> {
        ViewName::ALL.into_iter().map(move |v| (v, self.layers(v)))
    }

    pub fn layer_count(&self) -> usize {
        self.views.values().map(Vec::len).sum()
    }

    pub fn contains_layer(&self, id: &LayerId) -> bool {
        self.views.values().flatten().any(|l| &l.id == id)
    }

    /// First id that appears more than once across all views.
    pub fn duplicate_layer_id(&self) -> Option<&LayerId> {
        let mut seen = HashSet::new();
        self.views.values().flatten().map(|l| &l.id).find(|id| !seen.insert(*id))
    }

    pub fn clear(&mut self) {
        for layers in self.views.values_mut() {
            layers.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_name_parse() {
        assert_eq!("Back".parse::<ViewName>().unwrap(), ViewName::Back);
        assert!("top".parse::<ViewName>().is_err());
        assert_eq!(serde_json::to_string(&ViewName::Left).unwrap(), r#""left""#);
    }

    #[test]
    fn test_new_design_has_all_views_empty() {
        let design = Design::new("d1", "t1");
        assert_eq!(design.views().count(), 4);
        assert_eq!(design.layer_count(), 0);
        assert_eq!(design.current_view, ViewName::Front);
    }

    #[test]
    fn test_duplicate_detection_spans_views() {
        let mut design = Design::new("d1", "t1");
        let layer = Layer::new(LayerPayload::Image { src: "a.png".into() }, Transform::default());
        design.set_layers(ViewName::Front, vec![layer.clone()]);
        assert!(design.duplicate_layer_id().is_none());
        design.set_layers(ViewName::Back, vec![layer.clone()]);
        assert_eq!(design.duplicate_layer_id(), Some(&layer.id));
    }

    #[test]
    fn test_fresh_layer_ids_differ() {
        assert_ne!(LayerId::fresh(), LayerId::fresh());
    }
}
