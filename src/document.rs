//! Design Serializer - Wire Document for Saved Designs
//!
//! `{"currentView": .., "views": {"front": {"elements": [..]}, ..}}`
//!
//! Each element carries its id, transform and a `type`-tagged payload. A
//! metadata-only document omits `svg_content`; merging restores it from the
//! full document by `(view, element id)`.

use std::collections::{BTreeMap, HashMap};

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LimitsConfig;
use crate::model::{
    Design, DesignId, Layer, LayerId, LayerPayload, TemplateId, TextStyle, Transform, ViewName,
};

pub const DESIGN_FORMAT_MAJOR: u64 = 1;

/// Version stamped on every saved record. Loads accept any record with the
/// same major version.
pub fn design_format_version() -> Version {
    Version::new(DESIGN_FORMAT_MAJOR, 0, 0)
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Svg element {id} in view {view} has no content")]
    MissingContent { view: ViewName, id: LayerId },

    #[error("Duplicate layer id: {0}")]
    DuplicateLayerId(LayerId),

    #[error("Design document is {size} bytes, limit is {limit}")]
    SizeLimitExceeded { size: usize, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementPayload {
    Svg {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        svg_content: Option<String>,
    },
    Image {
        src: String,
    },
    #[serde(rename_all = "camelCase")]
    Text {
        text: String,
        font_family: String,
        font_size: f64,
        fill: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub id: LayerId,
    #[serde(flatten)]
    pub transform: Transform,
    #[serde(flatten)]
    pub payload: ElementPayload,
}

impl ElementRecord {
    fn from_layer(layer: &Layer) -> Self {
        let payload = match &layer.payload {
            LayerPayload::Svg { svg_content } => {
                ElementPayload::Svg { svg_content: Some(svg_content.clone()) }
            }
            LayerPayload::Image { src } => ElementPayload::Image { src: src.clone() },
            LayerPayload::Text(style) => ElementPayload::Text {
                text: style.text.clone(),
                font_family: style.font_family.clone(),
                font_size: style.font_size,
                fill: style.fill.clone(),
            },
        };
        Self { id: layer.id.clone(), transform: layer.transform, payload }
    }

    fn into_layer(self, view: ViewName) -> Result<Layer, DocumentError> {
        let payload = match self.payload {
            ElementPayload::Svg { svg_content: Some(svg_content) } => LayerPayload::Svg { svg_content },
            ElementPayload::Svg { svg_content: None } => {
                return Err(DocumentError::MissingContent { view, id: self.id });
            }
            ElementPayload::Image { src } => LayerPayload::Image { src },
            ElementPayload::Text { text, font_family, font_size, fill } => {
                LayerPayload::Text(TextStyle { text, font_family, font_size, fill })
            }
        };
        Ok(Layer { id: self.id, transform: self.transform, payload })
    }

    fn is_stripped(&self) -> bool {
        matches!(self.payload, ElementPayload::Svg { svg_content: None })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewElements {
    #[serde(default)]
    pub elements: Vec<ElementRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignDocument {
    #[serde(default)]
    pub current_view: ViewName,
    #[serde(default)]
    pub views: BTreeMap<ViewName, ViewElements>,
}

impl DesignDocument {
    /// Full document with every view present, empty or not.
    pub fn from_design(design: &Design) -> Self {
        let views = design
            .views()
            .map(|(view, layers)| {
                let elements = layers.iter().map(ElementRecord::from_layer).collect();
                (view, ViewElements { elements })
            })
            .collect();
        Self { current_view: design.current_view, views }
    }

    pub fn into_design(
        self,
        id: impl Into<DesignId>,
        template_id: impl Into<TemplateId>,
    ) -> Result<Design, DocumentError> {
        let mut design = Design::new(id, template_id);
        design.current_view = self.current_view;
        for (view, elements) in self.views {
            let layers = elements
                .elements
                .into_iter()
                .map(|record| record.into_layer(view))
                .collect::<Result<Vec<_>, _>>()?;
            design.set_layers(view, layers);
        }
        if let Some(duplicate) = design.duplicate_layer_id() {
            return Err(DocumentError::DuplicateLayerId(duplicate.clone()));
        }
        Ok(design)
    }

    pub fn to_json(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn element_count(&self) -> usize {
        self.views.values().map(|v| v.elements.len()).sum()
    }

    /// True when no svg element is missing its content.
    pub fn is_complete(&self) -> bool {
        !self.views.values().flat_map(|v| &v.elements).any(ElementRecord::is_stripped)
    }

    /// Copy with `svg_content` dropped from every svg element. Everything
    /// else, including ids and order, is kept.
    pub fn strip_payloads(&self) -> Self {
        let mut stripped = self.clone();
        for record in stripped.views.values_mut().flat_map(|v| v.elements.iter_mut()) {
            if let ElementPayload::Svg { svg_content } = &mut record.payload {
                *svg_content = None;
            }
        }
        stripped
    }

    /// Fill stripped svg elements from `full`, matched by view and element id.
    /// Elements that are not in `self` are ignored.
    pub fn merge_payloads(&mut self, full: &DesignDocument) -> Result<(), DocumentError> {
        let mut contents: HashMap<(ViewName, &LayerId), &str> = HashMap::new();
        for (view, elements) in &full.views {
            for record in &elements.elements {
                if let ElementPayload::Svg { svg_content: Some(content) } = &record.payload {
                    contents.insert((*view, &record.id), content.as_str());
                }
            }
        }

        for (view, elements) in self.views.iter_mut() {
            for record in elements.elements.iter_mut() {
                let ElementPayload::Svg { svg_content } = &mut record.payload else {
                    continue;
                };
                if svg_content.is_some() {
                    continue;
                }
                let content = contents
                    .get(&(*view, &record.id))
                    .ok_or_else(|| DocumentError::MissingContent { view: *view, id: record.id.clone() })?;
                *svg_content = Some((*content).to_string());
            }
        }
        Ok(())
    }
}

/// Where the full document of a save goes.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedContent {
    Inline(DesignDocument),
    External { bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavePlan {
    pub metadata: DesignDocument,
    pub full: DesignDocument,
    pub content: PlannedContent,
    pub size_bytes: usize,
}

impl SavePlan {
    pub fn is_external(&self) -> bool {
        matches!(self.content, PlannedContent::External { .. })
    }
}

/// Decide the storage shape of a design. Documents above the externalize
/// threshold go to a blob, documents above the blob limit are refused.
pub fn plan_save(design: &Design, limits: &LimitsConfig) -> Result<SavePlan, DocumentError> {
    let full = DesignDocument::from_design(design);
    let bytes = serde_json::to_vec(&full)?;
    let size_bytes = bytes.len();

    if size_bytes > limits.max_blob_bytes {
        return Err(DocumentError::SizeLimitExceeded { size: size_bytes, limit: limits.max_blob_bytes });
    }

    let content = if size_bytes > limits.externalize_threshold_bytes {
        PlannedContent::External { bytes }
    } else {
        PlannedContent::Inline(full.clone())
    };

    Ok(SavePlan { metadata: full.strip_payloads(), full, content, size_bytes })
}
