//! Design Session - Live Layer Stack of One Editing Session
//!
//! The session owns the design, the live stack of the active view and the
//! per-view state. Live layers are written back to the design on every view
//! switch, so one view's stack never carries another view's transforms.
//!
//! Stacks are bottom-to-top. The template is not a layer and sits below
//! index 0.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::model::{Design, Layer, LayerId, LayerKind, LayerPayload, TextStyle, Transform, ViewName};
use crate::sanitize;
use crate::templates::Template;
use crate::text::{self, TextError, TextUpdateReport, TextUpdates};
use crate::validation;

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("View {0} has no template loaded")]
    TemplateNotLoaded(ViewName),

    #[error("Layer not found: {0}")]
    LayerNotFound(LayerId),

    #[error("Layer {id} is {actual:?}, expected {expected:?}")]
    WrongKind { id: LayerId, expected: LayerKind, actual: LayerKind },

    #[error("Duplicate layer id: {0}")]
    DuplicateLayerId(LayerId),

    #[error("Invalid image source: {0}")]
    InvalidImageSource(String),

    #[error(transparent)]
    Text(#[from] TextError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewState {
    Empty,
    TemplateLoaded,
}

/// A layer as it currently sits on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveLayer {
    pub layer: Layer,
    /// Runtime only, never persisted.
    pub selected: bool,
}

impl LiveLayer {
    fn new(layer: Layer) -> Self {
        Self { layer, selected: false }
    }
}

#[derive(Debug)]
pub struct DesignSession {
    design: Design,
    states: BTreeMap<ViewName, ViewState>,
    active: Vec<LiveLayer>,
}

impl DesignSession {
    /// Open a session on a design. Every view starts `Empty` until a
    /// template is attached.
    pub fn new(design: Design) -> Result<Self, LayerError> {
        if let Some(id) = design.duplicate_layer_id() {
            return Err(LayerError::DuplicateLayerId(id.clone()));
        }
        let active = live_stack(&design, design.current_view);
        Ok(Self {
            design,
            states: ViewName::ALL.into_iter().map(|v| (v, ViewState::Empty)).collect(),
            active,
        })
    }

    pub fn attach_template(&mut self, template: &Template) {
        for view in ViewName::ALL {
            let state = if template.view(view).is_some() {
                ViewState::TemplateLoaded
            } else {
                ViewState::Empty
            };
            self.states.insert(view, state);
        }
        if self.design.template_id != template.id {
            self.design.template_id = template.id.clone();
        }
        debug!(template_id = %template.id, views = ?template.available_views(), "attached template");
    }

    pub fn current_view(&self) -> ViewName {
        self.design.current_view
    }

    pub fn view_state(&self, view: ViewName) -> ViewState {
        self.states.get(&view).copied().unwrap_or(ViewState::Empty)
    }

    pub fn live_layers(&self) -> &[LiveLayer] {
        &self.active
    }

    pub fn layer(&self, id: &LayerId) -> Option<&Layer> {
        self.active.iter().map(|l| &l.layer).find(|l| &l.id == id)
    }

    pub fn add_svg(&mut self, markup: &str, transform: Transform) -> Result<LayerId, LayerError> {
        self.require_loaded()?;
        let svg_content = sanitize::sanitize_str(markup);
        self.push(LayerPayload::Svg { svg_content }, transform)
    }

    pub fn add_image(&mut self, src: &str, transform: Transform) -> Result<LayerId, LayerError> {
        self.require_loaded()?;
        validation::validate_image_source(src).map_err(LayerError::InvalidImageSource)?;
        self.push(LayerPayload::Image { src: src.trim().to_string() }, transform)
    }

    pub fn add_text(&mut self, style: TextStyle, transform: Transform) -> Result<LayerId, LayerError> {
        self.require_loaded()?;
        self.push(LayerPayload::Text(style), transform)
    }

    /// Move one step towards the top. Returns false when already on top.
    pub fn reorder_up(&mut self, id: &LayerId) -> Result<bool, LayerError> {
        self.require_loaded()?;
        let index = self.position(id)?;
        if index + 1 >= self.active.len() {
            return Ok(false);
        }
        self.active.swap(index, index + 1);
        Ok(true)
    }

    /// Move one step towards the template. Returns false when the layer is
    /// already directly above it.
    pub fn reorder_down(&mut self, id: &LayerId) -> Result<bool, LayerError> {
        self.require_loaded()?;
        let index = self.position(id)?;
        if index == 0 {
            return Ok(false);
        }
        self.active.swap(index, index - 1);
        Ok(true)
    }

    /// Remove a layer from the canvas and from the stored view.
    pub fn delete(&mut self, id: &LayerId) -> Result<Layer, LayerError> {
        self.require_loaded()?;
        let index = self.position(id)?;
        let removed = self.active.remove(index).layer;
        let view = self.design.current_view;
        let stored: Vec<Layer> = self.design.layers(view).iter().filter(|l| &l.id != id).cloned().collect();
        self.design.set_layers(view, stored);
        debug!(layer_id = %id, %view, "deleted layer");
        Ok(removed)
    }

    pub fn select(&mut self, id: &LayerId) -> Result<(), LayerError> {
        self.position(id)?;
        for live in &mut self.active {
            live.selected = &live.layer.id == id;
        }
        Ok(())
    }

    pub fn selected(&self) -> Option<&LayerId> {
        self.active.iter().find(|l| l.selected).map(|l| &l.layer.id)
    }

    pub fn set_transform(&mut self, id: &LayerId, transform: Transform) -> Result<(), LayerError> {
        let index = self.position(id)?;
        self.active[index].layer.transform = transform;
        Ok(())
    }

    pub fn edit_text(&mut self, id: &LayerId, style: TextStyle) -> Result<(), LayerError> {
        let index = self.position(id)?;
        match &mut self.active[index].layer.payload {
            LayerPayload::Text(current) => {
                *current = style;
                Ok(())
            }
            other => Err(LayerError::WrongKind {
                id: id.clone(),
                expected: LayerKind::Text,
                actual: other.kind(),
            }),
        }
    }

    /// Run a text update batch over the markup of an svg layer.
    pub fn apply_text_updates(
        &mut self,
        id: &LayerId,
        updates: &TextUpdates,
    ) -> Result<TextUpdateReport, LayerError> {
        let index = self.position(id)?;
        match &mut self.active[index].layer.payload {
            LayerPayload::Svg { svg_content } => {
                let report = text::update_text(svg_content, updates)?;
                *svg_content = report.markup.clone();
                Ok(report)
            }
            other => Err(LayerError::WrongKind {
                id: id.clone(),
                expected: LayerKind::Svg,
                actual: other.kind(),
            }),
        }
    }

    /// Write every live layer back into the active view's records.
    pub fn flush(&mut self) {
        let layers = self.active.iter().map(|l| l.layer.clone()).collect();
        self.design.set_layers(self.design.current_view, layers);
    }

    pub fn switch_view(&mut self, target: ViewName) {
        self.flush();
        let from = self.design.current_view;
        self.design.current_view = target;
        self.active = live_stack(&self.design, target);
        debug!(%from, to = %target, layers = self.active.len(), "switched view");
    }

    /// Drop every layer of every view and return all views to `Empty`.
    pub fn reset(&mut self) {
        self.design.clear();
        self.active.clear();
        for state in self.states.values_mut() {
            *state = ViewState::Empty;
        }
        debug!(design_id = %self.design.id, "reset session");
    }

    /// Flushed view of the design, ready to serialize.
    pub fn snapshot(&mut self) -> &Design {
        self.flush();
        &self.design
    }

    pub fn into_design(mut self) -> Design {
        self.flush();
        self.design
    }

    fn require_loaded(&self) -> Result<(), LayerError> {
        let view = self.design.current_view;
        match self.view_state(view) {
            ViewState::TemplateLoaded => Ok(()),
            ViewState::Empty => Err(LayerError::TemplateNotLoaded(view)),
        }
    }

    fn position(&self, id: &LayerId) -> Result<usize, LayerError> {
        self.active
            .iter()
            .position(|l| &l.layer.id == id)
            .ok_or_else(|| LayerError::LayerNotFound(id.clone()))
    }

    fn push(&mut self, payload: LayerPayload, transform: Transform) -> Result<LayerId, LayerError> {
        let mut layer = Layer::new(payload, transform);
        while self.design.contains_layer(&layer.id) || self.layer(&layer.id).is_some() {
            layer.id = LayerId::fresh();
        }
        let id = layer.id.clone();
        debug!(layer_id = %id, kind = ?layer.kind(), view = %self.design.current_view, "added layer");
        self.active.push(LiveLayer::new(layer));
        Ok(id)
    }
}

fn live_stack(design: &Design, view: ViewName) -> Vec<LiveLayer> {
    design.layers(view).iter().cloned().map(LiveLayer::new).collect()
}
