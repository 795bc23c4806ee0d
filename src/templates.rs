//! Template System - Per-View Garment Artwork
//!
//! A template is one record per view. SVG views are sanitized when uploaded
//! and again every time they are loaded. Remote SVG views are fetched under
//! the configured timeout and sanitized before anything sees them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::fetch::{FetchError, RemoteFetcher};
use crate::metadata::{self, SvgMetrics};
use crate::model::{TemplateId, ViewName};
use crate::sanitize;
use crate::store::{self, KeyValueStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Svg,
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl FileType {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.trim().rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "svg" => Some(FileType::Svg),
            "png" => Some(FileType::Png),
            "jpg" | "jpeg" => Some(FileType::Jpeg),
            "webp" => Some(FileType::Webp),
            "gif" => Some(FileType::Gif),
            _ => None,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, FileType::Svg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TemplateSource {
    /// Sanitized SVG markup stored with the record.
    Markup(String),
    /// Path or URL of raster artwork the client loads directly.
    ImageRef(String),
    /// Externally hosted artwork, fetched on load when it is SVG.
    Remote(Url),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateView {
    pub template_id: TemplateId,
    pub view_type: ViewName,
    pub file_type: FileType,
    pub source: TemplateSource,
}

impl TemplateView {
    /// Vector artwork from an upload. The bytes are sanitized here.
    pub fn vector(template_id: impl Into<TemplateId>, view: ViewName, raw: &[u8]) -> Self {
        Self {
            template_id: template_id.into(),
            view_type: view,
            file_type: FileType::Svg,
            source: TemplateSource::Markup(sanitize::sanitize(raw)),
        }
    }

    pub fn image(
        template_id: impl Into<TemplateId>,
        view: ViewName,
        reference: impl Into<String>,
        file_type: FileType,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            view_type: view,
            file_type,
            source: TemplateSource::ImageRef(reference.into()),
        }
    }

    pub fn remote(
        template_id: impl Into<TemplateId>,
        view: ViewName,
        url: Url,
        file_type: FileType,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            view_type: view,
            file_type,
            source: TemplateSource::Remote(url),
        }
    }

    /// Produce what the client renders for this view.
    pub fn resolve(
        &self,
        fetcher: &dyn RemoteFetcher,
        timeout: Duration,
    ) -> Result<ResolvedView, FetchError> {
        let content = match (&self.source, self.file_type.is_vector()) {
            (TemplateSource::Markup(markup), _) => {
                ResolvedContent::Markup(sanitize::sanitize_str(markup))
            }
            (TemplateSource::Remote(url), true) => {
                let bytes = fetcher.fetch(url, timeout)?;
                debug!(url = %url, bytes = bytes.len(), "fetched remote template view");
                ResolvedContent::Markup(sanitize::sanitize(&bytes))
            }
            (TemplateSource::Remote(url), false) => ResolvedContent::ImageUrl(url.to_string()),
            (TemplateSource::ImageRef(reference), _) => {
                ResolvedContent::ImageUrl(reference.clone())
            }
        };

        let metrics = match &content {
            ResolvedContent::Markup(markup) => Some(metadata::extract_metrics(markup)),
            ResolvedContent::ImageUrl(_) => None,
        };

        Ok(ResolvedView { view_type: self.view_type, file_type: self.file_type, content, metrics })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResolvedContent {
    Markup(String),
    ImageUrl(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedView {
    pub view_type: ViewName,
    pub file_type: FileType,
    pub content: ResolvedContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SvgMetrics>,
}

/// All view records of one template. The front view is mandatory.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: TemplateId,
    views: BTreeMap<ViewName, TemplateView>,
}

impl Template {
    pub fn new(id: impl Into<TemplateId>) -> Self {
        Self { id: id.into(), views: BTreeMap::new() }
    }

    pub fn with_view(mut self, view: TemplateView) -> Self {
        self.insert(view);
        self
    }

    pub fn insert(&mut self, mut view: TemplateView) {
        view.template_id = self.id.clone();
        self.views.insert(view.view_type, view);
    }

    pub fn view(&self, view: ViewName) -> Option<&TemplateView> {
        self.views.get(&view)
    }

    pub fn views(&self) -> impl Iterator<Item = &TemplateView> {
        self.views.values()
    }

    pub fn available_views(&self) -> Vec<ViewName> {
        self.views.keys().copied().collect()
    }

    pub fn has_front(&self) -> bool {
        self.views.contains_key(&ViewName::Front)
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Template not found: {0}")]
    NotFound(TemplateId),

    #[error("Template {0} has no front view")]
    MissingFrontView(TemplateId),

    #[error("Corrupt template record {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Template catalog - view records in a key-value store
pub struct TemplateCatalog {
    store: Arc<dyn KeyValueStore>,
}

impl TemplateCatalog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn register(&self, template: &Template) -> Result<(), CatalogError> {
        if !template.has_front() {
            return Err(CatalogError::MissingFrontView(template.id.clone()));
        }
        for view in ViewName::ALL {
            let key = store::template_key(&template.id, view);
            match template.view(view) {
                Some(record) => {
                    let bytes = serde_json::to_vec(record)
                        .map_err(|source| CatalogError::Corrupt { key: key.clone(), source })?;
                    self.store.put(&key, &bytes)?;
                }
                None => {
                    self.store.delete(&key)?;
                }
            }
        }
        info!(template_id = %template.id, views = ?template.available_views(), "registered template");
        Ok(())
    }

    pub fn get(&self, template_id: &str) -> Result<Template, CatalogError> {
        let mut template = Template::new(template_id);
        for view in ViewName::ALL {
            let key = store::template_key(template_id, view);
            let Some(bytes) = self.store.get(&key)? else {
                continue;
            };
            let record: TemplateView = serde_json::from_slice(&bytes)
                .map_err(|source| CatalogError::Corrupt { key, source })?;
            template.insert(record);
        }

        if template.views.is_empty() {
            return Err(CatalogError::NotFound(template_id.to_string()));
        }
        if !template.has_front() {
            warn!(template_id, "template record has no front view");
            return Err(CatalogError::MissingFrontView(template_id.to_string()));
        }
        Ok(template)
    }

    pub fn delete(&self, template_id: &str) -> Result<bool, CatalogError> {
        let mut removed = false;
        for view in ViewName::ALL {
            removed |= self.store.delete(&store::template_key(template_id, view))?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use crate::store::MemoryStore;

    const FRONT: &[u8] = br#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="300"><path d="M0 0h10" onclick="x()"/></svg>"#;

    #[test]
    fn test_file_type_from_filename() {
        assert_eq!(FileType::from_filename("Front.SVG"), Some(FileType::Svg));
        assert_eq!(FileType::from_filename("a.b.jpg"), Some(FileType::Jpeg));
        assert_eq!(FileType::from_filename("noext"), None);
        assert_eq!(FileType::from_filename("x.tiff"), None);
    }

    #[test]
    fn test_vector_upload_is_sanitized() {
        let view = TemplateView::vector("tee", ViewName::Front, FRONT);
        let TemplateSource::Markup(markup) = &view.source else {
            panic!("expected markup");
        };
        assert!(!markup.contains("onclick"));
    }

    #[test]
    fn test_catalog_requires_front() {
        let catalog = TemplateCatalog::new(Arc::new(MemoryStore::new()));
        let back_only = Template::new("tee").with_view(TemplateView::vector("tee", ViewName::Back, FRONT));
        assert!(matches!(catalog.register(&back_only), Err(CatalogError::MissingFrontView(_))));
        assert!(matches!(catalog.get("tee"), Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn test_catalog_roundtrip() {
        let catalog = TemplateCatalog::new(Arc::new(MemoryStore::new()));
        let template = Template::new("tee")
            .with_view(TemplateView::vector("tee", ViewName::Front, FRONT))
            .with_view(TemplateView::image("tee", ViewName::Back, "uploads/back.png", FileType::Png));
        catalog.register(&template).unwrap();

        let loaded = catalog.get("tee").unwrap();
        assert_eq!(loaded, template);
        assert_eq!(loaded.available_views(), vec![ViewName::Front, ViewName::Back]);
        assert!(catalog.delete("tee").unwrap());
        assert!(catalog.get("tee").is_err());
    }

    #[test]
    fn test_resolve_remote_svg_is_sanitized() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert(
            "https://cdn.example.com/front.svg",
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 40 20"><script>x()</script></svg>"#,
        );
        let url = Url::parse("https://cdn.example.com/front.svg").unwrap();
        let view = TemplateView::remote("tee", ViewName::Front, url, FileType::Svg);

        let resolved = view.resolve(&fetcher, Duration::from_secs(1)).unwrap();
        let ResolvedContent::Markup(markup) = &resolved.content else {
            panic!("expected markup");
        };
        assert_eq!(markup, sanitize::PLACEHOLDER_SVG);
        assert!(resolved.metrics.is_some());
    }

    #[test]
    fn test_resolve_remote_timeout() {
        let fetcher = MemoryFetcher::new();
        fetcher.stall("https://cdn.example.com/slow.svg");
        let url = Url::parse("https://cdn.example.com/slow.svg").unwrap();
        let view = TemplateView::remote("tee", ViewName::Front, url, FileType::Svg);
        assert!(matches!(
            view.resolve(&fetcher, Duration::from_millis(5)),
            Err(FetchError::Timeout { .. })
        ));
    }

    #[test]
    fn test_resolve_raster_passes_reference_through() {
        let view = TemplateView::image("tee", ViewName::Left, "uploads/left.webp", FileType::Webp);
        let resolved = view.resolve(&MemoryFetcher::new(), Duration::from_secs(1)).unwrap();
        assert_eq!(resolved.content, ResolvedContent::ImageUrl("uploads/left.webp".into()));
        assert_eq!(resolved.metrics, None);
    }
}
