//! Design Service - Single Entry Point
//!
//! Every operation a transport or CLI exposes goes through [`DesignService`].
//! Markup arriving from outside is sanitized here before any other module
//! sees it, whatever the caller claims about it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::CoreError;
use crate::fetch::{OfflineFetcher, RemoteFetcher};
use crate::metadata;
use crate::model::{Design, LayerPayload, ViewName};
use crate::repository::{DesignRecord, DesignRepository, SaveSummary};
use crate::sanitize::{self, SanitizeOutcome};
use crate::session::{DesignSession, LayerError};
use crate::store::{FsStore, KeyValueStore, MemoryStore};
use crate::templates::{FileType, ResolvedView, Template, TemplateCatalog, TemplateView};
use crate::text::{self, TextNode, TextRegistry, TextUpdateReport, TextUpdates};
use crate::validation::{self, UploadInput, UploadPurpose, ValidationViolation, Validator};

/// What the upload handler gets back for a vector asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    pub sanitized_content: String,
    pub width: f64,
    pub height: f64,
    #[serde(rename = "viewBox")]
    pub view_box: String,
    pub text_elements: Vec<TextNode>,
    pub sanitize_outcome: SanitizeOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ValidationViolation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractTextResult {
    /// Sanitized markup with every text element carrying its id.
    pub svg_content: String,
    pub text_elements: Vec<TextNode>,
}

impl From<TextRegistry> for ExtractTextResult {
    fn from(registry: TextRegistry) -> Self {
        let svg_content = registry.markup();
        Self { svg_content, text_elements: registry.into_nodes() }
    }
}

/// One file of a template upload.
#[derive(Debug, Clone)]
pub struct TemplateUpload {
    pub view: ViewName,
    pub filename: String,
    pub bytes: Vec<u8>,
}

pub struct DesignService {
    catalog: TemplateCatalog,
    designs: DesignRepository,
    fetcher: Arc<dyn RemoteFetcher>,
    validator: Validator,
    fetch_timeout: Duration,
}

impl DesignService {
    pub fn new(
        config: &AppConfig,
        rows: Arc<dyn KeyValueStore>,
        blobs: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Self {
        Self {
            catalog: TemplateCatalog::new(rows.clone()),
            designs: DesignRepository::new(rows, blobs, config.limits),
            fetcher,
            validator: Validator::new(&config.limits),
            fetch_timeout: config.fetch.timeout(),
        }
    }

    pub fn in_memory(config: &AppConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(OfflineFetcher),
        )
    }

    /// Filesystem-backed service rooted at `storage.data_dir`.
    pub fn open(config: &AppConfig) -> Result<Self, CoreError> {
        let data_dir = &config.storage.data_dir;
        let rows_dir = data_dir.join("rows");
        let blobs_dir = data_dir.join("blobs");
        let rows = FsStore::open(&rows_dir)
            .map_err(|source| CoreError::persistence(rows_dir.display().to_string(), source))?;
        let blobs = FsStore::open(&blobs_dir)
            .map_err(|source| CoreError::persistence(blobs_dir.display().to_string(), source))?;
        info!(data_dir = %data_dir.display(), "opened design store");
        Ok(Self::new(config, Arc::new(rows), Arc::new(blobs), Arc::new(OfflineFetcher)))
    }

    fn check_upload(
        &self,
        filename: &str,
        bytes: &[u8],
        purpose: UploadPurpose,
    ) -> Result<Vec<ValidationViolation>, CoreError> {
        let result = self.validator.validate(&UploadInput { filename, bytes, purpose });
        if !result.valid {
            return Err(CoreError::UploadRejected(result.summary()));
        }
        Ok(result.violations)
    }

    /// Sanitize an uploaded vector asset and describe it.
    pub fn ingest_upload(&self, raw: &[u8], filename: &str) -> Result<UploadResult, CoreError> {
        let warnings = self.check_upload(filename, raw, UploadPurpose::VectorAsset)?;

        let sanitized = sanitize::sanitize_report(raw);
        let registry = text::extract_text(&sanitized.markup)?;
        let sanitized_content = registry.markup();
        let metrics = metadata::extract_metrics(&sanitized_content);

        info!(
            filename,
            bytes = raw.len(),
            text_elements = registry.nodes().len(),
            placeholder = sanitized.is_placeholder(),
            "ingested upload"
        );

        Ok(UploadResult {
            sanitized_content,
            width: metrics.width,
            height: metrics.height,
            view_box: metrics.view_box,
            text_elements: registry.into_nodes(),
            sanitize_outcome: sanitized.outcome,
            warnings,
        })
    }

    pub fn extract_text(&self, markup: &str) -> Result<ExtractTextResult, CoreError> {
        let clean = sanitize::sanitize_str(markup);
        Ok(text::extract_text(&clean)?.into())
    }

    pub fn update_text(&self, markup: &str, updates: &TextUpdates) -> Result<TextUpdateReport, CoreError> {
        let clean = sanitize::sanitize_str(markup);
        Ok(text::update_text(&clean, updates)?)
    }

    /// Register a template from uploaded files, one per view.
    pub fn upload_template(&self, template_id: &str, uploads: &[TemplateUpload]) -> Result<Template, CoreError> {
        let mut template = Template::new(template_id);
        for upload in uploads {
            self.check_upload(&upload.filename, &upload.bytes, UploadPurpose::TemplateView)?;
            let view = match FileType::from_filename(&upload.filename) {
                Some(FileType::Svg) => TemplateView::vector(template_id, upload.view, &upload.bytes),
                Some(file_type) => TemplateView::image(template_id, upload.view, &upload.filename, file_type),
                None => return Err(CoreError::UploadRejected(format!("unsupported file {}", upload.filename))),
            };
            template.insert(view);
        }
        self.register_template(&template)?;
        Ok(template)
    }

    pub fn register_template(&self, template: &Template) -> Result<(), CoreError> {
        Ok(self.catalog.register(template)?)
    }

    pub fn template(&self, template_id: &str) -> Result<Template, CoreError> {
        Ok(self.catalog.get(template_id)?)
    }

    /// Every available view of a template, re-sanitized and ready to render.
    pub fn get_template_views(&self, template_id: &str) -> Result<Vec<ResolvedView>, CoreError> {
        let template = self.catalog.get(template_id)?;
        let views = template
            .views()
            .map(|view| view.resolve(self.fetcher.as_ref(), self.fetch_timeout))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(template_id, views = views.len(), "resolved template views");
        Ok(views)
    }

    /// Svg layers are sanitized before they are stored. An image layer with
    /// an unsafe `src` rejects the whole save.
    pub fn save_design(&self, design: &Design) -> Result<SaveSummary, CoreError> {
        check_image_sources(design)?;
        self.designs.save(&sanitize_layers(design.clone()))
    }

    pub fn load_design(&self, design_id: &str) -> Result<Design, CoreError> {
        Ok(sanitize_layers(self.designs.load(design_id)?))
    }

    pub fn load_design_record(&self, design_id: &str) -> Result<DesignRecord, CoreError> {
        self.designs.load_record(design_id)
    }

    pub fn delete_design(&self, design_id: &str) -> Result<bool, CoreError> {
        self.designs.delete(design_id)
    }

    /// Start editing an existing design, or a new one when `design_id` is
    /// `None`, with the template's views loaded.
    pub fn open_session(&self, design_id: Option<&str>, template_id: &str) -> Result<DesignSession, CoreError> {
        let template = self.catalog.get(template_id)?;
        let design = match design_id {
            Some(id) => self.load_design(id)?,
            None => Design::with_generated_id(template_id),
        };
        let mut session = DesignSession::new(design)?;
        session.attach_template(&template);
        Ok(session)
    }

    pub fn save_session(&self, session: &mut DesignSession) -> Result<SaveSummary, CoreError> {
        self.save_design(session.snapshot())
    }
}

fn check_image_sources(design: &Design) -> Result<(), CoreError> {
    for (_, layers) in design.views() {
        for layer in layers {
            if let LayerPayload::Image { src } = &layer.payload {
                validation::validate_image_source(src).map_err(LayerError::InvalidImageSource)?;
            }
        }
    }
    Ok(())
}

/// Re-sanitize svg layers and drop image layers whose source no longer
/// validates.
fn sanitize_layers(mut design: Design) -> Design {
    for view in ViewName::ALL {
        let layers = design
            .layers(view)
            .iter()
            .cloned()
            .filter_map(|mut layer| {
                match &mut layer.payload {
                    LayerPayload::Svg { svg_content } => *svg_content = sanitize::sanitize_str(svg_content),
                    LayerPayload::Image { src } => {
                        if let Err(reason) = validation::validate_image_source(src) {
                            warn!(design_id = %design.id, layer_id = %layer.id, reason = %reason, "dropping image layer with unsafe source");
                            return None;
                        }
                    }
                    LayerPayload::Text(_) => {}
                }
                Some(layer)
            })
            .collect();
        design.set_layers(view, layers);
    }
    design
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Layer, TextStyle, Transform};
    use crate::text::{TextNodeId, UpdateStatus};

    const LOGO: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 200 100"><text x="5" y="9">Team</text><rect width="10" height="10" onload="steal()"/></svg>"#;

    fn service() -> DesignService {
        DesignService::in_memory(&AppConfig::default())
    }

    #[test]
    fn test_ingest_upload() {
        let result = service().ingest_upload(LOGO.as_bytes(), "logo.svg").unwrap();
        assert!(!result.sanitized_content.contains("onload"));
        assert_eq!((result.width, result.height), (200.0, 100.0));
        assert_eq!(result.view_box, "0 0 200 100");
        assert_eq!(result.text_elements.len(), 1);
        assert_eq!(result.text_elements[0].id.as_str(), "text-0");
        assert!(matches!(result.sanitize_outcome, SanitizeOutcome::Defanged { .. }));
        assert_eq!(service().ingest_upload(LOGO.as_bytes(), "logo.svg").unwrap(), result);

        let sniffed = service().ingest_upload(b"GIF89a<svg/>", "odd.svg").unwrap();
        assert_eq!(sniffed.warnings.len(), 1);
        assert_eq!(service().ingest_upload(b"GIF89a<svg/>", "odd.svg").unwrap(), sniffed);

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("viewBox").is_some());
        assert!(json.get("sanitized_content").is_some());
    }

    #[test]
    fn test_ingest_rejects_non_svg() {
        let err = service().ingest_upload(b"\x89PNG", "logo.png").unwrap_err();
        assert!(matches!(err, CoreError::UploadRejected(_)));
    }

    #[test]
    fn test_update_text_partial_batch() {
        let updates = TextUpdates::new().set("text-0", "Hello").set("bogus-id", "B");
        let report = service().update_text(LOGO, &updates).unwrap();
        assert_eq!(report.status(&TextNodeId::from("text-0")), Some(UpdateStatus::Applied));
        assert_eq!(report.status(&TextNodeId::from("bogus-id")), Some(UpdateStatus::NotFound));

        let extracted = service().extract_text(&report.markup).unwrap();
        assert_eq!(extracted.text_elements[0].content, "Hello");
    }

    #[test]
    fn test_save_sanitizes_svg_layers() {
        let service = service();
        let mut design = Design::new("design-1", "tee");
        design.set_layers(
            ViewName::Front,
            vec![
                Layer::new(LayerPayload::Svg { svg_content: LOGO.into() }, Transform::default()),
                Layer::new(LayerPayload::Text(TextStyle::new("Go")), Transform::at(3.0, 4.0)),
            ],
        );
        service.save_design(&design).unwrap();

        let loaded = service.load_design("design-1").unwrap();
        let LayerPayload::Svg { svg_content } = &loaded.layers(ViewName::Front)[0].payload else {
            panic!("expected svg layer");
        };
        assert!(!svg_content.contains("onload"));
        assert_eq!(loaded.layers(ViewName::Front)[1], design.layers(ViewName::Front)[1]);

        let record = service.load_design_record("design-1").unwrap();
        assert_eq!(record.template_id, "tee");
        assert!(!record.is_external());
    }

    #[test]
    fn test_session_through_service() {
        let service = service();
        service
            .upload_template(
                "tee",
                &[
                    TemplateUpload { view: ViewName::Front, filename: "front.svg".into(), bytes: LOGO.as_bytes().to_vec() },
                    TemplateUpload { view: ViewName::Back, filename: "back.png".into(), bytes: b"\x89PNG".to_vec() },
                ],
            )
            .unwrap();

        let mut session = service.open_session(None, "tee").unwrap();
        session.add_text(TextStyle::new("Hi"), Transform::default()).unwrap();
        let summary = service.save_session(&mut session).unwrap();

        let reopened = service.open_session(Some(summary.design_id.as_str()), "tee").unwrap();
        assert_eq!(reopened.live_layers().len(), 1);
        assert_eq!(service.get_template_views("tee").unwrap().len(), 2);
    }

    #[test]
    fn test_save_rejects_unsafe_image_source() {
        let service = service();
        let mut design = Design::new("design-1", "tee");
        design.set_layers(
            ViewName::Front,
            vec![Layer::new(LayerPayload::Image { src: "javascript:alert(1)".into() }, Transform::default())],
        );
        let err = service.save_design(&design).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidRequest);
        assert!(service.load_design("design-1").is_err());
    }

    #[test]
    fn test_load_drops_stored_unsafe_image_layers() {
        let service = service();
        let mut design = Design::new("design-1", "tee");
        design.set_layers(
            ViewName::Front,
            vec![
                Layer::new(LayerPayload::Image { src: "javascript:alert(1)".into() }, Transform::default()),
                Layer::new(LayerPayload::Image { src: "shirts/logo.png".into() }, Transform::default()),
            ],
        );
        // Written straight to the repository, as an older build would have.
        service.designs.save(&design).unwrap();

        let loaded = service.load_design("design-1").unwrap();
        let layers = loaded.layers(ViewName::Front);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].payload, LayerPayload::Image { src: "shirts/logo.png".into() });
    }

    #[test]
    fn test_prose_with_equals_survives_save_and_load() {
        let service = service();
        service
            .upload_template(
                "tee",
                &[TemplateUpload { view: ViewName::Front, filename: "front.svg".into(), bytes: LOGO.as_bytes().to_vec() }],
            )
            .unwrap();

        let mut session = service.open_session(None, "tee").unwrap();
        let id = session.add_svg(LOGO, Transform::default()).unwrap();
        for slogan in ["one = family", "Big data: 2024"] {
            let updates = TextUpdates::new().set("text-0", slogan);
            session.apply_text_updates(&id, &updates).unwrap();
            let summary = service.save_session(&mut session).unwrap();

            let loaded = service.load_design(&summary.design_id).unwrap();
            let LayerPayload::Svg { svg_content } = &loaded.layers(ViewName::Front)[0].payload else {
                panic!("expected svg layer");
            };
            assert_ne!(svg_content, sanitize::PLACEHOLDER_SVG);
            assert_eq!(service.extract_text(svg_content).unwrap().text_elements[0].content, slogan);
        }
    }
}
