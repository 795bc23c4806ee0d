//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tailor_core::{
    config::{AppConfig, LimitsConfig},
    document::DesignDocument,
    error::ErrorKind,
    fetch::MemoryFetcher,
    model::{Design, Layer, LayerPayload, TextStyle, Transform, ViewName},
    repository::DesignRepository,
    store::{KeyValueStore, MemoryStore, StoreError},
    templates::{FileType, Template, TemplateView},
    text::{extract_text, update_text, TextNodeId, TextUpdates, UpdateStatus},
    DesignService, DesignSession, PLACEHOLDER_SVG,
};

const HOSTILE: &[&str] = &[
    r#"<svg xmlns="http://www.w3.org/2000/svg" onload="alert(1)"><rect width="5"/></svg>"#,
    r#"<svg><script type="text/javascript">alert(document.cookie)</script></svg>"#,
    r#"<svg><a href="javascript:alert(1)"><text>click</text></a></svg>"#,
    r#"<svg><g ONLOAD = "x()"><text>Team onload=1</text></g></svg>"#,
    r#"<svg><text>&#x6A;&#x61;&#x76;ascript:alert(1)</text></svg>"#,
    r#"<svg><text>&lt;script&gt;alert(1)&lt;/script&gt;</text></svg>"#,
    r#"<svg><image href="data:text/html,<script>x</script>"/></svg>"#,
    r#"<svg onload=alert(1)><rect></svg>"#,
    r#"<?xml version="1.0"?><!DOCTYPE svg [<!ENTITY x SYSTEM "file:///etc/passwd">]><svg><text>&x;</text></svg>"#,
];

const BENIGN: &[&str] = &[
    r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 200 100"><text x="10" y="20">Front</text></svg>"#,
    r#"<svg xmlns="http://www.w3.org/2000/svg" width="3in" height="2in"><g><path d="M0 0L10 10"/></g></svg>"#,
    r#"<svg><text>Fish &amp; Chips</text><text>"quoted"</text></svg>"#,
    "<svg>\n  <rect width='4'\n        height='4'/>\n</svg>",
    "<svg><g><rect></g></svg>",
    "",
    "<<<>>>",
    PLACEHOLDER_SVG,
];

fn all_inputs() -> impl Iterator<Item = &'static str> {
    HOSTILE.iter().chain(BENIGN.iter()).copied()
}

fn tee_template() -> Template {
    ViewName::ALL.into_iter().fold(Template::new("tee"), |template, view| {
        template.with_view(TemplateView::image("tee", view, format!("uploads/{view}.png"), FileType::Png))
    })
}

fn layer(i: usize) -> Layer {
    let transform = Transform {
        left: i as f64 * 3.5,
        top: i as f64,
        scale_x: 1.0 + i as f64 / 10.0,
        scale_y: 0.75,
        angle: (i * 7 % 360) as f64,
    };
    let payload = match i % 3 {
        0 => LayerPayload::Svg {
            svg_content: tailor_core::sanitize(
                format!(r#"<svg xmlns="http://www.w3.org/2000/svg"><text>L{i}</text></svg>"#).as_bytes(),
            ),
        },
        1 => LayerPayload::Image { src: format!("uploads/art-{i}.png") },
        _ => LayerPayload::Text(TextStyle::new(format!("Player {i}"))),
    };
    Layer::new(payload, transform)
}

fn design_with_layers(count: usize) -> Design {
    let mut design = Design::with_generated_id("tee");
    for view in ViewName::ALL {
        let layers = (0..count)
            .filter(|i| ViewName::ALL[i % 4] == view)
            .map(layer)
            .collect();
        design.set_layers(view, layers);
    }
    design.current_view = ViewName::Right;
    design
}

#[test]
fn invariant_sanitized_output_has_no_active_content() {
    for input in all_inputs() {
        let out = tailor_core::sanitize(input.as_bytes()).to_ascii_lowercase();
        assert!(!out.contains("<script"), "input {input:?} produced {out}");
        assert!(!out.contains("onload="), "input {input:?} produced {out}");
        assert!(!out.contains("javascript:"), "input {input:?} produced {out}");
    }
}

#[test]
fn invariant_sanitize_is_idempotent() {
    for input in all_inputs() {
        let once = tailor_core::sanitize(input.as_bytes());
        let twice = tailor_core::sanitize(once.as_bytes());
        assert_eq!(once, twice, "input {input:?}");
    }
}

#[test]
fn invariant_sanitizer_never_expands_external_entities() {
    let out = tailor_core::sanitize(HOSTILE[8].as_bytes());
    assert!(!out.contains("root:"));
    assert!(!out.contains("/etc/passwd"));
}

#[test]
fn invariant_text_ids_are_stable_and_ordered() {
    let clean = tailor_core::sanitize(
        br#"<svg xmlns="http://www.w3.org/2000/svg"><text>A</text><g><text>B</text></g><text>C</text></svg>"#,
    );
    let first = extract_text(&clean).unwrap();
    let second = extract_text(&clean).unwrap();
    let ids = |nodes: &[tailor_core::TextNode]| nodes.iter().map(|n| n.id.to_string()).collect::<Vec<_>>();

    assert_eq!(ids(first.nodes()), vec!["text-0", "text-1", "text-2"]);
    assert_eq!(ids(first.nodes()), ids(second.nodes()));
    let contents: Vec<_> = first.nodes().iter().map(|n| n.content.as_str()).collect();
    assert_eq!(contents, vec!["A", "B", "C"]);
}

#[test]
fn invariant_update_then_extract_recovers_content() {
    let svg = tailor_core::sanitize(BENIGN[0].as_bytes());

    let report = update_text(&svg, &TextUpdates::new().set("text-0", "Hello")).unwrap();
    let node = extract_text(&report.markup).unwrap().nodes()[0].clone();
    assert_eq!(node.id, TextNodeId::from("text-0"));
    assert_eq!(node.content, "Hello");

    let partial = update_text(&svg, &TextUpdates::new().set("text-0", "A").set("bogus-id", "B")).unwrap();
    assert_eq!(partial.status(&"text-0".into()), Some(UpdateStatus::Applied));
    assert_eq!(partial.status(&"bogus-id".into()), Some(UpdateStatus::NotFound));
    assert_eq!(extract_text(&partial.markup).unwrap().nodes()[0].content, "A");

    let none = update_text(&svg, &TextUpdates::new().set("bogus-id", "B")).unwrap_err();
    assert!(matches!(none, tailor_core::text::TextError::NoMatchingElements { .. }));
}

#[test]
fn invariant_viewbox_supplies_missing_dimensions() {
    let metrics = tailor_core::extract_metrics(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 200 100"></svg>"#,
    );
    assert_eq!(metrics.width, 200.0);
    assert_eq!(metrics.height, 100.0);
    assert_eq!(metrics.view_box, "0 0 200 100");
}

#[test]
fn invariant_reorder_down_stops_above_template() {
    let mut session = DesignSession::new(Design::new("design-1", "tee")).unwrap();
    session.attach_template(&tee_template());
    assert!(session.live_layers().is_empty(), "template must not be a layer");

    let bottom = session.add_text(TextStyle::new("bottom"), Transform::default()).unwrap();
    let top = session.add_text(TextStyle::new("top"), Transform::default()).unwrap();

    assert!(!session.reorder_down(&bottom).unwrap());
    assert!(!session.reorder_down(&bottom).unwrap());
    let order: Vec<_> = session.live_layers().iter().map(|l| l.layer.id.clone()).collect();
    assert_eq!(order, vec![bottom, top]);
}

#[test]
fn invariant_views_never_share_transforms() {
    let mut session = DesignSession::new(Design::new("design-1", "tee")).unwrap();
    session.attach_template(&tee_template());

    for (i, view) in ViewName::ALL.into_iter().enumerate() {
        session.switch_view(view);
        let id = session.add_text(TextStyle::new(view.as_str()), Transform::default()).unwrap();
        session.set_transform(&id, Transform::at(i as f64 * 100.0, 0.0)).unwrap();
    }
    let design = session.into_design();

    for (i, view) in ViewName::ALL.into_iter().enumerate() {
        let layers = design.layers(view);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].transform.left, i as f64 * 100.0);
        assert_eq!(layers[0].payload, LayerPayload::Text(TextStyle::new(view.as_str())));
    }
}

#[test]
fn invariant_document_roundtrip() {
    for count in [0, 1, 50] {
        let design = design_with_layers(count);
        let json = DesignDocument::from_design(&design).to_json().unwrap();
        let restored = DesignDocument::from_json(&json)
            .unwrap()
            .into_design(design.id.clone(), design.template_id.clone())
            .unwrap();
        assert_eq!(restored, design, "{count} layers");
        assert_eq!(restored.layer_count(), count);
    }
}

#[test]
fn invariant_repository_roundtrip() {
    let repo = DesignRepository::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStore::new()),
        LimitsConfig::default(),
    );
    for count in [0, 1, 50] {
        let design = design_with_layers(count);
        repo.save(&design).unwrap();
        assert_eq!(repo.load(&design.id).unwrap(), design, "{count} layers");
    }
}

#[test]
fn invariant_large_design_is_externalized() {
    let rows = Arc::new(MemoryStore::new());
    let blobs = Arc::new(MemoryStore::new());
    let repo = DesignRepository::new(rows.clone(), blobs.clone(), LimitsConfig::default());

    let big_svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg">{}</svg>"#,
        r#"<rect width="1" height="1"/>"#.repeat(2 * 1024 * 1024 / 28)
    );
    assert!(big_svg.len() >= 2 * 1024 * 1024 - 64);
    let mut design = Design::new("design-big", "tee");
    design.set_layers(
        ViewName::Front,
        vec![
            Layer::new(LayerPayload::Svg { svg_content: big_svg.clone() }, Transform::at(1.0, 2.0)),
            Layer::new(LayerPayload::Text(TextStyle::new("small")), Transform::default()),
        ],
    );

    let summary = repo.save(&design).unwrap();
    assert!(summary.externalized);

    let row = String::from_utf8(rows.get("design/design-big").unwrap().unwrap()).unwrap();
    assert!(!row.contains("svg_content"));
    assert!(!row.contains("<rect"));
    assert!(row.len() < 4096);

    let record = repo.load_record("design-big").unwrap();
    let blob_key = record.content.blob_key().expect("external content");
    assert!(blob_key.starts_with("design-blob/design-big/"));
    let blob = blobs.get(blob_key).unwrap().expect("blob written");
    let full: DesignDocument = serde_json::from_slice(&blob).unwrap();
    let mut merged = record.document.clone();
    merged.merge_payloads(&full).unwrap();
    assert_eq!(merged, DesignDocument::from_design(&design));

    assert_eq!(repo.load("design-big").unwrap(), design);
}

struct FailingStore;

impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }

    fn put(&self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("blob store offline".to_string()))
    }

    fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}

#[test]
fn invariant_blob_failure_leaves_no_row() {
    let rows = Arc::new(MemoryStore::new());
    let limits = LimitsConfig { externalize_threshold_bytes: 64, ..LimitsConfig::default() };
    let repo = DesignRepository::new(rows.clone(), Arc::new(FailingStore), limits);

    let err = repo.save(&design_with_layers(8)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    assert!(err.is_retryable());
    assert!(rows.is_empty());
}

/// Row store that refuses writes once `down` is set.
#[derive(Default)]
struct SwitchableRows {
    inner: MemoryStore,
    down: AtomicBool,
}

impl KeyValueStore for SwitchableRows {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("row store offline".to_string()));
        }
        self.inner.put(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key)
    }
}

fn resaved(design: &Design, count: usize) -> Design {
    let mut next = design_with_layers(count);
    next.id = design.id.clone();
    next
}

#[test]
fn invariant_external_resave_replaces_content() {
    let blobs = Arc::new(MemoryStore::new());
    let limits = LimitsConfig { externalize_threshold_bytes: 64, ..LimitsConfig::default() };
    let repo = DesignRepository::new(Arc::new(MemoryStore::new()), blobs.clone(), limits);

    let first = design_with_layers(8);
    assert!(repo.save(&first).unwrap().externalized);
    let second = resaved(&first, 12);
    assert!(repo.save(&second).unwrap().externalized);

    assert_eq!(repo.load(&first.id).unwrap(), second);
    assert_eq!(blobs.len(), 1, "superseded blob must be removed");
}

#[test]
fn invariant_row_failure_on_resave_keeps_last_good_design() {
    let rows = Arc::new(SwitchableRows::default());
    let blobs = Arc::new(MemoryStore::new());
    let limits = LimitsConfig { externalize_threshold_bytes: 64, ..LimitsConfig::default() };
    let repo = DesignRepository::new(rows.clone(), blobs.clone(), limits);

    let first = design_with_layers(8);
    repo.save(&first).unwrap();

    rows.down.store(true, Ordering::SeqCst);
    let err = repo.save(&resaved(&first, 12)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    assert!(err.is_retryable());
    assert_eq!(blobs.len(), 1);

    assert_eq!(repo.load(&first.id).unwrap(), first);
}

#[test]
fn invariant_oversized_design_is_refused() {
    let limits = LimitsConfig { externalize_threshold_bytes: 64, max_blob_bytes: 128, ..LimitsConfig::default() };
    let rows = Arc::new(MemoryStore::new());
    let repo = DesignRepository::new(rows.clone(), Arc::new(MemoryStore::new()), limits);
    let err = repo.save(&design_with_layers(8)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SizeLimitExceeded);
    assert!(rows.is_empty());
}

#[test]
fn invariant_remote_timeout_is_recoverable() {
    let fetcher = Arc::new(MemoryFetcher::new());
    let url = "https://cdn.example.com/tee-front.svg";
    fetcher.stall(url);

    let service = DesignService::new(
        &AppConfig::default(),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStore::new()),
        fetcher.clone(),
    );
    let template = Template::new("tee").with_view(TemplateView::remote(
        "tee",
        ViewName::Front,
        url.parse().unwrap(),
        FileType::Svg,
    ));
    service.register_template(&template).unwrap();

    let err = service.get_template_views("tee").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteTimeout);
    assert!(err.is_retryable());

    fetcher.insert(url, r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 300 400"/>"#);
    let views = service.get_template_views("tee").unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].metrics.as_ref().map(|m| m.height), Some(400.0));
}

#[test]
fn invariant_config_falls_back_to_defaults() {
    let cfg = AppConfig::from_toml("").unwrap();
    assert_eq!(cfg.limits.externalize_threshold_bytes, 1024 * 1024);
    assert_eq!(cfg.fetch.timeout(), Duration::from_millis(5_000));
}

#[test]
fn invariant_filesystem_service_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.limits.externalize_threshold_bytes = 256;

    let design = design_with_layers(12);
    {
        let service = DesignService::open(&config).unwrap();
        assert!(service.save_design(&design).unwrap().externalized);
    }

    let reopened = DesignService::open(&config).unwrap();
    assert_eq!(reopened.load_design(&design.id).unwrap(), design);
    assert!(reopened.delete_design(&design.id).unwrap());
    assert_eq!(reopened.load_design(&design.id).unwrap_err().kind(), ErrorKind::NotFound);
}
