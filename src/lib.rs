//! Tailor Core - Garment Design Engine
//!
//! # Ground Rules
//! 1. Uploaded SVG Is Hostile Until Sanitized
//! 2. Sanitizing Never Fails, It Defangs or Substitutes
//! 3. Text Nodes Keep Their Ids Across Extractions
//! 4. Views Never Share Layers
//! 5. A Row Never Points at a Blob That Was Not Written

pub mod actions;
pub mod config;
pub mod document;
pub mod dom;
pub mod error;
pub mod fetch;
pub mod hashing;
pub mod metadata;
pub mod model;
pub mod repository;
pub mod sanitize;
pub mod service;
pub mod session;
pub mod store;
pub mod templates;
pub mod text;
pub mod validation;

pub use actions::{ActionError, ActionRequest, ActionResponse};
pub use config::AppConfig;
pub use document::{DesignDocument, ElementPayload, ElementRecord};
pub use error::{CoreError, ErrorKind};
pub use metadata::{extract_metrics, SvgMetrics};
pub use model::{Design, Layer, LayerId, LayerKind, LayerPayload, TextStyle, Transform, ViewName};
pub use repository::{DesignRecord, DesignRepository, SaveSummary};
pub use sanitize::{sanitize, sanitize_report, SanitizeOutcome, PLACEHOLDER_SVG};
pub use service::{DesignService, ExtractTextResult, TemplateUpload, UploadResult};
pub use session::{DesignSession, LayerError, ViewState};
pub use store::{FsStore, KeyValueStore, MemoryStore};
pub use templates::{Template, TemplateCatalog, TemplateView};
pub use text::{extract_text, update_text, TextNode, TextNodeId, TextUpdates, UpdateStatus};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESIGN_FORMAT_VERSION: &str = "1.0.0";
