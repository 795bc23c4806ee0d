//! Transport Actions - Request/Response Surface
//!
//! Requests are `{"action": "<name>", ...body}`. Responses are
//! `{"success": true, "data": ..}` or
//! `{"success": false, "error": {"kind", "message", "retryable"}}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::document::DesignDocument;
use crate::error::{CoreError, ErrorKind};
use crate::model::{self, DesignId, TemplateId};
use crate::service::DesignService;
use crate::text::TextUpdates;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    IngestUpload {
        filename: String,
        content: String,
    },
    ExtractText {
        svg_content: String,
    },
    UpdateText {
        svg_content: String,
        updates: TextUpdates,
    },
    SaveDesign {
        /// Omitted for a first save; a fresh id is generated.
        #[serde(default)]
        design_id: Option<DesignId>,
        template_id: TemplateId,
        design: DesignDocument,
    },
    LoadDesign {
        design_id: DesignId,
    },
    DeleteDesign {
        design_id: DesignId,
    },
    GetTemplateViews {
        template_id: TemplateId,
    },
}

impl ActionRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ActionRequest::IngestUpload { .. } => "ingest_upload",
            ActionRequest::ExtractText { .. } => "extract_text",
            ActionRequest::UpdateText { .. } => "update_text",
            ActionRequest::SaveDesign { .. } => "save_design",
            ActionRequest::LoadDesign { .. } => "load_design",
            ActionRequest::DeleteDesign { .. } => "delete_design",
            ActionRequest::GetTemplateViews { .. } => "get_template_views",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&CoreError> for ActionError {
    fn from(err: &CoreError) -> Self {
        Self { kind: err.kind(), message: err.to_string(), retryable: err.is_retryable() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

impl ActionResponse {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn failed(error: ActionError) -> Self {
        Self { success: false, data: None, error: Some(error) }
    }
}

impl DesignService {
    /// Run one action. Failures become an error body, never a panic.
    pub fn dispatch(&self, request: ActionRequest) -> ActionResponse {
        let action = request.name();
        match self.run(request) {
            Ok(data) => ActionResponse::ok(data),
            Err(err) => {
                warn!(action, kind = ?err.kind(), error = %err, "action failed");
                ActionResponse::failed(ActionError::from(&err))
            }
        }
    }

    /// Parse and run a raw JSON request body.
    pub fn dispatch_json(&self, body: &str) -> ActionResponse {
        match serde_json::from_str::<ActionRequest>(body) {
            Ok(request) => self.dispatch(request),
            Err(err) => ActionResponse::failed(ActionError {
                kind: ErrorKind::InvalidRequest,
                message: format!("Invalid request: {err}"),
                retryable: false,
            }),
        }
    }

    fn run(&self, request: ActionRequest) -> Result<Value, CoreError> {
        let data = match request {
            ActionRequest::IngestUpload { filename, content } => {
                serde_json::to_value(self.ingest_upload(content.as_bytes(), &filename)?)?
            }
            ActionRequest::ExtractText { svg_content } => {
                serde_json::to_value(self.extract_text(&svg_content)?)?
            }
            ActionRequest::UpdateText { svg_content, updates } => {
                serde_json::to_value(self.update_text(&svg_content, &updates)?)?
            }
            ActionRequest::SaveDesign { design_id, template_id, design } => {
                let design_id = design_id.unwrap_or_else(model::generate_design_id);
                let design = design.into_design(design_id, template_id)?;
                serde_json::to_value(self.save_design(&design)?)?
            }
            ActionRequest::LoadDesign { design_id } => {
                let design = self.load_design(&design_id)?;
                json!({
                    "designId": design.id,
                    "templateId": design.template_id,
                    "design": DesignDocument::from_design(&design),
                })
            }
            ActionRequest::DeleteDesign { design_id } => {
                json!({ "deleted": self.delete_design(&design_id)? })
            }
            ActionRequest::GetTemplateViews { template_id } => {
                json!({ "views": self.get_template_views(&template_id)? })
            }
        };
        Ok(data)
    }
}
