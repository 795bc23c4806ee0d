//! Design Repository - Rows and Externalized Blobs
//!
//! Every save writes one row holding the metadata-only document. Small
//! designs also carry the full document inline. Large ones put it in a blob
//! that is written, and must succeed, before the row that points at it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::LimitsConfig;
use crate::document::{self, DesignDocument, PlannedContent};
use crate::error::CoreError;
use crate::hashing::{compute_document_hash, sha256_hex, verify_sha256};
use crate::model::{Design, DesignId, TemplateId};
use crate::store::{self, KeyValueStore};
use crate::ENGINE_VERSION;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "storage", rename_all = "snake_case")]
pub enum StoredContent {
    Inline {
        document: DesignDocument,
    },
    External {
        blob_key: String,
        sha256: String,
        size_bytes: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignRecord {
    pub design_id: DesignId,
    pub template_id: TemplateId,
    pub format_version: Version,
    pub engine_version: String,
    pub saved_at: DateTime<Utc>,
    /// Fingerprint of the full document.
    pub document_hash: String,
    /// Metadata-only document. Never carries svg content.
    pub document: DesignDocument,
    pub content: StoredContent,
}

impl StoredContent {
    pub fn blob_key(&self) -> Option<&str> {
        match self {
            StoredContent::Inline { .. } => None,
            StoredContent::External { blob_key, .. } => Some(blob_key),
        }
    }
}

impl DesignRecord {
    pub fn is_external(&self) -> bool {
        matches!(self.content, StoredContent::External { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSummary {
    pub design_id: DesignId,
    pub externalized: bool,
    pub size_bytes: usize,
    pub document_hash: String,
    pub saved_at: DateTime<Utc>,
}

pub struct DesignRepository {
    rows: Arc<dyn KeyValueStore>,
    blobs: Arc<dyn KeyValueStore>,
    limits: LimitsConfig,
}

impl DesignRepository {
    pub fn new(rows: Arc<dyn KeyValueStore>, blobs: Arc<dyn KeyValueStore>, limits: LimitsConfig) -> Self {
        Self { rows, blobs, limits }
    }

    pub fn save(&self, design: &Design) -> Result<SaveSummary, CoreError> {
        let plan = document::plan_save(design, &self.limits)?;
        let externalized = plan.is_external();
        let size_bytes = plan.size_bytes;
        let document_hash = compute_document_hash(&plan.full)?;
        let previous_blob = self.committed_blob_key(&design.id);

        let content = match plan.content {
            PlannedContent::Inline(document) => StoredContent::Inline { document },
            PlannedContent::External { bytes } => {
                let sha256 = sha256_hex(&bytes);
                let blob_key = store::design_blob_key(&design.id, &sha256);
                self.blobs
                    .put(&blob_key, &bytes)
                    .map_err(|source| CoreError::persistence(&blob_key, source))?;
                StoredContent::External { blob_key, sha256, size_bytes: bytes.len() }
            }
        };
        let new_blob = content.blob_key().map(str::to_string);

        let saved_at = Utc::now();
        let record = DesignRecord {
            design_id: design.id.clone(),
            template_id: design.template_id.clone(),
            format_version: document::design_format_version(),
            engine_version: ENGINE_VERSION.to_string(),
            saved_at,
            document_hash: document_hash.clone(),
            document: plan.metadata,
            content,
        };

        let row_key = store::design_key(&design.id);
        let committed = serde_json::to_vec(&record).map_err(CoreError::from).and_then(|row| {
            self.rows
                .put(&row_key, &row)
                .map_err(|source| CoreError::persistence(&row_key, source))
        });
        if let Err(err) = committed {
            // The previous row is still live and keeps its own blob.
            if new_blob.is_some() && new_blob != previous_blob {
                self.discard_blob(&design.id, new_blob.as_deref());
            }
            return Err(err);
        }

        if previous_blob != new_blob {
            self.discard_blob(&design.id, previous_blob.as_deref());
        }

        info!(design_id = %design.id, externalized, size_bytes, "saved design");
        Ok(SaveSummary { design_id: design.id.clone(), externalized, size_bytes, document_hash, saved_at })
    }

    /// Row only. The blob, if any, is not read.
    pub fn load_record(&self, design_id: &str) -> Result<DesignRecord, CoreError> {
        let row_key = store::design_key(design_id);
        let row = self
            .rows
            .get(&row_key)
            .map_err(|source| CoreError::persistence(&row_key, source))?
            .ok_or_else(|| CoreError::DesignNotFound(design_id.to_string()))?;
        let record: DesignRecord = serde_json::from_slice(&row)?;
        check_format(&record.format_version)?;
        Ok(record)
    }

    pub fn load(&self, design_id: &str) -> Result<Design, CoreError> {
        let record = self.load_record(design_id)?;

        let full = match &record.content {
            StoredContent::Inline { document } => document.clone(),
            StoredContent::External { blob_key, sha256, size_bytes } => {
                let bytes = self
                    .blobs
                    .get(blob_key)
                    .map_err(|source| CoreError::persistence(blob_key, source))?
                    .ok_or_else(|| CoreError::BlobMissing { key: blob_key.clone() })?;
                if bytes.len() != *size_bytes || !verify_sha256(&bytes, sha256) {
                    warn!(design_id, blob_key = %blob_key, "design blob failed integrity check");
                    return Err(CoreError::BlobCorrupt { key: blob_key.clone() });
                }
                serde_json::from_slice(&bytes)?
            }
        };

        let corrupt = |source| CoreError::CorruptRecord { design_id: design_id.to_string(), source };
        let mut document = record.document;
        document.merge_payloads(&full).map_err(corrupt)?;
        if !compute_document_hash(&document)?.eq_ignore_ascii_case(&record.document_hash) {
            warn!(design_id, "merged design does not match its recorded hash");
            return Err(CoreError::DocumentHashMismatch { design_id: design_id.to_string() });
        }
        document.into_design(record.design_id, record.template_id).map_err(corrupt)
    }

    /// Row first, so no reader sees a row whose blob is already gone.
    pub fn delete(&self, design_id: &str) -> Result<bool, CoreError> {
        let row_key = store::design_key(design_id);
        let blob = self.committed_blob_key(design_id);
        let removed = self
            .rows
            .delete(&row_key)
            .map_err(|source| CoreError::persistence(&row_key, source))?;
        if let Some(blob_key) = blob {
            self.blobs
                .delete(&blob_key)
                .map_err(|source| CoreError::persistence(&blob_key, source))?;
        }
        if removed {
            info!(design_id, "deleted design");
        }
        Ok(removed)
    }

    /// Blob referenced by the currently committed row, if any. An unreadable
    /// row counts as none.
    fn committed_blob_key(&self, design_id: &str) -> Option<String> {
        let row = self.rows.get(&store::design_key(design_id)).ok()??;
        let record: DesignRecord = serde_json::from_slice(&row).ok()?;
        record.content.blob_key().map(str::to_string)
    }

    fn discard_blob(&self, design_id: &str, blob_key: Option<&str>) {
        let Some(blob_key) = blob_key else {
            return;
        };
        if let Err(err) = self.blobs.delete(blob_key) {
            warn!(design_id, blob_key, error = %err, "failed to remove unreferenced design blob");
        }
    }
}

fn check_format(found: &Version) -> Result<(), CoreError> {
    let expected = document::design_format_version();
    if found.major == expected.major {
        Ok(())
    } else {
        Err(CoreError::IncompatibleFormat { found: found.to_string(), expected: expected.to_string() })
    }
}
