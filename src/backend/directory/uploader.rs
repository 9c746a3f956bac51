//! Whole-document uploads
//!
//! A `docupload` session ends with a commit that turns the accumulated
//! export record and media blobs into a new document. The uploader owns that
//! step; the session only collects the pieces.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::backend::directory::blob::SharedBlobs;
use crate::backend::error::{BackendError, BackendResult};
use crate::shared::upload::UploadResult;

/// Creates documents from uploaded exports
#[async_trait]
pub trait DocumentUploader: Send + Sync {
    async fn upload(
        &self,
        user_id: &str,
        project_id: &str,
        export: Option<Value>,
        medias: Vec<(String, Bytes)>,
    ) -> BackendResult<UploadResult>;
}

pub type SharedUploader = Arc<dyn DocumentUploader>;

/// Writes uploads to blob storage below `uploads/<document id>/`
pub struct BlobDocumentUploader {
    blobs: SharedBlobs,
}

impl BlobDocumentUploader {
    pub fn new(blobs: SharedBlobs) -> Self {
        Self { blobs }
    }
}

#[async_trait]
impl DocumentUploader for BlobDocumentUploader {
    async fn upload(
        &self,
        user_id: &str,
        project_id: &str,
        export: Option<Value>,
        medias: Vec<(String, Bytes)>,
    ) -> BackendResult<UploadResult> {
        let Some(export) = export else {
            return Err(BackendError::protocol("upload committed without an export record"));
        };

        let document_id = uuid::Uuid::new_v4().to_string();
        let root = format!("uploads/{}", document_id);

        let manifest = serde_json::json!({
            "document_id": document_id,
            "project_id": project_id,
            "user_id": user_id,
            "medias": medias.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            "export": export,
        });
        let manifest = serde_json::to_vec(&manifest)?;

        for (name, data) in medias {
            self.blobs
                .put(&format!("{}/medias/{}", root, name), data, None)
                .await?;
        }
        // manifest last, so a listed manifest implies complete medias
        self.blobs
            .put(
                &format!("{}/document.json", root),
                Bytes::from(manifest),
                Some("application/json"),
            )
            .await?;

        tracing::info!(%document_id, user_id, project_id, "document uploaded");
        Ok(UploadResult { document_id })
    }
}
