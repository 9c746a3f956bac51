/**
 * Whole-Document Upload
 *
 * Bound on every connection before any document is, so a client can create
 * a document from a local export. The upload is a sequence of frames that
 * share one `document_id`:
 *
 * - a frame with `export` stores the export record
 * - a binary frame with `media` adds one media blob; a repeated name is
 *   acknowledged and skipped
 * - a frame with `commit` hands everything to the uploader and replies with
 *   the created document id
 *
 * A frame naming another `document_id` starts over.
 */

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::backend::error::{BackendError, BackendResult};
use crate::backend::server::services::SyncServices;
use crate::backend::session::channel::ChannelHandler;
use crate::shared::upload::UploadHeader;
use crate::shared::{DataType, TransData};

#[derive(Debug, Default)]
struct PendingUpload {
    document_id: String,
    project_id: String,
    export: Option<Value>,
    medias: Vec<(String, Bytes)>,
}

impl PendingUpload {
    fn has_media(&self, name: &str) -> bool {
        self.medias.iter().any(|(existing, _)| existing == name)
    }
}

pub struct DocUploadChannel {
    services: Arc<SyncServices>,
    user_id: String,
    pending: Option<PendingUpload>,
}

impl DocUploadChannel {
    pub fn new(services: Arc<SyncServices>, user_id: impl Into<String>) -> Self {
        Self {
            services,
            user_id: user_id.into(),
            pending: None,
        }
    }

    fn pending_for(&mut self, header: &UploadHeader) -> &mut PendingUpload {
        let restart = self
            .pending
            .as_ref()
            .map_or(true, |pending| pending.document_id != header.document_id);
        if restart {
            tracing::debug!(document_id = %header.document_id, "starting document upload");
        }
        let pending = match self.pending.take() {
            Some(pending) if !restart => pending,
            _ => PendingUpload {
                document_id: header.document_id.clone(),
                ..PendingUpload::default()
            },
        };
        self.pending.insert(pending)
    }
}

#[async_trait]
impl ChannelHandler for DocUploadChannel {
    fn data_type(&self) -> DataType {
        DataType::DocUpload
    }

    async fn handle(&mut self, request: &TransData, binary: Option<Bytes>) -> BackendResult<Option<TransData>> {
        let header: UploadHeader = request.payload()?;
        let reply = TransData::reply_to(request);
        let pending = self.pending_for(&header);
        if !header.project_id.is_empty() {
            pending.project_id = header.project_id.clone();
        }

        if let Some(export) = header.export {
            pending.export = Some(export);
            return Ok(Some(reply));
        }

        if let (Some(name), Some(data)) = (header.media.filter(|name| !name.is_empty()), binary) {
            if !pending.has_media(&name) {
                pending.medias.push((name, data));
            }
            return Ok(Some(reply));
        }

        if header.commit && pending.export.is_some() {
            let Some(upload) = self.pending.take() else {
                return Err(BackendError::state("upload state vanished"));
            };
            let result = self
                .services
                .uploader
                .upload(&self.user_id, &upload.project_id, upload.export, upload.medias)
                .await?;
            tracing::info!(user_id = %self.user_id, document_id = %result.document_id, "document uploaded");
            return Ok(Some(reply.with_payload(&result)?));
        }

        Err(BackendError::protocol("invalid upload data"))
    }

    async fn close(&mut self) -> BackendResult<()> {
        self.pending = None;
        Ok(())
    }
}
