//! Media and thumbnail uploads of a bound document
//!
//! Both arrive as binary frames. The channel is open to readers, but every
//! upload re-resolves the user's permission and needs `Editable`, so a
//! grant revoked mid-session stops further writes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::error::{BackendError, BackendResult};
use crate::backend::session::channel::{ChannelBuild, ChannelContext, ChannelHandler};
use crate::shared::upload::{ResourceHeader, ThumbnailHeader};
use crate::shared::{DataType, TransData};

pub struct ResourceChannel {
    ctx: ChannelContext,
    data_type: DataType,
}

/// Open the `resource` or `thumbnail` channel
pub async fn open(ctx: &ChannelContext, data_type: DataType) -> ChannelBuild {
    if !ctx.perm.can_read() {
        return ChannelBuild::NoPermission;
    }
    ChannelBuild::constructed(ResourceChannel {
        ctx: ctx.clone(),
        data_type,
    })
}

/// Reject names that would leave the document's folder
fn validate_name(name: &str) -> BackendResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(BackendError::protocol(format!("invalid file name {:?}", name)));
    }
    Ok(())
}

impl ResourceChannel {
    async fn require_editable(&self) -> BackendResult<()> {
        if !self.ctx.current_perm().await?.can_edit() {
            return Err(BackendError::permission_denied("uploads need edit permission"));
        }
        Ok(())
    }

    async fn account(&self, len: usize) {
        if let Err(err) = self.ctx.services.directory.add_size(self.ctx.document_id(), len as i64).await {
            tracing::warn!(document_id = %self.ctx.document_id(), error = %err, "failed to account upload size");
        }
    }

    async fn store_media(&self, header: ResourceHeader, data: Bytes) -> BackendResult<()> {
        validate_name(&header.name)?;
        self.require_editable().await?;

        let key = format!("{}{}", self.ctx.document.media_prefix(), header.name);
        let len = data.len();
        self.ctx.services.blobs.put(&key, data, None).await?;
        self.account(len).await;
        tracing::info!(document_id = %self.ctx.document_id(), key = %key, bytes = len, "stored media");
        Ok(())
    }

    /// A document has one thumbnail; earlier ones are removed first
    async fn store_thumbnail(&self, header: ThumbnailHeader, data: Bytes) -> BackendResult<()> {
        validate_name(&header.name)?;
        self.require_editable().await?;

        let blobs = &self.ctx.services.blobs;
        let prefix = self.ctx.document.thumbnail_prefix();
        for stale in blobs.list(&prefix).await? {
            if let Err(err) = blobs.delete(&stale).await {
                tracing::warn!(key = %stale, error = %err, "failed to delete old thumbnail");
            }
        }

        let key = format!("{}{}", prefix, header.name);
        let len = data.len();
        let content_type = Some(header.content_type.as_str()).filter(|value| !value.is_empty());
        blobs.put(&key, data, content_type).await?;
        self.account(len).await;
        tracing::info!(document_id = %self.ctx.document_id(), key = %key, bytes = len, "stored thumbnail");
        Ok(())
    }
}

#[async_trait]
impl ChannelHandler for ResourceChannel {
    fn data_type(&self) -> DataType {
        self.data_type
    }

    async fn handle(&mut self, request: &TransData, binary: Option<Bytes>) -> BackendResult<Option<TransData>> {
        let Some(data) = binary else {
            return Err(BackendError::protocol(format!("{} upload needs a binary frame", self.data_type)));
        };
        match self.data_type {
            DataType::Thumbnail => self.store_thumbnail(request.payload()?, data).await?,
            _ => self.store_media(request.payload()?, data).await?,
        }
        Ok(Some(TransData::reply_to(request)))
    }

    async fn close(&mut self) -> BackendResult<()> {
        Ok(())
    }
}
