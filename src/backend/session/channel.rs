/**
 * Channel Handlers
 *
 * Each logical channel of a session (`op`, `comment`, `selection`, ...) is
 * served by one `ChannelHandler`. Opening a channel yields a `ChannelBuild`
 * with three distinct outcomes, so the session never stores a handler that
 * cannot be used:
 *
 * - `NoPermission` - the user may not use the channel; nothing is stored
 * - `Constructed` - a working handler
 * - `Failed` - construction hit an error; nothing is stored
 */

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::auth::UserIdentity;
use crate::backend::error::{BackendError, BackendResult};
use crate::backend::server::services::SyncServices;
use crate::backend::session::outbox::Outbox;
use crate::shared::{DataType, DocumentInfo, DocumentVersion, PermType, TransData};

/// Server side of one logical channel
#[async_trait]
pub trait ChannelHandler: Send {
    fn data_type(&self) -> DataType;

    /// Serve one inbound envelope
    ///
    /// `Ok(Some(reply))` is sent back, `Ok(None)` sends nothing, and an
    /// error becomes an error reply to `request`.
    async fn handle(&mut self, request: &TransData, binary: Option<Bytes>) -> BackendResult<Option<TransData>>;

    /// Stop background work and release shared state; idempotent
    async fn close(&mut self) -> BackendResult<()>;
}

/// Outcome of opening a channel
pub enum ChannelBuild {
    NoPermission,
    Constructed(Box<dyn ChannelHandler>),
    Failed(BackendError),
}

impl ChannelBuild {
    pub fn constructed(handler: impl ChannelHandler + 'static) -> Self {
        ChannelBuild::Constructed(Box::new(handler))
    }
}

impl std::fmt::Debug for ChannelBuild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelBuild::NoPermission => f.write_str("NoPermission"),
            ChannelBuild::Constructed(handler) => write!(f, "Constructed({})", handler.data_type()),
            ChannelBuild::Failed(err) => write!(f, "Failed({})", err),
        }
    }
}

/// What a bound session knows, handed to every channel on `start`
#[derive(Clone)]
pub struct ChannelContext {
    pub services: Arc<SyncServices>,
    pub outbox: Outbox,
    pub user: UserIdentity,
    pub document: DocumentInfo,
    /// Effective permission resolved at bind
    pub perm: PermType,
    /// Version pointer the client was bound to
    pub version: Option<DocumentVersion>,
    /// Highest version the client already holds
    pub last_cmd_version: u64,
}

impl ChannelContext {
    pub fn document_id(&self) -> &str {
        &self.document.id
    }

    pub fn user_id(&self) -> &str {
        &self.user.user_id
    }

    /// Re-resolve the user's permission; uploads check it per request
    pub async fn current_perm(&self) -> BackendResult<PermType> {
        self.services
            .permissions
            .resolve(self.document_id(), self.user_id())
            .await
    }
}
