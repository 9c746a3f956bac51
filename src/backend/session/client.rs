/**
 * Connection Session
 *
 * One `SyncSession` per physical connection. It decodes inbound frames,
 * answers the control types itself and routes everything else to the
 * channel handler registered for the envelope's `type`.
 *
 * # Control Types
 *
 * - `heartbeat` - echoed back; the session also emits its own on an interval
 * - `bind` - resolves permission, document info and a storage credential
 * - `start` - (re)opens every document channel for the bound document
 *
 * # Teardown
 *
 * When the frame stream ends, fails, stays silent past the idle timeout or
 * produces too many undecodable frames in a row, every bound handler is
 * closed. Each close runs on its own, so an error or a panic in one does not
 * keep the others open.
 */

use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::{FutureExt, Stream, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};

use crate::backend::auth::UserIdentity;
use crate::backend::error::{BackendError, BackendResult};
use crate::backend::server::services::SyncServices;
use crate::backend::session::channel::{ChannelBuild, ChannelContext, ChannelHandler};
use crate::backend::session::channels::{open_channel, DocUploadChannel};
use crate::backend::session::outbox::Outbox;
use crate::shared::{
    BindRequest, BindResponse, DataType, DocumentInfo, DocumentVersion, Frame, Inbound, PermType, StartRequest,
    TransData,
};
use crate::shared::protocol::decode_frame;

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed the connection
    Closed,
    /// Nothing was received within the idle timeout
    IdleTimeout,
    /// Reading from the connection failed
    ReadError(String),
    /// Too many undecodable frames in a row
    ProtocolErrors,
    /// The connection's writer is gone
    WriterGone,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Closed => f.write_str("closed by client"),
            SessionEnd::IdleTimeout => f.write_str("idle timeout"),
            SessionEnd::ReadError(err) => write!(f, "read error: {}", err),
            SessionEnd::ProtocolErrors => f.write_str("too many protocol errors"),
            SessionEnd::WriterGone => f.write_str("writer gone"),
        }
    }
}

/// Document the session is bound to
#[derive(Debug, Clone)]
struct Binding {
    document: DocumentInfo,
    perm: PermType,
    version: Option<DocumentVersion>,
}

pub struct SyncSession {
    services: Arc<SyncServices>,
    user: UserIdentity,
    outbox: Outbox,
    binding: Option<Binding>,
    handlers: BTreeMap<DataType, Box<dyn ChannelHandler>>,
    protocol_errors: u32,
}

impl SyncSession {
    /// Create a session; `docupload` is bound right away
    pub fn new(services: Arc<SyncServices>, user: UserIdentity, outbox: Outbox) -> Self {
        let mut handlers: BTreeMap<DataType, Box<dyn ChannelHandler>> = BTreeMap::new();
        handlers.insert(
            DataType::DocUpload,
            Box::new(DocUploadChannel::new(services.clone(), user.user_id.clone())),
        );
        Self {
            services,
            user,
            outbox,
            binding: None,
            handlers,
            protocol_errors: 0,
        }
    }

    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    /// Bound document id, if any
    pub fn document_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|binding| binding.document.id.as_str())
    }

    /// Channels that currently have a handler
    pub fn bound_channels(&self) -> Vec<DataType> {
        self.handlers.keys().copied().collect()
    }

    /// Register a handler, closing the one it replaces
    pub async fn install(&mut self, handler: Box<dyn ChannelHandler>) {
        let data_type = handler.data_type();
        if let Some(previous) = self.handlers.insert(data_type, handler) {
            close_handler(data_type, previous).await;
        }
    }

    /// Serve `frames` until the connection ends, then tear down
    pub async fn run<S, E>(mut self, frames: S) -> SessionEnd
    where
        S: Stream<Item = Result<Frame, E>>,
        E: fmt::Display,
    {
        let sync = self.services.sync.clone();
        let mut frames = std::pin::pin!(frames);

        let heartbeat_every = sync.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let idle_timeout = sync.idle_timeout();
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        let end = loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(frame)) => {
                        idle.as_mut().reset(Instant::now() + idle_timeout);
                        if let Err(end) = self.receive(frame).await {
                            break end;
                        }
                    }
                    Some(Err(err)) => break SessionEnd::ReadError(err.to_string()),
                    None => break SessionEnd::Closed,
                },
                _ = heartbeat.tick() => {
                    if self.outbox.push(DataType::Heartbeat, "").await.is_err() {
                        break SessionEnd::WriterGone;
                    }
                }
                _ = &mut idle => break SessionEnd::IdleTimeout,
            }
        };

        tracing::info!(
            user_id = %self.user.user_id,
            document_id = self.document_id().unwrap_or_default(),
            reason = %end,
            "session ended"
        );
        self.shutdown().await;
        end
    }

    /// Decode one frame and answer it
    pub async fn receive(&mut self, frame: Frame) -> Result<(), SessionEnd> {
        let inbound = match decode_frame(frame) {
            Ok(inbound) => {
                self.protocol_errors = 0;
                inbound
            }
            Err(err) => {
                self.protocol_errors += 1;
                tracing::warn!(
                    user_id = %self.user.user_id,
                    error = %err,
                    count = self.protocol_errors,
                    "undecodable frame"
                );
                if self.protocol_errors > self.services.sync.max_protocol_errors {
                    return Err(SessionEnd::ProtocolErrors);
                }
                let reply = TransData::default().with_error(err.to_string(), BackendError::from(err).code());
                return self.outbox.send(reply).await.map_err(|_| SessionEnd::WriterGone);
            }
        };

        match self.dispatch(inbound).await {
            Some(reply) => self.outbox.send(reply).await.map_err(|_| SessionEnd::WriterGone),
            None => Ok(()),
        }
    }

    /// Route one envelope and produce its reply
    ///
    /// Every error becomes an error reply; nothing here ends the session.
    pub async fn dispatch(&mut self, inbound: Inbound) -> Option<TransData> {
        let Inbound { envelope: request, binary } = inbound;
        let result = match request.kind() {
            Some(DataType::Heartbeat) => Ok(Some(TransData::reply_to(&request).with_data(request.data.clone()))),
            Some(DataType::Bind) => self.bind(&request).await.map(Some),
            Some(DataType::Start) => self.start(&request).await.map(Some),
            Some(data_type) => match self.handlers.get_mut(&data_type) {
                Some(handler) => handler.handle(&request, binary).await,
                None => Err(BackendError::protocol(format!("no handler bound for {}", data_type))),
            },
            None => Err(BackendError::protocol(format!("no handler bound for {:?}", request.data_type))),
        };

        match result {
            Ok(reply) => reply,
            Err(err) => {
                if err.status_code().is_server_error() {
                    tracing::error!(user_id = %self.user.user_id, data_type = %request.data_type, error = %err, "request failed");
                } else {
                    tracing::debug!(user_id = %self.user.user_id, data_type = %request.data_type, error = %err, "request rejected");
                }
                Some(err.into_reply(&request))
            }
        }
    }

    async fn bind(&mut self, request: &TransData) -> BackendResult<TransData> {
        let bind: BindRequest = request.payload()?;
        if bind.document_id.is_empty() {
            return Err(BackendError::protocol("bind needs a document_id"));
        }
        let document_id = bind.document_id.as_str();
        let user_id = self.user.user_id.clone();

        let document = self
            .services
            .directory
            .document(document_id)
            .await?
            .ok_or_else(|| BackendError::not_found(document_id))?;

        let perm = self.services.permissions.resolve(document_id, &user_id).await?;
        let floor = PermType::clamp_floor(bind.perm_type);
        if perm < floor {
            return Err(BackendError::permission_denied(format!(
                "permission {:?} is below the requested {:?}",
                perm, floor
            )));
        }

        let reasons = self.services.directory.locked_reasons(document_id).await?;
        if !reasons.is_empty() && document.owner_id != user_id {
            return Err(BackendError::ContentLocked {
                document_id: document_id.to_string(),
                reasons,
            });
        }

        let access_key = self.services.credentials.issue(&document, &user_id).await?;
        let version = self.services.versions.latest(document_id).await?;
        let version_id = version
            .as_ref()
            .map(|version| version.version_id.clone())
            .unwrap_or_else(|| document.version_id.clone());

        if self.document_id().is_some_and(|bound| bound != document_id) {
            self.close_document_channels().await;
        }

        let doc_info = DocumentInfo {
            perm_type: perm,
            ..document
        };
        tracing::info!(%user_id, %document_id, perm = ?perm, %version_id, "session bound");
        self.binding = Some(Binding {
            document: doc_info.clone(),
            perm,
            version,
        });

        let response = BindResponse {
            doc_info,
            access_key,
            version_id,
        };
        Ok(TransData::reply_to(request).with_payload(&response)?)
    }

    async fn start(&mut self, request: &TransData) -> BackendResult<TransData> {
        let Some(binding) = self.binding.clone() else {
            return Err(BackendError::protocol("document not bound"));
        };
        let start: StartRequest = if request.data.trim().is_empty() {
            StartRequest::default()
        } else {
            request.payload()?
        };

        let ctx = ChannelContext {
            services: self.services.clone(),
            outbox: self.outbox.clone(),
            user: self.user.clone(),
            document: binding.document,
            perm: binding.perm,
            version: binding.version,
            last_cmd_version: start.last_cmd_version,
        };

        for data_type in DataType::STARTED {
            if let Some(previous) = self.handlers.remove(&data_type) {
                close_handler(data_type, previous).await;
            }
            match open_channel(data_type, &ctx).await {
                ChannelBuild::Constructed(handler) => {
                    self.handlers.insert(data_type, handler);
                }
                ChannelBuild::NoPermission => {
                    tracing::debug!(user_id = %ctx.user.user_id, channel = %data_type, "channel not permitted");
                }
                ChannelBuild::Failed(err) => {
                    tracing::warn!(user_id = %ctx.user.user_id, channel = %data_type, error = %err, "channel failed to open");
                }
            }
        }

        tracing::info!(
            user_id = %ctx.user.user_id,
            document_id = %ctx.document.id,
            last_cmd_version = start.last_cmd_version,
            channels = self.handlers.len(),
            "session started"
        );
        Ok(TransData::reply_to(request))
    }

    async fn close_document_channels(&mut self) {
        for data_type in DataType::STARTED {
            if let Some(handler) = self.handlers.remove(&data_type) {
                close_handler(data_type, handler).await;
            }
        }
    }

    /// Close every handler, including `docupload`
    pub async fn shutdown(&mut self) {
        let handlers = std::mem::take(&mut self.handlers);
        for (data_type, handler) in handlers {
            close_handler(data_type, handler).await;
        }
    }
}

/// Close one handler; errors and panics are logged and contained
async fn close_handler(data_type: DataType, mut handler: Box<dyn ChannelHandler>) {
    match AssertUnwindSafe(handler.close()).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(channel = %data_type, error = %err, "channel close failed"),
        Err(_) => tracing::error!(channel = %data_type, "channel close panicked"),
    }
}
