/**
 * Operation Channel
 *
 * Commits, explicit pulls, and the live stream of committed batches.
 *
 * On open the channel subscribes to the document's operation topic first
 * and only then pulls the catch-up range. A batch committed in between
 * reaches both paths; the relay drops every item at or below the catch-up
 * head, so the client sees each version exactly once.
 */

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::error::BackendResult;
use crate::backend::oplog::CommitOutcome;
use crate::backend::realtime::topics;
use crate::backend::session::channel::{ChannelBuild, ChannelContext, ChannelHandler};
use crate::backend::session::outbox::Outbox;
use crate::backend::session::task::{relay, BackgroundTask};
use crate::shared::{CmdItem, DataType, DuplicateReply, OpPush, OpPushKind, OpRequest, TransData};

/// `code` of a reply carrying an already committed entry
pub const CODE_DUPLICATE: i32 = 409;

pub struct OpChannel {
    ctx: ChannelContext,
    relay: BackgroundTask,
}

/// Open the channel; requires read permission
pub async fn open(ctx: &ChannelContext) -> ChannelBuild {
    if !ctx.perm.can_read() {
        return ChannelBuild::NoPermission;
    }
    match OpChannel::start(ctx.clone()).await {
        Ok(channel) => ChannelBuild::constructed(channel),
        Err(err) => ChannelBuild::Failed(err),
    }
}

async fn push_items(outbox: &Outbox, items: &[CmdItem]) -> BackendResult<()> {
    let push = OpPush::new(OpPushKind::Update, items)?;
    outbox.push(DataType::Op, serde_json::to_string(&push)?).await
}

impl OpChannel {
    async fn start(ctx: ChannelContext) -> BackendResult<Self> {
        let document_id = ctx.document_id().to_string();
        let subscription = ctx.services.bus.subscribe(&topics::operations(&document_id)).await?;

        let known = match ctx.last_cmd_version {
            0 => ctx.version.as_ref().map(|version| version.last_cmd_ver_id).unwrap_or(0),
            last => last,
        };
        let items = ctx.services.oplog.pull(&document_id, known + 1, 0).await?;
        let head = items.last().map(|item| item.ver_id).unwrap_or(known);
        tracing::debug!(%document_id, from = known + 1, head, count = items.len(), "op channel caught up");
        push_items(&ctx.outbox, &items).await?;

        let outbox = ctx.outbox.clone();
        let relay = relay("op relay", subscription, move |payload| {
            let outbox = outbox.clone();
            let document_id = document_id.clone();
            async move {
                let mut items: Vec<CmdItem> = match serde_json::from_str(&payload) {
                    Ok(items) => items,
                    Err(err) => {
                        tracing::warn!(%document_id, error = %err, "dropping malformed op broadcast");
                        return true;
                    }
                };
                items.retain(|item| item.ver_id > head);
                if items.is_empty() {
                    return true;
                }
                push_items(&outbox, &items).await.is_ok()
            }
        });

        Ok(Self { ctx, relay })
    }

    async fn commit(&self, request: &TransData, cmds: Vec<crate::shared::Cmd>) -> BackendResult<TransData> {
        let reply = TransData::reply_to(request);
        let outcome = self
            .ctx
            .services
            .oplog
            .commit(self.ctx.document_id(), self.ctx.user_id(), self.ctx.perm, cmds)
            .await?;
        match outcome {
            CommitOutcome::Committed(_) => Ok(reply),
            CommitOutcome::Duplicate(existing) => Ok(reply
                .with_payload(&DuplicateReply::new(existing))?
                .with_error("duplicate", CODE_DUPLICATE)),
        }
    }

    async fn pull(&self, request: &TransData, from: u64, to: u64) -> BackendResult<TransData> {
        let items = self.ctx.services.oplog.pull(self.ctx.document_id(), from, to).await?;
        let mut push = OpPush::new(OpPushKind::PullCmdsResult, &items)?;
        push.from = from;
        push.to = to;
        Ok(TransData::reply_to(request).with_payload(&push)?)
    }
}

#[async_trait]
impl ChannelHandler for OpChannel {
    fn data_type(&self) -> DataType {
        DataType::Op
    }

    async fn handle(&mut self, request: &TransData, _binary: Option<Bytes>) -> BackendResult<Option<TransData>> {
        let reply = match request.payload::<OpRequest>()? {
            OpRequest::Commit { cmds } => self.commit(request, cmds.into_cmds()?).await?,
            OpRequest::PullCmds { from, to } => self.pull(request, from, to).await?,
        };
        Ok(Some(reply))
    }

    async fn close(&mut self) -> BackendResult<()> {
        self.relay.close().await;
        Ok(())
    }
}
