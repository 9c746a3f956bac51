/**
 * Selection Channel
 *
 * Presence of the participants of a document.
 *
 * # Lifecycle
 *
 * 1. Push one `update` per live record, so the client starts from the
 *    current picture
 * 2. Store and announce the session's own entry
 * 3. Relay the presence topic, and every `presence_sweep` compare the users
 *    seen so far against the live records; a user whose entry lapsed gets
 *    a local `exit`, the same event an explicit close produces
 * 4. On close remove the own entry and announce the exit, once
 */

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::MissedTickBehavior;

use crate::backend::error::BackendResult;
use crate::backend::presence::PresenceService;
use crate::backend::realtime::{topics, Subscription};
use crate::backend::session::channel::{ChannelBuild, ChannelContext, ChannelHandler};
use crate::backend::session::outbox::Outbox;
use crate::backend::session::task::{BackgroundTask, CloseSignal};
use crate::shared::{DataType, SelectionData, SelectionOp, SelectionOpType, TransData};

pub struct SelectionChannel {
    ctx: ChannelContext,
    watcher: BackgroundTask,
    /// Unix milliseconds of the join, kept on every later update
    entered_at: i64,
    left: bool,
}

/// Open the channel; requires read permission
pub async fn open(ctx: &ChannelContext) -> ChannelBuild {
    if !ctx.perm.can_read() {
        return ChannelBuild::NoPermission;
    }
    match SelectionChannel::start(ctx.clone()).await {
        Ok(channel) => ChannelBuild::constructed(channel),
        Err(err) => ChannelBuild::Failed(err),
    }
}

async fn push_op(outbox: &Outbox, op: &SelectionOp) -> BackendResult<()> {
    outbox.push(DataType::Selection, serde_json::to_string(op)?).await
}

impl SelectionChannel {
    async fn start(ctx: ChannelContext) -> BackendResult<Self> {
        let document_id = ctx.document_id().to_string();
        let presence = ctx.services.presence.clone();
        let subscription = ctx.services.bus.subscribe(&topics::presence(&document_id)).await?;

        let mut known = HashSet::new();
        for record in presence.snapshot(&document_id).await? {
            known.insert(record.user_id.clone());
            push_op(&ctx.outbox, &SelectionOp::update(record)).await?;
        }

        let entered_at = chrono::Utc::now().timestamp_millis();
        let entry = Self::identify(&ctx, entered_at, SelectionData::default());
        presence.update(&document_id, &entry).await?;

        let watch = Watch {
            presence,
            outbox: ctx.outbox.clone(),
            document_id,
            own_user_id: ctx.user_id().to_string(),
            known,
        };
        let sweep = ctx.services.sync.presence_sweep();
        let watcher = BackgroundTask::spawn("selection watch", move |closed| watch.run(closed, subscription, sweep));

        Ok(Self {
            ctx,
            watcher,
            entered_at,
            left: false,
        })
    }

    /// Overwrite the identity fields with what the server knows
    fn identify(ctx: &ChannelContext, entered_at: i64, data: SelectionData) -> SelectionData {
        SelectionData {
            user_id: ctx.user.user_id.clone(),
            permission: ctx.perm,
            avatar: ctx.user.avatar.clone(),
            nickname: ctx.user.nickname.clone(),
            enter_time: entered_at,
            ..data
        }
    }
}

struct Watch {
    presence: PresenceService,
    outbox: Outbox,
    document_id: String,
    own_user_id: String,
    known: HashSet<String>,
}

impl Watch {
    async fn run(mut self, mut closed: CloseSignal, mut subscription: Subscription, sweep: Duration) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + sweep, sweep);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = closed.wait() => break,
                message = subscription.next() => match message {
                    Some(payload) => {
                        if !self.forward(&payload).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.sweep().await {
                        break;
                    }
                }
            }
        }
        tracing::debug!(document_id = %self.document_id, "selection watch stopped");
    }

    async fn forward(&mut self, payload: &str) -> bool {
        match serde_json::from_str::<SelectionOp>(payload) {
            Ok(op) => match op.op {
                SelectionOpType::Update => {
                    self.known.insert(op.user_id);
                }
                SelectionOpType::Exit => {
                    self.known.remove(&op.user_id);
                }
            },
            Err(err) => {
                tracing::warn!(document_id = %self.document_id, error = %err, "dropping malformed presence event");
                return true;
            }
        }
        self.outbox.push(DataType::Selection, payload).await.is_ok()
    }

    async fn sweep(&mut self) -> bool {
        let live: HashSet<String> = match self.presence.snapshot(&self.document_id).await {
            Ok(records) => records.into_iter().map(|record| record.user_id).collect(),
            Err(err) => {
                tracing::warn!(document_id = %self.document_id, error = %err, "presence sweep failed");
                return true;
            }
        };
        let lapsed: Vec<String> = self
            .known
            .iter()
            .filter(|user_id| **user_id != self.own_user_id && !live.contains(*user_id))
            .cloned()
            .collect();
        for user_id in lapsed {
            self.known.remove(&user_id);
            tracing::debug!(document_id = %self.document_id, %user_id, "presence entry lapsed");
            if push_op(&self.outbox, &SelectionOp::exit(user_id)).await.is_err() {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl ChannelHandler for SelectionChannel {
    fn data_type(&self) -> DataType {
        DataType::Selection
    }

    async fn handle(&mut self, request: &TransData, _binary: Option<Bytes>) -> BackendResult<Option<TransData>> {
        let update: SelectionData = request.payload()?;
        let record = Self::identify(&self.ctx, self.entered_at, update);
        self.ctx.services.presence.update(self.ctx.document_id(), &record).await?;
        Ok(Some(TransData::reply_to(request)))
    }

    async fn close(&mut self) -> BackendResult<()> {
        self.watcher.close().await;
        if self.left {
            return Ok(());
        }
        self.left = true;
        self.ctx
            .services
            .presence
            .leave(self.ctx.document_id(), self.ctx.user_id())
            .await
    }
}
