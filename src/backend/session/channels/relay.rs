//! Push-only channels
//!
//! `comment` and `version` forward every message of one document topic to
//! the client as a server push. Inbound messages on them carry nothing the
//! server acts on and are dropped.

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::error::BackendResult;
use crate::backend::realtime::Topic;
use crate::backend::session::channel::{ChannelBuild, ChannelContext, ChannelHandler};
use crate::backend::session::task::{relay, BackgroundTask};
use crate::shared::{DataType, TransData};

pub struct RelayChannel {
    data_type: DataType,
    relay: BackgroundTask,
}

/// Open a relay of `topic` onto `data_type`; requires read permission
pub async fn open(ctx: &ChannelContext, data_type: DataType, topic: Topic) -> ChannelBuild {
    if !ctx.perm.can_read() {
        return ChannelBuild::NoPermission;
    }
    let subscription = match ctx.services.bus.subscribe(&topic).await {
        Ok(subscription) => subscription,
        Err(err) => return ChannelBuild::Failed(err),
    };

    let outbox = ctx.outbox.clone();
    let relay = relay("topic relay", subscription, move |payload| {
        let outbox = outbox.clone();
        async move { outbox.push(data_type, payload.as_ref()).await.is_ok() }
    });
    ChannelBuild::constructed(RelayChannel { data_type, relay })
}

#[async_trait]
impl ChannelHandler for RelayChannel {
    fn data_type(&self) -> DataType {
        self.data_type
    }

    async fn handle(&mut self, request: &TransData, _binary: Option<Bytes>) -> BackendResult<Option<TransData>> {
        tracing::debug!(channel = %self.data_type, data_id = %request.data_id, "ignoring inbound message");
        Ok(None)
    }

    async fn close(&mut self) -> BackendResult<()> {
        self.relay.close().await;
        Ok(())
    }
}
