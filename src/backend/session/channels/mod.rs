//! Channel implementations
//!
//! `open_channel` builds the handler for one of the channels `start`
//! instantiates. `docupload` is not among them; the session binds it when
//! the connection opens.

use crate::backend::error::BackendError;
use crate::backend::realtime::topics;
use crate::backend::session::channel::{ChannelBuild, ChannelContext};
use crate::shared::DataType;

pub mod docupload;
pub mod op;
pub mod relay;
pub mod resource;
pub mod selection;

pub use docupload::DocUploadChannel;
pub use op::{OpChannel, CODE_DUPLICATE};
pub use relay::RelayChannel;
pub use resource::ResourceChannel;
pub use selection::SelectionChannel;

/// Build the handler of a started channel
pub async fn open_channel(data_type: DataType, ctx: &ChannelContext) -> ChannelBuild {
    match data_type {
        DataType::Op => op::open(ctx).await,
        DataType::Comment => relay::open(ctx, DataType::Comment, topics::comments(ctx.document_id())).await,
        DataType::Version => relay::open(ctx, DataType::Version, topics::version_change(ctx.document_id())).await,
        DataType::Selection => selection::open(ctx).await,
        DataType::Resource | DataType::Thumbnail => resource::open(ctx, data_type).await,
        other => ChannelBuild::Failed(BackendError::protocol(format!("{} is not a document channel", other))),
    }
}
