/**
 * WebSocket Adapter
 *
 * `GET /api/ws?token=<jwt>` upgrades to a websocket and runs one
 * `SyncSession` over it. The socket is split: the session reads the stream
 * half and one writer task drains the session's outbox into the sink half.
 */

use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::backend::auth::{AuthUser, UserIdentity};
use crate::backend::server::services::SyncServices;
use crate::backend::server::state::AppState;
use crate::backend::session::client::SyncSession;
use crate::backend::session::outbox::Outbox;
use crate::shared::{Frame, TransData};

/// How long teardown waits for queued envelopes to flush
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upgrade an authenticated request to a sync session
pub async fn ws_handler(ws: WebSocketUpgrade, AuthUser(user): AuthUser, State(state): State<AppState>) -> Response {
    tracing::debug!(user_id = %user.user_id, "websocket upgrade");
    let services = state.services.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, services, user))
}

async fn serve_socket(socket: WebSocket, services: Arc<SyncServices>, user: UserIdentity) {
    let (sink, stream) = socket.split();
    let (outbox, receiver) = Outbox::channel(services.sync.outbox_capacity);
    let mut writer = tokio::spawn(write_envelopes(sink, receiver));

    let frames = stream
        .take_while(|message| ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| {
            ready(match message {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.to_string()))),
                Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data))),
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
        });

    let user_id = user.user_id.clone();
    tracing::info!(%user_id, "session opened");
    let session = SyncSession::new(services, user, outbox);
    let end = session.run(frames).await;

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        tracing::warn!(%user_id, "writer did not drain in time");
        writer.abort();
    }
    tracing::debug!(%user_id, reason = %end, "socket closed");
}

/// Serialize every queued envelope as one text message
async fn write_envelopes<S>(mut sink: S, mut receiver: mpsc::Receiver<TransData>)
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(envelope) = receiver.recv().await {
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(data_type = %envelope.data_type, error = %err, "failed to encode envelope");
                continue;
            }
        };
        if let Err(err) = sink.send(Message::Text(text.into())).await {
            tracing::debug!(error = %err, "websocket send failed");
            break;
        }
    }
    let _ = sink.close().await;
}
