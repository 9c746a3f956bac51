//! The websocket route against a real listener

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::common::*;
use xfsync::backend::auth::create_token;
use xfsync::backend::routes::create_router;
use xfsync::backend::server::{AppState, SyncServices};
use xfsync::shared::protocol::encode_binary;
use xfsync::shared::{BindResponse, DataType, TransData};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(services: Arc<SyncServices>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(AppState::new(services, SECRET));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, user_id: &str) -> Socket {
    let token = create_token(user_id, &format!("{}@example.com", user_id), None, SECRET).unwrap();
    let url = format!("ws://{}/api/ws?token={}", addr, token);
    let (socket, _) = tokio_tungstenite::connect_async(&url).await.expect("upgrade succeeds");
    socket
}

async fn send(socket: &mut Socket, envelope: &TransData) {
    let text = serde_json::to_string(envelope).unwrap();
    socket.send(Message::text(text)).await.unwrap();
}

/// Read envelopes until the one answering `data_id`
async fn reply(socket: &mut Socket, data_id: &str) -> TransData {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("reply in time")
            .expect("socket open")
            .expect("frame reads");
        if let Message::Text(text) = message {
            let envelope: TransData = serde_json::from_str(text.as_str()).unwrap();
            if envelope.data_id == data_id {
                return envelope;
            }
        }
    }
}

#[tokio::test]
async fn test_bind_over_websocket() {
    let addr = serve(services()).await;
    let mut socket = connect(addr, EDITOR).await;

    let bind = TransData::new(DataType::Bind, "b1", serde_json::json!({ "document_id": DOC }).to_string());
    send(&mut socket, &bind).await;
    let bound: BindResponse = reply(&mut socket, "b1").await.payload().unwrap();
    assert_eq!(bound.doc_info.id, DOC);

    let heartbeat = TransData::new(DataType::Heartbeat, "h1", "hello");
    send(&mut socket, &heartbeat).await;
    assert_eq!(reply(&mut socket, "h1").await.data, "hello");

    socket.close(None).await.unwrap();
}

#[tokio::test]
async fn test_binary_upload_over_websocket() {
    let addr = serve(services()).await;
    let mut socket = connect(addr, EDITOR).await;

    send(&mut socket, &TransData::new(DataType::Bind, "b1", serde_json::json!({ "document_id": DOC }).to_string())).await;
    reply(&mut socket, "b1").await;
    send(&mut socket, &TransData::new(DataType::Start, "s1", "")).await;
    assert!(!reply(&mut socket, "s1").await.is_error());

    let header = TransData::new(DataType::Resource, "r1", serde_json::json!({ "name": "a.png" }).to_string());
    let frame = encode_binary(&header, b"bytes").unwrap();
    socket.send(Message::binary(frame)).await.unwrap();
    let uploaded = reply(&mut socket, "r1").await;
    assert!(!uploaded.is_error(), "upload failed: {:?}", uploaded);

    socket.close(None).await.unwrap();
}

#[tokio::test]
async fn test_upgrade_without_token_is_rejected() {
    let addr = serve(services()).await;
    let err = tokio_tungstenite::connect_async(format!("ws://{}/api/ws", addr))
        .await
        .expect_err("upgrade refused");
    match err {
        WsError::Http(response) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("expected an HTTP rejection, got {:?}", other),
    }

    let err = tokio_tungstenite::connect_async(format!("ws://{}/api/ws?token=forged", addr))
        .await
        .expect_err("upgrade refused");
    assert!(matches!(err, WsError::Http(response) if response.status().as_u16() == 401));
}

#[tokio::test]
async fn test_health_and_fallback() {
    let addr = serve(services()).await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let missing = client.get(format!("http://{}/nope", addr)).send().await.unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}
