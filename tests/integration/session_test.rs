//! Session multiplexer behaviour over an in-process frame stream

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;

use crate::common::*;
use crate::{assert_contains, assert_reply_err};
use xfsync::backend::auth::UserIdentity;
use xfsync::backend::directory::{BlobDocumentUploader, DocumentDirectory, InMemoryBlobStorage, StaticDirectory};
use xfsync::backend::realtime::FanoutBus;
use xfsync::backend::server::{Backends, SyncServices};
use xfsync::backend::session::channels::{open_channel, CODE_DUPLICATE};
use xfsync::backend::session::{ChannelBuild, ChannelContext, Outbox, SessionEnd, SyncSession};
use xfsync::shared::config::SyncConfig;
use xfsync::shared::upload::UploadResult;
use xfsync::shared::{BindResponse, DataType, DuplicateReply, Frame, OpPush, OpPushKind, PermType};

#[tokio::test]
async fn test_commit_reaches_every_session_and_late_joiners_catch_up() {
    let fleet = Fleet::new();
    let mut alice = SessionDriver::connect(fleet.process(), EDITOR);
    let mut bob = SessionDriver::connect(fleet.process(), OWNER);

    alice.join(DOC, 0).await;
    bob.join(DOC, 0).await;
    assert!(op_items(&alice.push(DataType::Op).await).is_empty());
    assert!(op_items(&bob.push(DataType::Op).await).is_empty());

    ok_reply(alice.request(DataType::Op, commit_data(&["c1", "c2", "c3"])).await);

    let update = bob.push(DataType::Op).await;
    let pushed: OpPush = update.payload().unwrap();
    assert_eq!(pushed.kind, OpPushKind::Update);
    let items = pushed.items().unwrap();
    assert_eq!(ver_ids(&items), vec![1, 2, 3]);
    assert_eq!(cmd_ids(&items), vec!["c1".to_string(), "c2".to_string(), "c3".to_string()]);
    assert!(items.iter().all(|item| item.user_id == EDITOR && item.batch_start == 1 && item.batch_length == 3));
    assert_eq!(ver_ids(&op_items(&alice.push(DataType::Op).await)), vec![1, 2, 3]);

    let mut carol = SessionDriver::connect(fleet.process(), READER);
    carol.join(DOC, 0).await;
    assert_eq!(op_items(&carol.push(DataType::Op).await), items);
    let pulled = ok_reply(carol.request(DataType::Op, pull_data(1, 0)).await);
    assert_eq!(op_items(&pulled), items);

    ok_reply(bob.request(DataType::Op, commit_data(&["d"])).await);
    assert_eq!(ver_ids(&op_items(&alice.push(DataType::Op).await)), vec![4]);
    assert_eq!(ver_ids(&op_items(&carol.push(DataType::Op).await)), vec![4]);

    let mut dave = SessionDriver::connect(fleet.process(), READER);
    dave.join(DOC, 2).await;
    assert_eq!(ver_ids(&op_items(&dave.push(DataType::Op).await)), vec![3, 4]);

    for driver in [alice, bob, carol, dave] {
        assert_eq!(driver.close().await, SessionEnd::Closed);
    }
}

#[tokio::test]
async fn test_bind_reply_carries_document_and_credential() {
    let mut driver = SessionDriver::connect(services(), EDITOR);
    let reply = ok_reply(driver.bind(DOC).await);
    let bound: BindResponse = reply.payload().unwrap();

    assert_eq!(bound.doc_info.id, DOC);
    assert_eq!(bound.doc_info.perm_type, PermType::Editable);
    assert_eq!(bound.version_id, "v0");
    assert!(!bound.access_key.access_key.is_empty());
    assert!(bound.access_key.expires_at > chrono::Utc::now().timestamp());
    driver.close().await;
}

#[tokio::test]
async fn test_bind_rejections() {
    let services = services();

    let mut stranger = SessionDriver::connect(services.clone(), STRANGER);
    assert_reply_err!(stranger.bind("doc-missing").await, 404);
    assert_reply_err!(stranger.bind(DOC).await, 403);

    let mut reader = SessionDriver::connect(services.clone(), READER);
    let floor = serde_json::json!({ "document_id": DOC, "perm_type": "3" }).to_string();
    assert_reply_err!(reader.request(DataType::Bind, floor).await, 403);
    let floor = serde_json::json!({ "document_id": DOC, "perm_type": 1 }).to_string();
    ok_reply(reader.request(DataType::Bind, floor).await);

    let mut editor = SessionDriver::connect(services.clone(), EDITOR);
    let locked = editor.bind(LOCKED_DOC).await;
    assert_reply_err!(locked, 494);
    assert_contains!(locked.err.clone().unwrap_or_default(), "under review");

    let mut owner = SessionDriver::connect(services, OWNER);
    ok_reply(owner.bind(LOCKED_DOC).await);

    for driver in [stranger, reader, editor, owner] {
        driver.close().await;
    }
}

#[tokio::test]
async fn test_start_before_bind_and_unbound_types_are_rejected() {
    let mut driver = SessionDriver::connect(services(), EDITOR);

    let reply = driver.start(0).await;
    assert_reply_err!(reply, 400);
    assert_contains!(reply.err.clone().unwrap_or_default(), "not bound");

    let reply = driver.request(DataType::Op, commit_data(&["a"])).await;
    assert_reply_err!(reply, 400);
    assert_contains!(reply.err.clone().unwrap_or_default(), "no handler bound");

    let unknown = r#"{"type":"telepathy","data_id":"x1","data":""}"#;
    driver.send_frame(Frame::Text(unknown.to_string())).await;
    let reply = driver.reply("x1").await;
    assert_reply_err!(reply, 400);

    driver.close().await;
}

#[tokio::test]
async fn test_heartbeat_is_echoed() {
    let mut driver = SessionDriver::connect(services(), EDITOR);
    let reply = ok_reply(driver.request(DataType::Heartbeat, "ping-7").await);
    assert_eq!(reply.kind(), Some(DataType::Heartbeat));
    assert_eq!(reply.data, "ping-7");
    driver.close().await;
}

#[tokio::test]
async fn test_session_emits_heartbeats() {
    let config = config_with(SyncConfig {
        heartbeat_interval_ms: 50,
        ..test_sync_config()
    });
    let services = services_with(&config);
    let (outbox, mut outbound) = Outbox::channel(16);
    let (frames, receiver) = tokio::sync::mpsc::channel::<Result<Frame, std::convert::Infallible>>(4);
    let session = SyncSession::new(services, UserIdentity::new(EDITOR), outbox);
    let handle = tokio::spawn(session.run(tokio_stream::wrappers::ReceiverStream::new(receiver)));

    let beat = tokio::time::timeout(Duration::from_secs(2), outbound.recv())
        .await
        .expect("heartbeat arrives")
        .expect("outbox open");
    assert_eq!(beat.kind(), Some(DataType::Heartbeat));
    assert!(beat.data_id.starts_with('s'));

    drop(frames);
    assert_eq!(handle.await.unwrap(), SessionEnd::Closed);
}

#[tokio::test]
async fn test_undecodable_frames_end_the_session_past_the_limit() {
    let config = config_with(SyncConfig {
        max_protocol_errors: 2,
        ..test_sync_config()
    });
    let mut driver = SessionDriver::connect(services_with(&config), EDITOR);

    driver.send_frame(Frame::Text("{not json".to_string())).await;
    driver.send_frame(Frame::Binary(Bytes::from_static(&[9, 0]))).await;
    // a good frame resets the count
    ok_reply(driver.request(DataType::Heartbeat, "").await);
    driver.send_frame(Frame::Text("{}".to_string())).await;
    driver.send_frame(Frame::Text("".to_string())).await;
    driver.send_frame(Frame::Text("}".to_string())).await;

    assert_eq!(driver.finished().await, SessionEnd::ProtocolErrors);
}

#[tokio::test]
async fn test_idle_session_times_out() {
    let config = config_with(SyncConfig {
        idle_timeout_secs: 1,
        ..test_sync_config()
    });
    let driver = SessionDriver::connect(services_with(&config), EDITOR);
    assert_eq!(driver.finished().await, SessionEnd::IdleTimeout);
}

#[tokio::test]
async fn test_teardown_closes_every_handler_despite_failures() {
    let (outbox, _outbound) = Outbox::channel(16);
    let mut session = SyncSession::new(services(), UserIdentity::new(EDITOR), outbox);

    let (panicking, panicked) = ScriptedHandler::new(DataType::Comment, CloseBehavior::Panic);
    let (failing, failed) = ScriptedHandler::new(DataType::Op, CloseBehavior::Fail);
    let (healthy, closed) = ScriptedHandler::new(DataType::Version, CloseBehavior::Succeed);
    session.install(Box::new(panicking)).await;
    session.install(Box::new(failing)).await;
    session.install(Box::new(healthy)).await;
    assert_eq!(
        session.bound_channels(),
        vec![DataType::Op, DataType::Comment, DataType::Version, DataType::DocUpload]
    );

    session.shutdown().await;

    assert_eq!(panicked.load(Ordering::SeqCst), 1);
    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(session.bound_channels().is_empty());
}

#[tokio::test]
async fn test_install_closes_the_replaced_handler() {
    let (outbox, _outbound) = Outbox::channel(16);
    let mut session = SyncSession::new(services(), UserIdentity::new(EDITOR), outbox);

    let (first, first_closes) = ScriptedHandler::new(DataType::Comment, CloseBehavior::Succeed);
    let (second, second_closes) = ScriptedHandler::new(DataType::Comment, CloseBehavior::Succeed);
    session.install(Box::new(first)).await;
    session.install(Box::new(second)).await;

    assert_eq!(first_closes.load(Ordering::SeqCst), 1);
    assert_eq!(second_closes.load(Ordering::SeqCst), 0);
    session.shutdown().await;
    assert_eq!(second_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_duplicate_commit_returns_existing_entry() {
    let mut driver = SessionDriver::connect(services(), EDITOR);
    driver.join(DOC, 0).await;

    ok_reply(driver.request(DataType::Op, commit_data(&["a"])).await);
    let reply = driver.request(DataType::Op, commit_data(&["a"])).await;

    assert_reply_err!(reply, CODE_DUPLICATE);
    let duplicate: DuplicateReply = reply.payload().unwrap();
    assert_eq!(duplicate.kind, "duplicate");
    assert_eq!(duplicate.duplicate_cmd.cmd.id, "a");
    assert_eq!(duplicate.duplicate_cmd.ver_id, 1);
    driver.close().await;
}

#[tokio::test]
async fn test_pull_cmds_returns_requested_range() {
    let mut driver = SessionDriver::connect(services(), EDITOR);
    driver.join(DOC, 0).await;
    ok_reply(driver.request(DataType::Op, commit_data(&["a", "b", "c"])).await);

    let reply = ok_reply(driver.request(DataType::Op, pull_data(2, 3)).await);
    let pulled: OpPush = reply.payload().unwrap();
    assert_eq!(pulled.kind, OpPushKind::PullCmdsResult);
    assert_eq!((pulled.from, pulled.to), (2, 3));
    assert_eq!(ver_ids(&pulled.items().unwrap()), vec![2, 3]);
    driver.close().await;
}

#[tokio::test]
async fn test_reader_cannot_commit() {
    let services = services();
    let mut reader = SessionDriver::connect(services.clone(), READER);
    reader.join(DOC, 0).await;

    assert_reply_err!(reader.request(DataType::Op, commit_data(&["a"])).await, 403);
    assert!(services.oplog.pull(DOC, 1, 0).await.unwrap().is_empty());
    reader.close().await;
}

#[tokio::test]
async fn test_rebinding_another_document_stops_the_old_stream() {
    let services = services();
    let mut watcher = SessionDriver::connect(services.clone(), OWNER);
    let mut writer = SessionDriver::connect(services, OWNER);
    watcher.join(DOC, 0).await;
    writer.join(DOC, 0).await;
    watcher.push(DataType::Op).await;

    ok_reply(watcher.bind(LOCKED_DOC).await);
    ok_reply(writer.request(DataType::Op, commit_data(&["a"])).await);

    watcher.expect_no_push(DataType::Op, Duration::from_millis(200)).await;
    let reply = watcher.request(DataType::Op, pull_data(1, 0)).await;
    assert_contains!(reply.err.clone().unwrap_or_default(), "no handler bound");

    watcher.close().await;
    writer.close().await;
}

#[tokio::test]
async fn test_channel_without_read_permission_is_not_built() {
    let services = services();
    let (outbox, _outbound) = Outbox::channel(16);
    let ctx = ChannelContext {
        services,
        outbox,
        user: UserIdentity::new(STRANGER),
        document: document(DOC),
        perm: PermType::None,
        version: None,
        last_cmd_version: 0,
    };
    for data_type in DataType::STARTED {
        let build = open_channel(data_type, &ctx).await;
        assert!(matches!(build, ChannelBuild::NoPermission), "{} built {:?}", data_type, build);
    }
    let build = open_channel(DataType::Heartbeat, &ctx).await;
    assert!(matches!(build, ChannelBuild::Failed(_)));
}

fn services_with_blobs() -> (Arc<SyncServices>, Arc<InMemoryBlobStorage>, Arc<StaticDirectory>) {
    let config = test_config();
    let directory = directory();
    let blobs = Arc::new(InMemoryBlobStorage::new());
    let backends = Backends {
        blobs: blobs.clone(),
        uploader: Arc::new(BlobDocumentUploader::new(blobs.clone())),
        ..Backends::in_memory(directory.clone(), &config)
    };
    (Arc::new(SyncServices::assemble(backends, &config)), blobs, directory)
}

#[tokio::test]
async fn test_resource_and_thumbnail_uploads() {
    let (services, blobs, directory) = services_with_blobs();
    let mut driver = SessionDriver::connect(services, EDITOR);
    driver.join(DOC, 0).await;

    let header = serde_json::json!({ "name": "logo.png" }).to_string();
    let id = driver.send_binary(DataType::Resource, header, b"png-bytes").await;
    ok_reply(driver.reply(&id).await);
    let stored = blobs.get("docs/doc-1/medias/logo.png").expect("media stored");
    assert_eq!(stored.data, Bytes::from_static(b"png-bytes"));

    for (name, body) in [("t1.png", &b"first"[..]), ("t2.png", &b"second"[..])] {
        let header = serde_json::json!({ "name": name, "contentType": "image/png" }).to_string();
        let id = driver.send_binary(DataType::Thumbnail, header, body).await;
        ok_reply(driver.reply(&id).await);
    }
    let thumbnails: Vec<String> = blobs
        .keys()
        .into_iter()
        .filter(|key| key.starts_with("docs/doc-1/thumbnail/"))
        .collect();
    assert_eq!(thumbnails, vec!["docs/doc-1/thumbnail/t2.png".to_string()]);
    let thumbnail = blobs.get("docs/doc-1/thumbnail/t2.png").unwrap();
    assert_eq!(thumbnail.content_type.as_deref(), Some("image/png"));

    let size = directory.document(DOC).await.unwrap().expect("document known").size;
    assert_eq!(size, (b"png-bytes".len() + b"first".len() + b"second".len()) as i64);

    let header = serde_json::json!({ "name": "../escape.png" }).to_string();
    let id = driver.send_binary(DataType::Resource, header, b"x").await;
    assert_reply_err!(driver.reply(&id).await, 400);

    let header = serde_json::json!({ "name": "text.png" }).to_string();
    assert_reply_err!(driver.request(DataType::Resource, header).await, 400);

    driver.close().await;
}

#[tokio::test]
async fn test_upload_needs_current_edit_permission() {
    let (services, blobs, directory) = services_with_blobs();
    let mut reader = SessionDriver::connect(services.clone(), READER);
    reader.join(DOC, 0).await;

    let header = serde_json::json!({ "name": "logo.png" }).to_string();
    let id = reader.send_binary(DataType::Resource, header.clone(), b"png").await;
    assert_reply_err!(reader.reply(&id).await, 403);

    let mut editor = SessionDriver::connect(services, EDITOR);
    editor.join(DOC, 0).await;
    directory.grant(DOC, EDITOR, PermType::ReadOnly);
    let id = editor.send_binary(DataType::Resource, header, b"png").await;
    assert_reply_err!(editor.reply(&id).await, 403);

    assert!(blobs.keys().is_empty());
    reader.close().await;
    editor.close().await;
}

#[tokio::test]
async fn test_document_upload_flow() {
    let (services, blobs, _directory) = services_with_blobs();
    let mut driver = SessionDriver::connect(services, STRANGER);

    let export = serde_json::json!({
        "document_id": "local-1",
        "project_id": "proj-9",
        "export": { "pages": ["p1"] }
    })
    .to_string();
    ok_reply(driver.request(DataType::DocUpload, export).await);

    let media = serde_json::json!({ "document_id": "local-1", "media": "a.png" }).to_string();
    for _ in 0..2 {
        let id = driver.send_binary(DataType::DocUpload, media.clone(), b"image-a").await;
        ok_reply(driver.reply(&id).await);
    }

    let junk = serde_json::json!({ "document_id": "local-1" }).to_string();
    assert_reply_err!(driver.request(DataType::DocUpload, junk).await, 400);

    let commit = serde_json::json!({ "document_id": "local-1", "commit": true }).to_string();
    let reply = ok_reply(driver.request(DataType::DocUpload, commit).await);
    let result: UploadResult = reply.payload().unwrap();
    assert!(!result.document_id.is_empty());

    let root = format!("uploads/{}", result.document_id);
    let keys = blobs.keys();
    assert_eq!(keys.iter().filter(|key| key.starts_with(&format!("{}/medias/", root))).count(), 1);
    let manifest = blobs.get(&format!("{}/document.json", root)).expect("manifest stored");
    let manifest: serde_json::Value = serde_json::from_slice(&manifest.data).unwrap();
    assert_eq!(manifest["project_id"], "proj-9");
    assert_eq!(manifest["user_id"], STRANGER);

    let commit_again = serde_json::json!({ "document_id": "local-1", "commit": true }).to_string();
    assert_reply_err!(driver.request(DataType::DocUpload, commit_again).await, 400);
    driver.close().await;
}

#[tokio::test]
async fn test_comment_notifications_are_relayed_from_any_process() {
    let fleet = Fleet::new();
    let mut reader = SessionDriver::connect(fleet.process(), READER);
    reader.join(DOC, 0).await;

    let other = fleet.process();
    other
        .bus
        .publish(&xfsync::backend::realtime::topics::comments(DOC), r#"{"comment_id":"c-7"}"#.to_string())
        .await
        .unwrap();

    let pushed = reader.push(DataType::Comment).await;
    assert_eq!(pushed.data, r#"{"comment_id":"c-7"}"#);
    assert!(pushed.data_id.starts_with('s'));

    // other documents stay quiet
    other
        .bus
        .publish(&xfsync::backend::realtime::topics::comments("doc-other"), "{}".to_string())
        .await
        .unwrap();
    reader.expect_no_push(DataType::Comment, Duration::from_millis(200)).await;
    reader.close().await;
}
