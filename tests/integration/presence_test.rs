//! Presence over the selection channel

use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::common::*;
use xfsync::shared::config::SyncConfig;
use xfsync::shared::{DataType, PermType, SelectionData, SelectionOp, SelectionOpType, TransData};

fn selection_op(envelope: &TransData) -> SelectionOp {
    envelope.payload().expect("selection payload")
}

/// Next presence event about `user_id`, skipping events about others
async fn next_about(driver: &mut SessionDriver, user_id: &str) -> SelectionOp {
    loop {
        let op = selection_op(&driver.push(DataType::Selection).await);
        if op.user_id == user_id {
            return op;
        }
    }
}

#[tokio::test]
async fn test_joiner_sees_present_users_and_is_announced() {
    let fleet = Fleet::new();
    let mut alice = SessionDriver::connect(fleet.process(), EDITOR);
    alice.join(DOC, 0).await;
    let own = next_about(&mut alice, EDITOR).await;
    assert_eq!(own.op, SelectionOpType::Update);

    let mut bob = SessionDriver::connect(fleet.process(), READER);
    bob.join(DOC, 0).await;

    let seeded = next_about(&mut bob, EDITOR).await;
    assert_eq!(seeded.op, SelectionOpType::Update);
    let record = seeded.data.expect("seeded record");
    assert_eq!(record.nickname, "editor nick");
    assert_eq!(record.permission, PermType::Editable);

    let announced = next_about(&mut alice, READER).await;
    assert_eq!(announced.op, SelectionOpType::Update);
    let record = announced.data.expect("announced record");
    assert_eq!(record.permission, PermType::ReadOnly);
    assert!(record.enter_time > 0);

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_update_fills_in_identity() {
    let fleet = Fleet::new();
    let mut alice = SessionDriver::connect(fleet.process(), EDITOR);
    let mut bob = SessionDriver::connect(fleet.process(), OWNER);
    alice.join(DOC, 0).await;
    bob.join(DOC, 0).await;
    let joined = next_about(&mut alice, OWNER).await.data.expect("join record");

    let update = SelectionData {
        select_page_id: "page-2".to_string(),
        select_shape_id_list: vec!["shape-1".to_string()],
        cursor_start: 4,
        cursor_end: 9,
        user_id: "someone-else".to_string(),
        permission: PermType::None,
        nickname: "spoofed".to_string(),
        enter_time: 1,
        ..SelectionData::default()
    };
    ok_reply(bob.request(DataType::Selection, serde_json::to_string(&update).unwrap()).await);

    let op = next_about(&mut alice, OWNER).await;
    assert_eq!(op.op, SelectionOpType::Update);
    let record = op.data.expect("update record");
    assert_eq!(record.select_page_id, "page-2");
    assert_eq!(record.select_shape_id_list, vec!["shape-1".to_string()]);
    assert_eq!((record.cursor_start, record.cursor_end), (4, 9));
    assert_eq!(record.user_id, OWNER);
    assert_eq!(record.permission, PermType::Editable);
    assert_eq!(record.nickname, "owner nick");
    assert_eq!(record.enter_time, joined.enter_time);

    let stored = fleet.process().presence.snapshot(DOC).await.unwrap();
    let stored = stored.iter().find(|record| record.user_id == OWNER).expect("stored record");
    assert_eq!(stored.select_page_id, "page-2");

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_closing_announces_exactly_one_exit() {
    let fleet = Fleet::new();
    let mut alice = SessionDriver::connect(fleet.process(), EDITOR);
    let mut bob = SessionDriver::connect(fleet.process(), OWNER);
    alice.join(DOC, 0).await;
    bob.join(DOC, 0).await;
    next_about(&mut alice, OWNER).await;

    bob.close().await;

    let exit = next_about(&mut alice, OWNER).await;
    assert_eq!(exit.op, SelectionOpType::Exit);
    assert!(exit.data.is_none());

    // one sweep period plus margin
    let deadline = tokio::time::Instant::now() + Duration::from_millis(1_500);
    while let Some(envelope) = tokio::time::timeout_at(deadline, alice.push(DataType::Selection)).await.ok() {
        let op = selection_op(&envelope);
        assert!(op.user_id != OWNER, "unexpected second event for owner: {:?}", op);
    }

    let live = fleet.process().presence.snapshot(DOC).await.unwrap();
    assert_eq!(live.iter().map(|record| record.user_id.as_str()).collect::<Vec<_>>(), vec![EDITOR]);
    alice.close().await;
}

#[tokio::test]
async fn test_lapsed_entry_produces_local_exit() {
    let fleet = Fleet::new();
    let mut alice = SessionDriver::connect(fleet.process(), EDITOR);
    alice.join(DOC, 0).await;
    next_about(&mut alice, EDITOR).await;

    // a participant on another process, whose process then dies
    let ghost_presence = xfsync::backend::presence::PresenceService::new(
        fleet.backends.cache.clone(),
        fleet.backends.bus.clone(),
        Duration::from_secs(1),
    );
    let ghost = SelectionData {
        user_id: "ghost".to_string(),
        permission: PermType::ReadOnly,
        enter_time: 1,
        ..SelectionData::default()
    };
    ghost_presence.update(DOC, &ghost).await.unwrap();
    assert_eq!(next_about(&mut alice, "ghost").await.op, SelectionOpType::Update);

    let exit = tokio::time::timeout(Duration::from_secs(4), next_about(&mut alice, "ghost"))
        .await
        .expect("lapsed entry is noticed");
    assert_eq!(exit.op, SelectionOpType::Exit);
    alice.close().await;
}

#[tokio::test]
async fn test_own_lapsed_entry_is_not_reported() {
    let config = config_with(SyncConfig {
        presence_ttl_secs: 1,
        ..test_sync_config()
    });
    let services = services_with(&config);
    let mut alice = SessionDriver::connect(services, EDITOR);
    alice.join(DOC, 0).await;
    next_about(&mut alice, EDITOR).await;

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    alice.expect_no_push(DataType::Selection, Duration::from_millis(200)).await;
    alice.close().await;
}
