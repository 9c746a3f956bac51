//! Commit and pull across processes
//!
//! Several `SyncServices` over one set of backends stand in for several
//! server processes committing to the same document.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use crate::common::*;
use xfsync::backend::coordination::{keys, LockService, SharedCache};
use xfsync::backend::error::BackendError;
use xfsync::backend::oplog::{CommitOutcome, LogStore};
use xfsync::backend::server::{Backends, SyncServices};
use xfsync::shared::config::SyncConfig;
use xfsync::shared::PermType;

fn committed(outcome: CommitOutcome) -> Vec<xfsync::shared::CmdItem> {
    match outcome {
        CommitOutcome::Committed(items) => items,
        other => panic!("expected a committed batch, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_from_many_processes_are_gap_free() {
    let fleet = Fleet::new();
    let processes: Vec<_> = (0..3).map(|_| fleet.process()).collect();

    let mut tasks = Vec::new();
    for (p, services) in processes.iter().enumerate() {
        for b in 0..5 {
            let services = services.clone();
            tasks.push(tokio::spawn(async move {
                let first = format!("p{}-b{}-x", p, b);
                let second = format!("p{}-b{}-y", p, b);
                services
                    .oplog
                    .commit(DOC, EDITOR, PermType::Editable, cmds(&[first.as_str(), second.as_str()]))
                    .await
            }));
        }
    }
    for task in tasks {
        let outcome = task.await.expect("commit task").expect("commit succeeds");
        let items = committed(outcome);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].batch_start, items[0].ver_id);
        assert_eq!(items[1].ver_id, items[0].ver_id + 1);
        assert_eq!(items[1].batch_start, items[0].batch_start);
        assert_eq!(items[1].batch_length, 2);
    }

    let log = processes[0].oplog.pull(DOC, 1, 0).await.expect("pull");
    assert_eq!(ver_ids(&log), (1..=30).collect::<Vec<u64>>());
    let distinct: BTreeSet<String> = cmd_ids(&log).into_iter().collect();
    assert_eq!(distinct.len(), 30);
}

#[tokio::test]
async fn test_cache_cold_commit_continues_from_store() {
    let fleet = Fleet::new();
    let first = fleet.process();
    let second = fleet.process();

    committed(first.oplog.commit(DOC, EDITOR, PermType::Editable, cmds(&["a", "b"])).await.unwrap());
    fleet.backends.cache.delete(&keys::last_cmd_ver_id(DOC)).await.unwrap();

    let items = committed(second.oplog.commit(DOC, OWNER, PermType::Editable, cmds(&["c"])).await.unwrap());
    assert_eq!(ver_ids(&items), vec![3]);

    let cached = fleet.backends.cache.get(&keys::last_cmd_ver_id(DOC)).await.unwrap();
    assert_eq!(cached.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_failed_append_leaves_no_stale_counter() {
    let config = test_config();
    let store = Arc::new(FailingLogStore::new());
    let backends = Backends {
        store: store.clone(),
        ..backends(&config)
    };
    let cache = backends.cache.clone();
    let services = SyncServices::assemble(backends, &config);

    committed(services.oplog.commit(DOC, EDITOR, PermType::Editable, cmds(&["a"])).await.unwrap());
    assert_eq!(cache.get(&keys::last_cmd_ver_id(DOC)).await.unwrap().as_deref(), Some("1"));

    store.fail_appends(true);
    let err = services
        .oplog
        .commit(DOC, EDITOR, PermType::Editable, cmds(&["b"]))
        .await
        .unwrap_err();
    assert_matches!(err, BackendError::StoreError { .. });
    assert_eq!(cache.get(&keys::last_cmd_ver_id(DOC)).await.unwrap(), None);

    store.fail_appends(false);
    let items = committed(services.oplog.commit(DOC, EDITOR, PermType::Editable, cmds(&["b"])).await.unwrap());
    assert_eq!(ver_ids(&items), vec![2]);
    assert_eq!(store.len(DOC), 2);
    assert_eq!(store.appends(), 3);
}

#[tokio::test]
async fn test_malformed_counter_falls_back_to_store() {
    let fleet = Fleet::new();
    let services = fleet.process();
    committed(services.oplog.commit(DOC, EDITOR, PermType::Editable, cmds(&["a"])).await.unwrap());

    fleet
        .backends
        .cache
        .set(&keys::last_cmd_ver_id(DOC), "not-a-number".to_string(), Duration::from_secs(60))
        .await
        .unwrap();

    let items = committed(services.oplog.commit(DOC, EDITOR, PermType::Editable, cmds(&["b"])).await.unwrap());
    assert_eq!(ver_ids(&items), vec![2]);
}

#[tokio::test]
async fn test_resubmitted_batch_is_reported_as_duplicate() {
    let fleet = Fleet::new();
    let first = fleet.process();
    let second = fleet.process();

    let items = committed(first.oplog.commit(DOC, EDITOR, PermType::Editable, cmds(&["a", "b"])).await.unwrap());

    let outcome = second
        .oplog
        .commit(DOC, EDITOR, PermType::Editable, cmds(&["b", "c"]))
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::Duplicate(items[1].clone()));

    let log = first.oplog.pull(DOC, 1, 0).await.unwrap();
    assert_eq!(cmd_ids(&log), vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_held_op_mutex_fails_retryable_without_writing() {
    let config = config_with(SyncConfig {
        lock_wait_ms: 100,
        ..test_sync_config()
    });
    let backends = backends(&config);
    let locks = backends.locks.clone();
    let store = backends.store.clone();
    let services = SyncServices::assemble(backends, &config);

    assert!(locks
        .try_acquire(&keys::op_mutex(DOC), "another-process", Duration::from_secs(10))
        .await
        .unwrap());

    let err = services
        .oplog
        .commit(DOC, EDITOR, PermType::Editable, cmds(&["a"]))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.code(), 423);
    assert_eq!(store.last_ver_id(DOC).await.unwrap(), 0);

    locks.release(&keys::op_mutex(DOC), "another-process").await.unwrap();
    let items = committed(services.oplog.commit(DOC, EDITOR, PermType::Editable, cmds(&["a"])).await.unwrap());
    assert_eq!(ver_ids(&items), vec![1]);
}

#[tokio::test]
async fn test_pull_bounds() {
    let services = services();
    committed(
        services
            .oplog
            .commit(DOC, EDITOR, PermType::Editable, cmds(&["a", "b", "c", "d"]))
            .await
            .unwrap(),
    );

    assert_eq!(ver_ids(&services.oplog.pull(DOC, 2, 3).await.unwrap()), vec![2, 3]);
    assert_eq!(ver_ids(&services.oplog.pull(DOC, 3, 0).await.unwrap()), vec![3, 4]);
    assert!(services.oplog.pull(DOC, 3, 2).await.unwrap().is_empty());
    assert!(services.oplog.pull(DOC, 9, 0).await.unwrap().is_empty());
    assert!(services.oplog.pull("doc-empty", 1, 0).await.unwrap().is_empty());
}
