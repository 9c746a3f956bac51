//! Test fixtures
//!
//! One document (`doc-1`) owned by `owner`, with an editor, a reader and a
//! locked sibling document. Services are built from in-memory backends; a
//! `Fleet` shares one set of backends between several service containers to
//! stand in for several server processes.

use std::sync::Arc;

use xfsync::backend::directory::StaticDirectory;
use xfsync::backend::server::{Backends, SyncServices};
use xfsync::shared::config::{AppConfig, SyncConfig};
use xfsync::shared::{Cmd, DocumentInfo, PermType};

pub const SECRET: &str = "test-secret";
pub const DOC: &str = "doc-1";
pub const LOCKED_DOC: &str = "doc-locked";
pub const OWNER: &str = "owner";
pub const EDITOR: &str = "editor";
pub const READER: &str = "reader";
pub const STRANGER: &str = "stranger";

/// Sync settings for tests: short lock wait, quiet heartbeat
pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        lock_wait_ms: 2_000,
        presence_sweep_secs: 1,
        heartbeat_interval_ms: 60_000,
        ..SyncConfig::default()
    }
}

pub fn test_config() -> AppConfig {
    config_with(test_sync_config())
}

pub fn config_with(sync: SyncConfig) -> AppConfig {
    AppConfig::builder()
        .jwt_secret(SECRET)
        .sync(sync)
        .build()
        .expect("test config is valid")
}

pub fn document(id: &str) -> DocumentInfo {
    DocumentInfo {
        id: id.to_string(),
        owner_id: OWNER.to_string(),
        name: format!("{} name", id),
        path: format!("docs/{}", id),
        version_id: "v0".to_string(),
        ..DocumentInfo::default()
    }
}

pub fn directory() -> Arc<StaticDirectory> {
    let directory = StaticDirectory::new();
    directory.insert(document(DOC));
    directory.grant(DOC, EDITOR, PermType::Editable);
    directory.grant(DOC, READER, PermType::ReadOnly);

    directory.insert(document(LOCKED_DOC));
    directory.grant(LOCKED_DOC, EDITOR, PermType::Editable);
    directory.lock(LOCKED_DOC, "under review");
    Arc::new(directory)
}

pub fn backends(config: &AppConfig) -> Backends {
    Backends::in_memory(directory(), config)
}

/// Services of one process over fresh in-memory backends
pub fn services() -> Arc<SyncServices> {
    let config = test_config();
    Arc::new(SyncServices::assemble(backends(&config), &config))
}

pub fn services_with(config: &AppConfig) -> Arc<SyncServices> {
    Arc::new(SyncServices::assemble(backends(config), config))
}

/// Several processes over the same backends
pub struct Fleet {
    pub backends: Backends,
    pub config: AppConfig,
}

impl Fleet {
    pub fn new() -> Self {
        let config = test_config();
        Self {
            backends: backends(&config),
            config,
        }
    }

    /// Services of one more process
    pub fn process(&self) -> Arc<SyncServices> {
        Arc::new(SyncServices::assemble(self.backends.clone(), &self.config))
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}

pub fn cmd(id: &str) -> Cmd {
    Cmd {
        id: id.to_string(),
        batch_id: format!("batch-{}", id),
        ops: vec![serde_json::json!({ "insert": id })],
        ..Cmd::default()
    }
}

pub fn cmds(ids: &[&str]) -> Vec<Cmd> {
    ids.iter().map(|id| cmd(id)).collect()
}

/// `data` of an `op` commit request, with `cmds` JSON-encoded as clients send it
pub fn commit_data(ids: &[&str]) -> String {
    let encoded = serde_json::to_string(&cmds(ids)).expect("cmds serialize");
    serde_json::json!({ "type": "commit", "cmds": encoded }).to_string()
}

pub fn pull_data(from: u64, to: u64) -> String {
    serde_json::json!({ "type": "pullCmds", "from": from, "to": to }).to_string()
}
