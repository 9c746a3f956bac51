/**
 * Operation Batches
 *
 * `Cmd` is the opaque operation payload a client submits. The server never
 * interprets `ops`; it only orders and stores them. `CmdItem` is one entry
 * of a document's operation log: a `Cmd` plus the version number the server
 * assigned and the batch it was committed in.
 *
 * # Batch Numbering
 *
 * A commit of `n` commands on top of `previous` produces items with
 * `ver_id = previous + 1 ..= previous + n`, all sharing
 * `batch_start = previous + 1` and `batch_length = n`. A consumer holding a
 * subset of a batch can tell it is torn.
 */
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shared::error::SharedError;

/// Client-submitted operation
///
/// Field names follow the editor client's camelCase format. Older clients
/// send snake_case keys, which are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cmd {
    /// Client-generated idempotency key, unique per document
    pub id: String,
    /// Version the client believed it was editing from
    #[serde(default, alias = "base_ver")]
    pub base_ver: u64,
    #[serde(default, alias = "batch_id")]
    pub batch_id: String,
    #[serde(default)]
    pub ops: Vec<Value>,
    #[serde(default, alias = "recovery", alias = "is_recovery")]
    pub is_recovery: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub posttime: i64,
    #[serde(default, alias = "fmt_ver", skip_serializing_if = "Option::is_none")]
    pub fmt_ver: Option<String>,
}

/// One committed entry of a document's operation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdItem {
    pub document_id: String,
    pub user_id: String,
    pub ver_id: u64,
    pub batch_start: u64,
    pub batch_length: u64,
    pub cmd: Cmd,
}

impl CmdItem {
    /// Number a batch of commands on top of `previous_id`
    ///
    /// Every item gets the next version in submission order and the same
    /// batch bounds.
    pub fn number_batch(
        document_id: &str,
        user_id: &str,
        previous_id: u64,
        cmds: Vec<Cmd>,
    ) -> Vec<CmdItem> {
        let batch_start = previous_id + 1;
        let batch_length = cmds.len() as u64;
        cmds.into_iter()
            .enumerate()
            .map(|(offset, cmd)| CmdItem {
                document_id: document_id.to_string(),
                user_id: user_id.to_string(),
                ver_id: batch_start + offset as u64,
                batch_start,
                batch_length,
                cmd,
            })
            .collect()
    }
}

/// `cmds` field of a commit request
///
/// Clients send the command list as a JSON-encoded string; an inline array
/// is accepted as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CmdList {
    Encoded(String),
    Inline(Vec<Cmd>),
}

impl CmdList {
    /// Decode into commands
    pub fn into_cmds(self) -> Result<Vec<Cmd>, SharedError> {
        match self {
            CmdList::Encoded(text) => {
                if text.trim().is_empty() {
                    return Ok(Vec::new());
                }
                Ok(serde_json::from_str(&text)?)
            }
            CmdList::Inline(cmds) => Ok(cmds),
        }
    }
}

/// Request on the `op` channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OpRequest {
    #[serde(rename = "commit")]
    Commit { cmds: CmdList },
    #[serde(rename = "pullCmds")]
    PullCmds {
        #[serde(default)]
        from: u64,
        /// Inclusive upper bound, `0` for open-ended
        #[serde(default)]
        to: u64,
    },
}

/// Kind of a server push on the `op` channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpPushKind {
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "pullCmdsResult")]
    PullCmdsResult,
}

/// Server push on the `op` channel
///
/// Both live broadcasts and pull replies use this shape. `cmds_data` is the
/// JSON-encoded list of `CmdItem`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpPush {
    #[serde(rename = "type")]
    pub kind: OpPushKind,
    pub cmds_data: String,
    #[serde(default)]
    pub from: u64,
    #[serde(default)]
    pub to: u64,
}

impl OpPush {
    /// Build a push from items, filling `from`/`to` with the version span
    pub fn new(kind: OpPushKind, items: &[CmdItem]) -> Result<Self, SharedError> {
        Ok(Self {
            kind,
            cmds_data: serde_json::to_string(items)?,
            from: items.first().map(|item| item.ver_id).unwrap_or(0),
            to: items.last().map(|item| item.ver_id).unwrap_or(0),
        })
    }

    /// Decode `cmds_data`
    pub fn items(&self) -> Result<Vec<CmdItem>, SharedError> {
        Ok(serde_json::from_str(&self.cmds_data)?)
    }
}

/// Reply data for a commit whose idempotency key already exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReply {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "duplicateCmd")]
    pub duplicate_cmd: CmdItem,
}

impl DuplicateReply {
    pub fn new(duplicate_cmd: CmdItem) -> Self {
        Self {
            kind: "duplicate".to_string(),
            duplicate_cmd,
        }
    }
}
