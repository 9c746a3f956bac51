//! Document Types
//!
//! Document metadata, permission levels and version pointers as they appear
//! in `bind` replies and version-change notifications.

use serde::{Deserialize, Serialize};

use crate::shared::error::SharedError;

/// Permission level of a user on a document
///
/// Levels are ordered: every level includes the rights of the ones below it.
/// On the wire the level is its integer value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PermType {
    #[default]
    None = 0,
    ReadOnly = 1,
    Commentable = 2,
    Editable = 3,
}

impl PermType {
    /// Lowest level a session may bind with
    pub const FLOOR: PermType = PermType::ReadOnly;

    /// Clamp a requested floor into `[ReadOnly, Editable]`
    ///
    /// Values outside that range fall back to `ReadOnly`.
    pub fn clamp_floor(requested: Option<u8>) -> PermType {
        match requested.map(PermType::try_from) {
            Some(Ok(perm)) if perm >= PermType::FLOOR => perm,
            _ => PermType::FLOOR,
        }
    }

    /// Whether this level allows reading the document
    pub fn can_read(&self) -> bool {
        *self >= PermType::ReadOnly
    }

    /// Whether this level allows committing operations and uploading assets
    pub fn can_edit(&self) -> bool {
        *self >= PermType::Editable
    }
}

impl From<PermType> for u8 {
    fn from(perm: PermType) -> Self {
        perm as u8
    }
}

impl TryFrom<u8> for PermType {
    type Error = SharedError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PermType::None),
            1 => Ok(PermType::ReadOnly),
            2 => Ok(PermType::Commentable),
            3 => Ok(PermType::Editable),
            other => Err(SharedError::validation(
                "perm_type",
                format!("unknown permission level {}", other),
            )),
        }
    }
}

/// Point-in-time snapshot of a document's metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub owner_id: String,
    #[serde(default)]
    pub name: String,
    /// Storage prefix for the document's assets
    pub path: String,
    /// Version the document was created or last saved at
    #[serde(default)]
    pub version_id: String,
    #[serde(default)]
    pub size: i64,
    /// Effective permission of the requesting user
    #[serde(default)]
    pub perm_type: PermType,
}

impl DocumentInfo {
    /// Prefix under which uploaded media live
    pub fn media_prefix(&self) -> String {
        format!("{}/medias/", self.storage_root())
    }

    /// Prefix under which thumbnails live
    pub fn thumbnail_prefix(&self) -> String {
        format!("{}/thumbnail/", self.storage_root())
    }

    /// Scope string for storage credentials
    pub fn storage_scope(&self) -> String {
        format!("{}/*", self.storage_root())
    }

    fn storage_root(&self) -> &str {
        self.path.trim_end_matches('/')
    }
}

/// Persisted snapshot pointer produced by materialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub document_id: String,
    pub version_id: String,
    /// Highest `ver_id` folded into this snapshot
    pub last_cmd_ver_id: u64,
}

/// Scoped, time-limited storage credential handed out on `bind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyInfo {
    pub access_key: String,
    pub provider: String,
    pub bucket_name: String,
    pub endpoint: String,
    pub region: String,
    /// Unix seconds after which the key is rejected
    pub expires_at: i64,
}

/// Reply payload of `bind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindResponse {
    pub doc_info: DocumentInfo,
    pub access_key: AccessKeyInfo,
    pub version_id: String,
}

/// Event published on a document's version topic after materialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChangedEvent {
    pub document_id: String,
    pub version_id: String,
    /// First `ver_id` not yet folded into the new snapshot
    pub version_start_with: u64,
    pub last_cmd_ver_id: u64,
}
