//! Presence Types
//!
//! Cursor and selection state of one participant, and the events that
//! announce its changes on the `selection` channel.

use serde::{Deserialize, Serialize};

use crate::shared::document::PermType;
use crate::shared::error::SharedError;

/// Latest selection state of a user in a document
///
/// The identity fields (`user_id`, `permission`, `avatar`, `nickname`,
/// `enter_time`) are filled in by the server; clients only send the
/// selection and cursor fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionData {
    #[serde(default)]
    pub select_page_id: String,
    #[serde(default)]
    pub select_shape_id_list: Vec<String>,
    #[serde(default)]
    pub hover_shape_id: String,
    #[serde(default)]
    pub cursor_start: i64,
    #[serde(default)]
    pub cursor_end: i64,
    #[serde(default)]
    pub cursor_at_before: bool,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub permission: PermType,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub nickname: String,
    /// Unix milliseconds at which the user joined the document
    #[serde(default)]
    pub enter_time: i64,
}

/// Presence event kind, an integer on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SelectionOpType {
    Update = 0,
    Exit = 1,
}

impl From<SelectionOpType> for u8 {
    fn from(op: SelectionOpType) -> Self {
        op as u8
    }
}

impl TryFrom<u8> for SelectionOpType {
    type Error = SharedError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SelectionOpType::Update),
            1 => Ok(SelectionOpType::Exit),
            other => Err(SharedError::validation(
                "type",
                format!("unknown selection op {}", other),
            )),
        }
    }
}

/// Presence event published on a document's presence topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionOp {
    #[serde(rename = "type")]
    pub op: SelectionOpType,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SelectionData>,
}

impl SelectionOp {
    pub fn update(data: SelectionData) -> Self {
        Self {
            op: SelectionOpType::Update,
            user_id: data.user_id.clone(),
            data: Some(data),
        }
    }

    pub fn exit(user_id: impl Into<String>) -> Self {
        Self {
            op: SelectionOpType::Exit,
            user_id: user_id.into(),
            data: None,
        }
    }
}
