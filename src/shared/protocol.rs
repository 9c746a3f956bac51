/**
 * Wire Protocol
 *
 * This module defines the envelope exchanged over one physical connection
 * and the codec for the two frame kinds:
 *
 * - **Text frames** carry a JSON `TransData` envelope.
 * - **Binary frames** carry `[u32 LE header length][TransData JSON][raw payload]`
 *   so a single frame holds both a structured header and a blob.
 *
 * Every envelope names a logical channel in `type`. The client picks the
 * `data_id` and the server echoes it on the matching reply. Messages pushed
 * by the server without a request use server-generated ids (`s1`, `s2`, ...).
 */
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::shared::error::SharedError;

/// Size of the little-endian length prefix on binary frames
pub const BINARY_HEADER_PREFIX_LEN: usize = 4;

/// Logical channel carried in the envelope `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Heartbeat,
    Bind,
    Start,
    Op,
    Comment,
    Selection,
    Resource,
    Thumbnail,
    Version,
    DocUpload,
}

impl DataType {
    /// Channels instantiated by `start`, in construction order
    pub const STARTED: [DataType; 6] = [
        DataType::Comment,
        DataType::Op,
        DataType::Resource,
        DataType::Thumbnail,
        DataType::Selection,
        DataType::Version,
    ];

    /// Wire name of the channel
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Heartbeat => "heartbeat",
            DataType::Bind => "bind",
            DataType::Start => "start",
            DataType::Op => "op",
            DataType::Comment => "comment",
            DataType::Selection => "selection",
            DataType::Resource => "resource",
            DataType::Thumbnail => "thumbnail",
            DataType::Version => "version",
            DataType::DocUpload => "docupload",
        }
    }

    /// Parse a wire name, `None` for unknown channels
    pub fn parse(value: &str) -> Option<Self> {
        let data_type = match value {
            "heartbeat" => DataType::Heartbeat,
            "bind" => DataType::Bind,
            "start" => DataType::Start,
            "op" => DataType::Op,
            "comment" => DataType::Comment,
            "selection" => DataType::Selection,
            "resource" => DataType::Resource,
            "thumbnail" => DataType::Thumbnail,
            "version" => DataType::Version,
            "docupload" => DataType::DocUpload,
            _ => return None,
        };
        Some(data_type)
    }

    /// Whether the session handles this type itself instead of a channel handle
    pub fn is_control(&self) -> bool {
        matches!(self, DataType::Heartbeat | DataType::Bind | DataType::Start)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope for every message on a connection
///
/// `data` is itself a JSON document encoded as a string, so channel payloads
/// can evolve without touching the envelope.
///
/// # Fields
/// * `data_type` - Logical channel (`type` on the wire)
/// * `data_id` - Correlation id, echoed back on replies
/// * `data` - Channel payload as a JSON string
/// * `err` - Human-readable failure, set only on error replies
/// * `code` - Machine-readable failure code, set only on error replies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransData {
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub data_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl TransData {
    /// Create an envelope for a channel
    pub fn new(data_type: DataType, data_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            data_type: data_type.as_str().to_string(),
            data_id: data_id.into(),
            data: data.into(),
            err: None,
            code: None,
        }
    }

    /// Start a reply to `request`: same type and correlation id, empty body
    pub fn reply_to(request: &TransData) -> Self {
        Self {
            data_type: request.data_type.clone(),
            data_id: request.data_id.clone(),
            ..Self::default()
        }
    }

    /// Set the payload
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Mark the envelope as a failure
    pub fn with_error(mut self, err: impl Into<String>, code: i32) -> Self {
        self.err = Some(err.into());
        self.code = Some(code);
        self
    }

    /// Serialize `payload` into the `data` field
    pub fn with_payload<T: Serialize>(self, payload: &T) -> Result<Self, SharedError> {
        let data = serde_json::to_string(payload)?;
        Ok(self.with_data(data))
    }

    /// Parsed channel, `None` for unknown types
    pub fn kind(&self) -> Option<DataType> {
        DataType::parse(&self.data_type)
    }

    /// Decode the `data` field into a channel payload
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, SharedError> {
        if self.data.is_empty() {
            return Err(SharedError::validation("data", "payload is empty"));
        }
        Ok(serde_json::from_str(&self.data)?)
    }

    /// Whether the envelope reports a failure
    pub fn is_error(&self) -> bool {
        self.err.is_some()
    }
}

/// One physical unit received from a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

/// A decoded inbound message: the envelope and, for binary frames, the blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub envelope: TransData,
    pub binary: Option<Bytes>,
}

/// Decode a received frame
///
/// # Errors
///
/// Returns `SharedError` if the envelope is not valid JSON or the binary
/// length prefix does not fit the frame.
pub fn decode_frame(frame: Frame) -> Result<Inbound, SharedError> {
    match frame {
        Frame::Text(text) => {
            let envelope: TransData = serde_json::from_str(&text)?;
            Ok(Inbound {
                envelope,
                binary: None,
            })
        }
        Frame::Binary(data) => {
            let (header, payload) = split_binary(&data)?;
            let envelope: TransData = serde_json::from_slice(header)?;
            let offset = BINARY_HEADER_PREFIX_LEN + header.len();
            debug_assert_eq!(data.len() - offset, payload.len());
            Ok(Inbound {
                envelope,
                binary: Some(data.slice(offset..)),
            })
        }
    }
}

/// Split a binary frame into its header bytes and payload bytes
pub fn split_binary(data: &[u8]) -> Result<(&[u8], &[u8]), SharedError> {
    if data.len() < BINARY_HEADER_PREFIX_LEN {
        return Err(SharedError::frame(format!(
            "binary frame of {} bytes is shorter than the length prefix",
            data.len()
        )));
    }
    let mut prefix = [0u8; BINARY_HEADER_PREFIX_LEN];
    prefix.copy_from_slice(&data[..BINARY_HEADER_PREFIX_LEN]);
    let header_len = u32::from_le_bytes(prefix) as usize;
    let rest = &data[BINARY_HEADER_PREFIX_LEN..];
    if header_len > rest.len() {
        return Err(SharedError::frame(format!(
            "header length {} exceeds remaining {} bytes",
            header_len,
            rest.len()
        )));
    }
    Ok(rest.split_at(header_len))
}

/// Encode an envelope and blob as a binary frame
pub fn encode_binary(header: &TransData, payload: &[u8]) -> Result<Vec<u8>, SharedError> {
    let header = serde_json::to_vec(header)?;
    let header_len = u32::try_from(header.len())
        .map_err(|_| SharedError::frame("header does not fit a u32 length prefix"))?;
    let mut frame = Vec::with_capacity(BINARY_HEADER_PREFIX_LEN + header.len() + payload.len());
    frame.extend_from_slice(&header_len.to_le_bytes());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Payload of `bind`
///
/// `perm_type` is the permission floor the client wants checked. Clients send
/// it either as a number or as a numeric string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindRequest {
    pub document_id: String,
    #[serde(default, deserialize_with = "deserialize_perm_floor")]
    pub perm_type: Option<u8>,
}

/// Payload of `start`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub last_cmd_version: u64,
}

fn deserialize_perm_floor<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Floor {
        Number(i64),
        Text(String),
    }

    let floor = Option::<Floor>::deserialize(deserializer)?;
    Ok(match floor {
        Some(Floor::Number(value)) => u8::try_from(value).ok(),
        Some(Floor::Text(value)) => value.trim().parse::<u8>().ok(),
        None => None,
    })
}
