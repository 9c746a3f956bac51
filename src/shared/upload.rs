//! Upload Headers
//!
//! Header payloads carried in the `data` field of binary frames on the
//! `resource`, `thumbnail` and `docupload` channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header of a media upload on the `resource` channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHeader {
    pub name: String,
}

/// Header of a thumbnail upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailHeader {
    pub name: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
}

/// Header of one step of a whole-document upload
///
/// A client sends the export record and each media blob in separate frames,
/// then a final frame with `commit` set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadHeader {
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub project_id: String,
    /// Exported document record, opaque to the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<Value>,
    #[serde(default)]
    pub commit: bool,
    /// Name of the media blob carried by this frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
}

/// Reply data after a committed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub document_id: String,
}
