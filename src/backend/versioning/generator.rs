/**
 * Snapshot Generator Client
 *
 * The snapshot generator is an external service that folds an operation
 * range into a stored document snapshot. The trigger posts the document
 * info, the pending commands and the previous version, and reads back the
 * id of the new version.
 *
 * # Request
 *
 * ```text
 * POST <generator_url>
 * { "documentInfo": {...}, "cmdItemList": [...], "lastVersion": {...} | null }
 * ```
 *
 * # Response
 *
 * ```text
 * { "versionId": "...", "lastCmdVerId": 42 | "42" }
 * ```
 *
 * Both response fields are optional: a missing `versionId` gets a fresh id
 * and a missing `lastCmdVerId` means the whole submitted range.
 */

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::backend::error::{BackendError, BackendResult};
use crate::shared::{CmdItem, DocumentInfo, DocumentVersion};

/// Body posted to the generator
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    pub document_info: DocumentInfo,
    pub cmd_item_list: Vec<CmdItem>,
    pub last_version: Option<DocumentVersion>,
}

/// What the generator reports back
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GeneratedSnapshot {
    #[serde(default, alias = "versionId")]
    pub version_id: Option<String>,
    #[serde(default, alias = "lastCmdVerId", deserialize_with = "number_or_string")]
    pub last_cmd_ver_id: Option<u64>,
}

fn number_or_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(value)) => Ok(Some(value)),
        Some(Raw::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Raw::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Materializes snapshots
#[async_trait]
pub trait SnapshotGenerator: Send + Sync {
    async fn generate(&self, request: &SnapshotRequest) -> BackendResult<GeneratedSnapshot>;
}

pub type SharedGenerator = Arc<dyn SnapshotGenerator>;

/// Generator reached over HTTP
pub struct HttpSnapshotGenerator {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotGenerator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| BackendError::state(format!("failed to build HTTP client: {}", err)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SnapshotGenerator for HttpSnapshotGenerator {
    async fn generate(&self, request: &SnapshotRequest) -> BackendResult<GeneratedSnapshot> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|err| BackendError::upstream(format!("snapshot request failed: {}", err)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::upstream(format!(
                "snapshot generator returned {}: {}",
                status, body
            )));
        }

        response
            .json::<GeneratedSnapshot>()
            .await
            .map_err(|err| BackendError::upstream(format!("invalid snapshot response: {}", err)))
    }
}
