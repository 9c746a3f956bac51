/**
 * Storage Credentials
 *
 * `bind` hands the client a credential for reading the document's assets
 * directly from blob storage. The credential is scoped to the document's
 * storage prefix, allows only reads and listings, and expires.
 *
 * `JwtCredentialIssuer` signs the scope into a JWT that the storage gateway
 * verifies with the shared secret.
 */

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::backend::error::{BackendError, BackendResult};
use crate::shared::config::StorageConfig;
use crate::shared::{AccessKeyInfo, DocumentInfo};

/// Actions a document credential allows
pub const READ_ACTIONS: [&str; 2] = ["get", "list"];

/// Issues scoped storage credentials
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, document: &DocumentInfo, user_id: &str) -> BackendResult<AccessKeyInfo>;
}

pub type SharedCredentials = Arc<dyn CredentialIssuer>;

/// Claims of a storage credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageClaims {
    /// User the credential was issued to
    pub sub: String,
    pub document_id: String,
    /// Object prefix pattern, `<path>/*`
    pub scope: String,
    pub actions: Vec<String>,
    pub exp: u64,
    pub iat: u64,
}

/// Signs storage credentials as JWTs
pub struct JwtCredentialIssuer {
    secret: String,
    ttl: Duration,
    provider: String,
    bucket: String,
    endpoint: String,
    region: String,
}

impl JwtCredentialIssuer {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            secret: config.credential_secret.clone(),
            ttl: config.credential_ttl(),
            provider: config.provider.clone(),
            bucket: config.bucket.clone(),
            endpoint: config.endpoint.clone(),
            region: config.region.clone(),
        }
    }

    /// Decode a credential issued with the same secret
    pub fn verify(&self, access_key: &str) -> BackendResult<StorageClaims> {
        let key = DecodingKey::from_secret(self.secret.as_ref());
        decode::<StorageClaims>(access_key, &key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| BackendError::auth(format!("invalid storage credential: {}", err)))
    }
}

#[async_trait]
impl CredentialIssuer for JwtCredentialIssuer {
    async fn issue(&self, document: &DocumentInfo, user_id: &str) -> BackendResult<AccessKeyInfo> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let exp = now + self.ttl.as_secs();
        let claims = StorageClaims {
            sub: user_id.to_string(),
            document_id: document.id.clone(),
            scope: document.storage_scope(),
            actions: READ_ACTIONS.iter().map(|action| action.to_string()).collect(),
            exp,
            iat: now,
        };
        let key = EncodingKey::from_secret(self.secret.as_ref());
        let access_key = encode(&Header::default(), &claims, &key)
            .map_err(|err| BackendError::state(format!("failed to sign storage credential: {}", err)))?;

        Ok(AccessKeyInfo {
            access_key,
            provider: self.provider.clone(),
            bucket_name: self.bucket.clone(),
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            expires_at: exp as i64,
        })
    }
}
