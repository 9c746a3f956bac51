//! Collaborators outside the sync core
//!
//! Documents, permissions, storage credentials, blob storage and document
//! uploads. Each is a trait with an in-memory and a production implementation.

pub mod blob;
pub mod credentials;
pub mod documents;
pub mod pg;
pub mod uploader;

pub use blob::{BlobStorage, FsBlobStorage, InMemoryBlobStorage, SharedBlobs};
pub use credentials::{CredentialIssuer, JwtCredentialIssuer, SharedCredentials, StorageClaims};
pub use documents::{
    DocumentDirectory, PermissionResolver, SharedDirectory, SharedPermissions, StaticDirectory,
};
pub use pg::PgDirectory;
pub use uploader::{BlobDocumentUploader, DocumentUploader, SharedUploader};
