//! Shared Key Naming
//!
//! Names of cache cells and distributed locks. Like topic names, they are
//! built in one place so every process agrees on them.

/// Cached highest `ver_id` of a document
pub fn last_cmd_ver_id(document_id: &str) -> String {
    format!("server_document_last_cmd_ver_id:{}", document_id)
}

/// Commit lock of a document
pub fn op_mutex(document_id: &str) -> String {
    format!("server_document_op_mutex:{}", document_id)
}

/// Materialization lock of a document
pub fn version_mutex(document_id: &str) -> String {
    format!("server_document_version_mutex:{}", document_id)
}

/// Unix milliseconds of the last materialization of a document
pub fn version_last_update(document_id: &str) -> String {
    format!("server_document_version_last_update:{}", document_id)
}

/// Presence hash of a document, one field per user
pub fn selection_data(document_id: &str) -> String {
    format!("server_document_selection_data:{}", document_id)
}
