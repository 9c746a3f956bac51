//! Topic Naming
//!
//! Every publisher and subscriber builds topic names through this module,
//! so a document id maps to exactly one topic string per entity kind.

use std::fmt;

/// Kind of entity a topic carries events for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// Committed operation batches
    Operations,
    /// Selection and cursor events
    Presence,
    /// Comment notifications
    Comments,
    /// Materialized version notifications
    VersionChange,
}

impl TopicKind {
    fn prefix(&self) -> &'static str {
        match self {
            TopicKind::Operations => "server_document_op",
            TopicKind::Presence => "server_document_selection",
            TopicKind::Comments => "server_document_comment",
            TopicKind::VersionChange => "server_document_version",
        }
    }
}

/// A fanout topic name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    pub fn new(kind: TopicKind, entity_id: &str) -> Self {
        Self(format!("{}:{}", kind.prefix(), entity_id))
    }

    /// Wrap a name received from the transport
    pub fn from_raw(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Committed operations of a document
pub fn operations(document_id: &str) -> Topic {
    Topic::new(TopicKind::Operations, document_id)
}

/// Presence events of a document
pub fn presence(document_id: &str) -> Topic {
    Topic::new(TopicKind::Presence, document_id)
}

/// Comment notifications of a document
pub fn comments(document_id: &str) -> Topic {
    Topic::new(TopicKind::Comments, document_id)
}

/// Version-change notifications of a document
pub fn version_change(document_id: &str) -> Topic {
    Topic::new(TopicKind::VersionChange, document_id)
}
