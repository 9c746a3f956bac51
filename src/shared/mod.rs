//! Shared Module
//!
//! This module contains the wire-level types of the sync protocol. They are
//! used by the server and by any Rust client that speaks the protocol, and
//! do not depend on the `ssr` feature.
//!
//! # Overview
//!
//! - **`protocol`** - Envelope, channel names and the binary frame codec
//! - **`cmd`** - Operation batches and `op` channel payloads
//! - **`presence`** - Selection records and presence events
//! - **`document`** - Permission levels, document info and version pointers
//! - **`upload`** - Headers of the upload channels
//! - **`error`** - Shared error type
//! - **`config`** - Application configuration

/// Envelope and frame codec
pub mod protocol;

/// Operation batches
pub mod cmd;

/// Presence records
pub mod presence;

/// Documents, permissions and versions
pub mod document;

/// Upload channel headers
pub mod upload;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

pub use cmd::{Cmd, CmdItem, CmdList, DuplicateReply, OpPush, OpPushKind, OpRequest};
pub use config::{AppConfig, AppConfigBuilder, ConfigError};
pub use document::{AccessKeyInfo, BindResponse, DocumentInfo, DocumentVersion, PermType, VersionChangedEvent};
pub use error::SharedError;
pub use presence::{SelectionData, SelectionOp, SelectionOpType};
pub use protocol::{BindRequest, DataType, Frame, Inbound, StartRequest, TransData};
