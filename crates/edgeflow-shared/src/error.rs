//! # Error Types
//!
//! Unified error handling for edgeflow crates. Frame-level errors are raised
//! by the wire codecs; the orchestration crate maps them onto admission
//! rejections or buffer aborts as appropriate.

use thiserror::Error;

/// Crate-wide result type
pub type EdgeflowResult<T> = Result<T, EdgeflowError>;

/// Errors surfaced by edgeflow components
#[derive(Debug, Error)]
pub enum EdgeflowError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("no deserializer registered for task type {0}")]
    UnknownTaskType(u8),

    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("workload DAG is empty")]
    EmptyDag,

    #[error("workload DAG contains a cycle")]
    InvalidDag,

    #[error("no suitable backend for task {task_id}")]
    NoBackendAvailable { task_id: u64 },

    #[error("send to {peer} failed")]
    SendFailed { peer: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EdgeflowError {
    /// Create a malformed-frame error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFrame(message.into())
    }

    /// Create a deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
