//! # Task Type Registry
//!
//! Maps the 1-byte task type tag to a [`TaskCodec`]: metadata-only decoding
//! for the admission phase and full decoding (header + payload) for the data
//! phase and backend responses. DAGs may mix task types; the orchestrator
//! never needs to know a concrete codec, it dispatches through the registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{EdgeflowError, EdgeflowResult};
use crate::task::{Task, SIMPLE_TASK_TYPE};
use crate::wire::{Direction, SimpleTaskCodec};

/// Wire codec for one task type.
///
/// Decoders are pure over the byte buffer: they never consume bytes, and
/// `Ok(None)` means "not enough data yet, try again after more arrives".
/// On success they return the decoded task and the number of bytes the
/// caller should remove from the buffer.
pub trait TaskCodec: fmt::Debug + Send + Sync {
    /// Serialize a task as a request or response frame (header + payload).
    fn encode(&self, task: &Task, direction: Direction) -> Bytes;

    /// Serialize task metadata only (header, no payload).
    fn encode_metadata(&self, task: &Task) -> Bytes;

    /// Decode a complete frame (header + payload) from the front of `buf`.
    fn decode_full(&self, buf: &[u8]) -> EdgeflowResult<Option<(Task, usize)>>;

    /// Decode task metadata (header only) from the front of `buf`.
    fn decode_metadata(&self, buf: &[u8]) -> EdgeflowResult<Option<(Task, usize)>>;
}

/// Registry of task-type codecs, populated at startup.
#[derive(Debug, Clone, Default)]
pub struct TaskTypeRegistry {
    codecs: HashMap<u8, Arc<dyn TaskCodec>>,
}

impl TaskTypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in simple-task codec registered.
    pub fn with_default() -> Self {
        let mut registry = Self::new();
        registry.register(SIMPLE_TASK_TYPE, Arc::new(SimpleTaskCodec));
        registry
    }

    /// Register a codec for a task type, replacing any previous entry.
    pub fn register(&mut self, task_type: u8, codec: Arc<dyn TaskCodec>) {
        self.codecs.insert(task_type, codec);
    }

    /// Whether any codec is registered.
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Look up the codec for a task type.
    pub fn get(&self, task_type: u8) -> EdgeflowResult<&Arc<dyn TaskCodec>> {
        self.codecs
            .get(&task_type)
            .ok_or(EdgeflowError::UnknownTaskType(task_type))
    }

    /// Decode a type-prefixed full task entry (as found in DAG payloads).
    ///
    /// Peeks the leading type byte, dispatches to the registered codec, and
    /// reports consumed bytes including the type byte.
    pub fn decode_prefixed_full(&self, buf: &[u8]) -> EdgeflowResult<Option<(Task, usize)>> {
        self.decode_prefixed(buf, false)
    }

    /// Decode a type-prefixed metadata-only task entry.
    pub fn decode_prefixed_metadata(&self, buf: &[u8]) -> EdgeflowResult<Option<(Task, usize)>> {
        self.decode_prefixed(buf, true)
    }

    fn decode_prefixed(
        &self,
        buf: &[u8],
        metadata_only: bool,
    ) -> EdgeflowResult<Option<(Task, usize)>> {
        let Some(&task_type) = buf.first() else {
            return Ok(None);
        };
        let codec = self.get(task_type)?;
        let rest = &buf[1..];
        let decoded = if metadata_only {
            codec.decode_metadata(rest)?
        } else {
            codec.decode_full(rest)?
        };
        Ok(decoded.map(|(mut task, consumed)| {
            task.task_type = task_type;
            (task, consumed + 1)
        }))
    }
}
