//! The machine snapshot: opaque, persistable interpreter state, and the
//! base64(zlib(JSON)) codec used to store it at rest (spec §3, §9).

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::contract::SchemaValidator;

/// Terminal statuses a snapshot's `status` field may carry. Machines are
/// free to define additional, non-terminal statuses of their own.
pub mod status {
    pub const ACTIVE: &str = "active";
    pub const DONE: &str = "done";
    pub const ERROR: &str = "error";
    pub const STOPPED: &str = "stopped";

    pub fn is_terminal(status: &str) -> bool {
        matches!(status, DONE | ERROR | STOPPED)
    }
}

/// The reserved context sub-tree a machine's `enqueueArvoEvent` built-in
/// assign action writes intents into. Never appears in a persisted
/// snapshot; the engine drains and strips it every turn (spec §4.2).
pub const VOLATILE_NAMESPACE: &str = "arvo$$";
pub const VOLATILE_SECTION: &str = "volatile$$";
pub const VOLATILE_EVENT_QUEUE: &str = "eventQueue$$";

/// Opaque, persistable interpreter state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub status: String,
    pub value: Value,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Snapshot {
    pub fn is_terminal(&self) -> bool {
        status::is_terminal(&self.status)
    }

    /// Remove the volatile intent queue from `context` and return its
    /// entries in emission order. Idempotent: a context with no volatile
    /// sub-tree returns an empty vec and is left untouched.
    pub fn drain_volatile_intents(&mut self) -> Vec<Value> {
        let Some(Value::Object(arvo)) = self.context.get_mut(VOLATILE_NAMESPACE) else {
            return Vec::new();
        };
        let Some(Value::Object(volatile)) = arvo.get_mut(VOLATILE_SECTION) else {
            return Vec::new();
        };
        let drained = match volatile.remove(VOLATILE_EVENT_QUEUE) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        if volatile.is_empty() {
            arvo.remove(VOLATILE_SECTION);
        }
        if arvo.is_empty() {
            self.context.remove(VOLATILE_NAMESPACE);
        }
        drained
    }

    /// `true` once `drain_volatile_intents` has stripped the reserved
    /// sub-tree (or it was never present); used by persistence-layer tests
    /// to assert invariant 2 from spec §8.
    pub fn is_volatile_free(&self) -> bool {
        !self.context.contains_key(VOLATILE_NAMESPACE)
    }
}

#[derive(Debug, Error)]
pub enum SnapshotCodecError {
    #[error("snapshot failed schema validation: {0}")]
    SchemaInvalid(String),
    #[error("snapshot is not valid base64")]
    BadBase64,
    #[error("snapshot zlib stream is corrupt: {0}")]
    BadCompression(#[from] std::io::Error),
    #[error("snapshot payload is not valid JSON")]
    BadJson,
}

/// base64(zlib(JSON)) codec for snapshots at rest, with a schema check on
/// both ends to catch format drift across machine versions.
#[derive(Clone)]
pub struct SnapshotCodec {
    schema: std::sync::Arc<dyn SchemaValidator>,
}

impl SnapshotCodec {
    pub fn new(schema: std::sync::Arc<dyn SchemaValidator>) -> Self {
        Self { schema }
    }

    pub fn encode(&self, snapshot: &Snapshot) -> Result<String, SnapshotCodecError> {
        let value = serde_json::to_value(snapshot).map_err(|_| SnapshotCodecError::BadJson)?;
        self.schema
            .validate(&value)
            .map_err(|e| SnapshotCodecError::SchemaInvalid(e.message))?;
        let json = serde_json::to_vec(&value).map_err(|_| SnapshotCodecError::BadJson)?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let compressed = encoder.finish()?;
        Ok(BASE64.encode(compressed))
    }

    pub fn decode(&self, raw: &str) -> Result<Snapshot, SnapshotCodecError> {
        let compressed = BASE64
            .decode(raw.as_bytes())
            .map_err(|_| SnapshotCodecError::BadBase64)?;
        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;
        let value: Value = serde_json::from_slice(&json).map_err(|_| SnapshotCodecError::BadJson)?;
        self.schema
            .validate(&value)
            .map_err(|e| SnapshotCodecError::SchemaInvalid(e.message))?;
        serde_json::from_value(value).map_err(|_| SnapshotCodecError::BadJson)
    }
}
