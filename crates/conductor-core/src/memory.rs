//! The persistence/locking collaborator: `lock`/`unlock`/`read`/`write` on
//! a subject key, and the record shape persisted underneath (spec §3, §6).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

/// How many events a subject's record has consumed/produced over its
/// lifetime. Part of the richer, forward-looking record shape (see
/// DESIGN.md, "Open Questions").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventCounters {
    pub consumed: u64,
    pub produced: u64,
}

/// Which machine version produced the current snapshot, kept so a reader
/// can tell which `Machine` built a record without re-parsing the subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineDefinitionRef {
    pub version: semver::Version,
}

/// One persisted record per subject (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineMemoryRecord {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_subject: Option<String>,
    pub status: String,
    pub value: serde_json::Value,
    pub state: Snapshot,
    /// The `id` of the event that first created this record. `None` for
    /// records written before this field existed.
    #[serde(default)]
    pub init_event_id: Option<String>,
    #[serde(default)]
    pub events: EventCounters,
    #[serde(default)]
    pub machine_definition: Option<MachineDefinitionRef>,
}

/// The backing persistence/locking store. Out of scope to implement here
/// (spec §1); this is the trait boundary `conductor-core` is built against.
/// `conductor-testing::InMemoryStore` and `conductor-persistence-postgres`
/// are two concrete implementations.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Acquire the per-subject lock. `Ok(true)` if acquired, `Ok(false)`
    /// if held elsewhere.
    async fn lock(&self, subject: &str) -> anyhow::Result<bool>;

    /// Release the per-subject lock. Failures here are logged by the
    /// controller, never propagated (spec §4.4).
    async fn unlock(&self, subject: &str) -> anyhow::Result<()>;

    /// Read the current record for `subject`, or `None` for a new
    /// workflow.
    async fn read(&self, subject: &str) -> anyhow::Result<Option<MachineMemoryRecord>>;

    /// Persist `record`, keyed by `record.subject`. `prev` is the record
    /// read earlier in the same turn, passed through for implementations
    /// that want optimistic-concurrency checks; conductor's own
    /// implementations do not require it since the lock already serializes
    /// writers.
    async fn write(
        &self,
        subject: &str,
        record: &MachineMemoryRecord,
        prev: Option<&MachineMemoryRecord>,
    ) -> anyhow::Result<()>;
}
