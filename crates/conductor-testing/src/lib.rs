//! Testing utilities for conductor-core: an in-memory `Memory`
//! implementation and helpers for building inbound events and subjects in
//! tests, so downstream crates don't need to redefine the `InMemoryMemory`
//! fixture conductor-core's own controller tests use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use conductor_core::{Event, MachineMemoryRecord, Memory, NewSubjectParams, SubjectCodec};
use dashmap::DashMap;
use serde_json::Value;

/// An in-memory `Memory` implementation backed by `DashMap`, for tests and
/// demos that don't need real persistence.
///
/// `deny_lock` lets a test simulate another holder owning a subject's
/// lock, without needing a second `Memory` instance.
#[derive(Default)]
pub struct InMemoryStore {
    locks: DashMap<String, ()>,
    records: DashMap<String, MachineMemoryRecord>,
    deny_lock: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `lock` call fail until this is called again
    /// with `false`.
    pub fn set_deny_lock(&self, deny: bool) {
        self.deny_lock.store(deny, Ordering::SeqCst);
    }

    pub fn record(&self, subject: &str) -> Option<MachineMemoryRecord> {
        self.records.get(subject).map(|r| r.clone())
    }

    pub fn is_locked(&self, subject: &str) -> bool {
        self.locks.contains_key(subject)
    }
}

#[async_trait]
impl Memory for InMemoryStore {
    async fn lock(&self, subject: &str) -> anyhow::Result<bool> {
        if self.deny_lock.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.locks.insert(subject.to_string(), ()).is_none())
    }

    async fn unlock(&self, subject: &str) -> anyhow::Result<()> {
        self.locks.remove(subject);
        Ok(())
    }

    async fn read(&self, subject: &str) -> anyhow::Result<Option<MachineMemoryRecord>> {
        Ok(self.records.get(subject).map(|r| r.clone()))
    }

    async fn write(
        &self,
        subject: &str,
        record: &MachineMemoryRecord,
        _prev: Option<&MachineMemoryRecord>,
    ) -> anyhow::Result<()> {
        self.records.insert(subject.to_string(), record.clone());
        Ok(())
    }
}

/// Mint a fresh top-level subject string for `orchestrator`/`version`,
/// initiated by `"test"`.
pub fn test_subject(orchestrator: &str, version: semver::Version) -> String {
    SubjectCodec.new(NewSubjectParams {
        orchestrator: orchestrator.to_string(),
        version,
        initiator: "test".to_string(),
    })
}

/// Build a minimal inbound `Event` for `event_type` addressed to `subject`,
/// with every optional field left empty. Tests that need tracing, access
/// control, or extensions should construct `Event` directly.
pub fn inbound_event(event_type: &str, subject: &str, data: Value) -> Event {
    Event {
        id: uuid::Uuid::new_v4().to_string(),
        event_type: event_type.to_string(),
        source: "conductor-testing".to_string(),
        subject: subject.to_string(),
        to: event_type.to_string(),
        data,
        dataschema: "urn:conductor-testing/1.0.0".to_string(),
        traceparent: None,
        tracestate: None,
        accesscontrol: None,
        redirectto: None,
        executionunits: None,
        extensions: HashMap::new(),
    }
}
