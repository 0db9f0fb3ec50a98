//! Holds the set of machine versions for a single orchestrator type and
//! resolves exactly one per inbound event (spec §4.1).

use std::collections::HashMap;

use semver::Version;
use thiserror::Error;

use crate::machine::Machine;
use crate::subject::{Subject, SubjectCodec, SubjectError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no machines were supplied to the registry")]
    EmptyRegistry,
    #[error("machines `{a}` and `{b}` disagree on source (`{source_a}` vs `{source_b}`)")]
    InconsistentSource {
        a: Version,
        b: Version,
        source_a: String,
        source_b: String,
    },
    #[error("no machine registered for orchestrator `{orchestrator}` version `{version}`")]
    Unresolved {
        orchestrator: String,
        version: Version,
    },
    #[error("event subject is not parseable: {0}")]
    BadSubject(#[from] SubjectError),
}

/// Holds one machine per `(name, version)` for a single orchestrator type.
pub struct MachineRegistry {
    source: String,
    machines: HashMap<Version, Machine>,
    requires_resource_locking: bool,
    codec: SubjectCodec,
}

impl MachineRegistry {
    pub fn new(machines: Vec<Machine>) -> Result<Self, RegistryError> {
        if machines.is_empty() {
            return Err(RegistryError::EmptyRegistry);
        }
        let source = machines[0].source.clone();
        for window in machines.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            if a.source != b.source {
                return Err(RegistryError::InconsistentSource {
                    a: a.version.clone(),
                    b: b.version.clone(),
                    source_a: a.source.clone(),
                    source_b: b.source.clone(),
                });
            }
        }
        let requires_resource_locking = machines.iter().any(|m| m.requires_resource_locking);
        let map = machines.into_iter().map(|m| (m.version.clone(), m)).collect();
        Ok(Self {
            source,
            machines: map,
            requires_resource_locking,
            codec: SubjectCodec,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether `orchestrator_name` is the one this registry serves. The
    /// controller checks this *before* calling `resolve`: a mismatch is a
    /// safe-ignore routing miss (spec §4.4), not a `RegistryError`.
    pub fn handles(&self, orchestrator_name: &str) -> bool {
        self.source == orchestrator_name
    }

    /// Logical OR of every registered machine's `requires_resource_locking`.
    pub fn requires_resource_locking(&self) -> bool {
        self.requires_resource_locking
    }

    /// Parse `subject` and resolve the machine whose `(name, version)`
    /// matches exactly. No version coercion: `(name, version)` is unique.
    pub fn resolve(&self, subject_raw: &str) -> Result<&Machine, RegistryError> {
        let subject = self.codec.parse(subject_raw)?;
        self.resolve_parsed(&subject)
    }

    pub fn resolve_parsed(&self, subject: &Subject) -> Result<&Machine, RegistryError> {
        self.machines.get(&subject.version).ok_or_else(|| RegistryError::Unresolved {
            orchestrator: subject.orchestrator.clone(),
            version: subject.version.clone(),
        })
    }

    /// Any one registered machine, for surfacing contract-shaped data
    /// that's expected to be stable across every version of one
    /// orchestrator (e.g. the system-error schema). Picks the highest
    /// version so the result is deterministic across calls.
    pub fn representative_machine(&self) -> &Machine {
        self.machines
            .values()
            .max_by(|a, b| a.version.cmp(&b.version))
            .expect("MachineRegistry::new rejects an empty machine list")
    }
}
