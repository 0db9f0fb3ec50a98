//! # Conductor
//!
//! A versioned, event-driven state-machine orchestrator for a
//! CloudEvent-style messaging fabric.
//!
//! ## Core Concepts
//!
//! Conductor separates **routing** from **state-chart logic**:
//! - [`Event`] is the wire record: a CloudEvent-shaped fact that arrives at,
//!   or leaves, an [`Orchestrator`].
//! - [`Subject`] is the opaque, self-describing workflow-instance id every
//!   event carries; [`SubjectCodec`] is the only thing that parses or mints
//!   one.
//! - A [`Machine`] is one versioned implementation of an orchestrator,
//!   bound to its own [`Contract`] plus one contract per service it calls,
//!   and backed by a [`Chart`] — the state-chart interpreter conductor
//!   treats as an external collaborator.
//! - [`MachineRegistry`] holds every version of one orchestrator and
//!   resolves exactly one machine per inbound event, by exact
//!   `(name, version)` match.
//! - [`ExecutionEngine`] drives one turn of the resolved machine's chart
//!   and drains the reserved volatile intent queue out of its snapshot.
//! - [`EmittableEventFactory`] turns the raw [`Intent`]s a turn produces
//!   into fully addressed, contract-validated [`Event`]s — including
//!   subject chaining for nested orchestrations and routing completions
//!   back to a parent workflow.
//!
//! ## Architecture
//!
//! ```text
//! inbound Event
//!     │
//!     ▼
//! OrchestratorController::execute()
//!     │
//!     ├─► SubjectCodec::parse ──► registry.handles()? ──No──► safe ignore
//!     │                                   │Yes
//!     ├─► MachineRegistry::resolve_parsed ─────────────────► RegistryError
//!     │                                   │
//!     ├─► Memory::lock ────────────────────────────────────► LOCK_UNACQUIRED
//!     │                                   │
//!     ├─► Memory::read ─► Machine::validate_input ─────────► CONTRACT_UNRESOLVED /
//!     │                                   │                   INVALID_DATA / INVALID
//!     ├─► ExecutionEngine::execute ──────────────────────────► BAD_INIT / EXECUTION_FAILURE
//!     │                                   │
//!     ├─► EmittableEventFactory::materialize (per intent) ───► EMIT_UNCONTRACTED /
//!     │                                   │                    DATASCHEMA_MISMATCH / ...
//!     ├─► Memory::write
//!     └─► Memory::unlock
//! ```
//!
//! ## Key Invariants
//!
//! 1. Every outbound event's `dataschema` is `<contract uri>/<contract version>`.
//! 2. The volatile intent queue never survives into a persisted snapshot.
//! 3. A turn either emits its intents or emits exactly one system-error
//!    event — never a mix of both.
//! 4. `parent_subject` and `init_event_id` are set once, on a record's
//!    first write, and never rewritten afterward.
//!
//! ## Example
//!
//! ```ignore
//! use conductor_core::{Orchestrator, OrchestratorBuilder, TelemetryOptions};
//! use std::sync::Arc;
//!
//! let orchestrator = OrchestratorBuilder::new()
//!     .with_machine(my_machine)
//!     .with_memory(Arc::new(my_memory))
//!     .build()?;
//!
//! let outbound = orchestrator.execute(&inbound_event, TelemetryOptions::default()).await?;
//! # Ok::<(), conductor_core::ConductorError>(())
//! ```
//!
//! ## What This Is Not
//!
//! Conductor is **not**:
//! - A state-chart interpreter (see [`Chart`]; bring your own, or use
//!   [`charts::flat::FlatChart`] as a reference implementation)
//! - A contract-authoring or schema-registry library (see [`Contract`])
//! - A persistence layer (see [`Memory`]; `conductor-persistence-postgres`
//!   and `conductor-testing` are concrete implementations)

mod chart;
mod contract;
mod controller;
mod engine;
mod error;
mod event;
mod factory;
mod intent;
mod machine;
mod memory;
mod registry;
mod snapshot;
mod subject;
mod telemetry;

use std::sync::Arc;

pub use crate::chart::{Chart, ChartBuildError, ChartError, ChartTurnResult, IntentTemplate};
pub use crate::contract::{
    Contract, ContractType, JsonSchemaValidator, SchemaRef, SchemaValidationError, SchemaValidator,
};
pub use crate::controller::OrchestratorController;
pub use crate::engine::{EngineError, EngineInput, EngineOutput, ExecutionEngine};
pub use crate::error::{ConductorError, TransactionCause, TurnOutcome, WorkflowError};
pub use crate::event::{Event, EventDraft};
pub use crate::factory::{EmittableEventFactory, FactoryConfig, FactoryError};
pub use crate::intent::{Intent, IntentBuffer};
pub use crate::machine::{
    Machine, MachineBuildError, MachineContracts, ValidationOutcome, service_contract_for,
};
pub use crate::memory::{EventCounters, MachineDefinitionRef, MachineMemoryRecord, Memory};
pub use crate::registry::{MachineRegistry, RegistryError};
pub use crate::snapshot::{status, Snapshot, SnapshotCodec, SnapshotCodecError};
pub use crate::subject::{
    FromSubjectParams, NewSubjectParams, Subject, SubjectCodec, SubjectError,
    PARENT_SUBJECT_DATA_FIELD,
};
pub use crate::telemetry::{TelemetryContext, TelemetryOptions};

/// Reference state-chart implementation; real deployments bring their own
/// [`Chart`].
pub mod charts {
    pub use crate::chart::flat;
}

/// Errors [`OrchestratorBuilder::build`] can return.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("OrchestratorBuilder::build called without with_memory")]
    MissingMemory,
}

/// Assembles one [`Orchestrator`] from its machine versions, its memory
/// collaborator, and any factory defaults.
///
/// One builder, one orchestrator type: every machine passed to
/// [`with_machine`](Self::with_machine) must share the same `source` (the
/// event type that initializes them), enforced by [`MachineRegistry::new`].
pub struct OrchestratorBuilder {
    machines: Vec<Machine>,
    memory: Option<Arc<dyn Memory>>,
    factory_config: FactoryConfig,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            machines: Vec::new(),
            memory: None,
            factory_config: FactoryConfig::default(),
        }
    }

    pub fn with_machine(mut self, machine: Machine) -> Self {
        self.machines.push(machine);
        self
    }

    pub fn with_machines(mut self, machines: impl IntoIterator<Item = Machine>) -> Self {
        self.machines.extend(machines);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_factory_config(mut self, config: FactoryConfig) -> Self {
        self.factory_config = config;
        self
    }

    pub fn build(self) -> Result<Orchestrator, BuildError> {
        let registry = MachineRegistry::new(self.machines)?;
        let memory = self.memory.ok_or(BuildError::MissingMemory)?;
        let factory = EmittableEventFactory::new(self.factory_config);
        Ok(Orchestrator {
            controller: OrchestratorController::new(registry, memory, factory),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The public entry point: one orchestrator type, every version it
/// supports, wired to its persistence collaborator.
pub struct Orchestrator {
    controller: OrchestratorController,
}

impl Orchestrator {
    /// The event type that initializes this orchestrator.
    pub fn source(&self) -> &str {
        self.controller.source()
    }

    /// The distinguished system-error event type this orchestrator emits:
    /// `sys.<source>.error`.
    pub fn system_error_event_type(&self) -> String {
        self.controller.system_error_event_type()
    }

    /// This orchestrator's system-error contract: `{event_type, schema}`,
    /// matching spec §6's `Orchestrator.systemErrorSchema`.
    pub fn system_error_schema(&self) -> SchemaRef {
        self.controller.system_error_schema()
    }

    /// Run one event through the transactional pipeline: lock, read,
    /// resolve, validate, execute, emit, persist, unlock.
    ///
    /// Returns the events to forward downstream — zero for a safe ignore,
    /// one or more intents on success, or exactly one system-error event on
    /// a soft failure. A hard failure (misconfiguration, a persistence
    /// error) is returned as `Err` instead.
    pub async fn execute(
        &self,
        event: &Event,
        telemetry: TelemetryOptions,
    ) -> Result<Vec<Event>, ConductorError> {
        self.controller.execute(event, telemetry).await
    }
}
