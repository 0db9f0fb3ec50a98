//! The per-event transactional pipeline: lock → read → resolve → validate
//! → execute → emit → persist → unlock, with typed error mapping
//! (spec §4.4).
//!
//! One deliberate ordering choice versus the turn diagram in spec §4.4:
//! `MACHINE_RESOLVING` runs immediately after the subject is parsed and
//! the orchestrator-name routing check passes, *before* `LOCK_ACQUIRING`.
//! Resolving a machine only reads the in-memory registry — it performs no
//! I/O and mutates nothing — so moving it earlier changes no observable
//! ordering of lock/read/write calls, and it lets every later soft-failure
//! path address its system-error event using the resolved machine's own
//! `systemError` contract instead of a generic one.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{instrument, warn};

use crate::contract::SchemaRef;
use crate::engine::{EngineError, EngineInput, ExecutionEngine};
use crate::error::{ConductorError, TransactionCause, TurnOutcome, WorkflowError};
use crate::event::Event;
use crate::factory::{EmittableEventFactory, FactoryError};
use crate::intent::Intent;
use crate::machine::{Machine, ValidationOutcome};
use crate::memory::{EventCounters, MachineDefinitionRef, MachineMemoryRecord, Memory};
use crate::registry::MachineRegistry;
use crate::subject::{SubjectCodec, PARENT_SUBJECT_DATA_FIELD};
use crate::telemetry::{TelemetryContext, TelemetryOptions};

/// Per-event transactional pipeline for one orchestrator type.
pub struct OrchestratorController {
    registry: MachineRegistry,
    memory: Arc<dyn Memory>,
    engine: ExecutionEngine,
    factory: EmittableEventFactory,
    codec: SubjectCodec,
}

impl OrchestratorController {
    pub fn new(registry: MachineRegistry, memory: Arc<dyn Memory>, factory: EmittableEventFactory) -> Self {
        Self {
            registry,
            memory,
            engine: ExecutionEngine::new(),
            factory,
            codec: SubjectCodec,
        }
    }

    pub fn source(&self) -> &str {
        self.registry.source()
    }

    /// The distinguished system-error event type for this orchestrator:
    /// `sys.<source>.error`.
    pub fn system_error_event_type(&self) -> String {
        self.system_error_schema().event_type
    }

    /// This orchestrator's system-error contract: `{event_type, schema}`,
    /// per spec §6's `Orchestrator.systemErrorSchema`. Taken from whichever
    /// registered machine version sorts highest, since every version of
    /// one orchestrator shares the same system-error shape.
    pub fn system_error_schema(&self) -> SchemaRef {
        self.registry.representative_machine().contracts.own.system_error.clone()
    }

    #[instrument(skip(self, event, telemetry), fields(subject = %event.subject, event_type = %event.event_type))]
    pub async fn execute(
        &self,
        event: &Event,
        telemetry: TelemetryOptions,
    ) -> Result<Vec<Event>, ConductorError> {
        let telemetry = telemetry.override_context.unwrap_or_else(|| {
            TelemetryContext::from_inbound(event.traceparent.clone(), event.tracestate.clone())
        });

        let subject = self
            .codec
            .parse(&event.subject)
            .map_err(|e| ConductorError::execution(format!("{e}")))?;

        if !self.registry.handles(&subject.orchestrator) {
            // Safe ignore: this event belongs to a different orchestrator
            // type entirely. No lock, no read, no write.
            return Ok(collapse(TurnOutcome::Ignored));
        }

        let machine = self
            .registry
            .resolve_parsed(&subject)
            .map_err(|e| ConductorError::config(format!("{e}")))?;

        let mut locked = false;
        if self.registry.requires_resource_locking() {
            match self.memory.lock(&event.subject).await {
                Ok(true) => locked = true,
                Ok(false) => {
                    let error_event = self.system_error_event(
                        machine,
                        event,
                        None,
                        &telemetry,
                        &WorkflowError::new("LOCK_UNACQUIRED", "subject lock is held elsewhere"),
                    );
                    return Ok(collapse(TurnOutcome::SystemError(error_event)));
                }
                Err(e) => {
                    return Err(ConductorError::transaction(
                        TransactionCause::LockFailure,
                        e.to_string(),
                    ));
                }
            }
        }

        let outcome = self.run_locked(machine, event, &telemetry).await;

        if locked {
            if let Err(e) = self.memory.unlock(&event.subject).await {
                warn!(subject = %event.subject, error = %e, "failed to release subject lock");
            }
        }

        outcome.map(collapse)
    }

    async fn run_locked(
        &self,
        machine: &Machine,
        event: &Event,
        telemetry: &TelemetryContext,
    ) -> Result<TurnOutcome, ConductorError> {
        let record = self.memory.read(&event.subject).await.map_err(|e| {
            ConductorError::transaction(TransactionCause::ReadFailure, e.to_string())
        })?;

        let is_init = event.event_type == machine.source;
        if record.is_none() && !is_init {
            // Safe ignore: a step event arrived before any state exists.
            return Ok(TurnOutcome::Ignored);
        }

        // Where this workflow's own completion routes to. Per spec §4.4:
        // on the init turn it comes from the reserved `parentSubject$$`
        // payload field (set by the factory when this workflow was minted
        // as a nested call — see `factory.rs`'s `child_parent_subject`);
        // on every later turn it's whatever was stored on the record's
        // first write.
        let parent_subject = if is_init {
            event
                .data
                .get(PARENT_SUBJECT_DATA_FIELD)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        } else {
            record.as_ref().and_then(|r| r.parent_subject.clone())
        };

        match machine.validate_input(event) {
            ValidationOutcome::Valid => {}
            ValidationOutcome::ContractUnresolved => {
                return Ok(TurnOutcome::SystemError(self.system_error_event(
                    machine,
                    event,
                    parent_subject.as_deref(),
                    telemetry,
                    &WorkflowError::new(
                        "CONTRACT_UNRESOLVED",
                        format!("event type `{}` is unknown to this workflow version", event.event_type),
                    ),
                )));
            }
            ValidationOutcome::InvalidData(msg) => {
                return Ok(TurnOutcome::SystemError(self.system_error_event(
                    machine,
                    event,
                    parent_subject.as_deref(),
                    telemetry,
                    &WorkflowError::new("INVALID_DATA", msg),
                )));
            }
            ValidationOutcome::Invalid(msg) => {
                return Ok(TurnOutcome::SystemError(self.system_error_event(
                    machine,
                    event,
                    parent_subject.as_deref(),
                    telemetry,
                    &WorkflowError::new("INVALID", msg),
                )));
            }
        }

        let engine_out = match self.engine.execute(EngineInput {
            machine,
            state: record.as_ref().map(|r| &r.state),
            event,
        }) {
            Ok(out) => out,
            Err(EngineError::BadInit { event_type, source }) => {
                return Ok(TurnOutcome::SystemError(self.system_error_event(
                    machine,
                    event,
                    parent_subject.as_deref(),
                    telemetry,
                    &WorkflowError::new(
                        "BAD_INIT",
                        format!("event `{event_type}` cannot initialize machine source `{source}`"),
                    ),
                )));
            }
            Err(EngineError::Chart(chart_err)) => {
                return Ok(TurnOutcome::SystemError(self.system_error_event(
                    machine,
                    event,
                    parent_subject.as_deref(),
                    telemetry,
                    &WorkflowError::new("EXECUTION_FAILURE", chart_err.to_string()),
                )));
            }
        };

        let mut intents: Vec<Intent> = engine_out.events;
        if engine_out.state.is_terminal() {
            if let (Some(output), Some(complete_type)) =
                (&engine_out.final_output, &machine.contracts.own.complete_event_type)
            {
                intents.push(Intent::new(complete_type.clone(), output.clone()));
            }
        }

        let mut emitted = Vec::with_capacity(intents.len());
        let mut errors = Vec::new();
        for intent in &intents {
            match self
                .factory
                .materialize(intent, machine, event, parent_subject.as_deref(), telemetry)
            {
                Ok(outbound) => emitted.push(outbound),
                Err(e) => errors.push(self.system_error_event(
                    machine,
                    event,
                    parent_subject.as_deref(),
                    telemetry,
                    &factory_error_as_workflow_error(&e),
                )),
            }
        }

        // First-error-wins at the turn level (spec §4.3).
        let outbound_events = if errors.is_empty() { emitted } else { errors };

        let consumed_before = record.as_ref().map(|r| r.events.consumed).unwrap_or(0);
        let produced_before = record.as_ref().map(|r| r.events.produced).unwrap_or(0);
        let init_event_id = record
            .as_ref()
            .and_then(|r| r.init_event_id.clone())
            .or_else(|| Some(event.id.clone()));

        let new_record = MachineMemoryRecord {
            subject: event.subject.clone(),
            parent_subject,
            status: engine_out.state.status.clone(),
            value: engine_out.state.value.clone(),
            state: engine_out.state,
            init_event_id,
            events: EventCounters {
                consumed: consumed_before + 1,
                produced: produced_before + outbound_events.len() as u64,
            },
            machine_definition: Some(MachineDefinitionRef {
                version: machine.version.clone(),
            }),
        };

        self.memory
            .write(&event.subject, &new_record, record.as_ref())
            .await
            .map_err(|e| ConductorError::transaction(TransactionCause::WriteFailure, e.to_string()))?;

        Ok(TurnOutcome::Events(outbound_events))
    }

    fn system_error_event(
        &self,
        machine: &Machine,
        source_event: &Event,
        parent_subject: Option<&str>,
        telemetry: &TelemetryContext,
        error: &WorkflowError,
    ) -> Event {
        let initiator = self
            .codec
            .parse(&source_event.subject)
            .map(|s| s.initiator)
            .unwrap_or_else(|_| source_event.source.clone());

        let schema: &SchemaRef = &machine.contracts.own.system_error;
        let subject = parent_subject
            .map(str::to_string)
            .unwrap_or_else(|| source_event.subject.clone());

        Event {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: schema.event_type.clone(),
            source: machine.source.clone(),
            subject,
            to: initiator,
            data: serde_json::json!({
                "errorName": error.name,
                "errorMessage": error.message,
            }),
            dataschema: machine.contracts.own.dataschema(),
            traceparent: telemetry.traceparent.clone(),
            tracestate: telemetry.tracestate.clone(),
            accesscontrol: source_event.accesscontrol.clone(),
            redirectto: source_event.redirectto.clone(),
            executionunits: source_event.executionunits,
            extensions: HashMap::from([(
                crate::event::TIME_EXTENSION_FIELD.to_string(),
                serde_json::Value::String(crate::event::now_rfc3339()),
            )]),
        }
    }
}

/// Collapse the internal `{Events | SystemError | Ignored}` sum type to the
/// `Result<Vec<Event>, ConductorError>` the public API exposes (spec §9):
/// system errors and ignores both surface as `Ok`, just with different
/// payloads.
fn collapse(outcome: TurnOutcome) -> Vec<Event> {
    match outcome {
        TurnOutcome::Events(events) => events,
        TurnOutcome::SystemError(event) => vec![event],
        TurnOutcome::Ignored => vec![],
    }
}

fn factory_error_as_workflow_error(error: &FactoryError) -> WorkflowError {
    match error {
        FactoryError::EmitUncontracted(t) => {
            WorkflowError::new("EMIT_UNCONTRACTED", format!("no contract matches intent type `{t}`"))
        }
        FactoryError::DataschemaMismatch { declared, expected } => WorkflowError::new(
            "DATASCHEMA_MISMATCH",
            format!("intent declared `{declared}` but contract requires `{expected}`"),
        ),
        FactoryError::SchemaInvalid { event_type, message } => {
            WorkflowError::new("EMIT_SCHEMA_INVALID", format!("{event_type}: {message}"))
        }
        FactoryError::Subject(e) => WorkflowError::new("EMIT_SUBJECT_ERROR", e.to_string()),
    }
}
