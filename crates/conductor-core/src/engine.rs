//! Drives one turn of a state chart from a persisted snapshot, collects
//! emitted intents, and returns the new snapshot (spec §4.2).

use serde_json::Value;
use thiserror::Error;

use crate::chart::ChartError;
use crate::event::Event;
use crate::intent::Intent;
use crate::machine::Machine;
use crate::snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("event `{event_type}` is not a valid initialization event for machine source `{source}`")]
    BadInit { event_type: String, source: String },
    #[error(transparent)]
    Chart(#[from] ChartError),
}

/// Engine input: the machine to drive, the persisted snapshot (`None` for
/// a brand-new workflow), and the inbound event.
pub struct EngineInput<'a> {
    pub machine: &'a Machine,
    pub state: Option<&'a Snapshot>,
    pub event: &'a Event,
}

/// Engine output: the new snapshot, every intent raised during the turn in
/// emission order, and the terminal output if any.
pub struct EngineOutput {
    pub state: Snapshot,
    pub events: Vec<Intent>,
    pub final_output: Option<Value>,
}

/// Applies one event to one machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionEngine;

impl ExecutionEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn execute(&self, input: EngineInput<'_>) -> Result<EngineOutput, EngineError> {
        let mut turn = match input.state {
            None => {
                if input.event.event_type != input.machine.source {
                    return Err(EngineError::BadInit {
                        event_type: input.event.event_type.clone(),
                        source: input.machine.source.clone(),
                    });
                }
                input.machine.logic.start(input.event)?
            }
            Some(snapshot) => input.machine.logic.resume(snapshot, input.event)?,
        };

        // Drain the reserved volatile intent queue and strip it from the
        // snapshot so it is never persisted (spec invariant 2, §8).
        let buffered = turn.snapshot.drain_volatile_intents();
        let mut events = turn.emitted_intents;
        events.extend(buffered.into_iter().filter_map(intent_from_json));

        let final_output = turn.snapshot.output.clone();
        Ok(EngineOutput {
            state: turn.snapshot,
            events,
            final_output,
        })
    }
}

fn intent_from_json(value: Value) -> Option<Intent> {
    let event_type = value.get("type")?.as_str()?.to_string();
    let data = value.get("data").cloned().unwrap_or(Value::Null);
    Some(Intent::new(event_type, data))
}
