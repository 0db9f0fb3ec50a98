//! `FlatChart`: a small, synchronous, non-hierarchical reference chart.
//!
//! This is the chart conductor's own test suite and `conductor-testing`
//! build fixture machines against. It supports exactly the shapes spec §4.2
//! allows (states, guarded-by-event transitions, context assignment, direct
//! intent emission, and the reserved enqueue action) and rejects the ones
//! it forbids (`invoke`, `after`, actor references) at construction.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};

use super::{ChartBuildError, ChartError, ChartTurnResult};
pub use super::IntentTemplate;
use crate::event::Event;
use crate::intent::Intent;
use crate::snapshot::{self, status, Snapshot};

type ContextFn = dyn Fn(&Value, &Event) -> Value + Send + Sync;

/// One transition out of a state, triggered by an inbound event type.
pub struct Transition {
    pub target: String,
    pub assign: Option<Box<ContextFn>>,
    /// Intents raised directly via the catch-all intent listener.
    pub emit: Vec<IntentTemplate>,
    /// Intents buffered via the reserved `enqueueArvoEvent` action.
    pub enqueue: Vec<IntentTemplate>,
    /// Set when this transition lands on a terminal state.
    pub output: Option<Box<ContextFn>>,
    /// Names of any custom actions attached to this transition, checked
    /// at build time against the reserved action-name list.
    pub action_names: Vec<String>,
}

impl Transition {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            assign: None,
            emit: Vec::new(),
            enqueue: Vec::new(),
            output: None,
            action_names: Vec::new(),
        }
    }

    pub fn with_assign(mut self, f: impl Fn(&Value, &Event) -> Value + Send + Sync + 'static) -> Self {
        self.assign = Some(Box::new(f));
        self
    }

    pub fn with_emit(mut self, intent: IntentTemplate) -> Self {
        self.emit.push(intent);
        self
    }

    pub fn with_enqueue(mut self, intent: IntentTemplate) -> Self {
        self.enqueue.push(intent);
        self
    }

    pub fn with_output(mut self, f: impl Fn(&Value, &Event) -> Value + Send + Sync + 'static) -> Self {
        self.output = Some(Box::new(f));
        self
    }

    pub fn with_action_name(mut self, name: impl Into<String>) -> Self {
        self.action_names.push(name.into());
        self
    }
}

/// One node in the chart.
#[derive(Default)]
pub struct StateDef {
    pub invoke: bool,
    pub after: Option<Duration>,
    pub actor_ref: Option<String>,
    pub status: Option<String>,
    pub on: HashMap<String, Transition>,
}

impl StateDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn on(mut self, event_type: impl Into<String>, transition: Transition) -> Self {
        self.on.insert(event_type.into(), transition);
        self
    }
}

/// A flat state chart: a map of named states and the initial one.
pub struct FlatChart {
    initial: String,
    states: HashMap<String, StateDef>,
}

impl FlatChart {
    pub fn build(
        initial: impl Into<String>,
        states: HashMap<String, StateDef>,
    ) -> Result<Self, ChartBuildError> {
        for (name, state) in &states {
            if state.invoke {
                return Err(ChartBuildError::InvokeNotSupported(name.clone()));
            }
            if state.after.is_some() {
                return Err(ChartBuildError::AfterNotSupported(name.clone()));
            }
            if state.actor_ref.is_some() {
                return Err(ChartBuildError::ActorRefNotSupported(name.clone()));
            }
            for transition in state.on.values() {
                if transition
                    .action_names
                    .iter()
                    .any(|n| n == "enqueueArvoEvent")
                {
                    return Err(ChartBuildError::ReservedActionName);
                }
            }
        }
        Ok(Self {
            initial: initial.into(),
            states,
        })
    }

    fn status_for(&self, state_name: &str) -> String {
        self.states
            .get(state_name)
            .and_then(|s| s.status.clone())
            .unwrap_or_else(|| status::ACTIVE.to_string())
    }

    #[allow(clippy::type_complexity)]
    fn step(
        &self,
        current_state: &str,
        context: &Value,
        event: &Event,
    ) -> Result<(String, Value, Vec<Intent>, Vec<Intent>, Option<Value>), ChartError> {
        let state = self.states.get(current_state).ok_or_else(|| {
            ChartError::Interpreter(format!("unknown state `{current_state}`"))
        })?;
        let Some(transition) = state.on.get(&event.event_type) else {
            return Ok((current_state.to_string(), context.clone(), Vec::new(), Vec::new(), None));
        };
        let new_context = match &transition.assign {
            Some(assign) => assign(context, event),
            None => context.clone(),
        };
        let emitted = transition
            .emit
            .iter()
            .map(|t| t.render(&new_context, event))
            .collect();
        let enqueued = transition
            .enqueue
            .iter()
            .map(|t| t.render(&new_context, event))
            .collect();
        let output = transition.output.as_ref().map(|f| f(&new_context, event));
        Ok((transition.target.clone(), new_context, emitted, enqueued, output))
    }

    fn finish(
        &self,
        next_state: String,
        new_context: Value,
        emitted: Vec<Intent>,
        enqueued: Vec<Intent>,
        output: Option<Value>,
    ) -> Result<ChartTurnResult, ChartError> {
        let mut context = match new_context {
            Value::Object(map) => map,
            other => {
                return Err(ChartError::Interpreter(format!(
                    "context must be a JSON object, got {other}"
                )))
            }
        };
        if !enqueued.is_empty() {
            let queue: Vec<Value> = enqueued
                .iter()
                .map(|intent| {
                    serde_json::json!({
                        "type": intent.event_type,
                        "data": intent.data,
                    })
                })
                .collect();
            let mut section = Map::new();
            section.insert(snapshot::VOLATILE_EVENT_QUEUE.to_string(), Value::Array(queue));
            let mut namespace = Map::new();
            namespace.insert(snapshot::VOLATILE_SECTION.to_string(), Value::Object(section));
            context.insert(snapshot::VOLATILE_NAMESPACE.to_string(), Value::Object(namespace));
        }
        let snapshot = Snapshot {
            status: self.status_for(&next_state),
            value: Value::String(next_state),
            context,
            output,
            error: None,
        };
        Ok(ChartTurnResult {
            snapshot,
            emitted_intents: emitted,
        })
    }
}

fn current_state_name(value: &Value) -> Result<String, ChartError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(ChartError::Interpreter(format!(
            "FlatChart only supports flat string state values, got {other}"
        ))),
    }
}

impl super::Chart for FlatChart {
    fn start(&self, init_event: &Event) -> Result<ChartTurnResult, ChartError> {
        let context = init_event.data.clone();
        let (next_state, new_context, emitted, enqueued, output) =
            self.step(&self.initial, &context, init_event)?;
        self.finish(next_state, new_context, emitted, enqueued, output)
    }

    fn resume(&self, snapshot: &Snapshot, event: &Event) -> Result<ChartTurnResult, ChartError> {
        let current_state = current_state_name(&snapshot.value)?;
        let context_value = Value::Object(snapshot.context.clone());
        let (next_state, new_context, emitted, enqueued, output) =
            self.step(&current_state, &context_value, event)?;
        self.finish(next_state, new_context, emitted, enqueued, output)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Chart;
    use super::*;
    use serde_json::json;

    fn search_chart() -> FlatChart {
        let mut states = HashMap::new();
        states.insert(
            "start".to_string(),
            StateDef::new().on(
                "com.example.llm",
                Transition::to("awaitingSearch")
                    .with_assign(|_, event| event.data.clone())
                    .with_emit(IntentTemplate::new("com.svc.search", |ctx, _| ctx.clone())),
            ),
        );
        states.insert(
            "awaitingSearch".to_string(),
            StateDef::new().with_status(snapshot::status::DONE.to_string()).on(
                "com.svc.search.done",
                Transition::to("done").with_output(|_, event| event.data.clone()),
            ),
        );
        states.insert("done".to_string(), StateDef::new().with_status(snapshot::status::DONE.to_string()));
        FlatChart::build("start", states).expect("valid chart")
    }

    fn event(event_type: &str, data: Value) -> Event {
        Event {
            id: "evt-1".into(),
            event_type: event_type.into(),
            source: "com.example.llm".into(),
            subject: "subj-A".into(),
            to: "com.example.llm".into(),
            data,
            dataschema: "urn:test/1.0.0".into(),
            traceparent: None,
            tracestate: None,
            accesscontrol: None,
            redirectto: None,
            executionunits: None,
            extensions: Default::default(),
        }
    }

    #[test]
    fn start_emits_service_intent() {
        let chart = search_chart();
        let turn = chart
            .start(&event("com.example.llm", json!({"request": "hi"})))
            .expect("turn succeeds");
        assert_eq!(turn.snapshot.value, json!("awaitingSearch"));
        assert_eq!(turn.emitted_intents.len(), 1);
        assert_eq!(turn.emitted_intents[0].event_type, "com.svc.search");
    }

    #[test]
    fn resume_to_terminal_carries_output() {
        let chart = search_chart();
        let first = chart
            .start(&event("com.example.llm", json!({"request": "hi"})))
            .expect("first turn");
        let second = chart
            .resume(&first.snapshot, &event("com.svc.search.done", json!({"response": "ok"})))
            .expect("second turn");
        assert!(second.snapshot.is_terminal());
        assert_eq!(second.snapshot.output, Some(json!({"response": "ok"})));
    }

    #[test]
    fn rejects_invoke_at_build_time() {
        let mut states = HashMap::new();
        let mut bad = StateDef::new();
        bad.invoke = true;
        states.insert("start".to_string(), bad);
        let err = FlatChart::build("start", states).unwrap_err();
        assert_eq!(err, ChartBuildError::InvokeNotSupported("start".into()));
    }

    #[test]
    fn rejects_reserved_action_name() {
        let mut states = HashMap::new();
        states.insert(
            "start".to_string(),
            StateDef::new().on(
                "go",
                Transition::to("start").with_action_name("enqueueArvoEvent"),
            ),
        );
        let err = FlatChart::build("start", states).unwrap_err();
        assert_eq!(err, ChartBuildError::ReservedActionName);
    }
}
