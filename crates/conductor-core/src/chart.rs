//! The state-chart runtime boundary.
//!
//! Conductor treats the actual chart interpreter as an external
//! collaborator (spec §1, §6): `Chart` is the trait the Execution Engine
//! drives, independent of which interpreter library backs it. The
//! `charts::flat` submodule ships one small reference implementation used
//! by conductor's own tests and by `conductor-testing`.

use serde_json::Value;
use thiserror::Error;

use crate::event::Event;
use crate::intent::Intent;
use crate::snapshot::Snapshot;

/// One turn's raw result from the chart, before the engine drains the
/// volatile intent queue and strips it from `snapshot.context`.
pub struct ChartTurnResult {
    pub snapshot: Snapshot,
    /// Intents raised directly during entry/exit/transition handlers, in
    /// emission order, via the interpreter's catch-all intent listener.
    pub emitted_intents: Vec<Intent>,
}

#[derive(Debug, Error)]
pub enum ChartError {
    /// Something the chart's own action/guard code threw. The engine
    /// surfaces this; the controller turns it into a workflow error.
    #[error("chart interpreter error: {0}")]
    Interpreter(String),
}

/// Reasons a chart definition is rejected at construction time rather than
/// discovered at runtime (spec §4.2 "forbidden machine shapes").
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChartBuildError {
    #[error("state `{0}` declares an `invoke`, which is not supported")]
    InvokeNotSupported(String),
    #[error("state `{0}` declares an `after` delay, which is not supported")]
    AfterNotSupported(String),
    #[error("state `{0}` references an actor, which is not supported")]
    ActorRefNotSupported(String),
    #[error("action name `enqueueArvoEvent` is reserved and cannot be user-defined")]
    ReservedActionName,
}

/// Drives one turn of a state chart from a persisted snapshot (or from
/// scratch, for initialization events).
pub trait Chart: Send + Sync {
    /// Start a fresh interpreter for an initialization event.
    fn start(&self, init_event: &Event) -> Result<ChartTurnResult, ChartError>;

    /// Resume the interpreter from `snapshot` and deliver `event`.
    fn resume(&self, snapshot: &Snapshot, event: &Event) -> Result<ChartTurnResult, ChartError>;
}

/// A template for an intent a transition raises, parameterized over the
/// current context value and the triggering event.
pub type IntentTemplateFn = dyn Fn(&Value, &Event) -> Value + Send + Sync;

pub struct IntentTemplate {
    pub event_type: String,
    pub data: Box<IntentTemplateFn>,
}

impl IntentTemplate {
    pub fn new(
        event_type: impl Into<String>,
        data: impl Fn(&Value, &Event) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data: Box::new(data),
        }
    }

    fn render(&self, context: &Value, event: &Event) -> Intent {
        Intent::new(self.event_type.clone(), (self.data)(context, event))
    }
}

pub mod flat;
pub use flat::FlatChart;
