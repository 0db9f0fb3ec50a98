//! Intents: in-turn records describing a desired outbound event, prior to
//! contract validation and addressing by the Emittable Event Factory.

use std::collections::HashMap;

use serde_json::Value;
use smallvec::SmallVec;

/// A raw, unvalidated request for an outbound event, as produced by a
/// machine during one turn.
#[derive(Debug, Clone)]
pub struct Intent {
    pub event_type: String,
    pub data: Value,
    pub subject: Option<String>,
    pub to: Option<String>,
    pub dataschema: Option<String>,
    pub executionunits: Option<f64>,
    pub accesscontrol: Option<String>,
    pub redirectto: Option<String>,
    pub extensions: HashMap<String, Value>,
}

impl Intent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            subject: None,
            to: None,
            dataschema: None,
            executionunits: None,
            accesscontrol: None,
            redirectto: None,
            extensions: HashMap::new(),
        }
    }
}

/// Turn-scoped accumulator for intents. Created on entry to a transaction,
/// drained at the end, never shared across events (spec §3 lifecycles).
///
/// Most turns emit zero or one or two intents, so the buffer is backed by
/// a `SmallVec` to avoid a heap allocation in the common case.
#[derive(Debug, Default)]
pub struct IntentBuffer {
    intents: SmallVec<[Intent; 2]>,
}

impl IntentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, intent: Intent) {
        self.intents.push(intent);
    }

    pub fn extend(&mut self, intents: impl IntoIterator<Item = Intent>) {
        self.intents.extend(intents);
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    /// Drain the buffer in emission order, leaving it empty.
    pub fn drain(&mut self) -> Vec<Intent> {
        self.intents.drain(..).collect()
    }
}
