//! The external `Event` type: an immutable CloudEvent-shaped record that
//! flows in and out of the orchestrator.
//!
//! Conductor treats the event contract library as an external collaborator
//! (spec §1); this module is the thin concrete type the rest of the crate
//! is built against.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// CloudEvents' optional `time` attribute: an RFC3339 timestamp of when an
/// event was produced. Conductor never reads this back — it only stamps it
/// on the events it builds, and leaves alone whatever a caller already set
/// on an intent's extensions.
pub const TIME_EXTENSION_FIELD: &str = "time";

/// Current instant as RFC3339, for stamping [`TIME_EXTENSION_FIELD`].
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// An inbound or outbound event.
///
/// Fields mirror the CloudEvent-style contract described by the spec:
/// `id`/`type`/`source`/`subject`/`to`/`data`/`dataschema` are the routing
/// and payload fields; `traceparent`/`tracestate` carry tracing context;
/// `accesscontrol`/`redirectto`/`executionunits` are opaque hints the core
/// only propagates, never interprets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub subject: String,
    pub to: String,
    pub data: Value,
    pub dataschema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceparent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracestate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accesscontrol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirectto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executionunits: Option<f64>,
    /// Extension fields not covered by the named attributes above.
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

impl Event {
    /// Canonical JSON serialization used for wire transport and logging.
    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse an event back from its canonical JSON form.
    pub fn from_canonical_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Fields a caller supplies when asking the factory to build an `Event`;
/// everything else (subject, dataschema, source, tracing, access control)
/// is filled in by the Emittable Event Factory (see [`crate::factory`]).
#[derive(Debug, Clone, Default)]
pub struct EventDraft {
    pub id: Option<Uuid>,
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

impl EventDraft {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_round_trips() {
        let event = Event {
            id: "evt-1".into(),
            event_type: "com.example.llm".into(),
            source: "com.example.llm".into(),
            subject: "subj-A".into(),
            to: "com.example.llm".into(),
            data: serde_json::json!({"request": "hi"}),
            dataschema: "https://contracts.example/com.example.llm/1.0.0".into(),
            traceparent: Some("00-trace-01".into()),
            tracestate: None,
            accesscontrol: None,
            redirectto: None,
            executionunits: Some(1.0),
            extensions: HashMap::new(),
        };
        let json = event.to_canonical_json().expect("serialize");
        let back = Event::from_canonical_json(&json).expect("deserialize");
        assert_eq!(event, back);
    }
}
