//! Turns raw intents into fully-formed, contract-validated outbound
//! events, including subject chaining for nested orchestrations and parent
//! routing for completion (spec §4.3).

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::contract::{Contract, SchemaRef};
use crate::event::Event;
use crate::intent::Intent;
use crate::machine::{service_contract_for, Machine};
use crate::subject::{FromSubjectParams, SubjectCodec, SubjectError, PARENT_SUBJECT_DATA_FIELD};
use crate::telemetry::TelemetryContext;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("intent type `{0}` matches no contract and strict emission is enabled")]
    EmitUncontracted(String),
    #[error("intent declared dataschema `{declared}` but contract requires `{expected}`")]
    DataschemaMismatch { declared: String, expected: String },
    #[error("intent data failed schema validation for `{event_type}`: {message}")]
    SchemaInvalid { event_type: String, message: String },
    #[error(transparent)]
    Subject(#[from] SubjectError),
}

/// Orchestrator-wide defaults the factory fills into every emitted event
/// unless the intent (or, for `accesscontrol`, the source event) overrides
/// them.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    pub default_executionunits: f64,
    /// Strict mode (the default per spec §4.3) fails uncontracted intents
    /// instead of passing them through unchecked.
    pub strict: bool,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            default_executionunits: 0.0,
            strict: true,
        }
    }
}

enum Route<'a> {
    Completion { schema: &'a SchemaRef, subject: String },
    /// `child_parent_subject` is `Some` only when `contract` is itself an
    /// orchestrator: the value the newly-called child's init event must
    /// carry in `event.data.parentSubject$$` so its own first write
    /// resolves `parent_subject` back to this workflow (spec §4.4).
    Service {
        contract: &'a Contract,
        subject: String,
        child_parent_subject: Option<String>,
    },
    Uncontracted,
}

/// Validates, schema-parses, and addresses each intent emitted during a
/// turn.
pub struct EmittableEventFactory {
    config: FactoryConfig,
    codec: SubjectCodec,
}

impl EmittableEventFactory {
    pub fn new(config: FactoryConfig) -> Self {
        Self {
            config,
            codec: SubjectCodec,
        }
    }

    /// Turn one intent into a fully-formed `Event`.
    ///
    /// `parent_subject` is the workflow's parent subject, if any;
    /// `source_event` is the inbound event whose subject and access
    /// control the outbound event may inherit; `telemetry` carries the
    /// current tracing context.
    pub fn materialize(
        &self,
        intent: &Intent,
        machine: &Machine,
        source_event: &Event,
        parent_subject: Option<&str>,
        telemetry: &TelemetryContext,
    ) -> Result<Event, FactoryError> {
        let route = self.route(intent, machine, source_event, parent_subject)?;

        let (contract_uri, contract_version, schema, subject, child_parent_subject) = match route
        {
            Route::Completion { schema, subject } => {
                let own = &machine.contracts.own;
                (own.uri.clone(), own.version.clone(), schema.clone(), subject, None)
            }
            Route::Service { contract, subject, child_parent_subject } => (
                contract.uri.clone(),
                contract.version.clone(),
                contract.accepts.clone(),
                subject,
                child_parent_subject,
            ),
            Route::Uncontracted => {
                // Non-strict pass-through: no contract to validate or
                // address against, so the intent's own fields stand.
                return Ok(self.build_event(
                    intent,
                    machine,
                    source_event,
                    telemetry,
                    None,
                    intent.subject.clone().unwrap_or_else(|| source_event.subject.clone()),
                    None,
                ));
            }
        };

        schema
            .schema
            .validate(&intent.data)
            .map_err(|e| FactoryError::SchemaInvalid {
                event_type: intent.event_type.clone(),
                message: e.message,
            })?;

        let expected_dataschema = format!("{contract_uri}/{contract_version}");
        if let Some(declared) = &intent.dataschema {
            if declared != &expected_dataschema {
                return Err(FactoryError::DataschemaMismatch {
                    declared: declared.clone(),
                    expected: expected_dataschema,
                });
            }
        }

        Ok(self.build_event(
            intent,
            machine,
            source_event,
            telemetry,
            Some(expected_dataschema),
            subject,
            child_parent_subject,
        ))
    }

    fn route<'a>(
        &self,
        intent: &Intent,
        machine: &'a Machine,
        source_event: &Event,
        parent_subject: Option<&str>,
    ) -> Result<Route<'a>, FactoryError> {
        let own = &machine.contracts.own;
        if own.complete_event_type.as_deref() == Some(intent.event_type.as_str()) {
            // Machine::build rejects a dangling complete_event_type, so this
            // lookup can't fail for any Machine that reached this point.
            let schema = own
                .emit_schema(&intent.event_type)
                .expect("complete_event_type must have a matching emits schema");
            let subject = parent_subject
                .map(str::to_string)
                .unwrap_or_else(|| source_event.subject.clone());
            return Ok(Route::Completion { schema, subject });
        }

        if let Some(contract) = service_contract_for(machine, &intent.event_type) {
            let (subject, child_parent_subject) = if contract.is_orchestrator() {
                // Always chain to this workflow's own subject, not to its
                // parent: the new child nests one level under whichever
                // instance is calling it, regardless of how deep that
                // instance's own ancestry goes. The same subject is also
                // the value the child's init event carries forward in
                // `parentSubject$$`, so its own controller resolves
                // `parent_subject` back here without re-parsing anything.
                let subject = self.codec.from(FromSubjectParams {
                    subject: source_event.subject.clone(),
                    orchestrator: contract.accepts.event_type.clone(),
                    version: contract.version.clone(),
                })?;
                (subject, Some(source_event.subject.clone()))
            } else {
                let subject = intent
                    .subject
                    .clone()
                    .unwrap_or_else(|| source_event.subject.clone());
                (subject, None)
            };
            return Ok(Route::Service { contract, subject, child_parent_subject });
        }

        if self.config.strict {
            return Err(FactoryError::EmitUncontracted(intent.event_type.clone()));
        }
        Ok(Route::Uncontracted)
    }

    fn build_event(
        &self,
        intent: &Intent,
        machine: &Machine,
        source_event: &Event,
        telemetry: &TelemetryContext,
        dataschema: Option<String>,
        subject: String,
        child_parent_subject: Option<String>,
    ) -> Event {
        let mut data = intent.data.clone();
        if let Some(parent_subject) = child_parent_subject {
            if let serde_json::Value::Object(map) = &mut data {
                map.insert(
                    PARENT_SUBJECT_DATA_FIELD.to_string(),
                    serde_json::Value::String(parent_subject),
                );
            }
        }
        Event {
            id: Uuid::new_v4().to_string(),
            event_type: intent.event_type.clone(),
            source: machine.source.clone(),
            subject,
            to: intent.to.clone().unwrap_or_else(|| intent.event_type.clone()),
            data,
            dataschema: dataschema.unwrap_or_default(),
            traceparent: telemetry.traceparent.clone(),
            tracestate: telemetry.tracestate.clone(),
            accesscontrol: intent
                .accesscontrol
                .clone()
                .or_else(|| source_event.accesscontrol.clone()),
            redirectto: intent.redirectto.clone(),
            executionunits: Some(intent.executionunits.unwrap_or(self.config.default_executionunits)),
            extensions: stamped_extensions(intent.extensions.clone()),
        }
    }
}

/// Stamp `time` onto a fresh extensions map unless the intent already set
/// one — a caller-supplied timestamp always wins over conductor's own.
fn stamped_extensions(mut extensions: HashMap<String, Value>) -> HashMap<String, Value> {
    extensions
        .entry(crate::event::TIME_EXTENSION_FIELD.to_string())
        .or_insert_with(|| Value::String(crate::event::now_rfc3339()));
    extensions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::flat::{FlatChart, StateDef};
    use crate::contract::{ContractType, JsonSchemaValidator};
    use crate::machine::MachineContracts;
    use crate::subject::NewSubjectParams;
    use serde_json::json;
    use std::collections::HashMap;

    fn schema_ref(event_type: &str) -> SchemaRef {
        SchemaRef {
            event_type: event_type.into(),
            schema: std::sync::Arc::new(
                JsonSchemaValidator::compile(&json!({"type": "object"})).unwrap(),
            ),
        }
    }

    fn inbound(subject: &str) -> Event {
        Event {
            id: "evt-1".into(),
            event_type: "com.example.llm".into(),
            source: "cli".into(),
            subject: subject.into(),
            to: "com.example.llm".into(),
            data: json!({}),
            dataschema: "urn:test/1.0.0".into(),
            traceparent: Some("00-trace-01".into()),
            tracestate: None,
            accesscontrol: Some("acl-1".into()),
            redirectto: None,
            executionunits: None,
            extensions: Default::default(),
        }
    }

    fn machine_with_orchestrator_service() -> Machine {
        let mut services = HashMap::new();
        services.insert(
            "com.svc.search".to_string(),
            Contract {
                uri: "https://contracts.example/com.svc.search".into(),
                version: semver::Version::new(1, 0, 0),
                contract_type: ContractType::ArvoContract,
                accepts: schema_ref("com.svc.search"),
                emits: HashMap::new(),
                system_error: schema_ref("sys.com.svc.search.error"),
                complete_event_type: None,
            },
        );
        services.insert(
            "com.example.child".to_string(),
            Contract {
                uri: "https://contracts.example/com.example.child".into(),
                version: semver::Version::new(1, 0, 0),
                contract_type: ContractType::ArvoOrchestratorContract,
                accepts: schema_ref("com.example.child"),
                emits: HashMap::new(),
                system_error: schema_ref("sys.com.example.child.error"),
                complete_event_type: Some("com.example.child.done".to_string()),
            },
        );
        let own = Contract {
            uri: "https://contracts.example/com.example.llm".into(),
            version: semver::Version::new(1, 0, 0),
            contract_type: ContractType::ArvoOrchestratorContract,
            accepts: schema_ref("com.example.llm"),
            emits: HashMap::from([(
                "com.example.llm.done".to_string(),
                schema_ref("com.example.llm.done"),
            )]),
            system_error: schema_ref("sys.com.example.llm.error"),
            complete_event_type: Some("com.example.llm.done".to_string()),
        };
        let chart = FlatChart::build(
            "start",
            HashMap::from([("start".to_string(), StateDef::new())]),
        )
        .unwrap();
        Machine::build(
            "com.example.llm",
            semver::Version::new(1, 0, 0),
            MachineContracts { own, services },
            std::sync::Arc::new(chart),
            false,
        )
        .unwrap()
    }

    #[test]
    fn plain_service_call_keeps_inbound_subject() {
        let machine = machine_with_orchestrator_service();
        let factory = EmittableEventFactory::new(FactoryConfig::default());
        let source_event = inbound("subj-A");
        let intent = Intent::new("com.svc.search", json!({}));
        let outbound = factory
            .materialize(&intent, &machine, &source_event, None, &TelemetryContext::empty())
            .unwrap();
        assert_eq!(outbound.subject, "subj-A");
        assert_eq!(outbound.dataschema, "https://contracts.example/com.svc.search/1.0.0");
        assert_eq!(outbound.source, "com.example.llm");
        assert_eq!(outbound.accesscontrol, Some("acl-1".into()));
    }

    #[test]
    fn nested_orchestrator_call_chains_to_callers_own_subject() {
        let machine = machine_with_orchestrator_service();
        let factory = EmittableEventFactory::new(FactoryConfig::default());
        let caller_subject = SubjectCodec.new(NewSubjectParams {
            orchestrator: "com.example.llm".into(),
            version: semver::Version::new(1, 0, 0),
            initiator: "cli".into(),
        });
        let source_event = inbound(&caller_subject);
        let intent = Intent::new("com.example.child", json!({}));
        let outbound = factory
            .materialize(&intent, &machine, &source_event, None, &TelemetryContext::empty())
            .unwrap();
        assert_ne!(outbound.subject, caller_subject);
        let parsed = SubjectCodec.parse(&outbound.subject).unwrap();
        assert_eq!(parsed.orchestrator, "com.example.child");
        let parent = parsed.parent.expect("chained to the calling workflow's own subject");
        assert_eq!(SubjectCodec.encode(&parent), caller_subject);
        assert_eq!(
            outbound.data[crate::subject::PARENT_SUBJECT_DATA_FIELD],
            json!(caller_subject)
        );
    }

    #[test]
    fn nested_orchestrator_call_ignores_grandparent_and_chains_to_caller() {
        // Even when the calling workflow itself has a parent_subject (it is
        // already nested), a further child still nests one level under the
        // caller's own subject, not under the caller's parent.
        let machine = machine_with_orchestrator_service();
        let factory = EmittableEventFactory::new(FactoryConfig::default());
        let grandparent = SubjectCodec.new(NewSubjectParams {
            orchestrator: "com.example.top".into(),
            version: semver::Version::new(1, 0, 0),
            initiator: "cli".into(),
        });
        let caller_subject = SubjectCodec
            .from(FromSubjectParams {
                subject: grandparent,
                orchestrator: "com.example.llm".into(),
                version: semver::Version::new(1, 0, 0),
            })
            .unwrap();
        let source_event = inbound(&caller_subject);
        let intent = Intent::new("com.example.child", json!({}));
        let outbound = factory
            .materialize(
                &intent,
                &machine,
                &source_event,
                Some("irrelevant-grandparent-subject"),
                &TelemetryContext::empty(),
            )
            .unwrap();
        let parsed = SubjectCodec.parse(&outbound.subject).unwrap();
        let parent = parsed.parent.expect("chained to caller");
        assert_eq!(SubjectCodec.encode(&parent), caller_subject);
        assert_eq!(
            outbound.data[crate::subject::PARENT_SUBJECT_DATA_FIELD],
            json!(caller_subject)
        );
    }

    #[test]
    fn completion_bubbles_to_parent_subject() {
        let machine = machine_with_orchestrator_service();
        let factory = EmittableEventFactory::new(FactoryConfig::default());
        let source_event = inbound("subj-A");
        let intent = Intent::new("com.example.llm.done", json!({"response": "ok"}));
        let outbound = factory
            .materialize(
                &intent,
                &machine,
                &source_event,
                Some("subj-parent"),
                &TelemetryContext::empty(),
            )
            .unwrap();
        assert_eq!(outbound.subject, "subj-parent");
        assert_eq!(outbound.event_type, "com.example.llm.done");
    }

    #[test]
    fn completion_falls_back_to_inbound_subject_without_parent() {
        let machine = machine_with_orchestrator_service();
        let factory = EmittableEventFactory::new(FactoryConfig::default());
        let source_event = inbound("subj-A");
        let intent = Intent::new("com.example.llm.done", json!({"response": "ok"}));
        let outbound = factory
            .materialize(&intent, &machine, &source_event, None, &TelemetryContext::empty())
            .unwrap();
        assert_eq!(outbound.subject, "subj-A");
    }

    #[test]
    fn dataschema_mismatch_is_rejected() {
        let machine = machine_with_orchestrator_service();
        let factory = EmittableEventFactory::new(FactoryConfig::default());
        let source_event = inbound("subj-A");
        let mut intent = Intent::new("com.svc.search", json!({}));
        intent.dataschema = Some("https://contracts.example/other/9.9.9".to_string());
        let err = factory
            .materialize(&intent, &machine, &source_event, None, &TelemetryContext::empty())
            .unwrap_err();
        assert!(matches!(err, FactoryError::DataschemaMismatch { .. }));
    }

    #[test]
    fn uncontracted_intent_fails_in_strict_mode() {
        let machine = machine_with_orchestrator_service();
        let factory = EmittableEventFactory::new(FactoryConfig::default());
        let source_event = inbound("subj-A");
        let intent = Intent::new("com.nobody.knows", json!({}));
        let err = factory
            .materialize(&intent, &machine, &source_event, None, &TelemetryContext::empty())
            .unwrap_err();
        assert!(matches!(err, FactoryError::EmitUncontracted(_)));
    }

    #[test]
    fn uncontracted_intent_passes_through_in_non_strict_mode() {
        let machine = machine_with_orchestrator_service();
        let factory = EmittableEventFactory::new(FactoryConfig {
            strict: false,
            ..FactoryConfig::default()
        });
        let source_event = inbound("subj-A");
        let intent = Intent::new("com.nobody.knows", json!({"free": "form"}));
        let outbound = factory
            .materialize(&intent, &machine, &source_event, None, &TelemetryContext::empty())
            .unwrap();
        assert_eq!(outbound.event_type, "com.nobody.knows");
        assert_eq!(outbound.dataschema, "");
    }
}
