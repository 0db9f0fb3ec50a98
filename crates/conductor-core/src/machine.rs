//! A single versioned state-machine implementation bound to one
//! orchestrator contract and a set of service contracts (spec §3, §4).

use std::collections::HashMap;
use std::sync::Arc;

use semver::Version;

use crate::chart::Chart;
use crate::contract::Contract;
use crate::event::Event;

/// The contracts a machine is built against: its own (orchestrator)
/// contract, and one per downstream service it may emit to.
#[derive(Clone)]
pub struct MachineContracts {
    pub own: Contract,
    pub services: HashMap<String, Contract>,
}

/// Outcome of validating an inbound event against a machine's contract,
/// per spec §4.1/§4.4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    InvalidData(String),
    Invalid(String),
    ContractUnresolved,
}

/// One versioned implementation of an orchestrator.
pub struct Machine {
    /// Must equal `contracts.own.accepts.event_type` (spec §3 invariant).
    pub source: String,
    pub version: Version,
    pub contracts: MachineContracts,
    pub logic: Arc<dyn Chart>,
    pub requires_resource_locking: bool,
}

impl Machine {
    /// The set of event types this machine may emit, derived from its own
    /// contract's `complete_event_type` plus every service contract's
    /// accepted type.
    pub fn emits(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .contracts
            .own
            .complete_event_type
            .iter()
            .cloned()
            .collect();
        types.extend(
            self.contracts
                .services
                .values()
                .map(|c| c.accepts.event_type.clone()),
        );
        types
    }

    /// Validate an inbound event against this machine's contracts.
    ///
    /// An event either matches this machine's own accepted type (the init
    /// case) or matches a response schema advertised by one of the
    /// services this machine calls (a step, i.e. a reply to a call the
    /// machine previously made). Anything else is `ContractUnresolved` —
    /// an event this machine version simply doesn't know about.
    ///
    /// Whether the event's *subject* names a different orchestrator
    /// entirely (a safe-ignore routing miss) is the controller's call, not
    /// the machine's.
    pub fn validate_input(&self, event: &Event) -> ValidationOutcome {
        if event.event_type == self.contracts.own.accepts.event_type {
            return Self::check_schema(&self.contracts.own.accepts.schema, event);
        }
        for service in self.contracts.services.values() {
            if let Some(schema) = service.emit_schema(&event.event_type) {
                return Self::check_schema(&schema.schema, event);
            }
        }
        ValidationOutcome::ContractUnresolved
    }

    fn check_schema(
        schema: &std::sync::Arc<dyn crate::contract::SchemaValidator>,
        event: &Event,
    ) -> ValidationOutcome {
        if let Err(reason) = check_dataschema_pointer(&event.dataschema) {
            return ValidationOutcome::Invalid(reason);
        }
        match schema.validate(&event.data) {
            Ok(()) => ValidationOutcome::Valid,
            Err(e) => ValidationOutcome::InvalidData(e.message),
        }
    }
}

/// A `dataschema` must look like `<uri>/<semver>`; this is the structural
/// check behind the `INVALID` outcome (distinct from `INVALID_DATA`, which
/// is a schema-valid-shape-but-wrong-content failure).
fn check_dataschema_pointer(dataschema: &str) -> Result<(), String> {
    let (_, version) = dataschema
        .rsplit_once('/')
        .ok_or_else(|| format!("dataschema `{dataschema}` is missing a version segment"))?;
    Version::parse(version)
        .map(|_| ())
        .map_err(|e| format!("dataschema `{dataschema}` has an invalid version: {e}"))
}

/// A value a machine's build step could reject; kept distinct from
/// [`crate::chart::ChartBuildError`] since a machine can fail to build for
/// reasons unrelated to its chart (e.g. `source` not matching its own
/// contract's accepted type).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MachineBuildError {
    #[error("machine source `{source}` does not match its own contract's accepted type `{accepted}`")]
    SourceMismatch { source: String, accepted: String },
    #[error("complete_event_type `{0}` has no matching entry in the machine's own emits map")]
    DanglingCompleteEventType(String),
}

impl Machine {
    pub fn build(
        source: impl Into<String>,
        version: Version,
        contracts: MachineContracts,
        logic: Arc<dyn Chart>,
        requires_resource_locking: bool,
    ) -> Result<Self, MachineBuildError> {
        let source = source.into();
        if source != contracts.own.accepts.event_type {
            return Err(MachineBuildError::SourceMismatch {
                source,
                accepted: contracts.own.accepts.event_type.clone(),
            });
        }
        if let Some(complete_type) = &contracts.own.complete_event_type {
            if contracts.own.emit_schema(complete_type).is_none() {
                return Err(MachineBuildError::DanglingCompleteEventType(complete_type.clone()));
            }
        }
        Ok(Self {
            source,
            version,
            contracts,
            logic,
            requires_resource_locking,
        })
    }
}

/// Helper used by the factory to look up the service contract (if any)
/// whose `accepts.event_type` matches an intent's type.
pub fn service_contract_for<'a>(
    machine: &'a Machine,
    event_type: &str,
) -> Option<&'a Contract> {
    machine
        .contracts
        .services
        .values()
        .find(|c| c.accepts.event_type == event_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::flat::{FlatChart, StateDef};
    use crate::contract::{ContractType, JsonSchemaValidator, SchemaRef};
    use serde_json::json;
    use std::sync::Arc;

    fn schema_ref(event_type: &str) -> SchemaRef {
        SchemaRef {
            event_type: event_type.into(),
            schema: Arc::new(
                JsonSchemaValidator::compile(&json!({"type": "object", "required": ["request"]}))
                    .unwrap(),
            ),
        }
    }

    fn event(event_type: &str, dataschema: &str, data: serde_json::Value) -> Event {
        Event {
            id: "evt-1".into(),
            event_type: event_type.into(),
            source: "cli".into(),
            subject: "subj-A".into(),
            to: event_type.into(),
            data,
            dataschema: dataschema.into(),
            traceparent: None,
            tracestate: None,
            accesscontrol: None,
            redirectto: None,
            executionunits: None,
            extensions: Default::default(),
        }
    }

    fn search_machine() -> Machine {
        let mut services = HashMap::new();
        services.insert(
            "com.svc.search".to_string(),
            Contract {
                uri: "https://contracts.example/com.svc.search".into(),
                version: Version::new(1, 0, 0),
                contract_type: ContractType::ArvoContract,
                accepts: schema_ref("com.svc.search"),
                emits: HashMap::from([(
                    "com.svc.search.done".to_string(),
                    schema_ref("com.svc.search.done"),
                )]),
                system_error: schema_ref("sys.com.svc.search.error"),
                complete_event_type: None,
            },
        );
        let own = Contract {
            uri: "https://contracts.example/com.example.llm".into(),
            version: Version::new(1, 0, 0),
            contract_type: ContractType::ArvoContract,
            accepts: schema_ref("com.example.llm"),
            emits: HashMap::new(),
            system_error: schema_ref("sys.com.example.llm.error"),
            complete_event_type: None,
        };
        let chart =
            FlatChart::build("start", HashMap::from([("start".to_string(), StateDef::new())]))
                .unwrap();
        Machine::build(
            "com.example.llm",
            Version::new(1, 0, 0),
            MachineContracts { own, services },
            Arc::new(chart),
            false,
        )
        .unwrap()
    }

    #[test]
    fn accepts_matching_service_reply() {
        let machine = search_machine();
        let outcome = machine.validate_input(&event(
            "com.svc.search.done",
            "https://contracts.example/com.svc.search.done/1.0.0",
            json!({"request": "hi"}),
        ));
        assert_eq!(outcome, ValidationOutcome::Valid);
    }

    #[test]
    fn unknown_event_type_is_contract_unresolved() {
        let machine = search_machine();
        let outcome = machine.validate_input(&event(
            "com.unknown",
            "urn:whatever/1.0.0",
            json!({}),
        ));
        assert_eq!(outcome, ValidationOutcome::ContractUnresolved);
    }

    #[test]
    fn malformed_dataschema_is_invalid() {
        let machine = search_machine();
        let outcome = machine.validate_input(&event(
            "com.example.llm",
            "missing-version-segment",
            json!({"request": "hi"}),
        ));
        assert!(matches!(outcome, ValidationOutcome::Invalid(_)));
    }

    #[test]
    fn dangling_complete_event_type_is_rejected() {
        let own = Contract {
            uri: "https://contracts.example/com.example.llm".into(),
            version: Version::new(1, 0, 0),
            contract_type: ContractType::ArvoOrchestratorContract,
            accepts: schema_ref("com.example.llm"),
            emits: HashMap::new(),
            system_error: schema_ref("sys.com.example.llm.error"),
            complete_event_type: Some("com.example.llm.done".to_string()),
        };
        let chart =
            FlatChart::build("start", HashMap::from([("start".to_string(), StateDef::new())]))
                .unwrap();
        let err = Machine::build(
            "com.example.llm",
            Version::new(1, 0, 0),
            MachineContracts { own, services: HashMap::new() },
            Arc::new(chart),
            false,
        )
        .unwrap_err();
        assert_eq!(
            err,
            MachineBuildError::DanglingCompleteEventType("com.example.llm.done".to_string())
        );
    }

    #[test]
    fn bad_payload_is_invalid_data() {
        let machine = search_machine();
        let outcome = machine.validate_input(&event(
            "com.example.llm",
            "https://contracts.example/com.example.llm/1.0.0",
            json!({}),
        ));
        assert!(matches!(outcome, ValidationOutcome::InvalidData(_)));
    }
}
