//! End-to-end coverage the unit tests in `src/controller.rs` don't
//! exercise: two orchestrators, wired through a shared `Memory`, calling
//! one another across a chained subject, from first init event to final
//! completion.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_core::{
    Contract, ContractType, Event, JsonSchemaValidator, Machine, MachineContracts,
    OrchestratorBuilder, SchemaRef, TelemetryOptions,
};
use conductor_core::charts::flat::{FlatChart, IntentTemplate, StateDef, Transition};
use conductor_core::status;
use conductor_testing::{inbound_event, test_subject, InMemoryStore};
use serde_json::json;

fn schema_ref(event_type: &str) -> SchemaRef {
    SchemaRef {
        event_type: event_type.into(),
        schema: Arc::new(JsonSchemaValidator::compile(&json!({"type": "object"})).unwrap()),
    }
}

fn parent_machine() -> Machine {
    let mut states = HashMap::new();
    states.insert(
        "start".to_string(),
        StateDef::new().on(
            "com.example.parent",
            Transition::to("awaitingChild")
                .with_assign(|_, event| event.data.clone())
                .with_emit(IntentTemplate::new("com.example.child", |ctx, _| ctx.clone())),
        ),
    );
    states.insert(
        "awaitingChild".to_string(),
        StateDef::new().on(
            "com.example.child.done",
            Transition::to("done").with_output(|_, event| event.data.clone()),
        ),
    );
    states.insert("done".to_string(), StateDef::new().with_status(status::DONE.to_string()));
    let chart = FlatChart::build("start", states).unwrap();

    let mut services = HashMap::new();
    services.insert(
        "com.example.child".to_string(),
        Contract {
            uri: "https://contracts.example/com.example.child".into(),
            version: semver::Version::new(1, 0, 0),
            contract_type: ContractType::ArvoOrchestratorContract,
            accepts: schema_ref("com.example.child"),
            emits: HashMap::from([(
                "com.example.child.done".to_string(),
                schema_ref("com.example.child.done"),
            )]),
            system_error: schema_ref("sys.com.example.child.error"),
            complete_event_type: Some("com.example.child.done".to_string()),
        },
    );
    let own = Contract {
        uri: "https://contracts.example/com.example.parent".into(),
        version: semver::Version::new(1, 0, 0),
        contract_type: ContractType::ArvoOrchestratorContract,
        accepts: schema_ref("com.example.parent"),
        emits: HashMap::from([(
            "com.example.parent.done".to_string(),
            schema_ref("com.example.parent.done"),
        )]),
        system_error: schema_ref("sys.com.example.parent.error"),
        complete_event_type: Some("com.example.parent.done".to_string()),
    };
    Machine::build(
        "com.example.parent",
        semver::Version::new(1, 0, 0),
        MachineContracts { own, services },
        Arc::new(chart),
        false,
    )
    .unwrap()
}

fn child_machine() -> Machine {
    let mut states = HashMap::new();
    states.insert(
        "start".to_string(),
        StateDef::new().on(
            "com.example.child",
            Transition::to("done").with_output(|_, event| event.data.clone()),
        ),
    );
    states.insert("done".to_string(), StateDef::new().with_status(status::DONE.to_string()));
    let chart = FlatChart::build("start", states).unwrap();

    let own = Contract {
        uri: "https://contracts.example/com.example.child".into(),
        version: semver::Version::new(1, 0, 0),
        contract_type: ContractType::ArvoOrchestratorContract,
        accepts: schema_ref("com.example.child"),
        emits: HashMap::from([(
            "com.example.child.done".to_string(),
            schema_ref("com.example.child.done"),
        )]),
        system_error: schema_ref("sys.com.example.child.error"),
        complete_event_type: Some("com.example.child.done".to_string()),
    };
    Machine::build(
        "com.example.child",
        semver::Version::new(1, 0, 0),
        MachineContracts { own, services: HashMap::new() },
        Arc::new(chart),
        false,
    )
    .unwrap()
}

#[tokio::test]
async fn nested_orchestration_completes_end_to_end() {
    let memory = Arc::new(InMemoryStore::new());

    let parent = OrchestratorBuilder::new()
        .with_machine(parent_machine())
        .with_memory(memory.clone())
        .build()
        .unwrap();
    let child = OrchestratorBuilder::new()
        .with_machine(child_machine())
        .with_memory(memory.clone())
        .build()
        .unwrap();

    let parent_subject = test_subject("com.example.parent", semver::Version::new(1, 0, 0));
    let init = inbound_event("com.example.parent", &parent_subject, json!({"request": "hi"}));

    let to_child = parent.execute(&init, TelemetryOptions::default()).await.unwrap();
    assert_eq!(to_child.len(), 1);
    let child_call = &to_child[0];
    assert_eq!(child_call.event_type, "com.example.child");
    assert_ne!(child_call.subject, parent_subject);

    let child_record_subject = child_call.subject.clone();
    let to_parent = child.execute(child_call, TelemetryOptions::default()).await.unwrap();
    assert_eq!(to_parent.len(), 1);
    let completion = &to_parent[0];
    assert_eq!(completion.event_type, "com.example.child.done");
    assert_eq!(completion.subject, parent_subject);

    let final_events = parent.execute(completion, TelemetryOptions::default()).await.unwrap();
    assert_eq!(final_events.len(), 1);
    assert_eq!(final_events[0].event_type, "com.example.parent.done");
    assert_eq!(final_events[0].subject, parent_subject);

    let parent_record = memory.record(&parent_subject).expect("parent record persisted");
    assert_eq!(parent_record.status, status::DONE);
    assert_eq!(parent_record.events.consumed, 2);

    let child_record = memory.record(&child_record_subject).expect("child record persisted");
    assert_eq!(child_record.status, status::DONE);
    assert_eq!(child_record.parent_subject.as_deref(), Some(parent_subject.as_str()));
}

#[tokio::test]
async fn uncontracted_emission_becomes_system_error_end_to_end() {
    let memory = Arc::new(InMemoryStore::new());

    let mut states = HashMap::new();
    states.insert(
        "start".to_string(),
        StateDef::new().on(
            "com.example.rogue",
            Transition::to("active")
                .with_emit(IntentTemplate::new("com.nobody.knows", |_, _| json!({}))),
        ),
    );
    states.insert("active".to_string(), StateDef::new());
    let chart = FlatChart::build("start", states).unwrap();
    let own = Contract {
        uri: "https://contracts.example/com.example.rogue".into(),
        version: semver::Version::new(1, 0, 0),
        contract_type: ContractType::ArvoContract,
        accepts: schema_ref("com.example.rogue"),
        emits: HashMap::new(),
        system_error: schema_ref("sys.com.example.rogue.error"),
        complete_event_type: None,
    };
    let machine = Machine::build(
        "com.example.rogue",
        semver::Version::new(1, 0, 0),
        MachineContracts { own, services: HashMap::new() },
        Arc::new(chart),
        false,
    )
    .unwrap();

    let orchestrator = OrchestratorBuilder::new()
        .with_machine(machine)
        .with_memory(memory)
        .build()
        .unwrap();

    let subject = test_subject("com.example.rogue", semver::Version::new(1, 0, 0));
    let init = inbound_event("com.example.rogue", &subject, json!({}));
    let events = orchestrator.execute(&init, TelemetryOptions::default()).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "sys.com.example.rogue.error");
    assert_eq!(events[0].data["errorName"], "EMIT_UNCONTRACTED");
}
