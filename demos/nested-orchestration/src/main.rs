//! # Nested Orchestration Demo
//!
//! A parent orchestrator calls out to a child orchestrator rather than a
//! plain service. The child's subject is minted with a `parent` link back
//! to the parent's own subject, so the child's completion event routes
//! itself back to the parent without either side needing to track the
//! relationship out of band.
//!
//! Two `Orchestrator`s share one `Memory`, the way two independently
//! deployed services would share one durable store.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use conductor_core::charts::flat::{FlatChart, IntentTemplate, StateDef, Transition};
use conductor_core::{
    status, Contract, ContractType, JsonSchemaValidator, Machine, MachineContracts,
    OrchestratorBuilder, SchemaRef, TelemetryOptions,
};
use conductor_testing::{inbound_event, test_subject, InMemoryStore};
use serde_json::json;

fn schema_ref(event_type: &str) -> SchemaRef {
    SchemaRef {
        event_type: event_type.into(),
        schema: Arc::new(JsonSchemaValidator::compile(&json!({"type": "object"})).unwrap()),
    }
}

/// Accepts `com.example.parent`, calls out to the `com.example.child`
/// orchestrator, and completes once the child reports back.
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
    states.insert(
        "done".to_string(),
        StateDef::new().with_status(status::DONE.to_string()),
    );
    let chart = FlatChart::build("start", states).expect("valid chart");

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
    .expect("valid machine")
}

/// Accepts `com.example.child`, completes immediately with its input echoed
/// back as output.
fn child_machine() -> Machine {
    let mut states = HashMap::new();
    states.insert(
        "start".to_string(),
        StateDef::new().on(
            "com.example.child",
            Transition::to("done").with_output(|_, event| event.data.clone()),
        ),
    );
    states.insert(
        "done".to_string(),
        StateDef::new().with_status(status::DONE.to_string()),
    );
    let chart = FlatChart::build("start", states).expect("valid chart");

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
    .expect("valid machine")
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let memory = Arc::new(InMemoryStore::new());
    let parent = OrchestratorBuilder::new()
        .with_machine(parent_machine())
        .with_memory(memory.clone())
        .build()?;
    let child = OrchestratorBuilder::new()
        .with_machine(child_machine())
        .with_memory(memory)
        .build()?;

    let parent_subject = test_subject("com.example.parent", semver::Version::new(1, 0, 0));
    let request = inbound_event("com.example.parent", &parent_subject, json!({"job": "report"}));
    println!("parent subject: {parent_subject}");

    let to_child = parent.execute(&request, TelemetryOptions::default()).await?;
    let child_call = to_child.first().expect("child call emitted");
    println!(
        "-> {} (nested subject {}, != parent subject: {})",
        child_call.event_type,
        child_call.subject,
        child_call.subject != parent_subject
    );

    let to_parent = child.execute(child_call, TelemetryOptions::default()).await?;
    let completion = to_parent.first().expect("completion emitted");
    println!(
        "-> {} addressed back to {} (== parent subject: {})",
        completion.event_type,
        completion.subject,
        completion.subject == parent_subject
    );

    let final_events = parent.execute(completion, TelemetryOptions::default()).await?;
    let done = final_events.first().expect("final completion emitted");
    println!("-> {} {}", done.event_type, done.data);

    Ok(())
}
