//! # Service Call Demo
//!
//! Drives a single orchestrator through the simplest possible shape: accept
//! a request, call out to one service, complete when the service replies.
//! No nesting, no adapters - just `conductor-core` plus the in-memory
//! `Memory` from `conductor-testing`.

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

/// A machine that accepts `com.example.search`, calls out to
/// `com.svc.search`, and completes once the service replies.
fn search_machine() -> Machine {
    let mut states = HashMap::new();
    states.insert(
        "start".to_string(),
        StateDef::new().on(
            "com.example.search",
            Transition::to("awaitingSearch")
                .with_assign(|_, event| event.data.clone())
                .with_emit(IntentTemplate::new("com.svc.search", |ctx, _| ctx.clone())),
        ),
    );
    states.insert(
        "awaitingSearch".to_string(),
        StateDef::new().on(
            "com.svc.search.done",
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
        "com.svc.search".to_string(),
        Contract {
            uri: "https://contracts.example/com.svc.search".into(),
            version: semver::Version::new(1, 0, 0),
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
        uri: "https://contracts.example/com.example.search".into(),
        version: semver::Version::new(1, 0, 0),
        contract_type: ContractType::ArvoOrchestratorContract,
        accepts: schema_ref("com.example.search"),
        emits: HashMap::from([(
            "com.example.search.done".to_string(),
            schema_ref("com.example.search.done"),
        )]),
        system_error: schema_ref("sys.com.example.search.error"),
        complete_event_type: Some("com.example.search.done".to_string()),
    };
    Machine::build(
        "com.example.search",
        semver::Version::new(1, 0, 0),
        MachineContracts { own, services },
        Arc::new(chart),
        false,
    )
    .expect("valid machine")
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let memory = Arc::new(InMemoryStore::new());
    let orchestrator = OrchestratorBuilder::new()
        .with_machine(search_machine())
        .with_memory(memory)
        .build()?;

    let subject = test_subject("com.example.search", semver::Version::new(1, 0, 0));
    let request = inbound_event(
        "com.example.search",
        &subject,
        json!({"query": "idiomatic rust orchestrators"}),
    );

    let to_service = orchestrator.execute(&request, TelemetryOptions::default()).await?;
    let service_call = to_service.first().expect("search call emitted");
    println!("-> {} (subject {})", service_call.event_type, service_call.subject);

    let reply = inbound_event(
        "com.svc.search.done",
        &service_call.subject,
        json!({"results": ["crcn-seesaw-rs", "tokio", "sqlx"]}),
    );
    let completion = orchestrator.execute(&reply, TelemetryOptions::default()).await?;
    let done = completion.first().expect("completion emitted");
    println!("-> {} {}", done.event_type, done.data);

    Ok(())
}
