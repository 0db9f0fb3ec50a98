//! Thin adapters over externally-defined, per-version contracts.
//!
//! The contract library itself (schema authoring, URI registry, the
//! factory that produces `Contract` values) is out of scope (spec §1);
//! this module is the shape conductor consumes and the validator it uses
//! to check a payload against a contract's schema.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Whether a contract belongs to a plain service or to an orchestrator
/// (orchestrator contracts additionally expose `complete_event_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractType {
    ArvoContract,
    ArvoOrchestratorContract,
}

/// A compiled JSON-schema check, isolated behind a trait so the concrete
/// validation library (here `jsonschema`) stays an implementation detail.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, data: &Value) -> Result<(), SchemaValidationError>;
}

#[derive(Debug, Error)]
#[error("schema validation failed: {message}")]
pub struct SchemaValidationError {
    pub message: String,
}

/// A [`SchemaValidator`] backed by `jsonschema`.
pub struct JsonSchemaValidator {
    validator: jsonschema::Validator,
}

impl JsonSchemaValidator {
    pub fn compile(schema: &Value) -> Result<Self, SchemaValidationError> {
        let validator = jsonschema::validator_for(schema).map_err(|e| SchemaValidationError {
            message: e.to_string(),
        })?;
        Ok(Self { validator })
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, data: &Value) -> Result<(), SchemaValidationError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(data)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaValidationError {
                message: errors.join("; "),
            })
        }
    }
}

/// One named, versioned emit/accept schema.
#[derive(Clone)]
pub struct SchemaRef {
    pub event_type: String,
    pub schema: Arc<dyn SchemaValidator>,
}

/// A contract: the accepted inbound schema, the map of outbound schemas by
/// type, and the distinguished system-error schema. Orchestrator contracts
/// additionally carry `complete_event_type`.
#[derive(Clone)]
pub struct Contract {
    pub uri: String,
    pub version: semver::Version,
    pub contract_type: ContractType,
    pub accepts: SchemaRef,
    pub emits: HashMap<String, SchemaRef>,
    pub system_error: SchemaRef,
    /// Only meaningful when `contract_type == ArvoOrchestratorContract`.
    pub complete_event_type: Option<String>,
}

impl Contract {
    /// `${uri}/${version}`, the `dataschema` every emitted event under
    /// this contract must carry (spec §4.3).
    pub fn dataschema(&self) -> String {
        format!("{}/{}", self.uri, self.version)
    }

    pub fn is_orchestrator(&self) -> bool {
        self.contract_type == ContractType::ArvoOrchestratorContract
    }

    pub fn emit_schema(&self, event_type: &str) -> Option<&SchemaRef> {
        self.emits.get(event_type)
    }
}
