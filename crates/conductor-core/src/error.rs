//! The error taxonomy from spec §7: violations (hard, propagated),
//! workflow errors (soft, turned into system-error events), and safe
//! ignores (no error at all).

use thiserror::Error;

/// Causes a `TransactionViolation` can carry (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionCause {
    LockFailure,
    LockUnacquired,
    ReadFailure,
    WriteFailure,
}

impl std::fmt::Display for TransactionCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionCause::LockFailure => "LOCK_FAILURE",
            TransactionCause::LockUnacquired => "LOCK_UNACQUIRED",
            TransactionCause::ReadFailure => "READ_FAILURE",
            TransactionCause::WriteFailure => "WRITE_FAILURE",
        };
        f.write_str(s)
    }
}

/// Hard failures: misconfiguration or a bug, propagated to the caller as
/// an `Err`, never surfaced as an event.
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("configuration violation: {0}")]
    Config(String),
    #[error("execution violation: {0}")]
    Execution(String),
    #[error("transaction violation ({cause}): {message}")]
    Transaction {
        cause: TransactionCause,
        message: String,
    },
}

impl ConductorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn transaction(cause: TransactionCause, message: impl Into<String>) -> Self {
        Self::Transaction {
            cause,
            message: message.into(),
        }
    }
}

/// A soft failure: surfaced back to the caller as a system-error event,
/// addressed to the workflow initiator, never as an `Err`.
#[derive(Debug, Clone)]
pub struct WorkflowError {
    pub name: String,
    pub message: String,
}

impl WorkflowError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// The sum type a turn resolves to internally, before the public API
/// collapses it to `Result<Vec<Event>, ConductorError>` (spec §9).
pub enum TurnOutcome {
    Events(Vec<crate::event::Event>),
    SystemError(crate::event::Event),
    Ignored,
}
