//! Tracing context as an injected capability, not a process-wide
//! singleton (spec §9 design note: "no process-wide singleton is required
//! for correctness").

/// The `traceparent`/`tracestate` pair an outbound event inherits, and any
/// caller-supplied options for the current turn's telemetry.
#[derive(Debug, Clone, Default)]
pub struct TelemetryContext {
    pub traceparent: Option<String>,
    pub tracestate: Option<String>,
}

impl TelemetryContext {
    pub fn from_inbound(traceparent: Option<String>, tracestate: Option<String>) -> Self {
        Self {
            traceparent,
            tracestate,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Per-call telemetry options a caller may pass to `Orchestrator::execute`.
#[derive(Debug, Clone, Default)]
pub struct TelemetryOptions {
    /// Overrides the inbound event's tracing context for this turn, e.g.
    /// to continue a span started by the caller rather than the producer.
    pub override_context: Option<TelemetryContext>,
}
