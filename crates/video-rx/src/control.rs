//! Control-plane reporting.
//!
//! The decoder emits per-frame telemetry lines and stream lifecycle events
//! towards whatever control surface the application wires in (a control
//! socket, a metrics bridge, nothing at all).

/// Sink for control-plane telemetry.
pub trait ControlSink: Send + Sync {
    /// Per-frame statistics line (`RECV bufferId ...`).
    fn report_stats(&self, line: &str) {
        let _ = line;
    }

    /// Stream lifecycle event (`RECV received video changed - ...`).
    fn report_event(&self, event: &str) {
        let _ = event;
    }
}

/// Discards everything.
pub struct NoopControl;

impl ControlSink for NoopControl {}
