//! Metrics instrumentation for the gateway core.
//!
//! Records through the `metrics` facade; the binary decides whether an
//! exporter is installed. Without one every call is a no-op.

use metrics::{counter, gauge};
use surge_protocol::FrameType;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "surge_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "surge_connections_active";
    pub const FRAMES_TOTAL: &str = "surge_frames_total";
    pub const BROADCASTS_TOTAL: &str = "surge_broadcasts_total";
    pub const DELIVERY_FAILURES_TOTAL: &str = "surge_delivery_failures_total";
    pub const QUEUE_PUBLISH_TOTAL: &str = "surge_queue_publish_total";
    pub const ERRORS_TOTAL: &str = "surge_errors_total";
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of linked connections since start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of linked connections"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Frames read and written, by type");
    metrics::describe_counter!(
        names::BROADCASTS_TOTAL,
        "Queue messages broadcast to connected clients"
    );
    metrics::describe_counter!(
        names::DELIVERY_FAILURES_TOTAL,
        "Broadcast writes that failed and deregistered their connection"
    );
    metrics::describe_counter!(
        names::QUEUE_PUBLISH_TOTAL,
        "Client messages published to the queue, by result"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");
}

/// Record a newly linked connection.
pub fn record_link(active: usize) {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).set(active as f64);
}

/// Record a deregistration.
pub fn record_unlink(active: usize) {
    gauge!(names::CONNECTIONS_ACTIVE).set(active as f64);
}

/// Record a frame.
pub fn record_frame(kind: FrameType, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "type" => kind.as_str(), "direction" => direction).increment(1);
}

/// Record a completed broadcast.
pub fn record_broadcast(failed: usize) {
    counter!(names::BROADCASTS_TOTAL).increment(1);
    counter!(names::DELIVERY_FAILURES_TOTAL).increment(failed as u64);
}

/// Record a queue publish outcome.
pub fn record_publish(ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!(names::QUEUE_PUBLISH_TOTAL, "result" => result).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}
