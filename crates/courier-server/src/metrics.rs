//! Metrics collection and export for Courier.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use courier_core::Outcome;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
    pub const MESSAGES_TOTAL: &str = "courier_messages_total";
    pub const MESSAGES_BYTES: &str = "courier_messages_bytes";
    pub const EVENTS_TOTAL: &str = "courier_events_total";
    pub const DELIVERIES_TOTAL: &str = "courier_deliveries_total";
    pub const NOTIFICATIONS_DROPPED: &str = "courier_notifications_dropped_total";
    pub const USERS_ONLINE: &str = "courier_users_online";
    pub const LATENCY_SECONDS: &str = "courier_event_latency_seconds";
    pub const ERRORS_TOTAL: &str = "courier_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of WebSocket messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of WebSocket messages");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Client events processed, by event");
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Frames queued for delivery, by event");
    metrics::describe_counter!(
        names::NOTIFICATIONS_DROPPED,
        "Notifications dropped because the receiver was offline"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Users with a registered connection");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Client event handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a WebSocket message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a client event.
pub fn record_event(event: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => event).increment(1);
}

/// Record what the relay did with an event.
pub fn record_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Notified { delivered: true, .. } => {
            counter!(names::DELIVERIES_TOTAL, "event" => "notification").increment(1);
        }
        Outcome::Notified {
            delivered: false, ..
        } => {
            counter!(names::NOTIFICATIONS_DROPPED).increment(1);
        }
        Outcome::Relayed {
            recipients,
            receiver_notified,
            ..
        } => {
            counter!(names::DELIVERIES_TOTAL, "event" => "newMessage").increment(*recipients as u64);
            if *receiver_notified {
                counter!(names::DELIVERIES_TOTAL, "event" => "notification").increment(1);
            }
        }
        Outcome::Registered { .. }
        | Outcome::Joined { .. }
        | Outcome::Disconnected { .. }
        | Outcome::Ignored => {}
    }
}

/// Record event handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update the online user count.
pub fn set_users_online(count: usize) {
    gauge!(names::USERS_ONLINE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; must not panic.
        let _guard = ConnectionMetricsGuard::new();
    }

    #[test]
    fn test_record_outcomes() {
        record_outcome(&Outcome::Relayed {
            room: "r".into(),
            recipients: 2,
            receiver_notified: true,
        });
        record_outcome(&Outcome::Notified {
            receiver: "bob".into(),
            delivered: false,
        });
        record_outcome(&Outcome::Ignored);
    }
}
