//! Metrics collection and export for Courier.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use courier_core::Broker;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
    pub const MESSAGES_TOTAL: &str = "courier_messages_total";
    pub const SUBSCRIBERS_ACTIVE: &str = "courier_subscribers_active";
    pub const BROKER_ACCEPTED: &str = "courier_broker_accepted";
    pub const BROKER_DELIVERED: &str = "courier_broker_delivered";
    pub const BROKER_DROPPED: &str = "courier_broker_dropped";
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
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of chat messages");
    metrics::describe_gauge!(
        names::SUBSCRIBERS_ACTIVE,
        "Current number of registered broker subscribers"
    );
    metrics::describe_gauge!(names::BROKER_ACCEPTED, "Messages accepted by the broker");
    metrics::describe_gauge!(names::BROKER_DELIVERED, "Mailbox deliveries by the broker");
    metrics::describe_gauge!(
        names::BROKER_DROPPED,
        "Messages dropped by the broker, by reason"
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

/// Record a chat message.
pub fn record_message(direction: &str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Copy the broker counters into gauges.
pub fn record_broker(broker: &Broker) {
    let stats = broker.stats();
    gauge!(names::SUBSCRIBERS_ACTIVE).set(broker.subscriber_count() as f64);
    gauge!(names::BROKER_ACCEPTED).set(stats.accepted as f64);
    gauge!(names::BROKER_DELIVERED).set(stats.delivered as f64);
    gauge!(names::BROKER_DROPPED, "reason" => "full").set(stats.dropped_full as f64);
    gauge!(names::BROKER_DROPPED, "reason" => "closed").set(stats.dropped_closed as f64);
    gauge!(names::BROKER_DROPPED, "reason" => "offline").set(stats.missing_recipient as f64);
}

/// Mirror broker counters every `interval` until `token` is cancelled.
pub async fn mirror_broker(broker: Broker, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => record_broker(&broker),
        }
    }
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
