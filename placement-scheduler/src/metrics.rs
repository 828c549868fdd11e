//! Scheduling metrics
//!
//! Operator lifecycle, checker and scheduler decisions, and the Prometheus
//! exporter used by the binary.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names as constants
pub mod names {
    // Operators
    pub const OPERATORS_TOTAL: &str = "placement_operators_total";
    pub const OPERATORS_IN_FLIGHT: &str = "placement_operators_in_flight";

    // Decisions
    pub const CHECKER_EVENTS: &str = "placement_checker_events_total";
    pub const SCHEDULER_EVENTS: &str = "placement_scheduler_events_total";
    pub const SCHEDULERS_RUNNING: &str = "placement_schedulers_running";
}

/// Register metric descriptions for this crate and the topology cache
pub fn describe() {
    placement_metadata::metrics::describe();

    describe_counter!(
        names::OPERATORS_TOTAL,
        "Operator lifecycle events, by kind and event"
    );
    describe_gauge!(names::OPERATORS_IN_FLIGHT, "Operators currently in flight");
    describe_counter!(
        names::CHECKER_EVENTS,
        "Region checker decisions, by checker and result"
    );
    describe_counter!(
        names::SCHEDULER_EVENTS,
        "Scheduler decisions, by scheduler and result"
    );
    describe_gauge!(names::SCHEDULERS_RUNNING, "Running scheduler loops");
}

/// Install the global Prometheus recorder with its HTTP listener
pub fn install_exporter(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe();
    info!(addr = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_checker(checker: &'static str, result: &'static str) {
    counter!(names::CHECKER_EVENTS, "checker" => checker, "result" => result).increment(1);
}

pub fn record_scheduler(scheduler: &str, result: &'static str) {
    counter!(names::SCHEDULER_EVENTS, "scheduler" => scheduler.to_string(), "result" => result)
        .increment(1);
}

/// `event` is one of create, finish, timeout, replace, cancel, reject
pub fn record_operator(desc: &str, event: &'static str) {
    counter!(names::OPERATORS_TOTAL, "desc" => desc.to_string(), "event" => event).increment(1);
}

pub fn set_operators_in_flight(count: usize) {
    gauge!(names::OPERATORS_IN_FLIGHT).set(count as f64);
}

pub fn set_schedulers_running(count: usize) {
    gauge!(names::SCHEDULERS_RUNNING).set(count as f64);
}
