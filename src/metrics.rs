//! Metrics helpers for the gateway.
//!
//! Thin wrappers over the `metrics` crate macros with the gateway's
//! metric names in one place. No exporter is embedded; the application
//! may install any compatible recorder.
//!
//! Provided metrics:
//! * `veil_requests_total` (counter, labels: method, status)
//! * `veil_request_duration_seconds` (histogram, label: route)
//! * `veil_registry_reloads_total` (counter, label: outcome)
//! * `veil_events_enqueued_total` (counter)
//! * `veil_events_dropped_total` (counter)
//! * `veil_events_sent_total` (counter)

use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};

pub const VEIL_REQUESTS_TOTAL: &str = "veil_requests_total";
pub const VEIL_REQUEST_DURATION_SECONDS: &str = "veil_request_duration_seconds";
pub const VEIL_REGISTRY_RELOADS_TOTAL: &str = "veil_registry_reloads_total";
pub const VEIL_EVENTS_ENQUEUED_TOTAL: &str = "veil_events_enqueued_total";
pub const VEIL_EVENTS_DROPPED_TOTAL: &str = "veil_events_dropped_total";
pub const VEIL_EVENTS_SENT_TOTAL: &str = "veil_events_sent_total";

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(
        VEIL_REQUESTS_TOTAL,
        Unit::Count,
        "Proxied requests handled, labelled by method and status"
    );
    describe_histogram!(
        VEIL_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Wall-clock latency of proxied requests per route"
    );
    describe_counter!(
        VEIL_REGISTRY_RELOADS_TOTAL,
        Unit::Count,
        "Routing table reload attempts, labelled by outcome"
    );
    describe_counter!(
        VEIL_EVENTS_ENQUEUED_TOTAL,
        Unit::Count,
        "Usage events accepted by the pipeline"
    );
    describe_counter!(
        VEIL_EVENTS_DROPPED_TOTAL,
        Unit::Count,
        "Usage events dropped because the queue was full"
    );
    describe_counter!(
        VEIL_EVENTS_SENT_TOTAL,
        Unit::Count,
        "Usage events delivered to the configured sink"
    );
}

pub fn record_proxy_request(method: &str, status: u16, route: &str, duration_secs: f64) {
    counter!(
        VEIL_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(VEIL_REQUEST_DURATION_SECONDS, "route" => route.to_string())
        .record(duration_secs);
}

pub fn record_registry_reload(outcome: &'static str) {
    counter!(VEIL_REGISTRY_RELOADS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_event_enqueued() {
    counter!(VEIL_EVENTS_ENQUEUED_TOTAL).increment(1);
}

pub fn record_event_dropped() {
    counter!(VEIL_EVENTS_DROPPED_TOTAL).increment(1);
}

pub fn record_events_sent(count: usize) {
    counter!(VEIL_EVENTS_SENT_TOTAL).increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_an_installed_recorder_is_a_no_op() {
        describe_metrics();
        record_proxy_request("GET", 200, "/weather", 0.042);
        record_registry_reload("success");
        record_event_enqueued();
        record_event_dropped();
        record_events_sent(10);
    }
}
