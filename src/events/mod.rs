//! Usage-event pipeline.
//!
//! Every completed proxied request produces one [`UsageEvent`]. The
//! pipeline buffers them in a bounded queue and ships them to a sink:
//! either batched HTTP POSTs to an accounting endpoint, or one JSON line
//! per event on stdout for an out-of-process log shipper. Enqueueing
//! never blocks and never fails the proxied request; under overload
//! events are dropped and the drop is only visible in logs and metrics.

pub mod http_queue;
pub mod log_queue;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::EventQueue;

pub use http_queue::HttpEventQueue;
pub use log_queue::LogEventQueue;

/// Bound on events waiting between the proxy path and the collector.
pub const QUEUE_CAPACITY: usize = 1000;
/// Buffered events handed to a sender once reached.
pub const BATCH_SIZE: usize = 10;
/// The periodic flusher fires at this cadence.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Per-request timeout for the HTTP sink.
pub const SINK_TIMEOUT: Duration = Duration::from_secs(30);

/// One record of a completed proxied request.
///
/// `subscription_key` carries the raw key value as presented; consumers
/// needing privacy-preserving identifiers derive them downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: String,
    pub api_path: String,
    pub subscription_key: String,
    pub method: String,
    pub response_time_ms: i64,
    pub status_code: u16,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub request_size: i64,
    pub response_size: i64,
}

impl UsageEvent {
    /// Build an event for a finished request with a fresh id; `success`
    /// is derived from the status code.
    #[allow(clippy::too_many_arguments)]
    pub fn for_request(
        api_path: &str,
        subscription_key: &str,
        method: &str,
        status_code: u16,
        response_time_ms: i64,
        request_size: i64,
        response_size: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            api_path: api_path.to_string(),
            subscription_key: subscription_key.to_string(),
            method: method.to_string(),
            response_time_ms,
            status_code,
            success: (200..300).contains(&status_code),
            timestamp: Utc::now(),
            request_size: request_size.max(0),
            response_size,
        }
    }
}

/// Choose the sink at construction time: HTTP when an endpoint is
/// configured, structured logging to stdout otherwise.
pub fn build_queue(events_endpoint: Option<&str>) -> Arc<dyn EventQueue> {
    match events_endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint, "usage events will be POSTed to the HTTP sink");
            Arc::new(HttpEventQueue::new(endpoint.to_string()))
        }
        None => {
            tracing::info!("usage events will be written to stdout as JSON lines");
            Arc::new(LogEventQueue::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_follows_status_code() {
        let ok = UsageEvent::for_request("/w", "K", "GET", 200, 5, 0, 10);
        assert!(ok.success);
        let redirect = UsageEvent::for_request("/w", "K", "GET", 301, 5, 0, 10);
        assert!(!redirect.success);
        let failure = UsageEvent::for_request("/w", "K", "GET", 502, 5, 0, 10);
        assert!(!failure.success);
    }

    #[test]
    fn negative_request_size_is_clamped() {
        let event = UsageEvent::for_request("/w", "K", "GET", 200, 5, -7, 10);
        assert_eq!(event.request_size, 0);
    }

    #[test]
    fn ids_are_unique() {
        let a = UsageEvent::for_request("/w", "K", "GET", 200, 5, 0, 10);
        let b = UsageEvent::for_request("/w", "K", "GET", 200, 5, 0, 10);
        assert_ne!(a.id, b.id);
    }
}
