//! Structured-log sink: one JSON line per usage event on stdout.
//!
//! Preferred when an out-of-process log shipper tails the gateway's
//! output; writing a line cannot exert backpressure on the proxy path.

use std::{
    io::Write,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::{
    events::{QUEUE_CAPACITY, UsageEvent},
    metrics,
    ports::EventQueue,
};

/// The fixed wire shape of one stdout line.
#[derive(Serialize)]
struct StdoutRecord<'a> {
    event_type: &'static str,
    id: &'a str,
    api_path: &'a str,
    subscription_key: &'a str,
    method: &'a str,
    response_time_ms: i64,
    status_code: u16,
    success: bool,
    timestamp: DateTime<Utc>,
    request_size: i64,
    response_size: i64,
}

fn format_event(event: &UsageEvent) -> String {
    let record = StdoutRecord {
        event_type: "api_usage",
        id: &event.id,
        api_path: &event.api_path,
        subscription_key: &event.subscription_key,
        method: &event.method,
        response_time_ms: event.response_time_ms,
        status_code: event.status_code,
        success: event.success,
        timestamp: event.timestamp,
        request_size: event.request_size,
        response_size: event.response_size,
    };
    serde_json::to_string(&record).unwrap_or_default()
}

/// Usage-event queue that emits JSON lines to standard output.
pub struct LogEventQueue {
    tx: mpsc::Sender<UsageEvent>,
    rx: Mutex<Option<mpsc::Receiver<UsageEvent>>>,
    shutdown_tx: broadcast::Sender<()>,
    stopped: AtomicBool,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl LogEventQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown_tx,
            stopped: AtomicBool::new(false),
            task: tokio::sync::Mutex::new(None),
        }
    }

    fn write_line(event: &UsageEvent) {
        let line = format_event(event);
        if line.is_empty() {
            return;
        }
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{line}");
        metrics::record_events_sent(1);
    }
}

impl Default for LogEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventQueue for LogEventQueue {
    fn enqueue(&self, event: UsageEvent) {
        if self.stopped.load(Ordering::Relaxed) {
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => metrics::record_event_enqueued(),
            Err(mpsc::error::TrySendError::Full(_)) => metrics::record_event_dropped(),
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn start(&self) {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut rx) = rx else {
            tracing::warn!("event queue already started");
            return;
        };
        let mut shutdown = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => {
                        match received {
                            Some(event) => Self::write_line(&event),
                            None => break,
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
            // Drain whatever was admitted before shutdown.
            while let Ok(event) = rx.try_recv() {
                Self::write_line(&event);
            }
        });

        if let Ok(mut task) = self.task.try_lock() {
            *task = Some(handle);
        }

        tracing::info!("structured-log event queue started");
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "event task ended abnormally");
            }
        }
        tracing::info!("structured-log event queue stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::EventQueue;

    #[test]
    fn line_carries_the_fixed_field_names() {
        let event = UsageEvent::for_request("/weather/current", "K1", "GET", 200, 42, 0, 128);
        let line = format_event(&event);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["event_type"], "api_usage");
        assert_eq!(value["api_path"], "/weather/current");
        assert_eq!(value["subscription_key"], "K1");
        assert_eq!(value["method"], "GET");
        assert_eq!(value["response_time_ms"], 42);
        assert_eq!(value["status_code"], 200);
        assert_eq!(value["success"], true);
        assert_eq!(value["request_size"], 0);
        assert_eq!(value["response_size"], 128);
        assert!(value["id"].as_str().is_some_and(|s| !s.is_empty()));
        assert!(value["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn stop_then_enqueue_is_silent() {
        let queue = LogEventQueue::new();
        queue.start();
        queue.enqueue(UsageEvent::for_request("/w", "K", "GET", 200, 1, 0, 0));
        queue.stop().await;
        queue.enqueue(UsageEvent::for_request("/w", "K", "GET", 200, 1, 0, 0));
    }
}
