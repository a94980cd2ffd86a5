//! Batched HTTP sink for usage events.
//!
//! A collector task drains the bounded channel into an in-memory buffer
//! and hands full batches to transient sender tasks; a periodic flusher
//! ships partial batches so events never sit longer than the flush
//! interval. Delivery is at-most-once best effort: non-2xx responses and
//! transport errors are logged and the batch is discarded.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use serde_json::json;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::{
    events::{BATCH_SIZE, FLUSH_INTERVAL, QUEUE_CAPACITY, SINK_TIMEOUT, UsageEvent},
    metrics,
    ports::EventQueue,
};

struct BatchSender {
    client: reqwest::Client,
    endpoint: String,
}

impl BatchSender {
    async fn send_batch(&self, events: Vec<UsageEvent>) {
        if events.is_empty() {
            return;
        }
        let count = events.len();
        let payload = json!({ "events": events });

        match self.client.post(&self.endpoint).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                metrics::record_events_sent(count);
                tracing::debug!(count, status = %response.status(), "sent usage events");
            }
            Ok(response) => {
                tracing::warn!(
                    count,
                    status = %response.status(),
                    endpoint = %self.endpoint,
                    "event sink answered with a non-success status"
                );
            }
            Err(e) => {
                tracing::warn!(count, endpoint = %self.endpoint, error = %e, "failed to send usage events");
            }
        }
    }
}

/// Usage-event queue backed by HTTP POSTs of `{"events":[...]}`.
pub struct HttpEventQueue {
    tx: mpsc::Sender<UsageEvent>,
    // Receiver parked here until start() moves it into the collector.
    rx: Mutex<Option<mpsc::Receiver<UsageEvent>>>,
    buffer: Arc<Mutex<Vec<UsageEvent>>>,
    sender: Arc<BatchSender>,
    shutdown_tx: broadcast::Sender<()>,
    stopped: AtomicBool,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    batch_size: usize,
    flush_interval: std::time::Duration,
}

impl HttpEventQueue {
    pub fn new(endpoint: String) -> Self {
        Self::with_settings(endpoint, QUEUE_CAPACITY, BATCH_SIZE, FLUSH_INTERVAL)
    }

    /// Construction hook for tests: small capacities and fast flushes.
    pub fn with_settings(
        endpoint: String,
        capacity: usize,
        batch_size: usize,
        flush_interval: std::time::Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown_tx, _) = broadcast::channel(4);
        let client = reqwest::Client::builder()
            .timeout(SINK_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            buffer: Arc::new(Mutex::new(Vec::with_capacity(batch_size))),
            sender: Arc::new(BatchSender { client, endpoint }),
            shutdown_tx,
            stopped: AtomicBool::new(false),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            batch_size,
            flush_interval,
        }
    }

    /// Take the buffer contents if any, holding the lock only for the swap.
    fn take_buffer(buffer: &Mutex<Vec<UsageEvent>>) -> Vec<UsageEvent> {
        let mut guard = buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *guard)
    }

    fn spawn_collector(&self, mut rx: mpsc::Receiver<UsageEvent>) -> JoinHandle<()> {
        let buffer = self.buffer.clone();
        let sender = self.sender.clone();
        let batch_size = self.batch_size;
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => {
                        match received {
                            Some(event) => {
                                let full_batch = {
                                    let mut guard = buffer
                                        .lock()
                                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                                    guard.push(event);
                                    if guard.len() >= batch_size {
                                        Some(std::mem::take(&mut *guard))
                                    } else {
                                        None
                                    }
                                };
                                if let Some(batch) = full_batch {
                                    let sender = sender.clone();
                                    tokio::spawn(async move { sender.send_batch(batch).await });
                                }
                            }
                            None => break,
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }

            // Final pass: anything still queued joins the buffer, then one
            // last synchronous send so shutdown cannot lose buffered events.
            while let Ok(event) = rx.try_recv() {
                buffer
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(event);
            }
            let remaining = Self::take_buffer(&buffer);
            sender.send_batch(remaining).await;
        })
    }

    fn spawn_flusher(&self) -> JoinHandle<()> {
        let buffer = self.buffer.clone();
        let sender = self.sender.clone();
        let flush_interval = self.flush_interval;
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let batch = Self::take_buffer(&buffer);
                        if !batch.is_empty() {
                            let sender = sender.clone();
                            tokio::spawn(async move { sender.send_batch(batch).await });
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

#[async_trait]
impl EventQueue for HttpEventQueue {
    fn enqueue(&self, event: UsageEvent) {
        if self.stopped.load(Ordering::Relaxed) {
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => metrics::record_event_enqueued(),
            Err(mpsc::error::TrySendError::Full(event)) => {
                metrics::record_event_dropped();
                tracing::warn!(
                    api_path = %event.api_path,
                    method = %event.method,
                    "event queue full, dropping usage event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn start(&self) {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(rx) = rx else {
            tracing::warn!("event queue already started");
            return;
        };

        let collector = self.spawn_collector(rx);
        let flusher = self.spawn_flusher();

        if let Ok(mut tasks) = self.tasks.try_lock() {
            tasks.push(collector);
            tasks.push(flusher);
        }

        tracing::info!(
            endpoint = %self.sender.endpoint,
            batch_size = self.batch_size,
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "HTTP event queue started"
        );
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("stopping HTTP event queue");

        let _ = self.shutdown_tx.send(());
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "event task ended abnormally");
            }
        }

        tracing::info!("HTTP event queue stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::EventQueue;

    fn event(n: usize) -> UsageEvent {
        UsageEvent::for_request("/w", "K", "GET", 200, n as i64, 0, 0)
    }

    #[tokio::test]
    async fn enqueue_when_full_drops_instead_of_blocking() {
        // Never started, so nothing drains the channel.
        let queue = HttpEventQueue::with_settings(
            "http://127.0.0.1:9/events".into(),
            2,
            10,
            std::time::Duration::from_secs(60),
        );

        let start = std::time::Instant::now();
        for n in 0..50 {
            queue.enqueue(event(n));
        }
        assert!(start.elapsed() < std::time::Duration::from_millis(200));
    }

    #[tokio::test]
    async fn enqueue_after_stop_is_a_silent_no_op() {
        let queue = HttpEventQueue::with_settings(
            "http://127.0.0.1:9/events".into(),
            8,
            10,
            std::time::Duration::from_secs(60),
        );
        queue.start();
        queue.stop().await;
        queue.enqueue(event(0));
        // A second stop is also harmless.
        queue.stop().await;
    }
}
