//! Port for the usage-event pipeline.

use async_trait::async_trait;

use crate::events::UsageEvent;

/// A bounded, non-blocking queue of usage events headed for a sink.
///
/// `enqueue` must be O(1) and must never block or fail the caller:
/// overload drops events (observable in logs and metrics only), and
/// enqueueing after `stop` is a silent no-op.
#[async_trait]
pub trait EventQueue: Send + Sync + 'static {
    fn enqueue(&self, event: UsageEvent);

    /// Spawn the background tasks. Idempotence is not required; call once.
    fn start(&self);

    /// Stop admitting events, drain what is buffered through one final
    /// sender pass and join the background tasks.
    async fn stop(&self);
}
