//! Veil Gateway - an API monetization gateway and reverse proxy.
//!
//! Veil owns a persistent catalog of protected upstream APIs. For each
//! incoming request it authorizes the caller against a per-API key,
//! validates the request shape, proxies to the upstream with path
//! rewriting and a Host override, and asynchronously emits usage events.
//! A management surface under `/veil/api/` onboards, updates and deletes
//! APIs and their keys at runtime with no restart.
//!
//! # Architecture
//! The crate follows a **hexagonal** layout: `ports` hold the traits at
//! the seams (configurable server, upstream client, event queue),
//! `adapters` implement them and carry both HTTP surfaces, and `core`
//! stays free of I/O (compiled routing table, authorization decisions,
//! the route compiler). `store` persists the catalog in SQLite and
//! `events` ships usage records to an HTTP or stdout sink.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use veil_gateway::{
//!     adapters::{ArcSwapServer, ManagementState, management_router},
//!     core::Registry,
//!     store::ApiStore,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let store = ApiStore::open("veil.db").await?;
//! store.migrate().await?;
//! let server = Arc::new(ArcSwapServer::new());
//! let registry = Arc::new(Registry::new(store.clone(), server));
//! let app = management_router(Arc::new(ManagementState { store, registry }));
//! // Serve `app` on the management listener; see the binary crate.
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Domain-specific error enums live next to their seams; the binary path
//! uses `eyre::Result` with context attached via `WrapErr`.
//!
//! # License
//! Dual-licensed under either MIT or Apache-2.0 at your option.

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;
pub mod store;

pub use crate::{
    adapters::{ArcSwapServer, ProxyState, UpstreamClientAdapter},
    core::Registry,
    events::UsageEvent,
    store::ApiStore,
    utils::GracefulShutdown,
};
