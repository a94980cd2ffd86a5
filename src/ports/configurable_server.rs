//! Port for the live HTTP server's routing configuration.
//!
//! The registry never edits the running table piecemeal: it reads the
//! current snapshot, compiles a full replacement and submits it
//! atomically. Hiding the server behind this trait keeps the reload
//! protocol testable against a mock.

use std::sync::Arc;

use thiserror::Error;

use crate::core::table::ProxyTable;

/// Error returned when the server refuses a configuration replacement.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ReplaceError {
    #[error("server rejected configuration: {0}")]
    Rejected(String),
}

/// A server whose whole routing configuration can be read and replaced.
pub trait ConfigurableServer: Send + Sync + 'static {
    /// The snapshot serving traffic right now.
    fn current(&self) -> Arc<ProxyTable>;

    /// Atomically swap in a new table. In-flight requests finish on
    /// whichever snapshot they matched.
    fn replace(&self, table: ProxyTable) -> Result<(), ReplaceError>;

    /// Whether the server is bound and able to accept a configuration.
    fn is_ready(&self) -> bool;
}
