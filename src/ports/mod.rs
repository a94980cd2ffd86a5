pub mod configurable_server;
pub mod event_queue;
pub mod upstream;

pub use configurable_server::{ConfigurableServer, ReplaceError};
pub use event_queue::EventQueue;
pub use upstream::{UpstreamClient, UpstreamError, UpstreamResult};
