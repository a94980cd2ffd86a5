//! Port for dispatching proxied requests to upstream origins.

use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};
use thiserror::Error;

/// Errors surfaced by upstream dispatch.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Sends an already-rewritten request to its upstream and returns the
/// origin's response.
#[async_trait]
pub trait UpstreamClient: Send + Sync + 'static {
    async fn send_request(&self, req: Request<Body>) -> UpstreamResult<Response<Body>>;
}
