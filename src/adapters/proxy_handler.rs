//! Proxy-listener pipeline: authorize, dispatch upstream, emit events.
//!
//! Each request runs the sequence: subscription key → catalog lookup →
//! authorization decisions → compiled-table match → best-effort stats
//! bump → rewrite and dispatch → usage-event enqueue. Rejections answer
//! plain text and never reach the upstream; event emission can never
//! fail the request.

use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    response::Response,
};
use chrono::Utc;
use http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use http_body_util::BodyExt;
use tracing::Instrument;

use crate::{
    core::{authorize::authorize, table::CompiledRoute},
    events::UsageEvent,
    metrics,
    ports::{ConfigurableServer, EventQueue, UpstreamClient},
    store::ApiStore,
    tracing_setup,
};

/// Everything the proxy listener needs, injected at construction.
pub struct ProxyState {
    pub server: Arc<dyn ConfigurableServer>,
    pub store: ApiStore,
    pub client: Arc<dyn UpstreamClient>,
    pub events: Option<Arc<dyn EventQueue>>,
    /// Name of the request header carrying the subscription key.
    pub key_header: String,
}

/// Router for the proxy listener: every path and method funnels into the
/// pipeline.
pub fn proxy_router(state: Arc<ProxyState>) -> axum::Router {
    axum::Router::new().fallback(handle).with_state(state)
}

fn plain(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message.to_string()))
        .unwrap_or_else(|_| Response::new(Body::from(message.to_string())))
}

fn content_length(headers: &HeaderMap) -> i64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0)
        .max(0)
}

async fn handle(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let span =
        tracing_setup::create_request_span(req.method().as_str(), req.uri().path(), &request_id);

    let response = run_pipeline(state, req, started).instrument(span.clone()).await;

    let duration = started.elapsed();
    span.record("http.status_code", response.status().as_u16());
    span.record("duration_ms", duration.as_millis() as u64);

    response
}

async fn run_pipeline(state: Arc<ProxyState>, req: Request, started: Instant) -> Response {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let request_size = content_length(req.headers());

    let key = req
        .headers()
        .get(&state.key_header)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if key.is_empty() {
        return plain(StatusCode::UNAUTHORIZED, "Missing subscription key");
    }

    let config = match state.store.get_by_path(&path).await {
        Ok(Some(config)) => config,
        Ok(None) => return plain(StatusCode::UNAUTHORIZED, "Unauthorized"),
        Err(e) => {
            tracing::error!(path, error = %e, "catalog lookup failed");
            return plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    };

    if let Err(rejection) = authorize(
        &config,
        &key,
        &method,
        &path,
        query.as_deref(),
        req.headers(),
        Utc::now(),
    ) {
        tracing::debug!(path, method, rejection = ?rejection, "request rejected");
        return plain(rejection.status(), &rejection.message());
    }

    // Authorized, but the compiled table may lag the catalog: before the
    // initial load completes (or between a commit and its reload) the
    // route has no dispatch target yet.
    let route = match state.server.current().find(&path) {
        Some(route) => route.clone(),
        None => return plain(StatusCode::NOT_FOUND, "Route not found"),
    };

    // Fire and forget; a stats failure must not delay or fail the caller.
    {
        let store = state.store.clone();
        let config_path = config.path.clone();
        tokio::spawn(async move { store.increment_stats(&config_path).await });
    }

    let (status, response_size, response) =
        match dispatch(&state, &route, req, &path, query.as_deref()).await {
            Ok(response) => buffer_response(response).await,
            Err(e) => {
                tracing::warn!(path, error = %e, "upstream dispatch failed");
                let response = plain(StatusCode::BAD_GATEWAY, "Bad gateway");
                (StatusCode::BAD_GATEWAY, 0, response)
            }
        };

    let elapsed = started.elapsed();
    if let Some(events) = &state.events {
        events.enqueue(UsageEvent::for_request(
            &path,
            &key,
            &method,
            status.as_u16(),
            elapsed.as_millis() as i64,
            request_size,
            response_size,
        ));
    }
    metrics::record_proxy_request(&method, status.as_u16(), &route.stem, elapsed.as_secs_f64());

    response
}

async fn dispatch(
    state: &ProxyState,
    route: &CompiledRoute,
    req: Request,
    path: &str,
    query: Option<&str>,
) -> Result<Response, crate::ports::UpstreamError> {
    let rewritten = route.rewrite(path);
    let path_and_query = match query {
        Some(q) => format!("{rewritten}?{q}"),
        None => rewritten,
    };

    let uri = Uri::builder()
        .scheme(route.target.scheme.as_str())
        .authority(route.target.authority.as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| crate::ports::UpstreamError::InvalidRequest(e.to_string()))?;

    let (mut parts, body) = req.into_parts();
    parts.uri = uri;
    match HeaderValue::from_str(&route.target.host_header) {
        Ok(host) => {
            parts.headers.insert(header::HOST, host);
        }
        Err(e) => {
            return Err(crate::ports::UpstreamError::InvalidRequest(format!(
                "invalid host header value: {e}"
            )));
        }
    }

    state.client.send_request(Request::from_parts(parts, body)).await
}

/// Collect the upstream body so its size can be reported in the usage
/// event, then hand the client an identical response.
async fn buffer_response(response: Response) -> (StatusCode, i64, Response) {
    let status = response.status();
    let (parts, body) = response.into_parts();

    match body.collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            let size = bytes.len() as i64;
            (status, size, Response::from_parts(parts, Body::from(bytes)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed reading upstream response body");
            let response = plain(StatusCode::BAD_GATEWAY, "Bad gateway");
            (StatusCode::BAD_GATEWAY, 0, response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_parses_and_clamps() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers), 0);

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("128"));
        assert_eq!(content_length(&headers), 128);

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("-5"));
        assert_eq!(content_length(&headers), 0);

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("junk"));
        assert_eq!(content_length(&headers), 0);
    }

    #[test]
    fn plain_responses_carry_text_content_type() {
        let response = plain(StatusCode::UNAUTHORIZED, "Unauthorized");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }
}
