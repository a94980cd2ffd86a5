//! Management surface under `/veil/api/`.
//!
//! JSON CRUD over the catalog: onboarding, updating and deleting routes,
//! plus key lifecycle operations. Route mutations trigger a registry
//! reload so the live table follows the store; key-only mutations do not
//! touch the compiled table and skip the reload. This listener carries no
//! authorization filter and is expected to be bound on a trusted network.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    core::{Registry, table::UpstreamTarget},
    error::ManagementError,
    store::{
        ApiStore,
        models::{ApiConfig, ApiKey, ApiParameter, COMMON_METHODS, NewApiConfig},
    },
};

pub struct ManagementState {
    pub store: ApiStore,
    pub registry: Arc<Registry>,
}

pub fn management_router(state: Arc<ManagementState>) -> Router {
    Router::new()
        .route("/veil/api/routes", post(onboard).get(list_routes))
        .route(
            "/veil/api/routes/{*path}",
            put(update_route).patch(update_route).delete(delete_route),
        )
        .route(
            "/veil/api/keys",
            post(add_keys).put(add_keys).delete(delete_key),
        )
        .route(
            "/veil/api/keys/status",
            put(set_key_status).patch(set_key_status),
        )
        .route("/veil/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Onboarding payload. `path` and `upstream` are mandatory; everything
/// else defaults to empty, and an empty `methods` list yields the
/// allow-all degenerate config.
#[derive(Debug, Deserialize)]
pub struct OnboardRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub upstream: String,
    #[serde(default)]
    pub required_subscription: String,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub required_headers: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<ApiParameter>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyPayload>,
}

/// Legacy-compatible key payload: an absent `is_active` means active.
#[derive(Debug, Deserialize)]
pub struct ApiKeyPayload {
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub is_active: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<ApiKeyPayload> for ApiKey {
    fn from(payload: ApiKeyPayload) -> Self {
        ApiKey {
            key: payload.key,
            name: payload.name,
            is_active: payload.is_active.unwrap_or(true),
            expires_at: payload.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddKeysRequest {
    #[serde(default)]
    path: String,
    #[serde(default)]
    api_keys: Vec<ApiKeyPayload>,
}

#[derive(Debug, Deserialize)]
struct KeyStatusRequest {
    #[serde(default)]
    path: String,
    #[serde(default)]
    api_key: String,
    is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DeleteKeyRequest {
    #[serde(default)]
    path: String,
    #[serde(default)]
    api_key: String,
}

fn validate_onboard(req: OnboardRequest) -> Result<NewApiConfig, ManagementError> {
    if req.path.is_empty() || req.upstream.is_empty() {
        return Err(ManagementError::Validation(
            "path and upstream are required".into(),
        ));
    }
    if !req.path.starts_with('/') {
        return Err(ManagementError::Validation(
            "path must start with '/'".into(),
        ));
    }
    UpstreamTarget::parse(&req.upstream)
        .map_err(|e| ManagementError::Validation(e.to_string()))?;

    let mut methods = Vec::with_capacity(req.methods.len());
    for method in req.methods {
        let method = method.to_ascii_uppercase();
        if !COMMON_METHODS.contains(&method.as_str()) {
            return Err(ManagementError::Validation(format!(
                "unsupported method: {method}"
            )));
        }
        methods.push(method);
    }

    let mut api_keys = Vec::with_capacity(req.api_keys.len());
    for key in req.api_keys {
        if key.key.is_empty() {
            return Err(ManagementError::Validation("key value cannot be empty".into()));
        }
        api_keys.push(key.into());
    }

    Ok(NewApiConfig {
        path: req.path,
        upstream: req.upstream,
        required_subscription: req.required_subscription,
        required_headers: req.required_headers,
        methods,
        parameters: req.parameters,
        api_keys,
    })
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ManagementError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => Err(ManagementError::Validation(rejection.body_text())),
    }
}

/// Route parameters arrive without their leading slash.
fn catalog_path(suffix: &str) -> String {
    format!("/{suffix}")
}

fn config_envelope(status: StatusCode, message: &str, api: ApiConfig) -> Response {
    (
        status,
        Json(json!({
            "status": "success",
            "message": message,
            "api": api,
        })),
    )
        .into_response()
}

async fn onboard(
    State(state): State<Arc<ManagementState>>,
    payload: Result<Json<OnboardRequest>, JsonRejection>,
) -> Result<Response, ManagementError> {
    let new = validate_onboard(parse_body(payload)?)?;
    let path = new.path.clone();

    let config = state.store.create(new).await?;
    state.registry.reload().await?;

    tracing::info!(path, "API onboarded");
    Ok(config_envelope(
        StatusCode::CREATED,
        "API onboarded successfully",
        config,
    ))
}

async fn list_routes(
    State(state): State<Arc<ManagementState>>,
) -> Result<Response, ManagementError> {
    let apis = state.store.list().await?;
    Ok(Json(json!({
        "status": "success",
        "count": apis.len(),
        "apis": apis,
    }))
    .into_response())
}

async fn update_route(
    State(state): State<Arc<ManagementState>>,
    Path(path): Path<String>,
    payload: Result<Json<OnboardRequest>, JsonRejection>,
) -> Result<Response, ManagementError> {
    let new = validate_onboard(parse_body(payload)?)?;
    let path = catalog_path(&path);

    let config = state.store.update(&path, new).await?;
    state.registry.reload().await?;

    tracing::info!(path, "API updated");
    Ok(config_envelope(
        StatusCode::CREATED,
        "API updated successfully",
        config,
    ))
}

async fn delete_route(
    State(state): State<Arc<ManagementState>>,
    Path(path): Path<String>,
) -> Result<Response, ManagementError> {
    let path = catalog_path(&path);

    state.store.delete(&path).await?;
    state.registry.reload().await?;

    tracing::info!(path, "API deleted");
    Ok(Json(json!({
        "status": "success",
        "message": "API deleted successfully",
    }))
    .into_response())
}

async fn add_keys(
    State(state): State<Arc<ManagementState>>,
    payload: Result<Json<AddKeysRequest>, JsonRejection>,
) -> Result<Response, ManagementError> {
    let req = parse_body(payload)?;
    if req.path.is_empty() {
        return Err(ManagementError::Validation("path is required".into()));
    }
    if req.api_keys.is_empty() {
        return Err(ManagementError::Validation(
            "api_keys cannot be empty".into(),
        ));
    }
    let mut keys = Vec::with_capacity(req.api_keys.len());
    for key in req.api_keys {
        if key.key.is_empty() {
            return Err(ManagementError::Validation("key value cannot be empty".into()));
        }
        keys.push(key.into());
    }

    let (config, added) = state.store.add_keys(&req.path, keys).await?;
    tracing::info!(path = %req.path, added, "API keys added");
    Ok(config_envelope(
        StatusCode::CREATED,
        &format!("{added} API key(s) added"),
        config,
    ))
}

async fn set_key_status(
    State(state): State<Arc<ManagementState>>,
    payload: Result<Json<KeyStatusRequest>, JsonRejection>,
) -> Result<Response, ManagementError> {
    let req = parse_body(payload)?;
    if req.path.is_empty() || req.api_key.is_empty() {
        return Err(ManagementError::Validation(
            "path and api_key are required".into(),
        ));
    }
    let active = req.is_active.unwrap_or(true);

    let config = state
        .store
        .set_key_active(&req.path, &req.api_key, active)
        .await?;
    tracing::info!(path = %req.path, active, "API key status changed");
    Ok(config_envelope(
        StatusCode::OK,
        "API key status updated",
        config,
    ))
}

async fn delete_key(
    State(state): State<Arc<ManagementState>>,
    payload: Result<Json<DeleteKeyRequest>, JsonRejection>,
) -> Result<Response, ManagementError> {
    let req = parse_body(payload)?;
    if req.path.is_empty() || req.api_key.is_empty() {
        return Err(ManagementError::Validation(
            "path and api_key are required".into(),
        ));
    }

    state.store.delete_key(&req.path, &req.api_key).await?;
    tracing::info!(path = %req.path, "API key deleted");
    Ok(Json(json!({
        "status": "success",
        "message": "API key deleted successfully",
    }))
    .into_response())
}

async fn health(
    State(state): State<Arc<ManagementState>>,
) -> Result<Response, ManagementError> {
    let apis = state.store.list().await?;
    Ok(Json(json!({
        "status": "ok",
        "apis": apis.len(),
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn onboard_request(path: &str, upstream: &str) -> OnboardRequest {
        OnboardRequest {
            path: path.into(),
            upstream: upstream.into(),
            required_subscription: String::new(),
            methods: vec![],
            required_headers: vec![],
            parameters: vec![],
            api_keys: vec![],
        }
    }

    #[test]
    fn onboard_requires_path_and_upstream() {
        assert!(validate_onboard(onboard_request("", "http://u:1")).is_err());
        assert!(validate_onboard(onboard_request("/w/*", "")).is_err());
        assert!(validate_onboard(onboard_request("/w/*", "http://u:1")).is_ok());
    }

    #[test]
    fn onboard_rejects_bad_upstreams_and_methods() {
        assert!(validate_onboard(onboard_request("/w/*", "ftp://u/x")).is_err());
        assert!(validate_onboard(onboard_request("w/*", "http://u:1")).is_err());

        let mut req = onboard_request("/w/*", "http://u:1");
        req.methods = vec!["FETCH".into()];
        assert!(validate_onboard(req).is_err());

        let mut req = onboard_request("/w/*", "http://u:1");
        req.methods = vec!["get".into(), "Post".into()];
        let new = validate_onboard(req).unwrap();
        assert_eq!(new.methods, vec!["GET", "POST"]);
    }

    #[test]
    fn absent_is_active_means_active() {
        let payload = ApiKeyPayload {
            key: "K1".into(),
            name: String::new(),
            is_active: None,
            expires_at: None,
        };
        let key: ApiKey = payload.into();
        assert!(key.is_active);

        let payload = ApiKeyPayload {
            key: "K1".into(),
            name: String::new(),
            is_active: Some(false),
            expires_at: None,
        };
        let key: ApiKey = payload.into();
        assert!(!key.is_active);
    }

    #[test]
    fn catalog_path_restores_leading_slash() {
        assert_eq!(catalog_path("weather/*"), "/weather/*");
        assert_eq!(catalog_path("climate/"), "/climate/");
    }
}
