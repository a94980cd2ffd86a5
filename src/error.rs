//! Management-surface error taxonomy and its JSON envelope.
//!
//! Every management endpoint failure renders as
//! `{"status":"error","code":...,"message":...,"details"?}` with the
//! mapped status code. Proxy-path rejections do not use this envelope;
//! they answer plain text (see the authorization filter).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{core::RegistryError, store::StoreError};

/// Errors a management endpoint can answer with.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ManagementError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Database failures, reload failures, marshalling failures. The
    /// message is logged; clients get a generic body.
    #[error("{0}")]
    Internal(String),
}

impl ManagementError {
    fn status(&self) -> StatusCode {
        match self {
            ManagementError::Validation(_) => StatusCode::BAD_REQUEST,
            ManagementError::NotFound(_) => StatusCode::NOT_FOUND,
            ManagementError::Conflict(_) => StatusCode::CONFLICT,
            ManagementError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ManagementError::Validation(_) => "validation_error",
            ManagementError::NotFound(_) => "not_found",
            ManagementError::Conflict(_) => "conflict",
            ManagementError::Internal(_) => "internal_error",
        }
    }
}

impl From<StoreError> for ManagementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => ManagementError::Validation(msg),
            StoreError::NotFound(what) => ManagementError::NotFound(what.to_string()),
            StoreError::Conflict(msg) => ManagementError::Conflict(msg),
            StoreError::Database(e) => {
                tracing::error!(error = %e, "database error in management call");
                ManagementError::Internal("database error".into())
            }
            StoreError::Migrate(e) => {
                tracing::error!(error = %e, "migration error in management call");
                ManagementError::Internal("database error".into())
            }
        }
    }
}

impl From<RegistryError> for ManagementError {
    fn from(err: RegistryError) -> Self {
        tracing::error!(error = %err, "registry reload failed after store mutation");
        ManagementError::Internal("failed to apply routing configuration".into())
    }
}

impl IntoResponse for ManagementError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            // Hide internals from clients; the log already has them.
            ManagementError::Internal(_) => json!({
                "status": "error",
                "code": self.code(),
                "message": "internal error",
            }),
            ManagementError::Validation(msg) => json!({
                "status": "error",
                "code": self.code(),
                "message": "invalid request",
                "details": msg,
            }),
            other => json!({
                "status": "error",
                "code": other.code(),
                "message": other.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn conflict_renders_envelope() {
        let response =
            ManagementError::Conflict("API path already exists".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["code"], "conflict");
        assert_eq!(body["message"], "API path already exists");
    }

    #[tokio::test]
    async fn validation_keeps_details_separate() {
        let response =
            ManagementError::Validation("path and upstream are required".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["code"], "validation_error");
        assert_eq!(body["details"], "path and upstream are required");
    }

    #[tokio::test]
    async fn internal_hides_the_cause() {
        let response = ManagementError::Internal("sqlite exploded".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["message"], "internal error");
        assert!(body.get("details").is_none());
    }

    #[test]
    fn store_errors_map_onto_the_taxonomy() {
        let err: ManagementError = StoreError::NotFound("API").into();
        assert!(matches!(err, ManagementError::NotFound(_)));
        let err: ManagementError = StoreError::Conflict("API key already exists".into()).into();
        assert!(matches!(err, ManagementError::Conflict(_)));
        let err: ManagementError = StoreError::Validation("bad".into()).into();
        assert!(matches!(err, ManagementError::Validation(_)));
    }
}
