//! Per-request authorization and validation decisions.
//!
//! This layer is free of I/O: it takes a loaded [`ApiConfig`] and the
//! observable pieces of the request and returns either permission or the
//! precise rejection. Keeping it pure makes every branch of the filter
//! unit-testable without a listener or a database.

use chrono::{DateTime, Utc};
use http::{HeaderMap, StatusCode};

use crate::store::models::{ApiConfig, ParameterLocation};

/// Why a request was refused before reaching the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Subscription header missing or empty.
    MissingSubscriptionKey,
    /// No onboarded API matches the request path.
    UnknownApi,
    /// Key not present on the matched API, or expired.
    InvalidKey,
    /// Key exists but has been deactivated.
    QuotaExhausted,
    MethodNotAllowed(String),
    MissingHeader(String),
    MissingParameter { name: String, location: ParameterLocation },
    InvalidParameter { name: String, location: ParameterLocation },
}

impl Rejection {
    /// The authoritative status code for this rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::MissingSubscriptionKey
            | Rejection::UnknownApi
            | Rejection::InvalidKey => StatusCode::UNAUTHORIZED,
            Rejection::QuotaExhausted => StatusCode::TOO_MANY_REQUESTS,
            Rejection::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Rejection::MissingHeader(_)
            | Rejection::MissingParameter { .. }
            | Rejection::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Short plain-text body; the status code carries the semantics.
    pub fn message(&self) -> String {
        match self {
            Rejection::MissingSubscriptionKey => "Missing subscription key".into(),
            Rejection::UnknownApi => "Unauthorized".into(),
            Rejection::InvalidKey => "Invalid API key".into(),
            Rejection::QuotaExhausted => "Quota exhausted: API key is inactive".into(),
            Rejection::MethodNotAllowed(method) => format!("Method {method} not allowed"),
            Rejection::MissingHeader(name) => format!("Missing required header: {name}"),
            Rejection::MissingParameter { name, location } => {
                format!("Missing required {} parameter: {name}", location.as_str())
            }
            Rejection::InvalidParameter { name, location } => {
                format!("Invalid {} parameter: {name}", location.as_str())
            }
        }
    }
}

/// Run the full authorization sequence for a matched API.
///
/// Order matters and is observable through status codes: key checks
/// first, then method, then required headers, then declared parameters.
pub fn authorize(
    config: &ApiConfig,
    presented_key: &str,
    method: &str,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    match config.find_key(presented_key) {
        None => return Err(Rejection::InvalidKey),
        // Expired keys are indistinguishable from unknown ones.
        Some(key) if key.is_expired(now) => return Err(Rejection::InvalidKey),
        Some(key) if !key.is_active => return Err(Rejection::QuotaExhausted),
        Some(_) => {}
    }

    if !config.allows_method(method) {
        return Err(Rejection::MethodNotAllowed(method.to_string()));
    }

    for name in &config.required_headers {
        if header_value(headers, name).is_none_or(str::is_empty) {
            return Err(Rejection::MissingHeader(name.clone()));
        }
    }

    validate_parameters(config, path, query, headers)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn validate_parameters(
    config: &ApiConfig,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Result<(), Rejection> {
    for parameter in &config.parameters {
        let value = match parameter.location {
            ParameterLocation::Query => query_value(query, &parameter.name),
            ParameterLocation::Header => {
                header_value(headers, &parameter.name).map(str::to_string)
            }
            ParameterLocation::Path => path_segment(config.stem(), path),
            // Bodies are streamed through untouched.
            ParameterLocation::Body => continue,
        };

        let value = value.unwrap_or_default();
        if parameter.required && value.is_empty() {
            return Err(Rejection::MissingParameter {
                name: parameter.name.clone(),
                location: parameter.location,
            });
        }
        if !parameter.validation.is_empty() && !value.is_empty() {
            match regex::Regex::new(&parameter.validation) {
                Ok(re) if !re.is_match(&value) => {
                    return Err(Rejection::InvalidParameter {
                        name: parameter.name.clone(),
                        location: parameter.location,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        parameter = %parameter.name,
                        pattern = %parameter.validation,
                        error = %e,
                        "skipping unparseable validation pattern"
                    );
                }
            }
        }
    }
    Ok(())
}

fn query_value(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// First path segment after the stem, the same shape the request
/// validator has always matched.
fn path_segment(config_stem: &str, request_path: &str) -> Option<String> {
    let remainder = request_path.strip_prefix(config_stem)?;
    let segment = remainder.trim_start_matches('/').split('/').next()?;
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}
