//! Domain records for the API catalog.
//!
//! These types are the store's public vocabulary: parent [`ApiConfig`]
//! rows own their method, parameter and key children. Children carry no
//! back-pointers; the only operation that crosses the ownership boundary
//! is the cascade delete inside the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The seven methods an onboarded API may restrict itself to. A config
/// with an empty method set allows all of them.
pub const COMMON_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// A credential scoped to one onboarded API.
///
/// `key` values are globally unique across the catalog. Inactive keys are
/// rejected with a quota-exhausted response rather than an unauthorized
/// one so callers can tell the two apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// An absent expiry means the key never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

/// Where a declared parameter constraint is looked up on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Query,
    Path,
    Header,
    Body,
}

impl ParameterLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterLocation::Query => "query",
            ParameterLocation::Path => "path",
            ParameterLocation::Header => "header",
            ParameterLocation::Body => "body",
        }
    }
}

/// A declared parameter constraint on an onboarded API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub location: ParameterLocation,
    #[serde(default)]
    pub required: bool,
    /// Optional regex the parameter value must match when present.
    #[serde(default)]
    pub validation: String,
}

/// The routing record for one onboarded upstream API, with all children
/// eagerly loaded.
#[derive(Debug, Clone, Serialize)]
pub struct ApiConfig {
    pub id: i64,
    pub path: String,
    pub upstream: String,
    pub required_subscription: String,
    pub required_headers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
    pub request_count: i64,
    pub methods: Vec<String>,
    pub parameters: Vec<ApiParameter>,
    pub api_keys: Vec<ApiKey>,
}

impl ApiConfig {
    /// The wildcard-stripped prefix used for route matching.
    pub fn stem(&self) -> &str {
        stem(&self.path)
    }

    /// An empty method set is the degenerate allow-all config.
    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m == method)
    }

    pub fn find_key(&self, key: &str) -> Option<&ApiKey> {
        self.api_keys.iter().find(|k| k.key == key)
    }
}

/// Strip a trailing `/*` or `*` wildcard marker from a stored path.
pub fn stem(path: &str) -> &str {
    path.strip_suffix("/*")
        .or_else(|| path.strip_suffix('*'))
        .unwrap_or(path)
}

/// Input record for creating or replacing an [`ApiConfig`].
///
/// Produced by the management layer after payload validation; the store
/// only re-checks what the database must enforce anyway.
#[derive(Debug, Clone, Default)]
pub struct NewApiConfig {
    pub path: String,
    pub upstream: String,
    pub required_subscription: String,
    pub required_headers: Vec<String>,
    pub methods: Vec<String>,
    pub parameters: Vec<ApiParameter>,
    pub api_keys: Vec<ApiKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_strips_trailing_wildcards() {
        assert_eq!(stem("/weather/*"), "/weather");
        assert_eq!(stem("/weather*"), "/weather");
        assert_eq!(stem("/weather"), "/weather");
        assert_eq!(stem("/"), "/");
    }

    #[test]
    fn empty_method_set_allows_everything() {
        let config = ApiConfig {
            id: 1,
            path: "/w/*".into(),
            upstream: "http://u:8083".into(),
            required_subscription: String::new(),
            required_headers: vec![],
            last_accessed: None,
            request_count: 0,
            methods: vec![],
            parameters: vec![],
            api_keys: vec![],
        };
        for method in COMMON_METHODS {
            assert!(config.allows_method(method));
        }
    }

    #[test]
    fn expiry_honours_absent_timestamp() {
        let now = Utc::now();
        let mut key = ApiKey {
            key: "K1".into(),
            name: "k".into(),
            is_active: true,
            expires_at: None,
        };
        assert!(!key.is_expired(now));
        key.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(key.is_expired(now));
        key.expires_at = Some(now + chrono::Duration::hours(1));
        assert!(!key.is_expired(now));
    }
}
