//! Compiled routing table for the proxy listener.
//!
//! The registry projects the store's catalog into a [`ProxyTable`]; the
//! proxy handler only ever sees an immutable snapshot of it. Snapshots
//! are replaced wholesale, never mutated in place, so readers always
//! observe a consistent view.

use thiserror::Error;
use url::Url;

/// Errors raised while turning a stored upstream URL into a dial target.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamParseError {
    #[error("invalid upstream URL: {0}")]
    Invalid(String),

    #[error("unsupported upstream scheme: {0}")]
    UnsupportedScheme(String),

    #[error("upstream URL has no host")]
    MissingHost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamScheme {
    Http,
    Https,
}

impl UpstreamScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamScheme::Http => "http",
            UpstreamScheme::Https => "https",
        }
    }

    fn default_port(&self) -> u16 {
        match self {
            UpstreamScheme::Http => 80,
            UpstreamScheme::Https => 443,
        }
    }
}

/// Where a compiled route sends its traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub scheme: UpstreamScheme,
    /// Dial address, always `host:port` with scheme defaults applied.
    pub authority: String,
    /// Host header override: hostname only for https, host plus any
    /// explicit port for http.
    pub host_header: String,
    /// Upstream base path the stem is rewritten onto. Defaults to `/`.
    pub base_path: String,
    /// Certificate verification is skipped for https upstreams so
    /// self-signed origins work out of the box. A security tradeoff,
    /// candidate for a per-route opt-in.
    pub insecure_tls: bool,
}

impl UpstreamTarget {
    pub fn parse(upstream: &str) -> Result<Self, UpstreamParseError> {
        let url =
            Url::parse(upstream).map_err(|e| UpstreamParseError::Invalid(e.to_string()))?;

        let scheme = match url.scheme() {
            "http" => UpstreamScheme::Http,
            "https" => UpstreamScheme::Https,
            other => return Err(UpstreamParseError::UnsupportedScheme(other.to_string())),
        };

        let host = url
            .host_str()
            .ok_or(UpstreamParseError::MissingHost)?
            .to_string();
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        let host_header = match (scheme, url.port()) {
            (UpstreamScheme::Https, _) => host.clone(),
            (UpstreamScheme::Http, Some(explicit)) => format!("{host}:{explicit}"),
            (UpstreamScheme::Http, None) => host.clone(),
        };

        let base_path = match url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };

        Ok(Self {
            scheme,
            authority: format!("{host}:{port}"),
            host_header,
            base_path,
            insecure_tls: scheme == UpstreamScheme::Https,
        })
    }
}

/// One onboarded API projected into the live table.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    /// The stored path pattern, wildcard included.
    pub path: String,
    /// Wildcard-stripped prefix used for matching.
    pub stem: String,
    /// Allowed methods; empty means all. Enforcement happens in the
    /// authorization filter so a disallowed method answers 405, not 404.
    pub methods: Vec<String>,
    pub target: UpstreamTarget,
}

impl CompiledRoute {
    /// Rewrite a matched request path onto the upstream base path:
    /// `^<stem>(.*)` becomes `<base_path>$1`.
    pub fn rewrite(&self, request_path: &str) -> String {
        let remainder = request_path.strip_prefix(&self.stem).unwrap_or(request_path);
        let base = self.target.base_path.trim_end_matches('/');
        let rewritten = format!("{base}{remainder}");
        if rewritten.is_empty() {
            "/".to_string()
        } else if rewritten.starts_with('/') {
            rewritten
        } else {
            format!("/{rewritten}")
        }
    }
}

/// The proxy listener's routing snapshot.
#[derive(Debug, Clone, Default)]
pub struct ProxyTable {
    routes: Vec<CompiledRoute>,
}

impl ProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route, replacing any existing entry with the same stem.
    pub fn upsert(&mut self, route: CompiledRoute) {
        match self.routes.iter_mut().find(|r| r.stem == route.stem) {
            Some(existing) => *existing = route,
            None => self.routes.push(route),
        }
    }

    /// Longest-prefix match over stems. Ties cannot occur because stored
    /// paths are unique.
    pub fn find(&self, request_path: &str) -> Option<&CompiledRoute> {
        self.routes
            .iter()
            .filter(|r| request_path.starts_with(&r.stem))
            .max_by_key(|r| r.stem.len())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &[CompiledRoute] {
        &self.routes
    }
}
