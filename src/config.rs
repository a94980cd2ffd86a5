//! Runtime configuration for the gateway binary.
//!
//! The handler takes the classic positional triple
//! `db_path subscription_key_header [events_endpoint]`; listener
//! addresses are flag-overridable and event streaming is switched on
//! through the `ENABLE_EVENT_STREAMING` environment variable.

use std::net::SocketAddr;

use clap::Parser;
use thiserror::Error;

pub const ENABLE_EVENT_STREAMING: &str = "ENABLE_EVENT_STREAMING";

#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct Args {
    /// Path to the SQLite catalog database (created if missing)
    pub db_path: String,

    /// Request header carrying the subscription key (e.g. X-Subscription-Key)
    pub subscription_key_header: String,

    /// Optional HTTP endpoint usage events are POSTed to; without it the
    /// event pipeline writes JSON lines to stdout
    pub events_endpoint: Option<String>,

    /// Address of the management listener (/veil/api/*)
    #[clap(long, default_value = "0.0.0.0:2020")]
    pub management_addr: String,

    /// Address of the proxy listener serving onboarded routes
    #[clap(long, default_value = "0.0.0.0:2021")]
    pub proxy_addr: String,

    /// Human-friendly console logs instead of JSON
    #[clap(long)]
    pub console_logs: bool,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid listen address '{0}': {1}")]
    Address(String, std::net::AddrParseError),

    #[error("subscription key header cannot be empty")]
    EmptyKeyHeader,

    #[error("events endpoint must be an http(s) URL, got '{0}'")]
    InvalidEventsEndpoint(String),
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub db_path: String,
    pub subscription_key_header: String,
    pub events_endpoint: Option<String>,
    pub management_addr: SocketAddr,
    pub proxy_addr: SocketAddr,
    pub event_streaming: bool,
}

impl GatewayConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let streaming_env = std::env::var(ENABLE_EVENT_STREAMING).ok();
        Self::build(args, streaming_env.as_deref())
    }

    fn build(args: &Args, streaming_env: Option<&str>) -> Result<Self, ConfigError> {
        if args.subscription_key_header.trim().is_empty() {
            return Err(ConfigError::EmptyKeyHeader);
        }

        if let Some(endpoint) = &args.events_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::InvalidEventsEndpoint(endpoint.clone()));
            }
        }

        let management_addr = args
            .management_addr
            .parse()
            .map_err(|e| ConfigError::Address(args.management_addr.clone(), e))?;
        let proxy_addr = args
            .proxy_addr
            .parse()
            .map_err(|e| ConfigError::Address(args.proxy_addr.clone(), e))?;

        let event_streaming = matches!(streaming_env, Some("true") | Some("1"));

        Ok(Self {
            db_path: args.db_path.clone(),
            subscription_key_header: args.subscription_key_header.clone(),
            events_endpoint: args.events_endpoint.clone(),
            management_addr,
            proxy_addr,
            event_streaming,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            db_path: "veil.db".into(),
            subscription_key_header: "X-Subscription-Key".into(),
            events_endpoint: None,
            management_addr: "127.0.0.1:2020".into(),
            proxy_addr: "127.0.0.1:2021".into(),
            console_logs: false,
        }
    }

    #[test]
    fn builds_with_defaults() {
        let config = GatewayConfig::build(&args(), None).unwrap();
        assert_eq!(config.management_addr.port(), 2020);
        assert_eq!(config.proxy_addr.port(), 2021);
        assert!(!config.event_streaming);
        assert!(config.events_endpoint.is_none());
    }

    #[test]
    fn event_streaming_accepts_true_and_one() {
        assert!(GatewayConfig::build(&args(), Some("true")).unwrap().event_streaming);
        assert!(GatewayConfig::build(&args(), Some("1")).unwrap().event_streaming);
        assert!(!GatewayConfig::build(&args(), Some("yes")).unwrap().event_streaming);
        assert!(!GatewayConfig::build(&args(), Some("0")).unwrap().event_streaming);
    }

    #[test]
    fn rejects_empty_key_header() {
        let mut bad = args();
        bad.subscription_key_header = "  ".into();
        assert!(matches!(
            GatewayConfig::build(&bad, None),
            Err(ConfigError::EmptyKeyHeader)
        ));
    }

    #[test]
    fn rejects_non_http_events_endpoint() {
        let mut bad = args();
        bad.events_endpoint = Some("ftp://collector/events".into());
        assert!(matches!(
            GatewayConfig::build(&bad, None),
            Err(ConfigError::InvalidEventsEndpoint(_))
        ));

        let mut good = args();
        good.events_endpoint = Some("http://collector:9000/events".into());
        assert!(GatewayConfig::build(&good, None).is_ok());
    }

    #[test]
    fn rejects_malformed_listen_addresses() {
        let mut bad = args();
        bad.proxy_addr = "not-an-addr".into();
        assert!(matches!(
            GatewayConfig::build(&bad, None),
            Err(ConfigError::Address(_, _))
        ));
    }
}
