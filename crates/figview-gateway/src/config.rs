//! Server configuration, read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::policy::DEFAULT_ALLOWED_HOSTS;

/// Listen address when `FIGVIEW_GATEWAY_ADDR` is unset.
pub const DEFAULT_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
    3030,
);
pub const ADDR_ENV: &str = "FIGVIEW_GATEWAY_ADDR";
pub const PRODUCTION_ENV: &str = "FIGVIEW_PRODUCTION";

const DEFAULT_USER_AGENT: &str = concat!("figview-gateway/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {var} '{value}': {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub addr: SocketAddr,
    /// Marks session cookies `Secure`.
    pub production: bool,
    pub allowed_hosts: Vec<String>,
    pub user_agent: String,
    /// Upper bound on a single upstream request.
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR,
            production: false,
            allowed_hosts: DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by `FIGVIEW_GATEWAY_ADDR` and `FIGVIEW_PRODUCTION`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(ADDR_ENV) {
            config.addr = value
                .trim()
                .parse()
                .map_err(|err: std::net::AddrParseError| ConfigError::InvalidValue {
                    var: ADDR_ENV,
                    value: value.clone(),
                    reason: err.to_string(),
                })?;
        }
        if let Some(value) = lookup(PRODUCTION_ENV) {
            config.production = parse_flag(&value).ok_or_else(|| ConfigError::InvalidValue {
                var: PRODUCTION_ENV,
                value: value.clone(),
                reason: "expected true/false".to_string(),
            })?;
        }
        Ok(config)
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Add a host to the allowlist.
    pub fn with_allowed_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.push(host.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
