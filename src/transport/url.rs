//! Transport selector strings
//!
//! ```text
//! inproc                    private in-process loopback
//! inproc://name             in-process hub shared by every bus using `name`
//! ipc / ipc://name          host-local IPC
//! udp://239.255.76.67:7667  UDP multicast
//! serial:///dev/ttyUSB0?baud=115200
//! ```
//!
//! An empty selector falls back to the `ZCM_DEFAULT_URL` environment
//! variable, then to `inproc`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConstructionError;

/// Environment variable consulted for an empty selector
pub const DEFAULT_URL_ENV: &str = "ZCM_DEFAULT_URL";

/// Selector used when nothing else is configured
pub const FALLBACK_URL: &str = "inproc";

/// Parsed transport selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportUrl {
    /// Transport kind, lowercase (e.g. "udp")
    pub scheme: String,
    /// Scheme-specific address, possibly empty
    pub address: String,
    /// Query parameters
    pub params: BTreeMap<String, String>,
}

impl TransportUrl {
    /// Parse a selector, resolving the empty selector through the environment
    pub fn parse(url: &str) -> Result<Self, ConstructionError> {
        let url = url.trim();
        if url.is_empty() {
            let resolved = std::env::var(DEFAULT_URL_ENV)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_URL.to_string());
            return Self::parse_explicit(&resolved);
        }
        Self::parse_explicit(url)
    }

    fn parse_explicit(url: &str) -> Result<Self, ConstructionError> {
        let invalid = |reason: &str| ConstructionError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = match url.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => (url, ""),
        };

        if scheme.is_empty() {
            return Err(invalid("missing scheme"));
        }
        if !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '+')
        {
            return Err(invalid("scheme contains invalid characters"));
        }

        let (address, query) = match rest.split_once('?') {
            Some((address, query)) => (address, Some(query)),
            None => (rest, None),
        };

        let mut params = BTreeMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| invalid("query parameter without '='"))?;
                if key.is_empty() {
                    return Err(invalid("empty query parameter name"));
                }
                params.insert(key.to_string(), value.to_string());
            }
        }

        let parsed = Self {
            scheme: scheme.to_ascii_lowercase(),
            address: address.to_string(),
            params,
        };

        if parsed.scheme == "udp" || parsed.scheme == "udpm" {
            let (host, port) = parsed
                .address
                .rsplit_once(':')
                .ok_or_else(|| invalid("udp address must be host:port"))?;
            if host.is_empty() {
                return Err(invalid("udp address is missing a host"));
            }
            port.parse::<u16>()
                .map_err(|_| invalid("udp port is not a valid port number"))?;
        }

        Ok(parsed)
    }

    /// Look up a query parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

impl FromStr for TransportUrl {
    type Err = ConstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TransportUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheme)?;
        if !self.address.is_empty() || !self.params.is_empty() {
            write!(f, "://{}", self.address)?;
        }
        let mut sep = '?';
        for (key, value) in &self.params {
            write!(f, "{}{}={}", sep, key, value)?;
            sep = '&';
        }
        Ok(())
    }
}
