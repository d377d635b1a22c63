use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TransportError};

/// Host used when only a port is known.
pub const LOCALHOST: &str = "127.0.0.1";

/// A `host:port` pair naming a collector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint on the loopback interface.
    pub fn localhost(port: u16) -> Self {
        Self::new(LOCALHOST, port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    /// Parse `host:port`, `[v6]:port`, or a bare port (loopback).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TransportError::InvalidEndpoint(s.to_string()));
        }

        let Some((host, port)) = s.rsplit_once(':') else {
            let port = parse_port(s)?;
            return Ok(Self::localhost(port));
        };

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(TransportError::InvalidEndpoint(s.to_string()));
        }

        Ok(Self::new(host, parse_port(port)?))
    }
}

fn parse_port(s: &str) -> Result<u16> {
    let value: i64 = s
        .parse()
        .map_err(|_| TransportError::InvalidEndpoint(s.to_string()))?;
    validate_port(value)
}

/// Check that a port value read from an untyped source fits a TCP port.
pub fn validate_port(port: i64) -> Result<u16> {
    u16::try_from(port).map_err(|_| TransportError::InvalidPort(port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let ep: Endpoint = "collector.local:4000".parse().unwrap();
        assert_eq!(ep.host(), "collector.local");
        assert_eq!(ep.port(), 4000);
        assert_eq!(ep.to_string(), "collector.local:4000");
    }

    #[test]
    fn bare_port_means_loopback() {
        let ep: Endpoint = "5123".parse().unwrap();
        assert_eq!(ep, Endpoint::localhost(5123));
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let ep: Endpoint = "[::1]:9000".parse().unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.to_string(), "[::1]:9000");
    }

    #[test]
    fn rejects_negative_and_oversized_ports() {
        assert!(matches!(
            validate_port(-1),
            Err(TransportError::InvalidPort(-1))
        ));
        assert!(matches!(
            validate_port(70_000),
            Err(TransportError::InvalidPort(70_000))
        ));
        assert_eq!(validate_port(0).unwrap(), 0);
        assert!("host:-5".parse::<Endpoint>().is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            ":80".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!("host:http".parse::<Endpoint>().is_err());
    }
}
