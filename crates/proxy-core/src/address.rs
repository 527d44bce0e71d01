//! Broker and client endpoint parsing and rendering.
//!
//! Endpoints travel the wire as `host:port` strings in both the gRPC
//! surface (proto `Endpoints` flattened by the activities) and the legacy
//! broker route response. This module is the single place that parses and
//! re-renders them so the rest of the crate works with a typed
//! [`Endpoint`] instead of ad hoc string splitting.

use crate::error::ProxyError;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// A resolved or resolvable `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, rejecting empty hosts and unparsable ports.
    /// IPv6 literals must be bracketed (`[::1]:10911`).
    pub fn parse(addr: &str) -> Result<Self, ProxyError> {
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(ProxyError::client_input("empty broker address"));
        }

        if let Some(rest) = addr.strip_prefix('[') {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| ProxyError::client_input(format!("unterminated IPv6 literal: {addr}")))?;
            let port = rest
                .strip_prefix(':')
                .ok_or_else(|| ProxyError::client_input(format!("missing port in: {addr}")))?;
            let port: u16 = port
                .parse()
                .map_err(|_| ProxyError::client_input(format!("invalid port in: {addr}")))?;
            return Ok(Self::new(format!("[{host}]"), port));
        }

        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| ProxyError::client_input(format!("missing port in: {addr}")))?;
        if host.is_empty() {
            return Err(ProxyError::client_input(format!("empty host in: {addr}")));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| ProxyError::client_input(format!("invalid port in: {addr}")))?;
        Ok(Self::new(host, port))
    }

    /// A `http://` URI suitable for `tonic::transport::Endpoint::from_shared`.
    pub fn to_http_uri(&self) -> String {
        format!("http://{self}")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&Endpoint> for SocketAddr {
    type Error = ProxyError;

    fn try_from(ep: &Endpoint) -> Result<Self, Self::Error> {
        let host = ep.host.trim_start_matches('[').trim_end_matches(']');
        let ip: IpAddr = host
            .parse()
            .map_err(|_| ProxyError::client_input(format!("not a literal IP: {}", ep.host)))?;
        Ok(SocketAddr::new(ip, ep.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4() {
        let ep = Endpoint::parse("10.0.0.1:10911").unwrap();
        assert_eq!(ep.host, "10.0.0.1");
        assert_eq!(ep.port, 10911);
        assert_eq!(ep.to_string(), "10.0.0.1:10911");
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let ep = Endpoint::parse("[::1]:10911").unwrap();
        assert_eq!(ep.host, "[::1]");
        assert_eq!(ep.port, 10911);
    }

    #[test]
    fn rejects_missing_port() {
        assert!(Endpoint::parse("10.0.0.1").is_err());
        assert!(Endpoint::parse("").is_err());
        assert!(Endpoint::parse(":10911").is_err());
    }

    #[test]
    fn renders_http_uri() {
        let ep = Endpoint::new("broker-a", 10911);
        assert_eq!(ep.to_http_uri(), "http://broker-a:10911");
    }
}
