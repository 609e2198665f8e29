//! Forward proxy support
//!
//! Provides:
//! - Proxy resolution for a destination ([`ProxyResolver`])
//! - Conventional proxy environment semantics ([`EnvProxyResolver`])
//! - HTTP CONNECT tunnel dialing ([`ConnectDialer`])

mod connect;
mod env;

pub use connect::{ConnectDialer, ConnectResponse, ConnectState};
pub use env::{EnvProxyResolver, NoProxy, ProxyEnv};

use crate::context::ContextError;
use crate::transport::TransportError;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;
use url::{Host, Url};

/// Proxy errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid destination address {address:?}: {reason}")]
    InvalidDestination { address: String, reason: String },

    #[error("Invalid proxy address {value:?}: {reason}")]
    InvalidProxyUrl { value: String, reason: String },

    #[error("Unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Refusing to use HTTP_PROXY value in CGI environment")]
    CgiProxyRefused,

    #[error("Failed to dial proxy {proxy}: {source}")]
    Dial {
        proxy: String,
        #[source]
        source: TransportError,
    },

    #[error("HTTP CONNECT to {destination} via proxy {proxy} failed: {source}")]
    Exchange {
        destination: String,
        proxy: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read response from HTTP CONNECT to {destination} via proxy {proxy}: {reason}")]
    MalformedResponse {
        destination: String,
        proxy: String,
        reason: String,
    },

    #[error("Failed to dial {destination} via {proxy}. response status: {status}")]
    Status {
        destination: String,
        proxy: String,
        status: String,
    },

    #[error("CONNECT response from {proxy} resulted in {bytes} bytes of unexpected data")]
    UnexpectedData { proxy: String, bytes: usize },

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Decides whether traffic to a destination goes through a forward proxy
pub trait ProxyResolver: Send + Sync + fmt::Debug {
    /// Return the proxy for `destination` (`host:port`), or `None` to dial directly
    fn resolve_proxy(&self, destination: &str) -> Result<Option<Url>, ProxyError>;
}

/// Resolver that never proxies
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectResolver;

impl ProxyResolver for DirectResolver {
    fn resolve_proxy(&self, destination: &str) -> Result<Option<Url>, ProxyError> {
        Target::parse(destination)?;
        Ok(None)
    }
}

/// Resolver that routes everything except bypassed hosts through one proxy
#[derive(Debug, Clone)]
pub struct FixedProxyResolver {
    proxy: Url,
    no_proxy: NoProxy,
}

impl FixedProxyResolver {
    /// Create a resolver for `proxy`, validated as an `http` proxy URL
    pub fn new(proxy: &str) -> Result<Self, ProxyError> {
        Ok(Self {
            proxy: parse_proxy_url(proxy)?,
            no_proxy: NoProxy::default(),
        })
    }

    /// Bypass the proxy for destinations matching a `NO_PROXY`-style list
    pub fn with_no_proxy(mut self, list: &str) -> Self {
        self.no_proxy = NoProxy::parse(list);
        self
    }

    pub fn proxy(&self) -> &Url {
        &self.proxy
    }
}

impl ProxyResolver for FixedProxyResolver {
    fn resolve_proxy(&self, destination: &str) -> Result<Option<Url>, ProxyError> {
        let target = Target::parse(destination)?;
        if target.is_loopback() || self.no_proxy.matches(&target) {
            return Ok(None);
        }
        Ok(Some(self.proxy.clone()))
    }
}

/// Host part of a destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TargetHost {
    Domain(String),
    Ip(IpAddr),
}

/// Destination as seen by the representative `http://` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub host: TargetHost,
    pub port: u16,
}

impl Target {
    /// Parse `host:port` the way an `http://host:port` request URL would
    pub fn parse(destination: &str) -> Result<Self, ProxyError> {
        let invalid = |reason: String| ProxyError::InvalidDestination {
            address: destination.to_string(),
            reason,
        };

        if destination.is_empty() {
            return Err(invalid("empty address".to_string()));
        }
        if destination.contains(['\r', '\n', ' ', '/']) {
            return Err(invalid("unexpected characters".to_string()));
        }

        let url = Url::parse(&format!("http://{destination}")).map_err(|e| invalid(e.to_string()))?;
        let host = match url.host() {
            Some(Host::Domain(domain)) => TargetHost::Domain(domain.to_ascii_lowercase()),
            Some(Host::Ipv4(ip)) => TargetHost::Ip(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => TargetHost::Ip(IpAddr::V6(ip)),
            None => return Err(invalid("missing host".to_string())),
        };

        Ok(Self {
            host,
            port: url.port_or_known_default().unwrap_or(80),
        })
    }

    /// `localhost` and loopback addresses are never proxied
    pub fn is_loopback(&self) -> bool {
        match &self.host {
            TargetHost::Domain(domain) => domain == "localhost",
            TargetHost::Ip(ip) => ip.is_loopback(),
        }
    }
}

const KNOWN_PROXY_SCHEMES: [&str; 4] = ["http", "https", "socks5", "socks5h"];

/// Parse a proxy setting, treating scheme-less values as `http://`
pub(crate) fn parse_proxy_url(value: &str) -> Result<Url, ProxyError> {
    let invalid = |reason: String| ProxyError::InvalidProxyUrl {
        value: value.to_string(),
        reason,
    };

    let url = match Url::parse(value) {
        Ok(url) if KNOWN_PROXY_SCHEMES.contains(&url.scheme()) => url,
        _ => Url::parse(&format!("http://{value}")).map_err(|e| invalid(e.to_string()))?,
    };

    if url.scheme() != "http" {
        return Err(ProxyError::UnsupportedScheme(url.scheme().to_string()));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(invalid("missing host".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_parse_target() {
        let target = Target::parse("Central.Example.com:8443").unwrap();
        assert_eq!(target.host, TargetHost::Domain("central.example.com".to_string()));
        assert_eq!(target.port, 8443);

        let target = Target::parse("[::1]:443").unwrap();
        assert_eq!(target.host, TargetHost::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(target.is_loopback());

        let target = Target::parse("example.com").unwrap();
        assert_eq!(target.port, 80);
    }

    #[test]
    fn test_parse_target_rejects_malformed() {
        for bad in ["", "host:notaport", "host:443\r\nX: y", "host:99999"] {
            assert!(
                matches!(Target::parse(bad), Err(ProxyError::InvalidDestination { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_proxy_url() {
        let url = parse_proxy_url("proxy.corp:3128").unwrap();
        assert_eq!(url.host_str(), Some("proxy.corp"));
        assert_eq!(url.port(), Some(3128));

        let url = parse_proxy_url("10.0.0.1:8080").unwrap();
        assert_eq!(url.scheme(), "http");

        let url = parse_proxy_url("http://user:pw@proxy.corp").unwrap();
        assert_eq!(url.username(), "user");
        assert_eq!(url.port(), None);
    }

    #[test]
    fn test_parse_proxy_url_rejects_unsupported() {
        assert!(matches!(
            parse_proxy_url("socks5://proxy.corp:1080"),
            Err(ProxyError::UnsupportedScheme(s)) if s == "socks5"
        ));
        assert!(matches!(
            parse_proxy_url("https://proxy.corp"),
            Err(ProxyError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            parse_proxy_url("[::1"),
            Err(ProxyError::InvalidProxyUrl { .. })
        ));
    }

    #[test]
    fn test_direct_resolver() {
        assert!(DirectResolver.resolve_proxy("example.com:443").unwrap().is_none());
        assert!(DirectResolver.resolve_proxy("").is_err());
    }

    #[test]
    fn test_fixed_resolver() {
        let resolver = FixedProxyResolver::new("http://proxy.corp:3128")
            .unwrap()
            .with_no_proxy("internal.corp");

        let proxy = resolver.resolve_proxy("central.example.com:443").unwrap();
        assert_eq!(proxy.as_ref().and_then(Url::host_str), Some("proxy.corp"));

        assert!(resolver.resolve_proxy("api.internal.corp:443").unwrap().is_none());
        assert!(resolver.resolve_proxy("localhost:443").unwrap().is_none());
        assert!(resolver.resolve_proxy("127.0.0.1:443").unwrap().is_none());
    }
}
