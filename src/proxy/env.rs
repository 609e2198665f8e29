//! Proxy selection from conventional environment variables
//!
//! Follows the widely used `HTTP_PROXY` / `NO_PROXY` conventions. The side
//! channel is resolved for an `http://<endpoint>` request, so only the
//! `http` proxy setting applies.

use super::{parse_proxy_url, ProxyError, ProxyResolver, Target, TargetHost};
use std::net::IpAddr;
use tracing::trace;
use url::Url;

/// Snapshot of the proxy-related environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyEnv {
    /// `HTTP_PROXY` or `http_proxy`
    pub http_proxy: Option<String>,
    /// `NO_PROXY` or `no_proxy`
    pub no_proxy: Option<String>,
    /// Set when `REQUEST_METHOD` is present (running as a CGI program)
    pub cgi: bool,
}

impl ProxyEnv {
    /// Read the current process environment
    pub fn from_process_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|&key| lookup(key))
                .find(|value| !value.is_empty())
        };

        Self {
            http_proxy: first(&["HTTP_PROXY", "http_proxy"]),
            no_proxy: first(&["NO_PROXY", "no_proxy"]),
            cgi: lookup("REQUEST_METHOD").is_some_and(|v| !v.is_empty()),
        }
    }
}

/// Resolver backed by a [`ProxyEnv`] snapshot
#[derive(Debug, Clone, Default)]
pub struct EnvProxyResolver {
    env: ProxyEnv,
    no_proxy: NoProxy,
}

impl EnvProxyResolver {
    pub fn new(env: ProxyEnv) -> Self {
        let no_proxy = env.no_proxy.as_deref().map(NoProxy::parse).unwrap_or_default();
        Self { env, no_proxy }
    }

    /// Snapshot the process environment once, at construction
    pub fn from_process_env() -> Self {
        Self::new(ProxyEnv::from_process_env())
    }

    pub fn env(&self) -> &ProxyEnv {
        &self.env
    }
}

impl ProxyResolver for EnvProxyResolver {
    fn resolve_proxy(&self, destination: &str) -> Result<Option<Url>, ProxyError> {
        let target = Target::parse(destination)?;

        let Some(raw) = self.env.http_proxy.as_deref() else {
            return Ok(None);
        };
        let proxy = parse_proxy_url(raw)?;
        if self.env.cgi {
            return Err(ProxyError::CgiProxyRefused);
        }

        if target.is_loopback() || self.no_proxy.matches(&target) {
            trace!("Bypassing proxy for {}", destination);
            return Ok(None);
        }
        Ok(Some(proxy))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    Ip {
        ip: IpAddr,
        port: Option<u16>,
    },
    Cidr {
        network: IpAddr,
        prefix: u8,
    },
    /// `suffix` always starts with `.`
    Domain {
        suffix: String,
        match_host: bool,
        port: Option<u16>,
    },
}

/// Parsed `NO_PROXY` list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoProxy {
    all: bool,
    rules: Vec<Rule>,
}

impl NoProxy {
    /// Parse a comma-separated list; malformed entries are skipped
    pub fn parse(list: &str) -> Self {
        let mut no_proxy = Self::default();

        for entry in list.split(',') {
            let entry = entry.trim().to_ascii_lowercase();
            if entry.is_empty() {
                continue;
            }
            if entry == "*" {
                return Self {
                    all: true,
                    rules: Vec::new(),
                };
            }
            if let Some(rule) = parse_cidr(&entry) {
                no_proxy.rules.push(rule);
                continue;
            }

            let (host, port) = match split_host_port(&entry) {
                Some((host, port)) => match port.parse::<u16>() {
                    Ok(port) => (host, Some(port)),
                    Err(_) => continue,
                },
                None => (entry.as_str(), None),
            };
            if host.is_empty() {
                continue;
            }

            if let Ok(ip) = host.parse::<IpAddr>() {
                no_proxy.rules.push(Rule::Ip { ip, port });
                continue;
            }

            let host = host.strip_prefix('*').unwrap_or(host);
            let (suffix, match_host) = match host.strip_prefix('.') {
                Some(_) => (host.to_string(), false),
                None => (format!(".{host}"), true),
            };
            if suffix.len() > 1 {
                no_proxy.rules.push(Rule::Domain {
                    suffix,
                    match_host,
                    port,
                });
            }
        }

        no_proxy
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.rules.is_empty()
    }

    pub(crate) fn matches(&self, target: &Target) -> bool {
        if self.all {
            return true;
        }

        self.rules.iter().any(|rule| match (rule, &target.host) {
            (Rule::Ip { ip, port }, TargetHost::Ip(host)) => {
                ip == host && port.map_or(true, |p| p == target.port)
            }
            (Rule::Cidr { network, prefix }, TargetHost::Ip(host)) => {
                cidr_contains(*network, *prefix, *host)
            }
            (
                Rule::Domain {
                    suffix,
                    match_host,
                    port,
                },
                TargetHost::Domain(host),
            ) => {
                let hit = host.ends_with(suffix.as_str()) || (*match_host && host == &suffix[1..]);
                hit && port.map_or(true, |p| p == target.port)
            }
            _ => false,
        })
    }
}

/// Split `host:port` or `[v6]:port`; `None` when there is no port
fn split_host_port(entry: &str) -> Option<(&str, &str)> {
    if let Some(rest) = entry.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return after.strip_prefix(':').map(|port| (host, port));
    }
    match entry.rsplit_once(':') {
        // Bare IPv6 addresses contain several colons and carry no port
        Some((host, port)) if !host.contains(':') => Some((host, port)),
        _ => None,
    }
}

fn parse_cidr(entry: &str) -> Option<Rule> {
    let (addr, prefix) = entry.split_once('/')?;
    let network: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if network.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some(Rule::Cidr { network, prefix })
}

fn cidr_contains(network: IpAddr, prefix: u8, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            u32::from(net) & mask == u32::from(ip) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            u128::from(net) & mask == u128::from(ip) & mask
        }
        _ => false,
    }
}
