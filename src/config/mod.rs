//! Configuration management

use crate::proxy::{
    DirectResolver, EnvProxyResolver, FixedProxyResolver, ProxyError, ProxyResolver,
};
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Side-channel configuration
    pub side_channel: SideChannelConfig,
    /// Dialing configuration
    #[serde(default)]
    pub transport: TransportConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }
}

/// Side-channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideChannelConfig {
    /// Endpoint (`host:port`) the side channel is opened to
    pub endpoint: String,
    /// Authority passed to the security handshake; defaults to the endpoint
    #[serde(default)]
    pub authority: Option<String>,
    /// TLS server name overriding the authority's host
    #[serde(default)]
    pub server_name: Option<String>,
    /// ALPN protocols offered on the side channel
    #[serde(default)]
    pub alpn: Vec<String>,
    /// Proxy selection
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl SideChannelConfig {
    /// Authority for the handshake
    pub fn authority(&self) -> &str {
        self.authority.as_deref().unwrap_or(&self.endpoint)
    }
}

impl Default for SideChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: "central.example.com:443".to_string(),
            authority: None,
            server_name: None,
            alpn: vec!["h2".to_string()],
            proxy: ProxyConfig::default(),
        }
    }
}

/// How the side channel picks a forward proxy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// `HTTP_PROXY` / `NO_PROXY` from the process environment
    #[default]
    Environment,
    /// Never use a proxy
    Direct,
    /// Always use `url`, except for `no_proxy` matches
    Fixed,
}

/// Proxy configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub mode: ProxyMode,
    /// Proxy URL for `fixed` mode
    #[serde(default)]
    pub url: Option<String>,
    /// Bypass list for `fixed` mode, `NO_PROXY` syntax
    #[serde(default)]
    pub no_proxy: Option<String>,
}

impl ProxyConfig {
    /// Build the resolver this configuration describes
    pub fn resolver(&self) -> Result<Arc<dyn ProxyResolver>, ProxyError> {
        let resolver: Arc<dyn ProxyResolver> = match self.mode {
            ProxyMode::Environment => Arc::new(EnvProxyResolver::from_process_env()),
            ProxyMode::Direct => Arc::new(DirectResolver),
            ProxyMode::Fixed => {
                let url = self.url.as_deref().ok_or_else(|| ProxyError::InvalidProxyUrl {
                    value: String::new(),
                    reason: "fixed proxy mode requires a url".to_string(),
                })?;
                let resolver = FixedProxyResolver::new(url)?;
                match self.no_proxy.as_deref() {
                    Some(list) => Arc::new(resolver.with_no_proxy(list)),
                    None => Arc::new(resolver),
                }
            }
        };
        Ok(resolver)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: String,
    /// Log file path (optional)
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        side_channel: SideChannelConfig {
            proxy: ProxyConfig {
                mode: ProxyMode::Fixed,
                url: Some("http://proxy.example.com:3128".to_string()),
                no_proxy: Some("localhost,.internal.example.com".to_string()),
            },
            ..SideChannelConfig::default()
        },
        transport: TransportConfig::default(),
        logging: LoggingConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [side_channel]
            endpoint = "central.example.com:8443"
            "#,
        )
        .unwrap();

        assert_eq!(config.side_channel.authority(), "central.example.com:8443");
        assert_eq!(config.side_channel.proxy.mode, ProxyMode::Environment);
        assert!(config.side_channel.alpn.is_empty());
        assert_eq!(config.transport, TransportConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_proxy_modes() {
        let config: Config = toml::from_str(
            r#"
            [side_channel]
            endpoint = "central.example.com:443"
            authority = "central.example.com"

            [side_channel.proxy]
            mode = "fixed"
            url = "proxy.corp:3128"
            no_proxy = ".corp"

            [transport]
            connect_timeout = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.side_channel.authority(), "central.example.com");
        assert_eq!(config.transport.connect_timeout, 5);
        assert!(config.transport.nodelay);

        let resolver = config.side_channel.proxy.resolver().unwrap();
        let proxy = resolver.resolve_proxy("central.example.com:443").unwrap();
        assert_eq!(proxy.unwrap().as_str(), "http://proxy.corp:3128/");
        assert!(resolver.resolve_proxy("db.corp:443").unwrap().is_none());
    }

    #[test]
    fn test_fixed_mode_requires_url() {
        let proxy = ProxyConfig {
            mode: ProxyMode::Fixed,
            ..ProxyConfig::default()
        };
        assert!(proxy.resolver().is_err());

        let direct = ProxyConfig {
            mode: ProxyMode::Direct,
            ..ProxyConfig::default()
        };
        assert!(direct.resolver().unwrap().resolve_proxy("a.b:1").unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sidechannel.toml");

        let config = generate_example_config();
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/sidechannel.toml").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
