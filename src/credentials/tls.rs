//! TLS credentials backed by rustls

use super::{authority_host, AuthInfo, HandshakeError, ProtocolInfo, SharedAuthInfo, TransportCredentials};
use crate::context::Context;
use crate::transport::BoxedConnection;
use async_trait::async_trait;
use rustls::client::ClientConnection;
use rustls::crypto::ring as ring_provider;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::any::Any;
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Peer identity learned from a TLS handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsAuthInfo {
    /// Name the peer was verified against
    pub server_name: String,
    /// Peer certificate chain, leaf first
    pub peer_certificates: Vec<CertificateDer<'static>>,
    /// e.g. `TLSv1_3`
    pub protocol_version: Option<String>,
    /// e.g. `TLS13_AES_256_GCM_SHA384`
    pub cipher_suite: Option<String>,
    pub alpn_protocol: Option<Vec<u8>>,
}

impl TlsAuthInfo {
    fn from_connection(conn: &ClientConnection, server_name: String) -> Self {
        Self {
            server_name,
            peer_certificates: conn
                .peer_certificates()
                .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
                .unwrap_or_default(),
            protocol_version: conn.protocol_version().map(|v| format!("{:?}", v)),
            cipher_suite: conn
                .negotiated_cipher_suite()
                .map(|s| format!("{:?}", s.suite())),
            alpn_protocol: conn.alpn_protocol().map(<[u8]>::to_vec),
        }
    }

    /// The peer's own certificate
    pub fn leaf_certificate(&self) -> Option<&CertificateDer<'static>> {
        self.peer_certificates.first()
    }
}

impl AuthInfo for TlsAuthInfo {
    fn auth_type(&self) -> &str {
        "tls"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Client TLS credentials
#[derive(Debug, Clone)]
pub struct TlsCredentials {
    config: Arc<ClientConfig>,
    server_name: Option<String>,
}

impl TlsCredentials {
    /// Wrap an existing rustls client configuration
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            server_name: None,
        }
    }

    /// Trust the bundled webpki root set
    pub fn with_webpki_roots() -> Result<Self, HandshakeError> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        Self::with_root_certificates(roots)
    }

    /// Trust exactly `roots`
    pub fn with_root_certificates(roots: RootCertStore) -> Result<Self, HandshakeError> {
        let config = ClientConfig::builder_with_provider(Arc::new(ring_provider::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| HandshakeError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self::new(Arc::new(config)))
    }

    /// Verify the peer against `name` instead of the handshake authority
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Offer `protocols` via ALPN
    pub fn with_alpn(mut self, protocols: Vec<Vec<u8>>) -> Self {
        Arc::make_mut(&mut self.config).alpn_protocols = protocols;
        self
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }
}

#[async_trait]
impl TransportCredentials for TlsCredentials {
    async fn client_handshake(
        &self,
        ctx: &Context,
        authority: &str,
        conn: BoxedConnection,
    ) -> Result<(BoxedConnection, SharedAuthInfo), HandshakeError> {
        let name = match &self.server_name {
            Some(name) => name.clone(),
            None => authority_host(authority)?.to_string(),
        };
        let server_name = ServerName::try_from(name.clone())
            .map_err(|e| HandshakeError::InvalidAuthority(format!("{}: {}", name, e)))?;

        let connector = TlsConnector::from(self.config.clone());
        let stream = ctx
            .run(connector.connect(server_name, conn))
            .await?
            .map_err(|e| HandshakeError::Tls(e.to_string()))?;

        let info = TlsAuthInfo::from_connection(stream.get_ref().1, name);
        debug!(
            "TLS handshake with {} complete ({:?}, {} peer certificates)",
            info.server_name,
            info.protocol_version,
            info.peer_certificates.len()
        );

        Ok((Box::new(stream), Arc::new(info)))
    }

    fn info(&self) -> ProtocolInfo {
        ProtocolInfo {
            security_protocol: "tls".to_string(),
            security_version: "1.2".to_string(),
            server_name: self.server_name.clone(),
        }
    }
}
