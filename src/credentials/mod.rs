//! Transport-security credentials
//!
//! A [`TransportCredentials`] upgrades a raw connection and reports the
//! verified peer identity as [`AuthInfo`]. [`SideChannelCredentials`]
//! decorates any such capability so that the identity is learned over a
//! separate connection and attached to the caller's connection unchanged.

mod side_channel;

#[cfg(feature = "tls")]
mod tls;

pub use side_channel::{SideChannelCredentials, SideChannelError};

#[cfg(feature = "tls")]
pub use tls::{TlsAuthInfo, TlsCredentials};

use crate::context::{Context, ContextError};
use crate::transport::BoxedConnection;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid authority {0:?}")]
    InvalidAuthority(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Side channel: {0}")]
    SideChannel(#[from] Box<SideChannelError>),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{0}")]
    Other(String),
}

impl From<SideChannelError> for HandshakeError {
    fn from(e: SideChannelError) -> Self {
        HandshakeError::SideChannel(Box::new(e))
    }
}

/// Verified peer identity produced by a handshake
pub trait AuthInfo: fmt::Debug + Send + Sync + 'static {
    /// Name of the security protocol, e.g. `tls`
    fn auth_type(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// Shared, immutable authentication metadata
pub type SharedAuthInfo = Arc<dyn AuthInfo>;

/// Protocol metadata advertised by a credential
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub security_protocol: String,
    pub security_version: String,
    pub server_name: Option<String>,
}

/// Client-side transport-security capability
#[async_trait]
pub trait TransportCredentials: Send + Sync {
    /// Upgrade `conn` for a peer expected to be `authority`.
    ///
    /// Returns the connection to use for application traffic and the
    /// verified peer identity.
    async fn client_handshake(
        &self,
        ctx: &Context,
        authority: &str,
        conn: BoxedConnection,
    ) -> Result<(BoxedConnection, SharedAuthInfo), HandshakeError>;

    /// Protocol metadata for this credential
    fn info(&self) -> ProtocolInfo;
}

#[async_trait]
impl<T> TransportCredentials for Arc<T>
where
    T: TransportCredentials + ?Sized,
{
    async fn client_handshake(
        &self,
        ctx: &Context,
        authority: &str,
        conn: BoxedConnection,
    ) -> Result<(BoxedConnection, SharedAuthInfo), HandshakeError> {
        (**self).client_handshake(ctx, authority, conn).await
    }

    fn info(&self) -> ProtocolInfo {
        (**self).info()
    }
}

/// Host part of an authority (`host`, `host:port` or `[v6]:port`)
pub(crate) fn authority_host(authority: &str) -> Result<&str, HandshakeError> {
    let invalid = || HandshakeError::InvalidAuthority(authority.to_string());

    let host = if let Some(rest) = authority.strip_prefix('[') {
        rest.split_once(']').map(|(host, _)| host).ok_or_else(invalid)?
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                port.parse::<u16>().map_err(|_| invalid())?;
                host
            }
            _ => authority,
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    Ok(host)
}
