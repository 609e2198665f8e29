//! # Side-channel credentials
//!
//! Transport credentials for connections whose peer identity cannot be
//! observed directly, for example because they are relayed by an
//! HTTP/1.1-terminating gateway or a forward proxy.
//!
//! ## Features
//!
//! - **Side-channel identity**: the security handshake runs on a separate
//!   connection to the same endpoint and its identity is attached to the
//!   caller's connection unchanged
//! - **HTTP CONNECT tunnelling** when the endpoint is reached through a proxy
//! - **Proxy environment** semantics (`HTTP_PROXY`, `NO_PROXY`)
//! - **rustls** TLS credentials as the base handshake
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               SideChannelCredentials                 │
//! │      (cache guard, one resolution per instance)      │
//! ├─────────────────────────────────────────────────────┤
//! │        Base credentials (TLS handshake, ...)         │
//! ├──────────────────────────┬──────────────────────────┤
//! │      Proxy resolver      │   HTTP CONNECT dialer    │
//! │  (environment, fixed)    │  (one request/response)  │
//! ├──────────────────────────┴──────────────────────────┤
//! │                 Transport (TCP dial)                 │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod context;
pub mod credentials;
pub mod proxy;
pub mod transport;

pub use config::Config;
pub use context::{Context, ContextError};
pub use credentials::{
    AuthInfo, HandshakeError, ProtocolInfo, SharedAuthInfo, SideChannelCredentials,
    SideChannelError, TransportCredentials,
};

#[cfg(feature = "tls")]
pub use credentials::{TlsAuthInfo, TlsCredentials};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] proxy::ProxyError),

    #[error("Handshake error: {0}")]
    Handshake(#[from] credentials::HandshakeError),

    #[error("Side channel error: {0}")]
    SideChannel(#[from] credentials::SideChannelError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Context(#[from] context::ContextError),
}
