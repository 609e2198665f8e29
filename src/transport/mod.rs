//! Transport layer
//!
//! Provides the raw byte-stream plumbing used by side-channel resolution:
//! - Direct TCP dialing honouring a [`Context`](crate::Context)
//! - The [`Connection`] abstraction shared by plain and secured streams

mod tcp;

pub use tcp::Dialer;

use crate::context::ContextError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection to {addr} failed: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection to {0} timed out")]
    Timeout(String),

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// A bidirectional byte stream usable by the transport layer
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

impl fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Connection")
    }
}

/// Type-erased connection handed between the transport and credential layers
pub type BoxedConnection = Box<dyn Connection>;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Disable Nagle's algorithm on dialed sockets
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            nodelay: true,
        }
    }
}
