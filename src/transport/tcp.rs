//! Direct TCP dialing

use super::{TransportConfig, TransportError};
use crate::context::Context;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Dials TCP connections under a [`Context`] and a connect timeout
#[derive(Debug, Clone, Default)]
pub struct Dialer {
    config: TransportConfig,
}

impl Dialer {
    /// Create a new dialer
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Open a TCP connection to `addr` (`host:port`)
    pub async fn dial(&self, ctx: &Context, addr: &str) -> Result<TcpStream, TransportError> {
        let timeout = Duration::from_secs(self.config.connect_timeout);

        trace!("Dialing {}", addr);
        let stream = tokio::time::timeout(timeout, ctx.run(TcpStream::connect(addr)))
            .await
            .map_err(|_| TransportError::Timeout(addr.to_string()))??
            .map_err(|source| TransportError::ConnectionFailed {
                addr: addr.to_string(),
                source,
            })?;

        if self.config.nodelay {
            stream.set_nodelay(true).ok();
        }

        debug!("Connected to {}", addr);
        Ok(stream)
    }
}
