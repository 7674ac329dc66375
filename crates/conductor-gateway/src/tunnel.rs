//! Public forwarding tunnel contract.
//!
//! The gateway only drives the lifecycle: start after listening, stop before
//! the listener closes. Provider internals live behind this trait.

use async_trait::async_trait;

use crate::errors::TunnelError;

/// A provider able to expose a local port at a public URL.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Open a tunnel to `port` using `auth_token`; returns the public URL.
    async fn start(&self, port: u16, auth_token: &str) -> Result<String, TunnelError>;

    /// Close the tunnel.
    async fn stop(&self) -> Result<(), TunnelError>;
}
