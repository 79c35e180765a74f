//! Relays accepted client connections through tunnels to backend instances.
//!
//! Given a resolved target, the forwarder dials the target's instances in
//! order until one accepts, then pumps bytes between the client connection
//! and the tunnel's data channel. The tunnel's error channel is drained in
//! the background and its contents logged; nothing is ever written to it.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]


use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use tunnel_proxy_core::{DialTunnel, ForwardError, ForwardTarget, TunnelStreams};

/// Forwards client connections through tunnels to a target's instances.
#[derive(Debug)]
pub struct Forwarder<D> {
    tunnels: Arc<D>,
}

impl<D> Clone for Forwarder<D> {
    fn clone(&self) -> Self {
        Self {
            tunnels: self.tunnels.clone(),
        }
    }
}

impl<D: DialTunnel> Forwarder<D> {
    pub fn new(tunnels: impl Into<Arc<D>>) -> Self {
        Self {
            tunnels: tunnels.into(),
        }
    }

    /// Relays `io` over a tunnel to one of the target's instances.
    ///
    /// Returns once the tunnel-to-client direction completes. The
    /// client-to-tunnel direction and the error-channel drain are left to
    /// finish in the background; their outcomes are logged, not surfaced.
    pub async fn forward<C>(&self, io: C, target: &ForwardTarget) -> Result<(), ForwardError>
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if target.instances.is_empty() {
            return Err(ForwardError::NoInstancesAvailable);
        }

        let TunnelStreams { data, errors } = self.dial_first(target).await?;

        tokio::spawn(async move {
            if let Some(message) = errors.await {
                warn!(%message, "tunnel reported an error");
            }
        });

        let (mut tunnel_rx, mut tunnel_tx) = tokio::io::split(data);
        let (mut client_rx, mut client_tx) = tokio::io::split(io);

        tokio::spawn(async move {
            match tokio::io::copy(&mut client_rx, &mut tunnel_tx).await {
                Ok(bytes) => {
                    debug!(bytes, "client-to-tunnel copy complete");
                    let _ = tunnel_tx.shutdown().await;
                }
                Err(error) => debug!(%error, "client-to-tunnel copy ended"),
            }
        });

        match tokio::io::copy(&mut tunnel_rx, &mut client_tx).await {
            Ok(bytes) => {
                debug!(bytes, "tunnel-to-client copy complete");
                Ok(())
            }
            Err(error) => Err(ForwardError::Relay(error)),
        }
    }

    /// Dials the target's instances in order, stopping at the first success.
    async fn dial_first(&self, target: &ForwardTarget) -> Result<TunnelStreams, ForwardError> {
        let mut last = None;
        for instance in &target.instances {
            match self
                .tunnels
                .dial(&target.namespace, instance, target.port)
                .await
            {
                Ok(streams) => {
                    debug!(%instance, port = target.port, "tunnel established");
                    return Ok(streams);
                }
                Err(error) => {
                    debug!(%instance, %error, "tunnel dial failed");
                    last = Some(error);
                }
            }
        }

        match last {
            Some(last) => Err(ForwardError::AllInstancesUnreachable {
                tried: target.instances.len(),
                last,
            }),
            None => Err(ForwardError::NoInstancesAvailable),
        }
    }
}
