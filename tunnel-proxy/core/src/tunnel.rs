use anyhow::Result;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

/// A byte stream carried over an established tunnel.
pub trait TunnelIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TunnelIo for T {}

/// The channels multiplexed on a single tunnel connection.
pub struct TunnelStreams {
    /// The payload channel, tagged with the target port.
    pub data: Box<dyn TunnelIo>,

    /// Resolves with the remote side's out-of-band failure report, if it
    /// sends one. Nothing is ever written to this channel from our side.
    pub errors: BoxFuture<'static, Option<String>>,
}

/// Opens tunnels to individual backend instances.
///
/// Implemented against the cluster's streaming-tunnel capability and faked in
/// tests.
#[async_trait::async_trait]
pub trait DialTunnel: Send + Sync + 'static {
    async fn dial(&self, namespace: &str, instance: &str, port: u16) -> Result<TunnelStreams>;
}

/// Ways a forwarding attempt can fail.
///
/// All of these are local to one client connection; callers log them and
/// close the connection.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// The target resolved to an empty instance list.
    #[error("no instances available")]
    NoInstancesAvailable,

    /// Every candidate instance failed to dial.
    #[error("all {tried} instances unreachable")]
    AllInstancesUnreachable {
        tried: usize,
        #[source]
        last: anyhow::Error,
    },

    /// The tunnel-to-client relay direction failed mid-stream.
    #[error("relay failed")]
    Relay(#[source] std::io::Error),
}
