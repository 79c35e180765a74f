//! Tunnel dialing over the Kubernetes pod port-forward subresource.
//!
//! One dial performs one connection upgrade against the API server; the
//! upgraded connection multiplexes a data channel, tagged with the target
//! port, and an error channel the kubelet uses to report failures out of
//! band.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use tunnel_proxy_core::{DialTunnel, TunnelStreams};
use tunnel_proxy_k8s_api as k8s;

/// Dials backend pods through the API server's port-forward upgrade.
#[derive(Clone)]
pub struct PodTunnels {
    client: k8s::Client,
}

impl PodTunnels {
    pub fn new(client: k8s::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl DialTunnel for PodTunnels {
    async fn dial(&self, namespace: &str, instance: &str, port: u16) -> Result<TunnelStreams> {
        let api = k8s::Api::<k8s::Pod>::namespaced(self.client.clone(), namespace);
        let mut pf = api
            .portforward(instance, &[port])
            .await
            .with_context(|| format!("port-forward to {instance}.{namespace} failed"))?;

        // We never write to the error channel; the client library has already
        // closed our end, and the future resolves with whatever the remote
        // reports.
        let errors = pf
            .take_error(port)
            .ok_or_else(|| anyhow!("port-forward error channel missing for port {port}"))?;
        let data = pf
            .take_stream(port)
            .ok_or_else(|| anyhow!("port-forward data channel missing for port {port}"))?;

        Ok(TunnelStreams {
            data: Box::new(data),
            errors: Box::pin(errors),
        })
    }
}
