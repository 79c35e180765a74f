use crate::{server, watch};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, info_span};
use tunnel_proxy_forward::Forwarder;
use tunnel_proxy_k8s_api as k8s;
use tunnel_proxy_k8s_index::{ClusterInfo, Index};
use tunnel_proxy_k8s_tunnel::PodTunnels;

#[derive(Debug, Parser)]
#[clap(
    name = "tunnel-proxy",
    about = "A SOCKS5 proxy that tunnels to cluster workloads"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "tunnel_proxy=info,warn",
        env = "TUNNEL_PROXY_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Address the SOCKS5 listener binds.
    #[clap(long, default_value = "0.0.0.0:10086")]
    listen_addr: SocketAddr,

    /// The namespace unqualified destination names resolve in.
    #[clap(long, default_value = "default")]
    default_namespace: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            listen_addr,
            default_namespace,
        } = self;

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin)
            .with_client(client)
            .build()
            .await?;

        let (table, index) = Index::shared(ClusterInfo { default_namespace });

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        let services_ready = watch::spawn(index.clone(), services, info_span!("services"));

        let endpoints = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        let endpoints_ready = watch::spawn(index.clone(), endpoints, info_span!("endpoints"));

        // Route no connections until both watches complete their initial
        // listing; an empty table would send everything down the
        // pass-through path.
        let _ = tokio::join!(services_ready, endpoints_ready);
        info!("indexes synchronized");

        let listener = TcpListener::bind(listen_addr).await?;
        info!(addr = %listen_addr, "listening");

        let forwarder = Forwarder::new(PodTunnels::new(runtime.client()));
        tokio::spawn(server::serve(
            listener,
            table,
            forwarder,
            runtime.shutdown_handle(),
        ));

        // Block on the shutdown signal; the accept loop drains with it.
        if runtime.run().await.is_err() {
            bail!("aborted");
        }
        Ok(())
    }
}
