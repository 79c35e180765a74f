use crate::socks;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, info_span, warn, Instrument};
use tunnel_proxy_core::DialTunnel;
use tunnel_proxy_forward::Forwarder;
use tunnel_proxy_k8s_index::Reader;

/// Accepts client connections until shutdown is signaled.
///
/// Each connection runs on its own task; a failing connection never blocks
/// the accept loop or any other connection.
pub(crate) async fn serve<D: DialTunnel>(
    listener: TcpListener,
    table: Reader,
    forwarder: Forwarder<D>,
    drain: drain::Watch,
) {
    let shutdown = drain.signaled();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = listener.accept() => match res {
                Ok((conn, peer)) => {
                    let table = table.clone();
                    let forwarder = forwarder.clone();
                    tokio::spawn(
                        handle(conn, table, forwarder)
                            .instrument(info_span!("connection", %peer)),
                    );
                }
                Err(error) => warn!(%error, "failed to accept connection"),
            },

            _ = &mut shutdown => {
                debug!("shutdown signaled");
                return;
            }
        }
    }
}

/// Runs one client connection to completion. Every failure ends here, logged,
/// with the connection closed on drop.
async fn handle<D: DialTunnel>(mut conn: TcpStream, table: Reader, forwarder: Forwarder<D>) {
    let dest = match socks::decode(&mut conn).await {
        Ok((host, port)) => format!("{host}:{port}"),
        Err(error) => {
            info!(%error, "handshake failed");
            return;
        }
    };

    match table.lookup(&dest) {
        Some(target) => {
            debug!(
                %dest,
                instances = target.instances.len(),
                port = target.port,
                "forwarding through tunnel"
            );
            match forwarder.forward(conn, &target).await {
                Ok(()) => debug!(%dest, "tunnel forward complete"),
                Err(error) => info!(%dest, %error, "tunnel forward failed"),
            }
        }

        // No tunnel target matched: relay to the literal destination.
        None => relay(conn, &dest).await,
    }
}

async fn relay(mut conn: TcpStream, dest: &str) {
    let start = Instant::now();
    let mut upstream = match TcpStream::connect(dest).await {
        Ok(upstream) => upstream,
        Err(error) => {
            info!(%dest, %error, "pass-through connect failed");
            return;
        }
    };

    match tokio::io::copy_bidirectional(&mut conn, &mut upstream).await {
        Ok((sent, received)) => {
            debug!(%dest, sent, received, took = ?start.elapsed(), "pass-through complete")
        }
        Err(error) => debug!(%dest, %error, took = ?start.elapsed(), "pass-through ended"),
    }
}
