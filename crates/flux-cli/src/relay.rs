//! A minimal relay: channel membership and fan-out over WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;

use flux_common::transport::{ChannelRouter, Connection, spawn_socket_tasks};
use miette::{IntoDiagnostic, Result};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

pub async fn serve(bind: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(bind).await.into_diagnostic()?;
    println!("Relay listening on ws://{bind}");
    let router = Arc::new(Mutex::new(ChannelRouter::new()));

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_client(router.clone(), stream, peer));
                }
                Err(err) => warn!(error = %err, "accept failed"),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.into_diagnostic()?;
                break;
            }
        }
    }

    router.lock().detach_all();
    println!("Relay stopped");
    Ok(())
}

async fn serve_client(router: Arc<Mutex<ChannelRouter>>, stream: TcpStream, peer: SocketAddr) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(err) => {
            warn!(%peer, error = %err, "websocket handshake failed");
            return;
        }
    };
    let Connection {
        outbound,
        mut inbound,
    } = spawn_socket_tasks(socket);
    let id = router.lock().attach(outbound);
    info!(%peer, client = id, "client connected");

    while let Some(frame) = inbound.recv().await {
        router.lock().route(id, frame);
    }

    router.lock().detach(id);
    info!(%peer, client = id, "client disconnected");
}
