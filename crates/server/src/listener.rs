//! C6 — the CastV2 TLS listener. Binds, issues a certificate once, then
//! accepts connections and spawns a session handler per socket.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::cert;
use crate::orchestrator::Orchestrator;

/// Build the `rustls::ServerConfig` this bridge presents to connecting senders.
pub fn build_tls_acceptor() -> Result<TlsAcceptor> {
    let issued = cert::issue().context("issuing self-signed CastV2 certificate")?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![issued.cert_der], issued.key_der)
        .context("building rustls::ServerConfig for the CastV2 listener")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Run the CastV2 accept loop until `shutdown` resolves. Socket-level errors
/// accepting a single connection are logged and swallowed — they never bring
/// the listener down.
pub async fn run(
    bind: String,
    port: u16,
    acceptor: TlsAcceptor,
    orchestrator: Arc<Orchestrator>,
    max_frame_len: usize,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding CastV2 listener on {addr}"))?;
    tracing::info!(%addr, "CastV2 listener accepting connections");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(%err, "failed to accept CastV2 connection");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(socket).await {
                        Ok(stream) => stream,
                        Err(err) => {
                            tracing::warn!(%peer_addr, %err, "TLS handshake failed");
                            return;
                        }
                    };
                    tracing::info!(%peer_addr, "CastV2 session starting");
                    if let Err(err) = crate::session::run(tls_stream, orchestrator, max_frame_len).await {
                        tracing::warn!(%peer_addr, %err, "CastV2 session ended with error");
                    }
                });
            }
            _ = shutdown.changed() => {
                tracing::info!("CastV2 listener shutting down");
                return Ok(());
            }
        }
    }
}
