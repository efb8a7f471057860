mod cert;
mod config;
mod display;
mod listener;
mod orchestrator;
mod session;
mod signaling;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::display::DisplayTransport;
use crate::orchestrator::Orchestrator;
use crate::signaling::SignalingRelay;

fn parse_args() -> (PathBuf, Option<u16>) {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("./config/castbridge.toml");
    let mut port_override = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port_override = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    (config_path, port_override)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (config_path, port_override) = parse_args();

    // Load configuration
    let mut config = config::load_config(&config_path)?;
    if let Some(p) = port_override {
        config.castv2.port = p;
    }

    // Validate configuration semantics
    if let Err(issues) = config.validate() {
        let has_errors = issues.iter().any(|i| i.starts_with("ERROR:"));
        for issue in &issues {
            if issue.starts_with("ERROR:") {
                tracing::error!("{}", issue);
            } else {
                tracing::warn!("{}", issue);
            }
        }
        if has_errors {
            tracing::error!(
                "Configuration has {} issue(s). Fix the ERROR(s) above and restart.",
                issues.len()
            );
            std::process::exit(1);
        }
    }

    let tls_acceptor = listener::build_tls_acceptor()?;

    let (display_transport, display_events, sender_events) = DisplayTransport::new(
        config.display.max_payload_bytes,
        Duration::from_secs(config.display.ping_interval_secs),
    );
    let signaling_relay = SignalingRelay::new(
        display_transport.clone(),
        Duration::from_secs(config.signaling.session_ttl_secs),
    );
    let orchestrator = Orchestrator::spawn(
        display_transport.clone(),
        signaling_relay.clone(),
        display_events,
        sender_events,
    );
    signaling::spawn_reaper(signaling_relay, Duration::from_secs(config.signaling.reap_interval_secs));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tracing::info!("===========================================");
    tracing::info!("  CastV2 Protocol Bridge");
    tracing::info!("  CastV2 listener on {}:{}", config.castv2.bind, config.castv2.port);
    tracing::info!("  Display transport on {}:{}", config.display.bind, config.display.port);
    tracing::info!("===========================================");

    let castv2_task = tokio::spawn(listener::run(
        config.castv2.bind.clone(),
        config.castv2.port,
        tls_acceptor,
        orchestrator,
        config.castv2.max_frame_len,
        shutdown_rx.clone(),
    ));
    let display_task = tokio::spawn(display::run(
        config.display.bind.clone(),
        config.display.port,
        display_transport,
        shutdown_rx,
    ));

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(castv2_task, display_task);

    tracing::info!("CastV2 protocol bridge shut down cleanly");
    Ok(())
}
