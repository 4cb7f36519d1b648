//! Signaling relay server
//!
//! Run with: cargo run [BIND_ADDR]
//!
//! Configuration comes from the environment (`HOST`, `PORT`, `PUBLIC_URL`,
//! `MAX_CONNECTIONS`, `HANDSHAKE_TIMEOUT_MS`, `OFFER_DELAY_MS`,
//! `ANSWER_DELAY_MS`). A bind address on the command line overrides
//! `HOST`/`PORT`.
//!
//! Examples:
//!   cargo run                                  # binds to 0.0.0.0:8081
//!   PORT=9000 cargo run                        # binds to 0.0.0.0:9000
//!   cargo run 127.0.0.1:8090                   # binds to 127.0.0.1:8090
//!   OFFER_DELAY_MS=0 ANSWER_DELAY_MS=0 cargo run   # no pacing

use std::net::SocketAddr;

use rtc_relay::{RelayServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rtc_relay=info")),
        )
        .init();

    let mut config = ServerConfig::from_env()?;
    if let Some(arg) = std::env::args().nth(1) {
        let addr: SocketAddr = arg.parse()?;
        config = config.bind(addr);
    }

    let server = RelayServer::new(config);
    let summary = server.run_until(shutdown_signal()).await?;

    tracing::info!(
        connections = summary.connections,
        pending = summary.timers,
        "Relay stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
