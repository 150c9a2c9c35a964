//! Browser plane entry point: holds the single control-channel connection
//! and executes outgoing HTTPS calls on its behalf, exiting cleanly on
//! SIGINT/SIGTERM (§6).

mod channel;
mod config;
mod error;
mod fetcher;
mod streamer;

use tokio::signal;

use crate::channel::AgentChannel;
use crate::config::AgentConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = AgentConfig::from_env();
    let http_client = reqwest::Client::builder().build().expect("reqwest client configuration is always valid");
    let channel = AgentChannel::new();

    tracing::info!(
        url = %config.control_channel_url,
        upstream = %config.upstream_host,
        "session-bridge agent starting"
    );

    tokio::select! {
        () = channel.run(config, http_client) => {}
        () = shutdown_signal() => tracing::info!("shutdown signal received, exiting"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
