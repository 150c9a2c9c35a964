//! Server plane entry point: starts the HTTP front-end and the
//! control-channel listener side by side, and exits cleanly on SIGINT/SIGTERM
//! (§6, "responds to SIGINT/SIGTERM with an immediate orderly exit").

mod channel;
mod config;
mod dispatcher;
mod error;
mod http;
mod pending;
mod rewrite;
mod sanitize;
mod state;

use salvo::prelude::*;
use salvo::server::ServerHandle;
use salvo::websocket::WebSocketUpgrade;
use tokio::signal;

use crate::config::BridgeConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = BridgeConfig::from_env();
    let state = AppState::new(config.clone());

    let http_acceptor = TcpListener::new(&config.http_addr).bind().await;
    let http_server = Server::new(http_acceptor);
    let http_handle = http_server.handle();

    let ws_acceptor = TcpListener::new(&config.ws_addr).bind().await;
    let ws_server = Server::new(ws_acceptor);
    let ws_handle = ws_server.handle();

    tokio::spawn(listen_shutdown_signal(http_handle, ws_handle));

    tracing::info!(http_addr = %config.http_addr, ws_addr = %config.ws_addr, "session-bridge server starting");

    tokio::join!(
        http_server.serve(http::router(state.clone())),
        ws_server.serve(control_channel_router(state)),
    );
}

/// The control channel's own tiny router (spec §4.5, §6): a single path
/// that upgrades to a WebSocket and hands the socket to the
/// [`channel::ChannelManager`].
fn control_channel_router(state: AppState) -> Router {
    Router::new().goal(accept_control_channel).hoop(salvo::affix_state::inject(state))
}

#[handler]
async fn accept_control_channel(depot: &mut Depot, req: &mut Request, res: &mut Response) -> Result<(), StatusError> {
    let state = depot.obtain::<AppState>().expect("AppState is always injected").clone();
    let max_payload = state.config.max_frame_payload;
    WebSocketUpgrade::new()
        .max_message_size(max_payload)
        .max_frame_size(max_payload)
        .upgrade(req, res, move |ws| async move {
            state.channel.clone().accept(ws).await;
        })
        .await
}

async fn listen_shutdown_signal(http_handle: ServerHandle, ws_handle: ServerHandle) {
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
        () = ctrl_c => tracing::info!("ctrl-c received, shutting down"),
        () = terminate => tracing::info!("sigterm received, shutting down"),
    }

    http_handle.stop_graceful(None);
    ws_handle.stop_graceful(None);
}
