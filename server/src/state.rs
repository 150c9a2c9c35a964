//! Shared application state, injected into every request's `Depot` via
//! `salvo::affix_state::inject` (see `http::router` and
//! `main::control_channel_router`) so handlers obtain it by type.

use std::sync::Arc;

use session_bridge_protocol::RequestIdGenerator;

use crate::channel::ChannelManager;
use crate::config::BridgeConfig;
use crate::pending::PendingTable;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BridgeConfig>,
    pub pending: Arc<PendingTable>,
    pub channel: Arc<ChannelManager>,
    pub ids: Arc<RequestIdGenerator>,
}

impl AppState {
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        let pending = Arc::new(PendingTable::new());
        Self {
            config: Arc::new(config),
            channel: Arc::new(ChannelManager::new(pending.clone())),
            pending,
            ids: Arc::new(RequestIdGenerator::new()),
        }
    }
}
