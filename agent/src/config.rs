use std::time::Duration;

/// Runtime configuration for the browser plane.
///
/// Mirrors [`session_bridge_server::config::BridgeConfig`]'s shape: hardcoded
/// defaults, optionally overridden by environment variables, so the agent
/// also starts with zero required configuration (spec §6).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Control-channel WebSocket URL to connect to.
    pub control_channel_url: String,
    /// Fixed upstream host every request is executed against (§1, §6).
    pub upstream_host: String,
    /// Maximum fetch attempts per request (§4.7: 15).
    pub max_attempts: u32,
    /// Fixed inter-attempt delay (§4.7: 1s).
    pub retry_delay: Duration,
    /// Fixed reconnect delay after the control channel drops (§4.9: 5s).
    pub reconnect_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            control_channel_url: "ws://127.0.0.1:9998".to_string(),
            upstream_host: "generativelanguage.googleapis.com".to_string(),
            max_attempts: 15,
            retry_delay: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("SESSION_BRIDGE_WS_URL") {
            config.control_channel_url = url;
        }
        if let Ok(host) = std::env::var("SESSION_BRIDGE_UPSTREAM_HOST") {
            config.upstream_host = host;
        }
        config
    }
}
