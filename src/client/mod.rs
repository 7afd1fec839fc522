//! Client-side half of the coordination engine: resilient transports and
//! the local session mirror.

pub mod backoff;
pub mod direct;
pub mod model;
pub mod relay;
pub mod transport;

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::client::backoff::ReconnectPolicy;
use crate::client::direct::DirectTransport;
use crate::client::relay::RelayTransport;
use crate::client::transport::{Transport, TransportEvent};

/// Which physical channel to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Relay when a relay socket is configured and present, direct otherwise.
    #[default]
    Auto,
    Direct,
    Relay,
}

/// Everything needed to construct a transport for the current environment.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub mode: TransportMode,
    /// WebSocket URL of the coordination endpoint.
    pub url: String,
    /// Unix socket of the local privileged relay, when one is deployed.
    pub relay_socket: Option<PathBuf>,
    /// Auth credential forwarded as the `session_id` cookie.
    pub session_cookie: String,
    pub policy: ReconnectPolicy,
}

/// Picks the transport for the environment. In `Auto` mode the relay is
/// preferred whenever its socket is configured and actually exists, since a
/// deployed relay means this process is not allowed to open the network
/// connection itself.
pub fn for_environment(
    config: TransportConfig,
    event_tx: mpsc::Sender<TransportEvent>,
) -> Box<dyn Transport> {
    let use_relay = match config.mode {
        TransportMode::Direct => false,
        TransportMode::Relay => true,
        TransportMode::Auto => config
            .relay_socket
            .as_ref()
            .is_some_and(|path| path.exists()),
    };

    if use_relay {
        let path = config
            .relay_socket
            .unwrap_or_else(|| PathBuf::from("/run/timedash/relay.sock"));
        tracing::info!("🔌 Using relayed transport via {}", path.display());
        Box::new(RelayTransport::new(path, config.policy, event_tx))
    } else {
        tracing::info!("🔌 Using direct WebSocket transport to {}", config.url);
        Box::new(DirectTransport::new(
            config.url,
            config.session_cookie,
            config.policy,
            event_tx,
        ))
    }
}
