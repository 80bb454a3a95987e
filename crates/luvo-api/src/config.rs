//! Server configuration from the environment

use anyhow::Context;
use luvo_core::SessionConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// Default HTTP listen address
pub const DEFAULT_LISTEN: &str = "0.0.0.0:3000";

/// Default BLE scan duration in seconds
pub const DEFAULT_SCAN_SECS: u64 = 5;

/// Pause between reconnect attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// BLE address or name fragment of the lamp; any lamp if unset
    pub address: Option<String>,
    pub scan_duration: Duration,
    pub listen: SocketAddr,
    pub reconnect_delay: Duration,
    pub session: SessionConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let address = std::env::var("LUVO_ADDRESS")
            .ok()
            .filter(|a| !a.trim().is_empty());

        let scan_secs = match std::env::var("LUVO_SCAN_SECS") {
            Ok(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid LUVO_SCAN_SECS={v:?}"))?,
            Err(_) => DEFAULT_SCAN_SECS,
        };

        let listen = std::env::var("LUVO_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN.to_string());
        let listen = listen
            .parse()
            .with_context(|| format!("invalid LUVO_LISTEN={listen:?}"))?;

        Ok(Self {
            address,
            scan_duration: Duration::from_secs(scan_secs),
            listen,
            reconnect_delay: RECONNECT_DELAY,
            session: SessionConfig::from_env(),
        })
    }
}
