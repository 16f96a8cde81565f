//! Listener and rate-limit configuration types.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Configuration for the Postgres wire protocol listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub address: String,

    /// First port of the range the proxy tries to bind.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Number of ports tried, starting at `base_port`.
    #[serde(default = "default_port_range")]
    pub port_range: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_addr(),
            base_port: default_base_port(),
            port_range: default_port_range(),
        }
    }
}

impl ListenConfig {
    /// The candidate ports, in the order they are tried.
    ///
    /// A zero `port_range` still yields `base_port`, and the range is clamped
    /// at `u16::MAX`.
    pub fn ports(&self) -> RangeInclusive<u16> {
        let span = self.port_range.max(1) - 1;
        self.base_port..=self.base_port.saturating_add(span)
    }
}

/// Sliding-window query rate limit, applied per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window size in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Maximum number of simple queries allowed inside one window.
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_queries: default_max_queries(),
        }
    }
}

impl RateLimitConfig {
    /// The window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_base_port() -> u16 {
    5433
}

fn default_port_range() -> u16 {
    100
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_queries() -> usize {
    60
}
