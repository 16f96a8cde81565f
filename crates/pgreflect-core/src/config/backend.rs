//! Backend database descriptor.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the real database for a tenant lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Hostname of the backend Postgres server.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the backend Postgres server.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Physical database name. Tenants connect with their tenant id as the
    /// database name; the proxy replaces it with this value.
    #[serde(default = "default_database")]
    pub database: String,

    /// TLS policy towards the backend.
    #[serde(default)]
    pub tls: TlsPolicy,
}

impl Default for BackendDescriptor {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            tls: TlsPolicy::default(),
        }
    }
}

impl BackendDescriptor {
    /// `host:port` for socket connection.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Apply the non-empty fields of `overrides` on top of this descriptor.
    pub fn merged(&self, overrides: &BackendOverride) -> Self {
        Self {
            host: overrides.host.clone().unwrap_or_else(|| self.host.clone()),
            port: overrides.port.unwrap_or(self.port),
            database: overrides
                .database
                .clone()
                .unwrap_or_else(|| self.database.clone()),
            tls: overrides.tls.clone().unwrap_or_else(|| self.tls.clone()),
        }
    }
}

/// Per-tenant partial backend descriptor; unset fields fall back to the
/// default backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOverride {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub tls: Option<TlsPolicy>,
}

/// How the proxy negotiates TLS with the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Never send an SSLRequest.
    Disable,
    /// Send an SSLRequest; continue in plaintext if the backend declines.
    #[default]
    Prefer,
    /// Send an SSLRequest; a declining backend is treated as unreachable.
    Require,
}

/// TLS policy for the backend leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsPolicy {
    #[serde(default)]
    pub mode: TlsMode,

    /// Validate the backend certificate chain and host name.
    #[serde(default = "default_true")]
    pub verify_certificate: bool,

    /// Extra PEM bundle trusted in addition to the platform roots.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            mode: TlsMode::default(),
            verify_certificate: true,
            ca_file: None,
        }
    }
}

impl TlsPolicy {
    /// Whether an SSLRequest is sent to the backend at all.
    pub fn requests_tls(&self) -> bool {
        self.mode != TlsMode::Disable
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_true() -> bool {
    true
}
