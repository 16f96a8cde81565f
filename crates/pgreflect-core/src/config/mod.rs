//! Configuration types for the pgreflect proxy.
//!
//! The whole configuration lives in one YAML file (`pgreflect.yaml`) and is
//! read once at startup.
//!
//! ```yaml
//! listen:
//!   address: 0.0.0.0
//!   base_port: 5433
//!   port_range: 100
//! rate_limit:
//!   window_ms: 60000
//!   max_queries: 60
//! backend:
//!   host: localhost
//!   port: 5432
//!   database: postgres
//!   tls:
//!     mode: prefer
//! tenants:
//!   ws_7:
//!     username: nc_acme_readonly_x1
//!     schemas: [public, tenant_7]
//! ```

pub mod backend;
pub mod interception;
pub mod proxy;
pub mod tenancy;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use backend::{BackendDescriptor, BackendOverride, TlsMode, TlsPolicy};
pub use interception::{InterceptionConfig, InterceptionRule, MatchKind, ScopeSource};
pub use proxy::{ListenConfig, RateLimitConfig};
pub use tenancy::{TenantEntry, TenantMap};

/// Complete proxy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Listener settings.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Per-session query rate limit.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Default backend; tenants may override individual fields.
    #[serde(default)]
    pub backend: BackendDescriptor,

    /// Catalog interception rules.
    #[serde(default)]
    pub interception: InterceptionConfig,

    /// Provisioned tenants.
    #[serde(default)]
    pub tenants: TenantMap,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ReflectionConfig {
    /// Load configuration from a YAML file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content and validate it.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.window_ms == 0 {
            return Err(ConfigError::Config(
                "rate_limit.window_ms must be greater than zero".to_string(),
            ));
        }
        if self.rate_limit.max_queries == 0 {
            return Err(ConfigError::Config(
                "rate_limit.max_queries must be greater than zero".to_string(),
            ));
        }
        if self.backend.host.is_empty() || self.backend.database.is_empty() {
            return Err(ConfigError::Config(
                "backend.host and backend.database must not be empty".to_string(),
            ));
        }

        for (index, rule) in self.interception.rules.iter().enumerate() {
            if rule.table_name.is_empty() || rule.column_name.is_empty() {
                return Err(ConfigError::Config(format!(
                    "interception rule #{index} needs both table_name and column_name"
                )));
            }
        }

        for (tenant_id, entry) in &self.tenants {
            if tenant_id.is_empty() {
                return Err(ConfigError::Config("tenant id must not be empty".to_string()));
            }
            if entry.username.is_empty() {
                return Err(ConfigError::Config(format!(
                    "tenant {tenant_id} has an empty username"
                )));
            }
        }

        Ok(())
    }

    /// Resolve the backend descriptor for a tenant entry.
    pub fn backend_for(&self, entry: &TenantEntry) -> BackendDescriptor {
        match &entry.backend {
            Some(overrides) => self.backend.merged(overrides),
            None => self.backend.clone(),
        }
    }
}
