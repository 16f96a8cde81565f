//! Tenant (workspace) provisioning entries.
//!
//! Each tenant is reachable under its id as the Postgres `database` name and
//! maps to a generated read-only database user plus the schemas that user
//! was granted. The grants themselves are managed outside the proxy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::backend::BackendOverride;

/// Provisioned credentials of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantEntry {
    /// Read-only database user generated for the tenant.
    pub username: String,

    /// Password of that user. Clients authenticate against the backend
    /// directly, so the proxy never uses it itself.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Schemas the tenant may see, in order.
    #[serde(default)]
    pub schemas: Vec<String>,

    /// Backend overrides for this tenant.
    #[serde(default)]
    pub backend: Option<BackendOverride>,
}

/// All provisioned tenants keyed by tenant id.
pub type TenantMap = BTreeMap<String, TenantEntry>;
