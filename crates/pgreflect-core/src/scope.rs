//! Tenant scope: the values interception rules compare against.

use crate::config::ScopeSource;

/// The identity of a handshaked session, fixed for its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantScope {
    /// Tenant id the client sent as its `database`.
    pub tenant_id: String,
    /// Schemas the tenant may see, in order.
    pub visible_schemas: Vec<String>,
    /// Database user provisioned for the tenant.
    pub backend_user: String,
    /// Physical database the session is connected to.
    pub backend_database: String,
}

impl TenantScope {
    /// The non-empty values `source` resolves to. An empty result means a
    /// rule reading this source cannot be applied.
    pub fn values(&self, source: ScopeSource) -> Vec<&str> {
        let values: Vec<&str> = match source {
            ScopeSource::VisibleSchemas => self.visible_schemas.iter().map(String::as_str).collect(),
            ScopeSource::TenantId => vec![self.tenant_id.as_str()],
            ScopeSource::BackendUser => vec![self.backend_user.as_str()],
            ScopeSource::BackendDatabase => vec![self.backend_database.as_str()],
        };
        values.into_iter().filter(|v| !v.is_empty()).collect()
    }
}
