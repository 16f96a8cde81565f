//! Credential store: resolves a tenant id to its provisioned database user.
//!
//! The proxy only reads credentials. Creating users and granting schemas is
//! the job of whatever provisions tenants, which then exposes the result
//! through a [`CredentialStore`] implementation.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::config::{BackendDescriptor, ReflectionConfig};

/// Credentials of a provisioned tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantCredentials {
    pub tenant_id: String,
    pub username: String,
    pub password: Option<String>,
    pub backend: BackendDescriptor,
}

/// Error returned by a credential store backend.
#[derive(Debug, thiserror::Error)]
#[error("credential store error: {0}")]
pub struct CredentialStoreError(pub String);

/// Source of tenant credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Credentials for `tenant_id`, or `None` if the tenant is not
    /// provisioned.
    async fn lookup(&self, tenant_id: &str) -> Result<Option<TenantCredentials>, CredentialStoreError>;

    /// Schemas `tenant_id` may see. Unknown tenants see nothing.
    async fn visible_schemas(&self, tenant_id: &str) -> Result<Vec<String>, CredentialStoreError>;
}

#[derive(Debug, Clone)]
struct StaticTenant {
    credentials: TenantCredentials,
    schemas: Vec<String>,
}

/// In-memory store built from the `tenants` section of the configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    tenants: BTreeMap<String, StaticTenant>,
}

impl StaticCredentialStore {
    /// Build the store, resolving each tenant's backend against the default.
    pub fn from_config(config: &ReflectionConfig) -> Self {
        let tenants = config
            .tenants
            .iter()
            .map(|(tenant_id, entry)| {
                let tenant = StaticTenant {
                    credentials: TenantCredentials {
                        tenant_id: tenant_id.clone(),
                        username: entry.username.clone(),
                        password: entry.password.clone(),
                        backend: config.backend_for(entry),
                    },
                    schemas: entry.schemas.clone(),
                };
                (tenant_id.clone(), tenant)
            })
            .collect::<BTreeMap<_, _>>();

        tracing::debug!(tenants = tenants.len(), "Loaded static credential store");
        Self { tenants }
    }

    /// Add or replace one tenant.
    pub fn insert(&mut self, credentials: TenantCredentials, schemas: Vec<String>) {
        self.tenants.insert(
            credentials.tenant_id.clone(),
            StaticTenant {
                credentials,
                schemas,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn lookup(&self, tenant_id: &str) -> Result<Option<TenantCredentials>, CredentialStoreError> {
        Ok(self.tenants.get(tenant_id).map(|t| t.credentials.clone()))
    }

    async fn visible_schemas(&self, tenant_id: &str) -> Result<Vec<String>, CredentialStoreError> {
        Ok(self
            .tenants
            .get(tenant_id)
            .map(|t| t.schemas.clone())
            .unwrap_or_default())
    }
}
