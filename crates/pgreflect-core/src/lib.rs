//! # pgreflect-core
//!
//! Shared types for the pgreflect reflection proxy: the YAML configuration,
//! the interception rule table, the per-session [`TenantScope`] and the
//! [`CredentialStore`] interface through which tenants are resolved.

pub mod config;
pub mod credentials;
pub mod scope;

pub use config::{
    BackendDescriptor, BackendOverride, ConfigError, InterceptionConfig, InterceptionRule,
    ListenConfig, MatchKind, RateLimitConfig, ReflectionConfig, ScopeSource, TenantEntry,
    TlsMode, TlsPolicy,
};
pub use credentials::{CredentialStore, CredentialStoreError, StaticCredentialStore, TenantCredentials};
pub use scope::TenantScope;
