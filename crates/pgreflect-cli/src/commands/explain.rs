//! `pgreflect explain` - show how a query would be scoped for a tenant.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use pgreflect_core::{ReflectionConfig, StaticCredentialStore, TenantScope};
use pgreflect_proxy::BackendConnector;
use pgreflect_rls::{InjectionResult, ScopeInjector};

pub async fn run(config_path: &Path, tenant: &str, sql: &str, json: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let (scope, result) = explain(&config, tenant, sql).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render(&scope, &result));
    }
    Ok(())
}

/// Resolve `tenant` the way the proxy does and scope `sql` for it.
pub async fn explain(config: &ReflectionConfig, tenant: &str, sql: &str) -> Result<(TenantScope, InjectionResult)> {
    let store = StaticCredentialStore::from_config(config);
    let connector = BackendConnector::new(Arc::new(store), config.backend.clone());
    let resolved = connector.resolve(tenant).await?;

    let injector = ScopeInjector::new(config.interception.rules.clone());
    let result = injector.inject(sql, &resolved.scope)?;
    Ok((resolved.scope, result))
}

fn render(scope: &TenantScope, result: &InjectionResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "tenant:     {}", scope.tenant_id);
    let _ = writeln!(out, "schemas:    {}", scope.visible_schemas.join(", "));
    let _ = writeln!(out, "user:       {}", scope.backend_user);
    let _ = writeln!(out, "database:   {}", scope.backend_database);
    let _ = writeln!(out, "original:   {}", result.original_sql);

    match &result.rewritten_sql {
        Some(rewritten) => {
            let _ = writeln!(out, "rewritten:  {rewritten}");
            let _ = writeln!(out, "predicates:");
            for (table, predicate) in result.tables_scoped.iter().zip(&result.predicates_added) {
                let _ = writeln!(out, "  {table}: {predicate}");
            }
        }
        None => {
            let _ = writeln!(out, "rewritten:  (unchanged)");
        }
    }
    out
}
