//! Interception rules: which catalog tables get a scoping predicate.
//!
//! Each rule names a table, a column of that table, and the session value the
//! column is compared against. A query selecting from a matching table gets
//! `alias.column IN (...)` (or `= ...`) appended to its `WHERE` clause.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the column is compared against the scope values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// `column = value`
    Equals,
    /// `column IN (values...)`
    InSet,
}

/// Which session field supplies the comparison value(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeSource {
    VisibleSchemas,
    TenantId,
    BackendUser,
    BackendDatabase,
}

impl fmt::Display for ScopeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScopeSource::VisibleSchemas => "visible_schemas",
            ScopeSource::TenantId => "tenant_id",
            ScopeSource::BackendUser => "backend_user",
            ScopeSource::BackendDatabase => "backend_database",
        };
        f.write_str(name)
    }
}

/// A single interception rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptionRule {
    /// Unqualified table (or view) name, e.g. `pg_namespace`.
    pub table_name: String,
    /// Column restricted on that table.
    pub column_name: String,
    #[serde(default = "default_match_kind")]
    pub match_kind: MatchKind,
    #[serde(default = "default_scope_source")]
    pub scope_source: ScopeSource,
}

impl InterceptionRule {
    pub fn new(
        table_name: impl Into<String>,
        column_name: impl Into<String>,
        match_kind: MatchKind,
        scope_source: ScopeSource,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            column_name: column_name.into(),
            match_kind,
            scope_source,
        }
    }

    /// Whether this rule applies to a table whose unqualified identifier is
    /// `table`. Unquoted identifiers compare case-insensitively; quoted ones
    /// must match exactly.
    pub fn matches_table(&self, table: &str, quoted: bool) -> bool {
        if quoted {
            table == self.table_name
        } else {
            table.eq_ignore_ascii_case(&self.table_name)
        }
    }
}

/// Interception rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptionConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<InterceptionRule>,
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

/// Rules applied when the configuration does not list any.
///
/// Schema listings are restricted to the tenant's visible schemas, and role
/// and database listings to the tenant's own identity.
pub fn default_rules() -> Vec<InterceptionRule> {
    vec![
        InterceptionRule::new("pg_namespace", "nspname", MatchKind::InSet, ScopeSource::VisibleSchemas),
        InterceptionRule::new("schemata", "schema_name", MatchKind::InSet, ScopeSource::VisibleSchemas),
        InterceptionRule::new("pg_tables", "schemaname", MatchKind::InSet, ScopeSource::VisibleSchemas),
        InterceptionRule::new("pg_roles", "rolname", MatchKind::Equals, ScopeSource::BackendUser),
        InterceptionRule::new("pg_database", "datname", MatchKind::Equals, ScopeSource::BackendDatabase),
    ]
}

fn default_match_kind() -> MatchKind {
    MatchKind::InSet
}

fn default_scope_source() -> ScopeSource {
    ScopeSource::VisibleSchemas
}
