//! # pgreflect-rls
//!
//! Scope predicate injection for catalog queries.
//!
//! Clients connected through the proxy see the server's catalogs through
//! a restricted user. This crate narrows what catalog listings return by
//! appending a predicate for every intercepted table a query reads:
//!
//! **Before (from client):**
//! ```sql
//! SELECT * FROM pg_tables
//! ```
//!
//! **After (to Postgres):**
//! ```sql
//! SELECT * FROM pg_tables WHERE pg_tables.schemaname IN ('public', 'tenant_7')
//! ```
//!
//! Anything that does not parse, or reads no intercepted table, is left
//! for the server to handle as written. Grants on the backend user remain
//! the real access boundary.

pub mod error;
pub mod injector;
pub mod parser;

pub use error::RlsError;
pub use injector::{InjectionResult, ScopeInjector};
pub use parser::{SqlAnalyzer, TableReference};
