//! # pgreflect-proxy
//!
//! Postgres wire protocol reflection proxy.
//!
//! Clients connect with a tenant id as their database name. The proxy
//! resolves the tenant through a [`pgreflect_core::CredentialStore`],
//! connects to the tenant's backend (upgrading to TLS when the backend
//! allows it), and relays traffic in both directions while:
//! - answering client SSL/GSS requests with `'N'`
//! - scoping catalog queries via `pgreflect-rls`
//! - hiding SASL channel binding, which cannot cross the proxy
//! - rate limiting simple queries per session
//!
//! ## Architecture
//!
//! ```text
//! psql / BI tool
//!       │
//!       │ Postgres wire protocol, database = tenant id
//!       ▼
//! ┌──────────────────────┐
//! │  pgreflect proxy     │
//! │  1. Resolve tenant   │  ← CredentialStore
//! │  2. Connect backend  │  ← rustls
//! │  3. Rate limit       │
//! │  4. Scope catalogs   │  ← pgreflect-rls
//! │  5. Relay            │
//! └──────────┬───────────┘
//!            │
//!            ▼
//!      Backend Postgres
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use pgreflect_core::ReflectionConfig;
//! use pgreflect_proxy::ReflectionProxy;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ReflectionConfig::from_file("pgreflect.yaml")?;
//!     let proxy = ReflectionProxy::from_config(&config);
//!     let listener = proxy.bind().await?;
//!     println!("listening on {}", listener.port());
//!     proxy.serve(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod codec;
pub mod error;
pub mod handler;
pub mod proxy;
pub mod session;

pub use backend::{BackendConnector, BackendStream, ResolvedTenant};
pub use codec::{BackendCodec, BackendMessage, ErrorResponse, FrontendCodec, FrontendMessage, StartupMessage};
pub use error::ProxyError;
pub use handler::ConnectionHandler;
pub use proxy::{ProxyListener, ReflectionProxy};
pub use session::{QueryWindow, Session, SessionRegistry, SessionState, SessionSummary};
