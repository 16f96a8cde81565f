//! Per-connection driver: startup handshake, then the duplex relay.
//!
//! ```text
//! Unauthenticated ── SSL/GSS request ──► reply 'N', stay
//!        │
//!        ├── CancelRequest ──► forward to default backend, close
//!        ├── Startup without database ──► FATAL 3D000, close
//!        │
//!        ▼ Startup(database = tenant id)
//! AwaitingBackend ── unknown tenant / backend down ──► Terminate, close
//!        │
//!        ▼ startup forwarded
//!    Streaming ── Q frames rate-limited and rewritten, SASL filtered
//!        │
//!        ▼ EOF, error or rate limit on either leg
//!     Closed
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use pgreflect_core::{RateLimitConfig, TenantScope};
use pgreflect_rls::ScopeInjector;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::backend::{BackendConnector, BackendFramed};
use crate::codec::{
    BackendMessage, ENCRYPTION_REFUSED, ErrorResponse, FrontendCodec, FrontendMessage, StartupMessage,
};
use crate::error::ProxyError;
use crate::session::{Session, SessionRegistry};

/// Client leg.
pub type ClientFramed = Framed<TcpStream, FrontendCodec>;

/// SASL mechanism that binds to the client's TLS channel, which the proxy
/// terminates.
pub const CHANNEL_BINDING_MECHANISM: &str = "SCRAM-SHA-256-PLUS";

/// SQLSTATE `invalid_catalog_name`.
const SQLSTATE_INVALID_CATALOG_NAME: &str = "3D000";

/// SQLSTATE `too_many_connections`, reused for query rate limiting.
const SQLSTATE_RATE_LIMITED: &str = "53400";

fn lock<'a, 'b>(session: &'a Mutex<&'b mut Session>) -> MutexGuard<'a, &'b mut Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a connection task needs, shared across tasks.
#[derive(Clone)]
pub struct ConnectionHandler {
    connector: Arc<BackendConnector>,
    injector: Arc<ScopeInjector>,
    registry: Arc<SessionRegistry>,
    rate_limit: RateLimitConfig,
}

impl ConnectionHandler {
    pub fn new(
        connector: Arc<BackendConnector>,
        injector: Arc<ScopeInjector>,
        registry: Arc<SessionRegistry>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            connector,
            injector,
            registry,
            rate_limit,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Serve one client connection until it closes.
    pub async fn handle(&self, socket: TcpStream, peer: SocketAddr) {
        let mut session = Session::new(peer, &self.rate_limit);
        self.registry.register(&session).await;
        tracing::debug!(client_id = %session.client_id(), peer = %peer, "Client accepted");

        let client = Framed::new(socket, FrontendCodec::new());
        if let Err(e) = self.run(&mut session, client).await {
            match e {
                ProxyError::Io(_) => tracing::debug!(
                    client_id = %session.client_id(),
                    tenant = session.tenant_id().unwrap_or("-"),
                    error = %e,
                    "Connection dropped"
                ),
                _ => tracing::warn!(
                    client_id = %session.client_id(),
                    tenant = session.tenant_id().unwrap_or("-"),
                    error = %e,
                    "Connection closed on error"
                ),
            }
        }

        self.registry.release(&mut session).await;
    }

    async fn run(&self, session: &mut Session, mut client: ClientFramed) -> Result<(), ProxyError> {
        let Some(backend) = self.handshake(session, &mut client).await? else {
            return Ok(());
        };
        session.mark_streaming();
        self.relay(session, client, backend).await
    }

    /// Drive the client through startup. Returns `None` when the
    /// connection ends without reaching a backend.
    async fn handshake(
        &self,
        session: &mut Session,
        client: &mut ClientFramed,
    ) -> Result<Option<BackendFramed>, ProxyError> {
        loop {
            let Some(message) = client.next().await.transpose()? else {
                return Ok(None);
            };

            match message {
                FrontendMessage::SslRequest | FrontendMessage::GssEncRequest => {
                    // Raw single byte; the codec stays in startup framing.
                    client.get_mut().write_all(&[ENCRYPTION_REFUSED]).await?;
                    tracing::debug!(client_id = %session.client_id(), "Refused client encryption request");
                }
                FrontendMessage::CancelRequest {
                    process_id,
                    secret_key,
                } => {
                    match self.connector.forward_cancel(process_id, secret_key).await {
                        Ok(()) => tracing::debug!(process_id, "Cancel request forwarded"),
                        Err(e) => tracing::warn!(process_id, error = %e, "Failed to forward cancel request"),
                    }
                    return Ok(None);
                }
                FrontendMessage::Startup(startup) => {
                    return self.start_backend(session, client, startup).await;
                }
                other => {
                    return Err(ProxyError::ProtocolViolation(format!(
                        "unexpected message before startup: {other:?}"
                    )));
                }
            }
        }
    }

    async fn start_backend(
        &self,
        session: &mut Session,
        client: &mut ClientFramed,
        startup: StartupMessage,
    ) -> Result<Option<BackendFramed>, ProxyError> {
        let tenant_id = match startup.get("database") {
            Some(database) if !database.is_empty() => database.to_string(),
            _ => {
                tracing::debug!(client_id = %session.client_id(), "Startup without database");
                client
                    .send(BackendMessage::ErrorResponse(ErrorResponse::fatal(
                        SQLSTATE_INVALID_CATALOG_NAME,
                        "no database specified; connect using the tenant id as database name",
                    )))
                    .await?;
                return Ok(None);
            }
        };

        let resolved = match self.connector.resolve(&tenant_id).await {
            Ok(resolved) => resolved,
            Err(e) if e.is_connect_failure() => {
                self.reject(session, client, &tenant_id, &e).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        session.begin_backend(resolved.scope)?;
        self.registry.set_tenant(session.client_id(), &tenant_id).await;
        tracing::info!(
            client_id = %session.client_id(),
            tenant = %tenant_id,
            peer = %session.peer(),
            backend = %resolved.credentials.backend.address(),
            "Tenant resolved"
        );

        match self.connector.connect(&resolved.credentials, &startup).await {
            Ok(backend) => {
                tracing::debug!(
                    client_id = %session.client_id(),
                    encrypted = backend.get_ref().is_encrypted(),
                    "Backend connected"
                );
                Ok(Some(backend))
            }
            Err(e) if e.is_connect_failure() => {
                self.reject(session, client, &tenant_id, &e).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn reject(
        &self,
        session: &Session,
        client: &mut ClientFramed,
        tenant_id: &str,
        error: &ProxyError,
    ) -> Result<(), ProxyError> {
        tracing::warn!(
            client_id = %session.client_id(),
            tenant = %tenant_id,
            peer = %session.peer(),
            error = %error,
            "Rejecting client"
        );
        client.send(BackendMessage::Terminate).await
    }

    /// Relay frames both ways until either leg ends.
    async fn relay(
        &self,
        session: &mut Session,
        client: ClientFramed,
        backend: BackendFramed,
    ) -> Result<(), ProxyError> {
        let scope = session.scope().cloned().unwrap_or_default();
        let client_id = session.client_id();

        let (mut client_tx, mut client_rx) = client.split::<BackendMessage>();
        let (mut backend_tx, mut backend_rx) = backend.split::<FrontendMessage>();
        let shared = Mutex::new(session);

        let upstream = async {
            while let Some(message) = client_rx.next().await {
                let message = match message? {
                    FrontendMessage::Query(sql) => {
                        lock(&shared).admit_query(Instant::now())?;
                        FrontendMessage::Query(self.scoped_query(client_id, &scope, sql))
                    }
                    FrontendMessage::RawQuery(body) => {
                        lock(&shared).admit_query(Instant::now())?;
                        tracing::debug!(
                            client_id = %client_id,
                            tenant = %scope.tenant_id,
                            "Query text is not UTF-8, forwarding unchanged"
                        );
                        FrontendMessage::RawQuery(body)
                    }
                    FrontendMessage::Terminate => {
                        backend_tx.send(FrontendMessage::Terminate).await?;
                        break;
                    }
                    other => other,
                };
                backend_tx.send(message).await?;
            }
            Ok::<(), ProxyError>(())
        };

        let downstream = async {
            while let Some(message) = backend_rx.next().await {
                let message = match message? {
                    BackendMessage::AuthenticationSasl { mechanisms } => BackendMessage::AuthenticationSasl {
                        mechanisms: filter_sasl_mechanisms(mechanisms)?,
                    },
                    other => other,
                };
                if message.answers_query() {
                    lock(&shared).query_answered(Instant::now());
                }
                client_tx.send(message).await?;
            }
            Ok::<(), ProxyError>(())
        };

        let result = tokio::select! {
            result = upstream => result,
            result = downstream => result,
        };

        if let Err(ProxyError::RateLimitExceeded { limit, window_ms, .. }) = &result {
            tracing::warn!(
                client_id = %client_id,
                tenant = %scope.tenant_id,
                limit = *limit,
                window_ms = *window_ms,
                "Rate limit exceeded, closing session"
            );
            let error = ErrorResponse::fatal(
                SQLSTATE_RATE_LIMITED,
                format!("rate limit exceeded: more than {limit} queries in {window_ms}ms"),
            );
            client_tx.send(BackendMessage::ErrorResponse(error)).await?;
        }

        result
    }

    fn scoped_query(&self, client_id: uuid::Uuid, scope: &TenantScope, sql: String) -> String {
        match self.injector.rewrite(&sql, scope) {
            Some(rewritten) => {
                tracing::debug!(
                    client_id = %client_id,
                    tenant = %scope.tenant_id,
                    original = %sql,
                    rewritten = %rewritten,
                    "Query rewritten"
                );
                rewritten
            }
            None => sql,
        }
    }
}

/// Drop mechanisms the proxy cannot carry through. An empty result means
/// the client would have nothing to authenticate with.
pub fn filter_sasl_mechanisms(mechanisms: Vec<String>) -> Result<Vec<String>, ProxyError> {
    let filtered: Vec<String> = mechanisms
        .into_iter()
        .filter(|m| m != CHANNEL_BINDING_MECHANISM)
        .collect();
    if filtered.is_empty() {
        return Err(ProxyError::ProtocolViolation(
            "backend offered no SASL mechanism usable through the proxy".to_string(),
        ));
    }
    Ok(filtered)
}
