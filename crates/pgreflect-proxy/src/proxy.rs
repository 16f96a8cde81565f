//! Listener: binds within the configured port range and spawns one task per
//! client connection.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use pgreflect_core::{CredentialStore, ListenConfig, ReflectionConfig, StaticCredentialStore};
use pgreflect_rls::ScopeInjector;
use tokio::net::TcpListener;

use crate::backend::BackendConnector;
use crate::error::ProxyError;
use crate::handler::ConnectionHandler;
use crate::session::SessionRegistry;

/// The reflection proxy server.
pub struct ReflectionProxy {
    listen: ListenConfig,
    handler: ConnectionHandler,
}

/// A bound listening socket and the port it ended up on.
#[derive(Debug)]
pub struct ProxyListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ProxyListener {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl ReflectionProxy {
    /// Create a proxy resolving tenants through `store`.
    pub fn new(config: &ReflectionConfig, store: Arc<dyn CredentialStore>) -> Self {
        let connector = BackendConnector::new(store, config.backend.clone());
        let injector = ScopeInjector::new(config.interception.rules.clone());
        let handler = ConnectionHandler::new(
            Arc::new(connector),
            Arc::new(injector),
            Arc::new(SessionRegistry::new()),
            config.rate_limit.clone(),
        );

        Self {
            listen: config.listen.clone(),
            handler,
        }
    }

    /// Create a proxy whose tenants come from the `tenants` section.
    pub fn from_config(config: &ReflectionConfig) -> Self {
        Self::new(config, Arc::new(StaticCredentialStore::from_config(config)))
    }

    pub fn listen_config(&self) -> &ListenConfig {
        &self.listen
    }

    /// Live sessions.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.handler.registry().clone()
    }

    /// Bind the first free port of the configured range.
    pub async fn bind(&self) -> Result<ProxyListener, ProxyError> {
        let ports = self.listen.ports();
        let (first, last) = (*ports.start(), *ports.end());

        for port in ports {
            match TcpListener::bind((self.listen.address.as_str(), port)).await {
                Ok(listener) => {
                    let local_addr = listener.local_addr()?;
                    tracing::info!(address = %local_addr, "Proxy listening");
                    return Ok(ProxyListener {
                        listener,
                        local_addr,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    tracing::debug!(port, "Port in use, trying next");
                }
                Err(e) => {
                    return Err(ProxyError::BindFailed {
                        address: format!("{}:{port}", self.listen.address),
                        source: e,
                    });
                }
            }
        }

        Err(ProxyError::NoPortAvailable { first, last })
    }

    /// Bind and serve until the process ends.
    pub async fn run(&self) -> Result<(), ProxyError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: ProxyListener) -> Result<(), ProxyError> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Accept clients until `shutdown` completes. Connections already
    /// accepted keep running on their own tasks.
    pub async fn serve_with_shutdown<F>(&self, listener: ProxyListener, shutdown: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let (socket, peer) = tokio::select! {
                accepted = listener.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
                () = &mut shutdown => break,
            };

            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let handler = self.handler.clone();
            tokio::spawn(async move {
                handler.handle(socket, peer).await;
            });
        }

        let live_sessions = self.handler.registry().len().await;
        tracing::info!(
            address = %listener.local_addr,
            live_sessions,
            "Proxy stopped accepting connections"
        );
        Ok(())
    }
}
