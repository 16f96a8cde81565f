//! Integration tests for the reflection proxy.
//!
//! Each test starts the proxy on an ephemeral port in front of an in-process
//! fake backend that speaks just enough of the protocol: it refuses SSL,
//! authenticates everyone, and answers every query with an empty result.
//!
//! Run with: cargo test --package pgreflect-proxy --test integration_tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pgreflect_core::{CredentialStore, CredentialStoreError, ReflectionConfig, TenantCredentials};
use pgreflect_proxy::{
    BackendCodec, BackendMessage, FrontendCodec, FrontendMessage, ReflectionProxy, SessionRegistry,
    StartupMessage,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;

const TIMEOUT: Duration = Duration::from_secs(5);

type Client = Framed<TcpStream, BackendCodec>;

#[derive(Clone, Copy)]
enum Auth {
    Trust,
    Sasl,
}

/// Start a fake backend; every frame it receives is reported on the
/// returned channel.
async fn fake_backend(auth: Auth) -> (u16, mpsc::UnboundedReceiver<FrontendMessage>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_backend(socket, auth, seen_tx.clone()));
        }
    });

    (port, seen_rx)
}

async fn serve_backend(socket: TcpStream, auth: Auth, seen: mpsc::UnboundedSender<FrontendMessage>) {
    let mut framed = Framed::new(socket, FrontendCodec::new());

    while let Some(Ok(message)) = framed.next().await {
        let _ = seen.send(message.clone());

        let replies = match message {
            FrontendMessage::SslRequest => {
                framed.get_mut().write_all(b"N").await.unwrap();
                continue;
            }
            FrontendMessage::Startup(_) => match auth {
                Auth::Trust => vec![
                    BackendMessage::Authentication {
                        code: 0,
                        body: Bytes::new(),
                    },
                    BackendMessage::ReadyForQuery(b'I'),
                ],
                Auth::Sasl => vec![BackendMessage::AuthenticationSasl {
                    mechanisms: vec!["SCRAM-SHA-256".to_string(), "SCRAM-SHA-256-PLUS".to_string()],
                }],
            },
            FrontendMessage::Query(_) | FrontendMessage::RawQuery(_) => vec![
                BackendMessage::CommandComplete("SELECT 0".to_string()),
                BackendMessage::ReadyForQuery(b'I'),
            ],
            FrontendMessage::Terminate => break,
            _ => vec![],
        };

        for reply in replies {
            if framed.send(reply).await.is_err() {
                return;
            }
        }
    }
}

fn config(backend_port: u16, max_queries: usize) -> ReflectionConfig {
    ReflectionConfig::from_yaml(&format!(
        r#"
listen:
  address: 127.0.0.1
  base_port: 0
  port_range: 1
rate_limit:
  window_ms: 60000
  max_queries: {max_queries}
backend:
  host: 127.0.0.1
  port: {backend_port}
  database: reflection
tenants:
  ws_7:
    username: reader_7
    schemas: [public, tenant_7]
"#
    ))
    .unwrap()
}

async fn start_proxy(proxy: ReflectionProxy) -> (u16, Arc<SessionRegistry>) {
    let listener = proxy.bind().await.unwrap();
    let port = listener.port();
    let registry = proxy.registry();
    tokio::spawn(async move { proxy.serve(listener).await });
    (port, registry)
}

async fn connect(port: u16) -> Client {
    let socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    Framed::new(socket, BackendCodec::new())
}

async fn send_startup(client: &mut Client, database: Option<&str>) {
    let mut startup = StartupMessage::new().with("user", "reader_7");
    if let Some(database) = database {
        startup.set("database", database);
    }
    client.send(FrontendMessage::Startup(startup)).await.unwrap();
}

async fn recv(client: &mut Client) -> Option<BackendMessage> {
    timeout(TIMEOUT, client.next())
        .await
        .expect("timed out waiting for the proxy")
        .map(|frame| frame.unwrap())
}

async fn recv_seen(seen: &mut mpsc::UnboundedReceiver<FrontendMessage>) -> FrontendMessage {
    timeout(TIMEOUT, seen.recv())
        .await
        .expect("timed out waiting for the backend")
        .unwrap()
}

/// Connect as `ws_7` and consume the authentication exchange.
async fn ready_client(port: u16, seen: &mut mpsc::UnboundedReceiver<FrontendMessage>) -> Client {
    let mut client = connect(port).await;
    send_startup(&mut client, Some("ws_7")).await;

    // The proxy negotiates SSL with the backend first.
    assert_eq!(recv_seen(seen).await, FrontendMessage::SslRequest);
    assert!(matches!(recv_seen(seen).await, FrontendMessage::Startup(_)));

    assert!(matches!(
        recv(&mut client).await,
        Some(BackendMessage::Authentication { code: 0, .. })
    ));
    assert_eq!(recv(&mut client).await, Some(BackendMessage::ReadyForQuery(b'I')));
    client
}

async fn read_to_end(client: Client) -> Vec<u8> {
    let mut socket = client.into_inner();
    let mut bytes = Vec::new();
    timeout(TIMEOUT, socket.read_to_end(&mut bytes))
        .await
        .expect("timed out waiting for close")
        .unwrap();
    bytes
}

#[tokio::test]
async fn test_ssl_and_gss_requests_refused() {
    let (backend_port, mut seen) = fake_backend(Auth::Trust).await;
    let (port, _) = start_proxy(ReflectionProxy::from_config(&config(backend_port, 60))).await;

    let mut client = connect(port).await;
    client.send(FrontendMessage::SslRequest).await.unwrap();
    assert_eq!(client.get_mut().read_u8().await.unwrap(), 0x4e);
    client.send(FrontendMessage::GssEncRequest).await.unwrap();
    assert_eq!(client.get_mut().read_u8().await.unwrap(), 0x4e);

    // Still unauthenticated and in startup framing.
    send_startup(&mut client, Some("ws_7")).await;
    assert_eq!(recv_seen(&mut seen).await, FrontendMessage::SslRequest);
    let FrontendMessage::Startup(startup) = recv_seen(&mut seen).await else {
        panic!("expected startup at the backend");
    };
    assert_eq!(startup.get("database"), Some("reflection"));
    assert_eq!(startup.get("user"), Some("reader_7"));
    assert!(matches!(
        recv(&mut client).await,
        Some(BackendMessage::Authentication { code: 0, .. })
    ));
}

#[tokio::test]
async fn test_unknown_tenant_receives_terminate() {
    let (backend_port, _seen) = fake_backend(Auth::Trust).await;
    let (port, _) = start_proxy(ReflectionProxy::from_config(&config(backend_port, 60))).await;

    let mut client = connect(port).await;
    send_startup(&mut client, Some("ws_404")).await;
    assert_eq!(read_to_end(client).await, vec![0x58, 0, 0, 0, 4]);
}

#[tokio::test]
async fn test_unreachable_backend_receives_terminate() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_port = closed.local_addr().unwrap().port();
    drop(closed);
    let (port, _) = start_proxy(ReflectionProxy::from_config(&config(backend_port, 60))).await;

    let mut client = connect(port).await;
    send_startup(&mut client, Some("ws_7")).await;
    assert_eq!(read_to_end(client).await, vec![0x58, 0, 0, 0, 4]);
}

struct OfflineStore;

#[async_trait]
impl CredentialStore for OfflineStore {
    async fn lookup(&self, _tenant_id: &str) -> Result<Option<TenantCredentials>, CredentialStoreError> {
        Err(CredentialStoreError("store offline".to_string()))
    }

    async fn visible_schemas(&self, _tenant_id: &str) -> Result<Vec<String>, CredentialStoreError> {
        Err(CredentialStoreError("store offline".to_string()))
    }
}

#[tokio::test]
async fn test_credential_store_failure_receives_terminate() {
    let (backend_port, _seen) = fake_backend(Auth::Trust).await;
    let proxy = ReflectionProxy::new(&config(backend_port, 60), Arc::new(OfflineStore));
    let (port, _) = start_proxy(proxy).await;

    let mut client = connect(port).await;
    send_startup(&mut client, Some("ws_7")).await;
    assert_eq!(read_to_end(client).await, vec![0x58, 0, 0, 0, 4]);
}

#[tokio::test]
async fn test_missing_or_empty_database_rejected() {
    let (backend_port, _seen) = fake_backend(Auth::Trust).await;
    let (port, _) = start_proxy(ReflectionProxy::from_config(&config(backend_port, 60))).await;

    for database in [None, Some("")] {
        let mut client = connect(port).await;
        send_startup(&mut client, database).await;

        let Some(BackendMessage::ErrorResponse(error)) = recv(&mut client).await else {
            panic!("expected an error response for database {database:?}");
        };
        assert_eq!(error.severity(), Some("FATAL"));
        assert_eq!(error.code(), Some("3D000"));
        assert_eq!(recv(&mut client).await, None);
    }
}

#[tokio::test]
async fn test_catalog_query_scoped() {
    let (backend_port, mut seen) = fake_backend(Auth::Trust).await;
    let (port, _) = start_proxy(ReflectionProxy::from_config(&config(backend_port, 60))).await;
    let mut client = ready_client(port, &mut seen).await;

    client
        .send(FrontendMessage::Query("SELECT * FROM pg_tables".to_string()))
        .await
        .unwrap();
    let FrontendMessage::Query(forwarded) = recv_seen(&mut seen).await else {
        panic!("expected a query at the backend");
    };
    assert_eq!(
        forwarded,
        "SELECT * FROM pg_tables WHERE pg_tables.schemaname IN ('public', 'tenant_7')"
    );
    assert_eq!(
        recv(&mut client).await,
        Some(BackendMessage::CommandComplete("SELECT 0".to_string()))
    );
    assert_eq!(recv(&mut client).await, Some(BackendMessage::ReadyForQuery(b'I')));

    // Queries outside the rule table, or that do not parse, pass unchanged.
    for sql in ["SELECT 1", "SELEC broken"] {
        client.send(FrontendMessage::Query(sql.to_string())).await.unwrap();
        assert_eq!(recv_seen(&mut seen).await, FrontendMessage::Query(sql.to_string()));
        assert!(recv(&mut client).await.is_some());
        assert!(recv(&mut client).await.is_some());
    }
}

#[tokio::test]
async fn test_non_utf8_query_forwarded_unchanged() {
    let (backend_port, mut seen) = fake_backend(Auth::Trust).await;
    let (port, _) = start_proxy(ReflectionProxy::from_config(&config(backend_port, 1))).await;
    let mut client = ready_client(port, &mut seen).await;

    // LATIN1 'é'; the session stays open and the bytes reach the backend as sent.
    let latin1 = Bytes::from_static(b"SELECT 'caf\xe9' FROM pg_tables\0");
    client.send(FrontendMessage::RawQuery(latin1.clone())).await.unwrap();
    assert_eq!(recv_seen(&mut seen).await, FrontendMessage::RawQuery(latin1));
    assert_eq!(
        recv(&mut client).await,
        Some(BackendMessage::CommandComplete("SELECT 0".to_string()))
    );
    assert_eq!(recv(&mut client).await, Some(BackendMessage::ReadyForQuery(b'I')));

    // It still counts against the rate limit.
    client
        .send(FrontendMessage::Query("SELECT 1".to_string()))
        .await
        .unwrap();
    let Some(BackendMessage::ErrorResponse(error)) = recv(&mut client).await else {
        panic!("expected the rate limit error");
    };
    assert_eq!(error.code(), Some("53400"));
}

#[tokio::test]
async fn test_sasl_channel_binding_hidden() {
    let (backend_port, mut seen) = fake_backend(Auth::Sasl).await;
    let (port, _) = start_proxy(ReflectionProxy::from_config(&config(backend_port, 60))).await;

    let mut client = connect(port).await;
    send_startup(&mut client, Some("ws_7")).await;
    assert_eq!(recv_seen(&mut seen).await, FrontendMessage::SslRequest);

    assert_eq!(
        recv(&mut client).await,
        Some(BackendMessage::AuthenticationSasl {
            mechanisms: vec!["SCRAM-SHA-256".to_string()],
        })
    );
}

#[tokio::test]
async fn test_rate_limit_boundary() {
    let (backend_port, mut seen) = fake_backend(Auth::Trust).await;
    let (port, _) = start_proxy(ReflectionProxy::from_config(&config(backend_port, 2))).await;
    let mut client = ready_client(port, &mut seen).await;

    for i in 0..2 {
        let sql = format!("SELECT {i}");
        client.send(FrontendMessage::Query(sql.clone())).await.unwrap();
        assert_eq!(recv_seen(&mut seen).await, FrontendMessage::Query(sql));
        assert!(matches!(
            recv(&mut client).await,
            Some(BackendMessage::CommandComplete(_))
        ));
        assert_eq!(recv(&mut client).await, Some(BackendMessage::ReadyForQuery(b'I')));
    }

    client
        .send(FrontendMessage::Query("SELECT 2".to_string()))
        .await
        .unwrap();
    let Some(BackendMessage::ErrorResponse(error)) = recv(&mut client).await else {
        panic!("expected the rate limit error");
    };
    assert_eq!(error.code(), Some("53400"));
    assert_eq!(recv(&mut client).await, None);

    // The refused query never reached the backend.
    while let Ok(Some(message)) = timeout(Duration::from_millis(200), seen.recv()).await {
        assert!(!matches!(message, FrontendMessage::Query(_)), "unexpected {message:?}");
    }
}

#[tokio::test]
async fn test_registry_tracks_live_sessions() {
    let (backend_port, mut seen) = fake_backend(Auth::Trust).await;
    let (port, registry) = start_proxy(ReflectionProxy::from_config(&config(backend_port, 60))).await;

    let mut client = ready_client(port, &mut seen).await;
    assert_eq!(registry.len().await, 1);

    client.send(FrontendMessage::Terminate).await.unwrap();
    assert_eq!(recv_seen(&mut seen).await, FrontendMessage::Terminate);
    drop(client);

    timeout(TIMEOUT, async {
        while !registry.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not released");
}
