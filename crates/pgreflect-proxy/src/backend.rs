//! Backend connector: tenant resolution, SSL negotiation and startup.

use std::collections::HashMap;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures::SinkExt;
use pgreflect_core::{
    BackendDescriptor, CredentialStore, TenantCredentials, TenantScope, TlsMode, TlsPolicy,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Encoder, Framed};

use crate::codec::{BackendCodec, ENCRYPTION_ACCEPTED, ENCRYPTION_REFUSED, FrontendMessage, StartupMessage};
use crate::error::ProxyError;

/// Socket to the backend database, plain or TLS.
pub enum BackendStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl BackendStream {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, BackendStream::Tls(_))
    }
}

impl std::fmt::Debug for BackendStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendStream::Plain(_) => f.write_str("BackendStream::Plain"),
            BackendStream::Tls(_) => f.write_str("BackendStream::Tls"),
        }
    }
}

impl AsyncRead for BackendStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            BackendStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BackendStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            BackendStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            BackendStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            BackendStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Backend leg after startup has been sent.
pub type BackendFramed = Framed<BackendStream, BackendCodec>;

/// A tenant resolved through the credential store.
#[derive(Debug, Clone)]
pub struct ResolvedTenant {
    pub credentials: TenantCredentials,
    pub scope: TenantScope,
}

type TlsConfigKey = (bool, Option<PathBuf>);

/// Opens backend connections on behalf of tenants.
pub struct BackendConnector {
    store: Arc<dyn CredentialStore>,
    default_backend: BackendDescriptor,
    tls_configs: Mutex<HashMap<TlsConfigKey, Arc<ClientConfig>>>,
}

impl BackendConnector {
    pub fn new(store: Arc<dyn CredentialStore>, default_backend: BackendDescriptor) -> Self {
        Self {
            store,
            default_backend,
            tls_configs: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_backend(&self) -> &BackendDescriptor {
        &self.default_backend
    }

    /// Look up `tenant_id` and build its scope.
    pub async fn resolve(&self, tenant_id: &str) -> Result<ResolvedTenant, ProxyError> {
        let credentials = self
            .store
            .lookup(tenant_id)
            .await?
            .ok_or_else(|| ProxyError::TenantNotProvisioned(tenant_id.to_string()))?;
        let visible_schemas = self.store.visible_schemas(tenant_id).await?;

        let scope = TenantScope {
            tenant_id: tenant_id.to_string(),
            visible_schemas,
            backend_user: credentials.username.clone(),
            backend_database: credentials.backend.database.clone(),
        };
        Ok(ResolvedTenant { credentials, scope })
    }

    /// Connect to the tenant's backend and send `startup` with its
    /// `database` replaced by the backend's real database name.
    pub async fn connect(
        &self,
        credentials: &TenantCredentials,
        startup: &StartupMessage,
    ) -> Result<BackendFramed, ProxyError> {
        let stream = self.open(&credentials.backend).await?;

        let mut startup = startup.clone();
        startup.set("database", credentials.backend.database.clone());

        let mut framed = Framed::new(stream, BackendCodec::new());
        framed.send(FrontendMessage::Startup(startup)).await?;
        Ok(framed)
    }

    /// Relay a cancel request to the default backend.
    pub async fn forward_cancel(&self, process_id: i32, secret_key: i32) -> Result<(), ProxyError> {
        let stream = self.open(&self.default_backend).await?;
        let mut framed = Framed::new(stream, BackendCodec::new());
        framed
            .send(FrontendMessage::CancelRequest {
                process_id,
                secret_key,
            })
            .await?;
        framed.into_inner().shutdown().await?;
        Ok(())
    }

    /// Open a socket to `backend`, negotiating TLS according to its policy.
    pub async fn open(&self, backend: &BackendDescriptor) -> Result<BackendStream, ProxyError> {
        let address = backend.address();
        let unreachable = |e: io::Error| ProxyError::BackendUnreachable(format!("{address}: {e}"));

        let mut tcp = TcpStream::connect(&address).await.map_err(unreachable)?;
        tcp.set_nodelay(true).map_err(unreachable)?;

        if !backend.tls.requests_tls() {
            return Ok(BackendStream::Plain(tcp));
        }

        let mut request = BytesMut::new();
        BackendCodec::new().encode(FrontendMessage::SslRequest, &mut request)?;
        tcp.write_all(&request).await.map_err(unreachable)?;

        match tcp.read_u8().await.map_err(unreachable)? {
            ENCRYPTION_ACCEPTED => {
                let config = self.tls_config(&backend.tls)?;
                let server_name = ServerName::try_from(backend.host.clone()).map_err(|e| {
                    ProxyError::BackendUnreachable(format!("invalid server name {}: {e}", backend.host))
                })?;
                let tls = TlsConnector::from(config)
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| ProxyError::BackendUnreachable(format!("TLS handshake with {address}: {e}")))?;
                tracing::debug!(backend = %address, "Backend connection upgraded to TLS");
                Ok(BackendStream::Tls(Box::new(tls)))
            }
            ENCRYPTION_REFUSED if backend.tls.mode == TlsMode::Require => Err(ProxyError::BackendUnreachable(
                format!("{address} refused TLS and tls.mode is require"),
            )),
            ENCRYPTION_REFUSED => {
                tracing::debug!(backend = %address, "Backend refused TLS, continuing unencrypted");
                Ok(BackendStream::Plain(tcp))
            }
            other => Err(ProxyError::ProtocolViolation(format!(
                "unexpected SSL response byte 0x{other:02x} from {address}"
            ))),
        }
    }

    fn tls_config(&self, policy: &TlsPolicy) -> Result<Arc<ClientConfig>, ProxyError> {
        let key = (policy.verify_certificate, policy.ca_file.clone());
        let mut configs = self.tls_configs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(config) = configs.get(&key) {
            return Ok(config.clone());
        }
        let config = Arc::new(build_tls_config(policy)?);
        configs.insert(key, config.clone());
        Ok(config)
    }
}

fn tls_setup_error(e: impl std::fmt::Display) -> ProxyError {
    ProxyError::BackendUnreachable(format!("TLS setup: {e}"))
}

/// Build the client TLS configuration for a backend policy.
pub fn build_tls_config(policy: &TlsPolicy) -> Result<ClientConfig, ProxyError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(tls_setup_error)?;

    if !policy.verify_certificate {
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth());
    }

    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::debug!(error = %error, "Skipping unreadable native certificate");
    }
    roots.add_parsable_certificates(native.certs);

    if let Some(path) = &policy.ca_file {
        for cert in load_pem_certs(path)? {
            roots.add(cert).map_err(tls_setup_error)?;
        }
    }

    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}

fn load_pem_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let read_error = |e: io::Error| tls_setup_error(format!("CA file {}: {e}", path.display()));
    let file = std::fs::File::open(path).map_err(read_error)?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_error)
}

/// Accepts any server certificate while still checking handshake
/// signatures. Used when `verify_certificate` is off.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
