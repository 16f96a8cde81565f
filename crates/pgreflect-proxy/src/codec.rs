//! PostgreSQL v3 wire framing.
//!
//! Two codec pairs share the message types below:
//! - [`FrontendCodec`] sits on the client socket: it decodes
//!   [`FrontendMessage`]s and encodes [`BackendMessage`]s.
//! - [`BackendCodec`] sits on the backend socket: it decodes
//!   [`BackendMessage`]s and encodes [`FrontendMessage`]s.
//!
//! Only the messages the proxy acts on are parsed. Everything else travels
//! as `Other { tag, body }` and is re-encoded byte for byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProxyError;

/// SSLRequest magic number.
pub const SSL_REQUEST_CODE: i32 = (1234 << 16) | 5679;

/// GSSENCRequest magic number.
pub const GSSENC_REQUEST_CODE: i32 = (1234 << 16) | 5680;

/// CancelRequest magic number.
pub const CANCEL_REQUEST_CODE: i32 = (1234 << 16) | 5678;

/// Protocol version 3.0.
pub const PROTOCOL_VERSION_3: i32 = 3 << 16;

/// Largest declared frame length accepted in either direction (1 GiB).
pub const MAX_MESSAGE_LEN: usize = 1 << 30;

/// Authentication sub-code announcing SASL mechanisms.
pub const AUTH_SASL: i32 = 10;

/// Reply byte refusing SSL or GSS encryption.
pub const ENCRYPTION_REFUSED: u8 = b'N';

/// Reply byte accepting SSL.
pub const ENCRYPTION_ACCEPTED: u8 = b'S';

fn violation(message: impl Into<String>) -> ProxyError {
    ProxyError::ProtocolViolation(message.into())
}

/// Read a null-terminated UTF-8 string off the front of `buf`.
///
/// Returns `None` when there is no terminator or the bytes are not UTF-8;
/// `buf` is left untouched in that case.
fn read_cstring(buf: &mut Bytes) -> Option<String> {
    let end = buf.iter().position(|&b| b == 0)?;
    let value = std::str::from_utf8(&buf[..end]).ok()?.to_string();
    buf.advance(end + 1);
    Some(value)
}

fn put_cstring(dst: &mut BytesMut, value: &str) {
    dst.put_slice(value.as_bytes());
    dst.put_u8(0);
}

/// Write a typed message, computing its length from what `body` writes.
fn put_typed(dst: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    dst.put_u8(tag);
    put_sized(dst, body);
}

/// Write a length-prefixed block; the length counts itself.
fn put_sized(dst: &mut BytesMut, body: impl FnOnce(&mut BytesMut)) {
    let start = dst.len();
    dst.put_i32(0);
    body(dst);
    let len = (dst.len() - start) as i32;
    dst[start..start + 4].copy_from_slice(&len.to_be_bytes());
}

/// Split one typed message (`tag`, `length`, `body`) off `src`.
fn decode_typed(src: &mut BytesMut) -> Result<Option<(u8, Bytes)>, ProxyError> {
    if src.len() < 5 {
        return Ok(None);
    }

    let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
    if !(4..=MAX_MESSAGE_LEN).contains(&len) {
        return Err(violation(format!(
            "invalid length {len} for message '{}'",
            char::from(src[0])
        )));
    }

    let total = 1 + len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    let mut frame = src.split_to(total);
    let tag = frame[0];
    frame.advance(5);
    Ok(Some((tag, frame.freeze())))
}

/// The startup packet: protocol version plus ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    pub protocol_version: i32,
    parameters: Vec<(String, String)>,
}

impl Default for StartupMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupMessage {
    pub fn new() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION_3,
            parameters: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace `key` in place, or append it if absent.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.parameters.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.parameters.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    fn decode_parameters(protocol_version: i32, mut body: Bytes) -> Result<Self, ProxyError> {
        let mut parameters = Vec::new();
        loop {
            let key = read_cstring(&mut body)
                .ok_or_else(|| violation("malformed startup parameter name"))?;
            if key.is_empty() {
                break;
            }
            let value = read_cstring(&mut body)
                .ok_or_else(|| violation(format!("malformed value for startup parameter {key}")))?;
            parameters.push((key, value));
        }
        Ok(Self {
            protocol_version,
            parameters,
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        put_sized(dst, |dst| {
            dst.put_i32(self.protocol_version);
            for (key, value) in &self.parameters {
                put_cstring(dst, key);
                put_cstring(dst, value);
            }
            dst.put_u8(0);
        });
    }
}

/// An `ErrorResponse` body: `(field code, value)` pairs in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub fields: Vec<(u8, String)>,
}

impl ErrorResponse {
    pub fn new(severity: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            fields: vec![
                (b'S', severity.to_string()),
                (b'V', severity.to_string()),
                (b'C', code.to_string()),
                (b'M', message.into()),
            ],
        }
    }

    pub fn fatal(code: &str, message: impl Into<String>) -> Self {
        Self::new("FATAL", code, message)
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new("ERROR", code, message)
    }

    pub fn field(&self, code: u8) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v.as_str())
    }

    pub fn severity(&self) -> Option<&str> {
        self.field(b'S')
    }

    /// SQLSTATE code.
    pub fn code(&self) -> Option<&str> {
        self.field(b'C')
    }

    pub fn message(&self) -> Option<&str> {
        self.field(b'M')
    }

    fn parse(mut body: Bytes) -> Option<Self> {
        let mut fields = Vec::new();
        loop {
            if !body.has_remaining() {
                return None;
            }
            let code = body.get_u8();
            if code == 0 {
                return Some(Self { fields });
            }
            fields.push((code, read_cstring(&mut body)?));
        }
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        for (code, value) in &self.fields {
            dst.put_u8(*code);
            put_cstring(dst, value);
        }
        dst.put_u8(0);
    }
}

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    SslRequest,
    GssEncRequest,
    CancelRequest { process_id: i32, secret_key: i32 },
    Startup(StartupMessage),
    /// 'Q' - simple query
    Query(String),
    /// 'Q' whose body is not a single UTF-8 string, e.g. a client using a
    /// non-UTF-8 `client_encoding`. Holds the body verbatim.
    RawQuery(Bytes),
    /// 'X'
    Terminate,
    /// Any other typed message, forwarded opaquely.
    Other { tag: u8, body: Bytes },
}

impl FrontendMessage {
    fn from_typed(tag: u8, body: Bytes) -> Result<Self, ProxyError> {
        match tag {
            b'Q' => {
                let mut text = body.clone();
                match read_cstring(&mut text) {
                    Some(sql) if text.is_empty() => Ok(FrontendMessage::Query(sql)),
                    _ => Ok(FrontendMessage::RawQuery(body)),
                }
            }
            b'X' => Ok(FrontendMessage::Terminate),
            _ => Ok(FrontendMessage::Other { tag, body }),
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        match self {
            FrontendMessage::SslRequest => put_sized(dst, |dst| dst.put_i32(SSL_REQUEST_CODE)),
            FrontendMessage::GssEncRequest => put_sized(dst, |dst| dst.put_i32(GSSENC_REQUEST_CODE)),
            FrontendMessage::CancelRequest {
                process_id,
                secret_key,
            } => put_sized(dst, |dst| {
                dst.put_i32(CANCEL_REQUEST_CODE);
                dst.put_i32(*process_id);
                dst.put_i32(*secret_key);
            }),
            FrontendMessage::Startup(startup) => startup.encode(dst),
            FrontendMessage::Query(sql) => put_typed(dst, b'Q', |dst| put_cstring(dst, sql)),
            FrontendMessage::RawQuery(body) => put_typed(dst, b'Q', |dst| dst.put_slice(body)),
            FrontendMessage::Terminate => put_typed(dst, b'X', |_| {}),
            FrontendMessage::Other { tag, body } => {
                put_typed(dst, *tag, |dst| dst.put_slice(body))
            }
        }
    }
}

/// Messages sent by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// 'R' with sub-code 10.
    AuthenticationSasl { mechanisms: Vec<String> },
    /// 'R' with any other sub-code; `body` follows the code.
    Authentication { code: i32, body: Bytes },
    /// 'T'
    RowDescription(Bytes),
    /// 'D'
    DataRow(Bytes),
    /// 'C' - command tag
    CommandComplete(String),
    /// 'E'
    ErrorResponse(ErrorResponse),
    /// 'I'
    EmptyQueryResponse,
    /// 'Z' - transaction status byte
    ReadyForQuery(u8),
    /// 'X'
    Terminate,
    /// Any other typed message, forwarded opaquely.
    Other { tag: u8, body: Bytes },
}

impl BackendMessage {
    pub fn tag(&self) -> u8 {
        match self {
            BackendMessage::AuthenticationSasl { .. } | BackendMessage::Authentication { .. } => b'R',
            BackendMessage::RowDescription(_) => b'T',
            BackendMessage::DataRow(_) => b'D',
            BackendMessage::CommandComplete(_) => b'C',
            BackendMessage::ErrorResponse(_) => b'E',
            BackendMessage::EmptyQueryResponse => b'I',
            BackendMessage::ReadyForQuery(_) => b'Z',
            BackendMessage::Terminate => b'X',
            BackendMessage::Other { tag, .. } => *tag,
        }
    }

    /// Whether this message is a response to an in-flight query.
    pub fn answers_query(&self) -> bool {
        matches!(self.tag(), b'T' | b'D' | b'C' | b'E' | b'I' | b'Z')
    }

    fn from_typed(tag: u8, mut body: Bytes) -> Result<Self, ProxyError> {
        let message = match tag {
            b'R' => {
                if body.remaining() < 4 {
                    return Err(violation("authentication message without a code"));
                }
                let code = body.get_i32();
                if code == AUTH_SASL {
                    return Self::decode_sasl(body);
                }
                BackendMessage::Authentication { code, body }
            }
            b'T' => BackendMessage::RowDescription(body),
            b'D' => BackendMessage::DataRow(body),
            b'I' => BackendMessage::EmptyQueryResponse,
            b'X' => BackendMessage::Terminate,
            b'Z' if body.len() == 1 => BackendMessage::ReadyForQuery(body[0]),
            // Text the proxy cannot parse is still forwarded.
            b'C' => {
                let mut text = body.clone();
                match read_cstring(&mut text) {
                    Some(command) if !text.has_remaining() => BackendMessage::CommandComplete(command),
                    _ => BackendMessage::Other { tag, body },
                }
            }
            b'E' => match ErrorResponse::parse(body.clone()) {
                Some(error) => BackendMessage::ErrorResponse(error),
                None => BackendMessage::Other { tag, body },
            },
            _ => BackendMessage::Other { tag, body },
        };
        Ok(message)
    }

    fn decode_sasl(mut body: Bytes) -> Result<Self, ProxyError> {
        let mut mechanisms = Vec::new();
        loop {
            let mechanism =
                read_cstring(&mut body).ok_or_else(|| violation("malformed SASL mechanism list"))?;
            if mechanism.is_empty() {
                break;
            }
            mechanisms.push(mechanism);
        }
        Ok(BackendMessage::AuthenticationSasl { mechanisms })
    }

    fn encode(&self, dst: &mut BytesMut) {
        let tag = self.tag();
        match self {
            BackendMessage::AuthenticationSasl { mechanisms } => put_typed(dst, tag, |dst| {
                dst.put_i32(AUTH_SASL);
                for mechanism in mechanisms {
                    put_cstring(dst, mechanism);
                }
                dst.put_u8(0);
            }),
            BackendMessage::Authentication { code, body } => put_typed(dst, tag, |dst| {
                dst.put_i32(*code);
                dst.put_slice(body);
            }),
            BackendMessage::RowDescription(body)
            | BackendMessage::DataRow(body)
            | BackendMessage::Other { body, .. } => put_typed(dst, tag, |dst| dst.put_slice(body)),
            BackendMessage::CommandComplete(command) => {
                put_typed(dst, tag, |dst| put_cstring(dst, command))
            }
            BackendMessage::ErrorResponse(error) => put_typed(dst, tag, |dst| error.encode_body(dst)),
            BackendMessage::EmptyQueryResponse | BackendMessage::Terminate => {
                put_typed(dst, tag, |_| {})
            }
            BackendMessage::ReadyForQuery(status) => put_typed(dst, tag, |dst| dst.put_u8(*status)),
        }
    }
}

/// Client-side codec.
///
/// Starts in startup framing (untyped, length-prefixed packets) and switches
/// to typed framing once a startup packet has been decoded. SSL and GSS
/// requests leave it in startup framing.
#[derive(Debug, Clone)]
pub struct FrontendCodec {
    startup: bool,
}

impl Default for FrontendCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrontendCodec {
    pub fn new() -> Self {
        Self { startup: true }
    }

    pub fn in_startup(&self) -> bool {
        self.startup
    }

    fn decode_startup(&mut self, src: &mut BytesMut) -> Result<Option<FrontendMessage>, ProxyError> {
        if src.len() < 4 {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if !(8..=MAX_MESSAGE_LEN).contains(&len) {
            return Err(violation(format!("invalid startup packet length {len}")));
        }
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let mut packet = src.split_to(len).freeze();
        packet.advance(4);
        let code = packet.get_i32();

        match code {
            SSL_REQUEST_CODE if len == 8 => Ok(Some(FrontendMessage::SslRequest)),
            GSSENC_REQUEST_CODE if len == 8 => Ok(Some(FrontendMessage::GssEncRequest)),
            CANCEL_REQUEST_CODE if len == 16 => Ok(Some(FrontendMessage::CancelRequest {
                process_id: packet.get_i32(),
                secret_key: packet.get_i32(),
            })),
            SSL_REQUEST_CODE | GSSENC_REQUEST_CODE | CANCEL_REQUEST_CODE => Err(violation(format!(
                "request code {code} with unexpected length {len}"
            ))),
            version if version >> 16 == 3 => {
                let startup = StartupMessage::decode_parameters(version, packet)?;
                self.startup = false;
                Ok(Some(FrontendMessage::Startup(startup)))
            }
            version => Err(violation(format!(
                "unsupported protocol version {}.{}",
                version >> 16,
                version & 0xffff
            ))),
        }
    }
}

impl Decoder for FrontendCodec {
    type Item = FrontendMessage;
    type Error = ProxyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.startup {
            return self.decode_startup(src);
        }
        match decode_typed(src)? {
            Some((tag, body)) => FrontendMessage::from_typed(tag, body).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<BackendMessage> for FrontendCodec {
    type Error = ProxyError;

    fn encode(&mut self, item: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

/// Backend-side codec. The backend always speaks typed framing.
#[derive(Debug, Clone, Default)]
pub struct BackendCodec;

impl BackendCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for BackendCodec {
    type Item = BackendMessage;
    type Error = ProxyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_typed(src)? {
            Some((tag, body)) => BackendMessage::from_typed(tag, body).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<FrontendMessage> for BackendCodec {
    type Error = ProxyError;

    fn encode(&mut self, item: FrontendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_frontend(message: FrontendMessage) -> BytesMut {
        let mut buf = BytesMut::new();
        BackendCodec::new().encode(message, &mut buf).unwrap();
        buf
    }

    fn encode_backend(message: BackendMessage) -> BytesMut {
        let mut buf = BytesMut::new();
        FrontendCodec::new().encode(message, &mut buf).unwrap();
        buf
    }

    fn startup_bytes(body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_i32((8 + body.len()) as i32);
        buf.put_i32(PROTOCOL_VERSION_3);
        buf.put_slice(body);
        buf
    }

    #[test]
    fn test_ssl_request_keeps_startup_framing() {
        let mut codec = FrontendCodec::new();
        let mut buf = BytesMut::from(&[0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(FrontendMessage::SslRequest));
        assert!(codec.in_startup());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_startup_then_query() {
        let mut codec = FrontendCodec::new();
        let mut buf = startup_bytes(b"user\0alice\0database\0ws_7\0\0");
        buf.put_slice(&encode_frontend(FrontendMessage::Query("SELECT 1".into())));

        let Some(FrontendMessage::Startup(startup)) = codec.decode(&mut buf).unwrap() else {
            panic!("expected startup");
        };
        assert_eq!(startup.get("user"), Some("alice"));
        assert_eq!(startup.get("database"), Some("ws_7"));
        assert!(!codec.in_startup());

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(FrontendMessage::Query("SELECT 1".into()))
        );
    }

    #[test]
    fn test_partial_frames_are_incomplete() {
        let mut codec = FrontendCodec::new();
        let full = startup_bytes(b"user\0alice\0\0");

        let mut buf = BytesMut::from(&full[..3]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.put_slice(&full[3..10]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.put_slice(&full[10..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(FrontendMessage::Startup(_))
        ));

        let mut backend = BackendCodec::new();
        let mut buf = BytesMut::from(&[b'Z', 0, 0, 0][..]);
        assert_eq!(backend.decode(&mut buf).unwrap(), None);
        buf.put_slice(&[5, b'I']);
        assert_eq!(
            backend.decode(&mut buf).unwrap(),
            Some(BackendMessage::ReadyForQuery(b'I'))
        );
    }

    #[test]
    fn test_bad_lengths_are_violations() {
        let mut codec = FrontendCodec::new();
        let mut buf = BytesMut::from(&[0, 0, 0, 4, 0, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProxyError::ProtocolViolation(_))
        ));

        let mut backend = BackendCodec::new();
        let mut buf = BytesMut::from(&[b'D', 0x7f, 0xff, 0xff, 0xff][..]);
        assert!(matches!(
            backend.decode(&mut buf),
            Err(ProxyError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_unsupported_protocol_version() {
        let mut codec = FrontendCodec::new();
        let mut buf = BytesMut::new();
        buf.put_i32(8);
        buf.put_i32(2 << 16);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProxyError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_startup_set_replaces_in_place() {
        let mut startup = StartupMessage::new()
            .with("user", "alice")
            .with("database", "ws_7")
            .with("application_name", "psql");
        startup.set("database", "reflection");
        startup.set("options", "-c x=1");

        let keys: Vec<_> = startup.parameters().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["user", "database", "application_name", "options"]);
        assert_eq!(startup.get("database"), Some("reflection"));
    }

    #[test]
    fn test_terminate_bytes() {
        assert_eq!(&encode_backend(BackendMessage::Terminate)[..], &[b'X', 0, 0, 0, 4]);
    }

    #[test]
    fn test_sasl_mechanisms_decode() {
        let bytes = encode_backend(BackendMessage::AuthenticationSasl {
            mechanisms: vec!["SCRAM-SHA-256".into(), "SCRAM-SHA-256-PLUS".into()],
        });
        assert_eq!(&bytes[..9], &[b'R', 0, 0, 0, 42, 0, 0, 0, 10]);

        let mut buf = bytes;
        let decoded = BackendCodec::new().decode(&mut buf).unwrap();
        assert_eq!(
            decoded,
            Some(BackendMessage::AuthenticationSasl {
                mechanisms: vec!["SCRAM-SHA-256".into(), "SCRAM-SHA-256-PLUS".into()],
            })
        );
    }

    #[test]
    fn test_error_response_fields() {
        let error = ErrorResponse::fatal("3D000", "database name required");
        let mut buf = encode_backend(BackendMessage::ErrorResponse(error.clone()));

        let Some(BackendMessage::ErrorResponse(parsed)) = BackendCodec::new().decode(&mut buf).unwrap()
        else {
            panic!("expected error response");
        };
        assert_eq!(parsed, error);
        assert_eq!(parsed.severity(), Some("FATAL"));
        assert_eq!(parsed.code(), Some("3D000"));
        assert_eq!(parsed.message(), Some("database name required"));
    }

    #[test]
    fn test_unparsed_text_is_forwarded_opaquely() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'C');
        buf.put_i32(7);
        buf.put_slice(&[0xff, 0xfe, 0]);
        let decoded = BackendCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.tag(), b'C');
        assert!(decoded.answers_query());
        assert!(matches!(decoded, BackendMessage::Other { .. }));
        assert_eq!(&encode_backend(decoded)[5..], &[0xff, 0xfe, 0]);
    }

    #[test]
    fn test_non_utf8_query_is_kept_verbatim() {
        let mut codec = FrontendCodec::new();
        let mut buf = startup_bytes(b"user\0alice\0client_encoding\0LATIN1\0\0");
        buf.put_u8(b'Q');
        buf.put_i32(4 + 14);
        buf.put_slice(b"SELECT 'caf\xe9'\0");

        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(FrontendMessage::Startup(_))));
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            decoded,
            FrontendMessage::RawQuery(Bytes::from_static(b"SELECT 'caf\xe9'\0"))
        );
        assert_eq!(&encode_frontend(decoded)[..], b"Q\0\0\0\x12SELECT 'caf\xe9'\0");
    }

    #[test]
    fn test_frames_survive_reencoding() {
        let frontend = vec![
            FrontendMessage::SslRequest,
            FrontendMessage::GssEncRequest,
            FrontendMessage::CancelRequest {
                process_id: 4242,
                secret_key: -7,
            },
            FrontendMessage::Startup(StartupMessage::new().with("user", "alice")),
            FrontendMessage::Query("SELECT 1".into()),
            FrontendMessage::RawQuery(Bytes::from_static(b"SELECT 1\0trailing\0")),
            FrontendMessage::Other {
                tag: b'P',
                body: Bytes::from_static(b"\0SELECT $1\0\0\0"),
            },
            FrontendMessage::Terminate,
        ];
        let mut codec = FrontendCodec::new();
        for message in frontend {
            let mut buf = encode_frontend(message.clone());
            assert_eq!(codec.decode(&mut buf).unwrap(), Some(message));
            assert!(buf.is_empty());
        }

        let backend = vec![
            BackendMessage::Authentication {
                code: 0,
                body: Bytes::new(),
            },
            BackendMessage::RowDescription(Bytes::from_static(b"\0\x01a\0")),
            BackendMessage::DataRow(Bytes::from_static(b"\0\x01\0\0\0\x011")),
            BackendMessage::CommandComplete("SELECT 1".into()),
            BackendMessage::EmptyQueryResponse,
            BackendMessage::ReadyForQuery(b'T'),
            BackendMessage::Other {
                tag: b'S',
                body: Bytes::from_static(b"TimeZone\0UTC\0"),
            },
        ];
        let mut codec = BackendCodec::new();
        for message in backend {
            let mut buf = encode_backend(message.clone());
            assert_eq!(codec.decode(&mut buf).unwrap(), Some(message));
        }
    }
}
