// HTTP frame parsing for WebSocket payloads
//
// Every WebSocket message the gateway sends is a complete HTTP/1.1
// request or response. This module turns those bytes into a typed frame.
// Parse failures are data: they land on `TydomRawMessage::parse_error`
// so one bad frame never takes down the inbound stream.

use std::collections::BTreeMap;

use bytes::Bytes;
use thiserror::Error;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const LINE_BREAK: &[u8] = b"\r\n";

// ── Errors ──────────────────────────────────────────────────────────

/// Why a payload could not be read as an HTTP frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameParseError {
    #[error("missing header terminator")]
    MissingHeaderTerminator,

    #[error("header block is not valid UTF-8")]
    InvalidEncoding,

    #[error("missing start line tokens")]
    MissingStartLine,

    #[error("invalid status code: {0}")]
    InvalidStatus(String),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("truncated chunk: expected {expected} bytes, {available} available")]
    TruncatedChunk { expected: usize, available: usize },
}

// ── Headers ─────────────────────────────────────────────────────────

/// Case-insensitive header map. Keys are stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_ascii_lowercase(), value.trim().to_owned());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Frame ───────────────────────────────────────────────────────────

/// One HTTP message carried inside a WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TydomHttpFrame {
    Request {
        method: String,
        path: String,
        headers: Headers,
        body: Bytes,
    },
    Response {
        status: u16,
        reason: String,
        headers: Headers,
        body: Bytes,
    },
}

impl TydomHttpFrame {
    /// Parse a complete HTTP message.
    pub fn parse(data: &[u8]) -> Result<Self, FrameParseError> {
        let split = find(data, HEADER_TERMINATOR).ok_or(FrameParseError::MissingHeaderTerminator)?;
        let head = std::str::from_utf8(&data[..split]).map_err(|_| FrameParseError::InvalidEncoding)?;
        let rest = &data[split + HEADER_TERMINATOR.len()..];

        let mut lines = head.split("\r\n");
        let start_line = lines.next().unwrap_or_default();

        let mut headers = Headers::new();
        for line in lines {
            // Lines without a colon are skipped rather than rejected.
            if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim(), value);
            }
        }

        let body = extract_body(&headers, rest)?;

        if start_line.starts_with("HTTP/") {
            let mut tokens = start_line.split_whitespace();
            let _version = tokens.next();
            let status_token = tokens.next().ok_or(FrameParseError::MissingStartLine)?;
            let status = status_token
                .parse::<u16>()
                .map_err(|_| FrameParseError::InvalidStatus(status_token.to_owned()))?;
            let reason = tokens.collect::<Vec<_>>().join(" ");
            Ok(Self::Response {
                status,
                reason,
                headers,
                body,
            })
        } else {
            let mut tokens = start_line.split_whitespace();
            let method = tokens.next().ok_or(FrameParseError::MissingStartLine)?;
            let path = tokens.next().ok_or(FrameParseError::MissingStartLine)?;
            Ok(Self::Request {
                method: method.to_owned(),
                path: path.to_owned(),
                headers,
                body,
            })
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            Self::Request { headers, .. } | Self::Response { headers, .. } => headers,
        }
    }

    pub fn body(&self) -> &Bytes {
        match self {
            Self::Request { body, .. } | Self::Response { body, .. } => body,
        }
    }

    /// The resource this frame describes: the request path, or the
    /// `Uri-Origin` header of a response.
    pub fn uri_origin(&self) -> Option<&str> {
        match self {
            Self::Request { path, .. } => Some(path.as_str()),
            Self::Response { headers, .. } => headers.get("uri-origin"),
        }
    }

    /// The `Transac-Id` header, correlating this frame with a command.
    pub fn transaction_id(&self) -> Option<&str> {
        self.headers().get("transac-id")
    }
}

// ── Body extraction ─────────────────────────────────────────────────

fn extract_body(headers: &Headers, rest: &[u8]) -> Result<Bytes, FrameParseError> {
    let chunked = headers
        .get("transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return decode_chunked(rest).map(Bytes::from);
    }

    if let Some(length) = headers
        .get("content-length")
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        if rest.len() >= length {
            return Ok(Bytes::copy_from_slice(&rest[..length]));
        }
    }

    Ok(Bytes::copy_from_slice(rest))
}

/// Decode a chunked transfer body. Decoding stops at the zero-size chunk;
/// anything after it is ignored.
pub fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>, FrameParseError> {
    let mut out = Vec::with_capacity(data.len());

    loop {
        let Some(line_end) = find(data, LINE_BREAK) else {
            // A body that ends without its terminator still yields what was read.
            if data.iter().all(u8::is_ascii_whitespace) {
                return Ok(out);
            }
            return Err(FrameParseError::InvalidChunkSize(
                String::from_utf8_lossy(data).into_owned(),
            ));
        };

        let size_line = String::from_utf8_lossy(&data[..line_end]);
        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_token, 16)
            .map_err(|_| FrameParseError::InvalidChunkSize(size_token.to_owned()))?;
        data = &data[line_end + LINE_BREAK.len()..];

        if size == 0 {
            return Ok(out);
        }
        if data.len() < size {
            return Err(FrameParseError::TruncatedChunk {
                expected: size,
                available: data.len(),
            });
        }

        out.extend_from_slice(&data[..size]);
        data = &data[size..];
        data = data.strip_prefix(LINE_BREAK).unwrap_or(data);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ── Raw message ─────────────────────────────────────────────────────

/// One inbound WebSocket payload, parsed at most once.
///
/// Carries the original bytes so a consumer can always fall back to them,
/// plus the parsed frame (or the reason it could not be parsed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TydomRawMessage {
    pub payload: Bytes,
    pub frame: Option<TydomHttpFrame>,
    pub uri_origin: Option<String>,
    pub transaction_id: Option<String>,
    pub parse_error: Option<String>,
}

impl TydomRawMessage {
    pub fn new(payload: Bytes) -> Self {
        match TydomHttpFrame::parse(&payload) {
            Ok(frame) => Self {
                uri_origin: frame.uri_origin().map(str::to_owned),
                transaction_id: frame.transaction_id().map(str::to_owned),
                frame: Some(frame),
                parse_error: None,
                payload,
            },
            Err(e) => Self {
                payload,
                frame: None,
                uri_origin: None,
                transaction_id: None,
                parse_error: Some(e.to_string()),
            },
        }
    }

    /// The frame body, or `None` when absent, empty, or unparsed.
    pub fn body(&self) -> Option<&Bytes> {
        self.frame.as_ref().map(TydomHttpFrame::body).filter(|b| !b.is_empty())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encode_chunked(data: &[u8], chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for part in data.chunks(chunk) {
            out.extend_from_slice(format!("{:x}\r\n", part.len()).as_bytes());
            out.extend_from_slice(part);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n\r\n");
        out
    }

    #[test]
    fn parses_response_with_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nUri-Origin: /info\r\nTransac-Id: 42\r\nContent-Length: 2\r\n\r\n{}trailing";
        let frame = TydomHttpFrame::parse(raw).unwrap();

        match &frame {
            TydomHttpFrame::Response { status, reason, body, .. } => {
                assert_eq!(*status, 200);
                assert_eq!(reason, "OK");
                assert_eq!(body.as_ref(), b"{}");
            }
            TydomHttpFrame::Request { .. } => panic!("expected response"),
        }
        assert_eq!(frame.uri_origin(), Some("/info"));
        assert_eq!(frame.transaction_id(), Some("42"));
    }

    #[test]
    fn multi_word_reason_is_joined() {
        let raw = b"HTTP/1.1 404 Not Found\r\n\r\n";
        let frame = TydomHttpFrame::parse(raw).unwrap();
        assert!(matches!(frame, TydomHttpFrame::Response { ref reason, .. } if reason == "Not Found"));
    }

    #[test]
    fn parses_request_and_uses_path_as_origin() {
        let raw = b"PUT /devices/data HTTP/1.1\r\nContent-Type: application/json\r\n\r\n[]";
        let frame = TydomHttpFrame::parse(raw).unwrap();
        assert_eq!(frame.uri_origin(), Some("/devices/data"));
        assert!(matches!(frame, TydomHttpFrame::Request { ref method, .. } if method == "PUT"));
        assert_eq!(frame.body().as_ref(), b"[]");
    }

    #[test]
    fn headers_are_case_insensitive_and_trimmed() {
        let raw = b"HTTP/1.1 200 OK\r\nURI-ORIGIN:   /ping  \r\nbogus line\r\n\r\n";
        let frame = TydomHttpFrame::parse(raw).unwrap();
        assert_eq!(frame.headers().get("Uri-Origin"), Some("/ping"));
        assert_eq!(frame.headers().len(), 1);
    }

    #[test]
    fn missing_terminator_is_error() {
        let err = TydomHttpFrame::parse(b"HTTP/1.1 200 OK\r\nA: b").unwrap_err();
        assert_eq!(err, FrameParseError::MissingHeaderTerminator);
    }

    #[test]
    fn non_numeric_status_is_error() {
        let err = TydomHttpFrame::parse(b"HTTP/1.1 abc OK\r\n\r\n").unwrap_err();
        assert_eq!(err, FrameParseError::InvalidStatus("abc".into()));
    }

    #[test]
    fn missing_path_is_error() {
        let err = TydomHttpFrame::parse(b"GET\r\n\r\n").unwrap_err();
        assert_eq!(err, FrameParseError::MissingStartLine);
    }

    #[test]
    fn chunked_round_trip() {
        let original: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        for size in [1, 7, 64, 999, 1000, 4096] {
            let encoded = encode_chunked(&original, size);
            assert_eq!(decode_chunked(&encoded).unwrap(), original, "chunk size {size}");
        }
    }

    #[test]
    fn zero_chunk_ends_decoding_despite_trailing_garbage() {
        let decoded = decode_chunked(b"3\r\nabc\r\n0\r\n\r\nGARBAGE\xff").unwrap();
        assert_eq!(decoded, b"abc");
    }

    #[test]
    fn truncated_chunk_is_error() {
        let err = decode_chunked(b"a\r\nabc").unwrap_err();
        assert!(matches!(err, FrameParseError::TruncatedChunk { expected: 10, available: 3 }));
    }

    #[test]
    fn chunked_body_in_frame() {
        let mut raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nUri-Origin: /configs/file\r\n\r\n".to_vec();
        raw.extend(encode_chunked(br#"{"endpoints":[]}"#, 5));
        let frame = TydomHttpFrame::parse(&raw).unwrap();
        assert_eq!(frame.body().as_ref(), br#"{"endpoints":[]}"#);
    }

    #[test]
    fn frame_reflects_input_headers_and_body() {
        let pairs = [("uri-origin", "/devices/data"), ("transac-id", "17"), ("x-extra", "a b c")];
        let body = br#"[{"id":1}]"#;
        let mut raw = b"HTTP/1.1 200 OK\r\n".to_vec();
        for (k, v) in pairs {
            raw.extend(format!("{k}: {v}\r\n").as_bytes());
        }
        raw.extend(format!("content-length: {}\r\n\r\n", body.len()).as_bytes());
        raw.extend(body);

        let frame = TydomHttpFrame::parse(&raw).unwrap();
        for (k, v) in pairs {
            assert_eq!(frame.headers().get(k), Some(v));
        }
        assert_eq!(frame.body().as_ref(), body);
    }

    #[test]
    fn raw_message_surfaces_parse_error() {
        let msg = TydomRawMessage::new(Bytes::from_static(b"garbage"));
        assert!(msg.frame.is_none());
        assert_eq!(msg.parse_error.as_deref(), Some("missing header terminator"));
        assert!(msg.body().is_none());
    }

    #[test]
    fn raw_message_derives_origin_and_transaction() {
        let msg = TydomRawMessage::new(Bytes::from_static(
            b"HTTP/1.1 200 OK\r\nUri-Origin: /ping\r\nTransac-Id: 9\r\n\r\n",
        ));
        assert_eq!(msg.uri_origin.as_deref(), Some("/ping"));
        assert_eq!(msg.transaction_id.as_deref(), Some("9"));
        assert!(msg.body().is_none());
    }
}
