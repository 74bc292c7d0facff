// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal HTTP/1.1 request reader and response writer.
//
// One request per connection (`Connection: close`).  Bodies must carry a
// Content-Length; chunked uploads are refused.

use std::io;

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024; // 64 MiB

/// Largest accepted request line + header block.
const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request body of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Header names are stored lowercase.
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// First value of a query-string parameter, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(key, _)| percent_decode(key) == name)
            .map(|(_, value)| percent_decode(value))
    }
}

/// Read one request.  `Ok(None)` means the peer closed without sending
/// anything.
pub async fn read_request<S>(stream: &mut S) -> Result<Option<Request>, RequestError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    let header_end = loop {
        if let Some(end) = find_subsequence(&buf, b"\r\n\r\n") {
            break end;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(RequestError::Malformed("header block too large".into()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(RequestError::Malformed("connection closed inside headers".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]);
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(_version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::Malformed(format!("bad request line {request_line:?}")));
    };
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    };

    let mut headers = Vec::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(RequestError::Malformed(format!("bad header line {line:?}")));
        };
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
    }

    let mut request = Request {
        method: method.to_ascii_uppercase(),
        path,
        query,
        headers,
        body: Vec::new(),
    };

    if request
        .header("transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
    {
        return Err(RequestError::Malformed("chunked bodies are not supported".into()));
    }
    let content_length = match request.header("content-length") {
        None => 0,
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed(format!("bad content-length {value:?}")))?,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::TooLarge(content_length));
    }

    let mut body = buf.split_off(header_end + 4);
    if body.len() > content_length {
        body.truncate(content_length);
    } else if body.len() < content_length {
        let have = body.len();
        body.resize(content_length, 0);
        stream
            .read_exact(&mut body[have..])
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    RequestError::Malformed("connection closed inside body".into())
                }
                _ => RequestError::Io(e),
            })?;
    }
    request.body = body;
    Ok(Some(request))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => Self::text(500, &format!("serialization failed: {e}")),
        }
    }

    pub fn text(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: message.as_bytes().to_vec(),
        }
    }

    pub async fn write_to<S>(&self, stream: &mut S) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let head = format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n",
            self.status,
            reason_phrase(self.status),
            self.content_type,
            self.body.len()
        );
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&self.body).await?;
        stream.flush().await
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// Find the first occurrence of `needle` in `haystack`.
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Decode `%XX` escapes and `+` in a query component.  Invalid escapes are
/// kept literally.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &[u8]) -> Result<Option<Request>, RequestError> {
        let mut reader = raw;
        read_request(&mut reader).await
    }

    #[tokio::test]
    async fn parses_get_with_query() {
        let request = parse(b"GET /print/status?job_id=abc%2D1&x HTTP/1.1\r\nHost: a\r\n\r\n")
            .await
            .expect("ok")
            .expect("request");
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/print/status");
        assert_eq!(request.query_param("job_id").as_deref(), Some("abc-1"));
        assert_eq!(request.query_param("x").as_deref(), Some(""));
        assert_eq!(request.query_param("missing"), None);
        assert_eq!(request.header("HOST"), Some("a"));
        assert!(request.body.is_empty());
    }

    #[tokio::test]
    async fn reads_body_by_content_length() {
        let request = parse(b"POST /print HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello trailing")
            .await
            .expect("ok")
            .expect("request");
        assert_eq!(request.body, b"hello");
    }

    #[tokio::test]
    async fn oversized_body_is_refused_before_reading() {
        let raw = format!(
            "POST /print HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_BYTES + 1
        );
        let err = parse(raw.as_bytes()).await.unwrap_err();
        assert!(matches!(err, RequestError::TooLarge(_)));
    }

    #[tokio::test]
    async fn truncated_requests_are_malformed() {
        assert!(matches!(
            parse(b"GET / HTTP/1.1\r\nHost").await,
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            parse(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc").await,
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            parse(b"NONSENSE\r\n\r\n").await,
            Err(RequestError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn empty_connection_is_none() {
        assert!(parse(b"").await.expect("ok").is_none());
    }

    #[tokio::test]
    async fn response_has_length_and_close() {
        let mut out = Vec::new();
        Response::text(404, "nope").write_to(&mut out).await.expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nnope"));
    }

    #[test]
    fn percent_decoding() {
        assert_eq!(percent_decode("a%20b+c"), "a b c");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
