//! Minimal HTTP/1.1 request parsing and response writing.
//!
//! Only what the server needs: one request per connection, bodies delimited by `Content-Length`.

use std::{
    fmt,
    io::{self, BufRead, Read, Write},
};

use serde::Serialize;
use thiserror::Error;

/// Request line and header lines longer than this are rejected.
const MAX_LINE_BYTES: usize = 8 * 1024;
const MAX_HEADERS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(u16);

impl Status {
    pub const OK: Self = Self(200);
    pub const BAD_REQUEST: Self = Self(400);
    pub const NOT_FOUND: Self = Self(404);
    pub const METHOD_NOT_ALLOWED: Self = Self(405);
    pub const LENGTH_REQUIRED: Self = Self(411);
    pub const PAYLOAD_TOO_LARGE: Self = Self(413);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);

    pub fn code(self) -> u16 {
        self.0
    }

    pub fn reason(self) -> &'static str {
        match self.0 {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            411 => "Length Required",
            413 => "Payload Too Large",
            500 => "Internal Server Error",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason())
    }
}

/// A request could not be read.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("missing Content-Length header")]
    LengthRequired,
    #[error("request body of {length} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { length: usize, limit: usize },
    /// The connection failed or timed out. No response can be sent.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HttpError {
    /// Returns the status to respond with, or [`None`] if the connection is unusable.
    pub fn status(&self) -> Option<Status> {
        match self {
            HttpError::BadRequest(_) => Some(Status::BAD_REQUEST),
            HttpError::LengthRequired => Some(Status::LENGTH_REQUIRED),
            HttpError::PayloadTooLarge { .. } => Some(Status::PAYLOAD_TOO_LARGE),
            HttpError::Io(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    /// Reads a request head and its body from `reader`.
    ///
    /// Bodies are only accepted with a `Content-Length` of at most `max_body` bytes. `POST`
    /// requests without a `Content-Length` are rejected, other methods get an empty body.
    pub fn read<R: BufRead>(reader: &mut R, max_body: usize) -> Result<Self, HttpError> {
        let line = read_line(reader)?;
        let mut parts = line.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HttpError::BadRequest("malformed request line"));
        };
        if !version.starts_with("HTTP/1.") {
            return Err(HttpError::BadRequest("unsupported HTTP version"));
        }
        if method.is_empty() || !target.starts_with('/') {
            return Err(HttpError::BadRequest("malformed request line"));
        }
        let path = target.split_once('?').map_or(target, |(path, _)| path);

        let mut headers = Vec::new();
        loop {
            let line = read_line(reader)?;
            if line.is_empty() {
                break;
            }
            if headers.len() == MAX_HEADERS {
                return Err(HttpError::BadRequest("too many headers"));
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(HttpError::BadRequest("malformed header"));
            };
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let mut request = Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
            body: Vec::new(),
        };

        let length = match request.header("Content-Length") {
            Some(value) => value
                .parse::<usize>()
                .map_err(|_| HttpError::BadRequest("invalid Content-Length header"))?,
            None if request.method == "POST" => return Err(HttpError::LengthRequired),
            None => 0,
        };
        if length > max_body {
            return Err(HttpError::PayloadTooLarge {
                length,
                limit: max_body,
            });
        }

        request.body = vec![0; length];
        reader.read_exact(&mut request.body).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                HttpError::BadRequest("request body is shorter than Content-Length")
            } else {
                HttpError::Io(e)
            }
        })?;

        Ok(request)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request path, without query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Looks up a header by its case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Reads a `\r\n` (or `\n`) terminated line, without the terminator.
///
/// The line may hold up to [`MAX_LINE_BYTES`], not counting the terminator.
fn read_line<R: BufRead>(reader: &mut R) -> Result<String, HttpError> {
    let mut buf = Vec::new();
    reader
        .by_ref()
        .take(MAX_LINE_BYTES as u64 + 2)
        .read_until(b'\n', &mut buf)?;
    let terminated = buf.last() == Some(&b'\n');
    if terminated {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > MAX_LINE_BYTES {
        return Err(HttpError::BadRequest("request line or header too long"));
    }
    if !terminated {
        return Err(HttpError::BadRequest("unexpected end of request head"));
    }
    String::from_utf8(buf).map_err(|_| HttpError::BadRequest("request head is not valid UTF-8"))
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

#[derive(Debug)]
pub struct Response {
    status: Status,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Response {
    /// Creates a response with a JSON-serialized body.
    pub fn json<T: Serialize>(status: Status, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                headers: vec![("Content-Type", "application/json".into())],
                body,
            },
            Err(e) => {
                log::error!("failed to serialize response body: {e}");
                Self {
                    status: Status::INTERNAL_SERVER_ERROR,
                    headers: Vec::new(),
                    body: Vec::new(),
                }
            }
        }
    }

    /// Creates a response with a `{"error": "<message>"}` body.
    pub fn error(status: Status, message: impl fmt::Display) -> Self {
        Self::json(
            status,
            &ErrorBody {
                error: &message.to_string(),
            },
        )
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Writes the response. The connection is always closed afterwards.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write!(w, "HTTP/1.1 {}\r\n", self.status)?;
        for (name, value) in &self.headers {
            write!(w, "{name}: {value}\r\n")?;
        }
        write!(
            w,
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        )?;
        w.write_all(&self.body)?;
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(raw: &[u8]) -> Result<Request, HttpError> {
        Request::read(&mut &*raw, 1024)
    }

    #[test]
    fn parses_request() {
        let request = read(
            b"POST /recognize?debug=1 HTTP/1.1\r\nHost: x\r\ncontent-length: 5\r\n\r\nhello",
        )
        .unwrap();
        assert_eq!(request.method(), "POST");
        assert_eq!(request.path(), "/recognize");
        assert_eq!(request.header("Content-Length"), Some("5"));
        assert_eq!(request.header("host"), Some("x"));
        assert_eq!(request.body(), b"hello");
    }

    #[test]
    fn get_without_body() {
        let request = read(b"GET / HTTP/1.0\n\n").unwrap();
        assert_eq!(request.method(), "GET");
        assert!(request.body().is_empty());
    }

    #[test]
    fn error_statuses() {
        fn status(raw: &[u8]) -> Option<Status> {
            read(raw).unwrap_err().status()
        }

        assert_eq!(status(b"nonsense\r\n\r\n"), Some(Status::BAD_REQUEST));
        assert_eq!(status(b"GET / SPDY/3\r\n\r\n"), Some(Status::BAD_REQUEST));
        assert_eq!(
            status(b"GET / HTTP/1.1\r\nno colon\r\n\r\n"),
            Some(Status::BAD_REQUEST)
        );
        assert_eq!(
            status(b"POST / HTTP/1.1\r\n\r\n"),
            Some(Status::LENGTH_REQUIRED)
        );
        assert_eq!(
            status(b"POST / HTTP/1.1\r\nContent-Length: 2048\r\n\r\n"),
            Some(Status::PAYLOAD_TOO_LARGE)
        );
        assert_eq!(
            status(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort"),
            Some(Status::BAD_REQUEST)
        );
        assert_eq!(status(b"GET / HTTP/1.1\r\nHost"), Some(Status::BAD_REQUEST));
    }

    #[test]
    fn header_length_limit() {
        fn request_with_header_line(len: usize, terminator: &[u8]) -> Vec<u8> {
            let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
            raw.extend(b"X: ");
            raw.extend(std::iter::repeat(b'a').take(len - 3));
            raw.extend(terminator);
            raw.extend(b"\r\n");
            raw
        }

        for terminator in [&b"\r\n"[..], b"\n"] {
            let request = read(&request_with_header_line(MAX_LINE_BYTES, terminator)).unwrap();
            assert_eq!(request.header("x").map(str::len), Some(MAX_LINE_BYTES - 3));

            let raw = request_with_header_line(MAX_LINE_BYTES + 1, terminator);
            assert!(matches!(read(&raw), Err(HttpError::BadRequest(_))));
        }
    }

    #[test]
    fn writes_response() {
        let response = Response::error(Status::METHOD_NOT_ALLOWED, "method not allowed")
            .with_header("Allow", "POST");
        let mut out = Vec::new();
        response.write_to(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"), "{out}");
        assert!(out.contains("Allow: POST\r\n"));
        assert!(out.contains("Content-Type: application/json\r\n"));
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.ends_with("\r\n\r\n{\"error\":\"method not allowed\"}"));
    }
}
