// Minimal HTTP/1.1 reading and writing for the relay.
//
// The relay speaks just enough HTTP for its four JSON endpoints: one
// request per connection, a Content-Length body, and a fixed header set on
// every response (JSON content type plus the CORS headers a browser client
// needs). Parsing is factored into pure-ish helpers over `AsyncBufRead` so
// it can be unit-tested against in-memory buffers without opening sockets.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Upper bound on accepted request bodies. The endpoint payloads are small
/// JSON objects; anything near this size is not a legitimate request.
pub const MAX_BODY_BYTES: usize = 1 << 20;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("request body too large ({0} bytes)")]
    BodyTooLarge(usize),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Request reading
// ---------------------------------------------------------------------------

/// A parsed HTTP request: method, path (query string stripped), and the
/// body decoded as UTF-8.
#[derive(Debug, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Read a single HTTP/1.1 request from `reader`.
///
/// Headers other than `Content-Length` are ignored. A missing
/// `Content-Length` means an empty body.
pub async fn read_request<R>(reader: &mut R) -> Result<Request, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut request_line = String::new();
    let n = reader.read_line(&mut request_line).await?;
    if n == 0 {
        return Err(HttpError::Malformed("empty request"));
    }

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or(HttpError::Malformed("missing method"))?
        .to_string();
    let target = parts
        .next()
        .ok_or(HttpError::Malformed("missing request target"))?;
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut content_length: usize = 0;
    loop {
        let mut header = String::new();
        let n = reader.read_line(&mut header).await?;
        if n == 0 {
            return Err(HttpError::Malformed("truncated headers"));
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| HttpError::Malformed("unparsable content-length"))?;
            }
        }
    }

    if content_length > MAX_BODY_BYTES {
        return Err(HttpError::BodyTooLarge(content_length));
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;
    let body =
        String::from_utf8(body).map_err(|_| HttpError::Malformed("body is not valid UTF-8"))?;

    Ok(Request { method, path, body })
}

// ---------------------------------------------------------------------------
// Response writing
// ---------------------------------------------------------------------------

/// Serialize a JSON response with the relay's fixed header set.
pub fn json_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         {CORS_HEADERS}\
         Connection: close\r\n\
         \r\n\
         {body}",
        reason(status),
        body.len(),
    )
}

/// Serialize a bodyless response (used for the CORS preflight).
pub fn empty_response(status: u16) -> String {
    format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Length: 0\r\n\
         {CORS_HEADERS}\
         Connection: close\r\n\
         \r\n",
        reason(status),
    )
}

const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
     Access-Control-Allow-Methods: POST, OPTIONS\r\n\
     Access-Control-Allow-Headers: Content-Type\r\n";

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
