//! Plain HTTP on the WebSocket port.
//!
//! Every connection starts with an HTTP request. The head is peeked
//! without consuming it: WebSocket upgrades are handed to tungstenite
//! untouched, anything else is answered here and the connection closed.
//!
//! Routes:
//! - `GET /` and `GET /index.html`: the browser viewer
//! - `GET /health`: `{"status":"healthy","clients":N}`

use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest request head accepted.
pub const MAX_HEAD: usize = 8 * 1024;

/// Time allowed for the request head to arrive.
pub const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

const VIEWER_HTML: &str = include_str!("viewer.html");

/// Request line and the headers the router cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    /// `Upgrade: websocket` was present.
    pub upgrade: bool,
    /// Bytes up to and including the blank line.
    pub len: usize,
}

impl RequestHead {
    /// Parse a request head from the start of `buf`.
    ///
    /// `None` until the terminating blank line has arrived.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let end = buf.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
        let text = String::from_utf8_lossy(&buf[..end]);
        let mut lines = text.split("\r\n");

        let mut request_line = lines.next()?.split_ascii_whitespace();
        let method = request_line.next()?.to_string();
        let target = request_line.next()?;
        let path = target.split(['?', '#']).next().unwrap_or("/").to_string();

        let upgrade = lines
            .filter_map(|line| line.split_once(':'))
            .any(|(name, value)| {
                name.trim().eq_ignore_ascii_case("upgrade")
                    && value.trim().eq_ignore_ascii_case("websocket")
            });

        Some(Self {
            method,
            path,
            upgrade,
            len: end,
        })
    }
}

/// What to do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    WebSocket,
    Viewer,
    Health,
    NotFound,
    MethodNotAllowed,
}

impl Route {
    pub fn of(head: &RequestHead) -> Self {
        if head.upgrade {
            return Route::WebSocket;
        }
        if head.method != "GET" && head.method != "HEAD" {
            return Route::MethodNotAllowed;
        }
        match head.path.as_str() {
            "/" | "/index.html" => Route::Viewer,
            "/health" => Route::Health,
            _ => Route::NotFound,
        }
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    clients: usize,
}

/// Wait for a complete request head without consuming it.
///
/// `Ok(None)` if the peer closed first, or the head is oversized or
/// unparsable.
pub async fn peek_head(stream: &TcpStream) -> std::io::Result<Option<RequestHead>> {
    let mut buf = vec![0u8; MAX_HEAD];
    let mut seen = 0;

    let peeked = tokio::time::timeout(HEAD_TIMEOUT, async {
        loop {
            let n = stream.peek(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            if let Some(head) = RequestHead::parse(&buf[..n]) {
                return Ok(Some(head));
            }
            if n == MAX_HEAD {
                return Ok(None);
            }
            // Peek returns at once while buffered bytes are unchanged.
            if n == seen {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            seen = n;
        }
    })
    .await;

    match peeked {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "request head timed out",
        )),
    }
}

/// Answer a non-upgrade request and close the connection.
pub async fn respond(
    mut stream: TcpStream,
    head: &RequestHead,
    route: Route,
    clients: usize,
) -> std::io::Result<()> {
    let mut consumed = vec![0u8; head.len];
    stream.read_exact(&mut consumed).await?;

    let (status, content_type, body) = match route {
        Route::Viewer => ("200 OK", "text/html; charset=utf-8", VIEWER_HTML.to_string()),
        Route::Health => {
            let health = Health {
                status: "healthy",
                clients,
            };
            let body = serde_json::to_string(&health).map_err(std::io::Error::other)?;
            ("200 OK", "application/json", body)
        }
        Route::NotFound => ("404 Not Found", "text/plain", "not found\n".to_string()),
        Route::MethodNotAllowed => (
            "405 Method Not Allowed",
            "text/plain",
            "method not allowed\n".to_string(),
        ),
        Route::WebSocket => (
            "400 Bad Request",
            "text/plain",
            "unexpected upgrade\n".to_string(),
        ),
    };

    let mut response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-store\r\n\
         Connection: close\r\n\r\n",
        body.len()
    );
    if head.method != "HEAD" {
        response.push_str(&body);
    }

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(raw: &str) -> RequestHead {
        RequestHead::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn incomplete_head_is_not_parsed() {
        assert_eq!(RequestHead::parse(b"GET / HTTP/1.1\r\nHost: x\r\n"), None);
    }

    #[test]
    fn routes_plain_requests() {
        assert_eq!(Route::of(&head("GET / HTTP/1.1\r\n\r\n")), Route::Viewer);
        assert_eq!(Route::of(&head("GET /index.html HTTP/1.1\r\n\r\n")), Route::Viewer);
        assert_eq!(Route::of(&head("GET /health?x=1 HTTP/1.1\r\n\r\n")), Route::Health);
        assert_eq!(Route::of(&head("GET /nope HTTP/1.1\r\n\r\n")), Route::NotFound);
        assert_eq!(
            Route::of(&head("POST /health HTTP/1.1\r\n\r\n")),
            Route::MethodNotAllowed
        );
    }

    #[test]
    fn upgrade_header_is_case_insensitive() {
        let raw = "GET / HTTP/1.1\r\nHost: a\r\nupgrade: WebSocket\r\nConnection: Upgrade\r\n\r\n";
        let parsed = head(raw);
        assert!(parsed.upgrade);
        assert_eq!(parsed.len, raw.len());
        assert_eq!(Route::of(&parsed), Route::WebSocket);
    }

    #[test]
    fn head_length_excludes_body() {
        let parsed = head("GET /health HTTP/1.1\r\n\r\ntrailing");
        assert_eq!(parsed.len, "GET /health HTTP/1.1\r\n\r\n".len());
        assert!(!parsed.upgrade);
    }

    #[test]
    fn viewer_page_connects_back_to_this_host() {
        assert!(VIEWER_HTML.contains("location.host"));
        assert!(VIEWER_HTML.contains("\"viewport\""));
    }
}
