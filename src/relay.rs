// FlightDeck - relay.rs
//
// HTTP-triggered TCP/DNS relay agent.
//
// Every request, whatever its path or method, carries a target descriptor
// in the `X-Forwarded-Url` header:
//   host,port        open TCP to host:port, send the request body, and
//                    stream everything read back until the peer closes
//   host,port,dns    resolve host and return the address, base64-encoded,
//   host,dns         in the `ETag` response header (empty body)
//
// Connection and resolution failures come back as 502 with a plain-text
// body `<message> (<os error code>)`; a missing or malformed descriptor is
// a 400. Once a relayed reply has started, the status is already sent and a
// read error just ends the body.

use crate::util::constants::{
    RELAY_CONNECT_TIMEOUT_SECS, RELAY_DNS_HEADER, RELAY_DNS_MARKER, RELAY_TARGET_HEADER,
};
use crate::util::error::RelayError;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::io::ReaderStream;

/// Parsed `X-Forwarded-Url` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayTarget {
    /// Resolve `host` and report its address.
    Resolve { host: String },
    /// Relay the request body to `host:port`.
    Connect { host: String, port: u16 },
}

impl RelayTarget {
    /// Parse `host,port[,dns]`. `host,dns` is accepted as a DNS request too.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
        let malformed = || RelayError::MalformedTarget {
            raw: raw.to_string(),
        };

        let (host, rest) = match fields.split_first() {
            Some((host, rest)) if !host.is_empty() && !rest.is_empty() && rest.len() <= 2 => {
                (host.to_string(), rest)
            }
            _ => return Err(malformed()),
        };

        match rest {
            [second] if is_dns_marker(second) => return Ok(Self::Resolve { host }),
            [_, third] if is_dns_marker(third) => return Ok(Self::Resolve { host }),
            [_, _] => return Err(malformed()),
            _ => {}
        }

        let port = rest[0]
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| RelayError::InvalidPort {
                raw: rest[0].to_string(),
            })?;
        Ok(Self::Connect { host, port })
    }
}

fn is_dns_marker(field: &str) -> bool {
    field.eq_ignore_ascii_case(RELAY_DNS_MARKER)
}

/// Resolve `host`, preferring an IPv4 address.
pub async fn resolve(host: &str) -> io::Result<IpAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0)).await?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address found for {host}"),
            )
        })
}

/// Connect to `host:port` and write `body` line by line. The returned
/// stream yields the peer's reply until it closes the connection.
pub async fn forward(host: &str, port: u16, body: &[u8]) -> io::Result<TcpStream> {
    let timeout = Duration::from_secs(RELAY_CONNECT_TIMEOUT_SECS);
    let mut stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(connected) => connected?,
        Err(_) => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {host}:{port} timed out"),
            ))
        }
    };

    for line in body.split_inclusive(|b| *b == b'\n') {
        stream.write_all(line).await?;
    }
    stream.flush().await?;
    Ok(stream)
}

/// Router answering every path and method with the relay handler.
pub fn router() -> Router {
    Router::new().fallback(handle)
}

/// Serve the relay on `listen` until Ctrl+C.
pub async fn serve(listen: &str) -> Result<(), RelayError> {
    let listen_err = |source| RelayError::Listen {
        addr: listen.to_string(),
        source,
    };
    let listener = TcpListener::bind(listen).await.map_err(listen_err)?;
    match listener.local_addr() {
        Ok(addr) => tracing::info!(%addr, "Relay listening"),
        Err(_) => tracing::info!(addr = listen, "Relay listening"),
    }

    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(listen_err)?;

    tracing::info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for Ctrl+C; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}

async fn handle(headers: HeaderMap, body: Bytes) -> Response {
    let Some(raw) = headers
        .get(RELAY_TARGET_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::BAD_REQUEST, RelayError::MissingTarget.to_string()).into_response();
    };

    let target = match RelayTarget::parse(raw) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(descriptor = raw, error = %e, "Rejected relay request");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match target {
        RelayTarget::Resolve { host } => match resolve(&host).await {
            Ok(ip) => {
                tracing::debug!(%host, %ip, "Resolved");
                let mut response = StatusCode::OK.into_response();
                if let Ok(value) = HeaderValue::from_str(&STANDARD.encode(ip.to_string())) {
                    response
                        .headers_mut()
                        .insert(HeaderName::from_static(RELAY_DNS_HEADER), value);
                }
                response
            }
            Err(e) => {
                tracing::warn!(%host, error = %e, "Resolution failed");
                (StatusCode::BAD_GATEWAY, error_body(&e)).into_response()
            }
        },
        RelayTarget::Connect { host, port } => match forward(&host, port, &body).await {
            Ok(stream) => {
                tracing::debug!(%host, port, sent = body.len(), "Relaying reply");
                (StatusCode::OK, Body::from_stream(ReaderStream::new(stream))).into_response()
            }
            Err(e) => {
                tracing::warn!(%host, port, error = %e, "Relay failed");
                (StatusCode::BAD_GATEWAY, error_body(&e)).into_response()
            }
        },
    }
}

/// `<message> (<code>)`, code 0 when the error carries no OS code.
fn error_body(e: &io::Error) -> String {
    let code = e.raw_os_error().unwrap_or(0);
    let text = e.to_string();
    // OS errors already end in " (os error N)"; keep the code only once.
    let suffix = format!(" (os error {code})");
    let message = text.strip_suffix(suffix.as_str()).unwrap_or(&text);
    format!("{message} ({code})")
}

// =============================================================================
// Unit tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use futures_util::StreamExt;
    use tokio::io::AsyncReadExt;
    use tower::ServiceExt;

    #[test]
    fn test_parse_connect_target() {
        assert_eq!(
            RelayTarget::parse("example.com,443").unwrap(),
            RelayTarget::Connect {
                host: "example.com".into(),
                port: 443
            }
        );
        assert_eq!(
            RelayTarget::parse(" 10.0.0.1 , 80 ").unwrap(),
            RelayTarget::Connect {
                host: "10.0.0.1".into(),
                port: 80
            }
        );
    }

    #[test]
    fn test_parse_dns_in_second_or_third_field() {
        let expected = RelayTarget::Resolve {
            host: "example.com".into(),
        };
        assert_eq!(RelayTarget::parse("example.com,80,dns").unwrap(), expected);
        assert_eq!(RelayTarget::parse("example.com,dns").unwrap(), expected);
        assert_eq!(RelayTarget::parse("example.com,80,DNS").unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_bad_descriptors() {
        for raw in ["", "host", ",80", "host,80,tcp", "a,1,dns,x"] {
            assert!(
                matches!(RelayTarget::parse(raw), Err(RelayError::MalformedTarget { .. })),
                "{raw:?}"
            );
        }
        for raw in ["host,http", "host,0", "host,70000"] {
            assert!(
                matches!(RelayTarget::parse(raw), Err(RelayError::InvalidPort { .. })),
                "{raw:?}"
            );
        }
    }

    /// One-shot server: reads a line, answers `echo: <line>`, closes.
    async fn echo_once() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut byte = [0u8; 1];
            while sock.read_exact(&mut byte).await.is_ok() {
                buf.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            sock.write_all(b"echo: ").await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_forward_returns_peer_output() {
        let port = echo_once().await;
        let mut stream = forward("127.0.0.1", port, b"hello\n").await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"echo: hello\n");
    }

    #[tokio::test]
    async fn test_router_streams_reply_before_peer_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"first\n").await.unwrap();
            let _ = release_rx.await;
            sock.write_all(b"second\n").await.unwrap();
        });

        let req = Request::builder()
            .header("X-Forwarded-Url", format!("127.0.0.1,{port}"))
            .body(Body::empty())
            .unwrap();
        let resp = router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let mut chunks = resp.into_body().into_data_stream();
        let first = tokio::time::timeout(Duration::from_secs(5), chunks.next())
            .await
            .expect("first chunk arrives while the peer is still open")
            .unwrap()
            .unwrap();
        assert_eq!(&first[..], b"first\n");

        release_tx.send(()).unwrap();
        let mut rest = Vec::new();
        while let Some(chunk) = chunks.next().await {
            rest.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(rest, b"second\n");
    }

    #[test]
    fn test_error_body_keeps_message_and_code() {
        let custom = io::Error::new(io::ErrorKind::Other, "no address found for x");
        assert_eq!(error_body(&custom), "no address found for x (0)");

        let os = io::Error::from_raw_os_error(2);
        let body = error_body(&os);
        assert!(body.ends_with(" (2)"), "{body}");
        assert!(!body.contains("os error"), "{body}");
    }

    #[tokio::test]
    async fn test_router_relays_body() {
        let port = echo_once().await;
        let req = Request::builder()
            .uri("/anything")
            .header("X-Forwarded-Url", format!("127.0.0.1,{port}"))
            .body(Body::from("ping\n"))
            .unwrap();
        let resp = router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"echo: ping\n");
    }

    #[tokio::test]
    async fn test_router_dns_sets_etag() {
        let req = Request::builder()
            .header("X-Forwarded-Url", "127.0.0.1,0,dns")
            .body(Body::empty())
            .unwrap();
        let resp = router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let etag = resp.headers().get("etag").unwrap().to_str().unwrap();
        assert_eq!(STANDARD.decode(etag).unwrap(), b"127.0.0.1");
    }

    #[tokio::test]
    async fn test_router_missing_header_is_bad_request() {
        let req = Request::builder().body(Body::empty()).unwrap();
        let resp = router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_router_reports_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let req = Request::builder()
            .header("X-Forwarded-Url", format!("127.0.0.1,{port}"))
            .body(Body::empty())
            .unwrap();
        let resp = router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.ends_with(')'), "{text}");
        assert!(!text.contains("os error"), "{text}");
        assert!(!text.starts_with('('), "{text}");
    }
}
