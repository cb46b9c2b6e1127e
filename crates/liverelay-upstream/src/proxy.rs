//! HTTP CONNECT tunnelling for proxied upstream connections.

use http::Uri;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::UpstreamError;

/// Upper bound on the proxy's CONNECT response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

const DEFAULT_PROXY_PORT: u16 = 80;

/// Parse `http://host:port` into its socket authority.
pub fn proxy_authority(proxy_url: &str) -> Result<(String, u16), UpstreamError> {
    let uri: Uri = proxy_url
        .parse()
        .map_err(|e| UpstreamError::Proxy(format!("invalid proxy url {proxy_url}: {e}")))?;
    match uri.scheme_str() {
        Some("http") | None => {}
        Some(other) => {
            return Err(UpstreamError::Proxy(format!(
                "unsupported proxy scheme: {other}"
            )));
        }
    }
    let host = uri
        .host()
        .ok_or_else(|| UpstreamError::Proxy(format!("proxy url has no host: {proxy_url}")))?;
    Ok((host.to_owned(), uri.port_u16().unwrap_or(DEFAULT_PROXY_PORT)))
}

/// Open a TCP stream to `target_host:target_port` through the proxy.
///
/// On return the stream is a raw tunnel; the caller runs its own handshake
/// over it.
pub async fn connect_tunnel(
    proxy_url: &str,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream, UpstreamError> {
    let (proxy_host, proxy_port) = proxy_authority(proxy_url)?;
    let mut stream = TcpStream::connect((proxy_host.as_str(), proxy_port)).await?;

    let authority = format!("{target_host}:{target_port}");
    let request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let head = read_response_head(&mut stream).await?;
    let status_line = head.lines().next().unwrap_or_default();
    match status_line.split_whitespace().nth(1) {
        Some(code) if code.starts_with('2') => Ok(stream),
        _ => Err(UpstreamError::Proxy(format!(
            "proxy refused CONNECT {authority}: {status_line}"
        ))),
    }
}

/// Read byte-by-byte up to the blank line so no tunnelled bytes are consumed.
async fn read_response_head(stream: &mut TcpStream) -> Result<String, UpstreamError> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(UpstreamError::Proxy("proxy response head too large".into()));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(UpstreamError::Proxy(
                "proxy closed connection during CONNECT".into(),
            ));
        }
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}
