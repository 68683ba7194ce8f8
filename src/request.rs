use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{ProxyError, Result};

/// Port assumed for non-CONNECT targets that do not carry one
pub const DEFAULT_HTTP_PORT: &str = "80";

/// Upper bound on request-line + header block; anything larger is malformed
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// One parsed proxy request head.
///
/// `port` is always explicit: taken verbatim from the CONNECT authority, or
/// defaulted to "80" for non-CONNECT targets lacking one. `raw_head` is the
/// byte-exact reconstruction (request-line, headers in received order,
/// trailing blank line) forwarded to the target for non-CONNECT requests.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: String,
    pub is_connect: bool,
    pub host: String,
    pub port: String,
    /// Presented `Proxy-Authorization` value, empty when absent
    pub credential: String,
    pub raw_head: Bytes,
}

impl ProxyRequest {
    /// Dial target in host:port form
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read exactly one request-line and one header block from the stream.
///
/// Never consumes bytes past the blank line that ends the header block, so
/// a request body (or tunneled bytes) stays in the reader. On error the
/// stream is in an unreliable state and must not be parsed again outside
/// the single authentication retry.
pub async fn read_request<R>(reader: &mut R) -> Result<ProxyRequest>
where
    R: AsyncBufRead + Unpin,
{
    let mut head_bytes = 0usize;

    let request_line = read_line(reader, &mut head_bytes).await?;
    let (method, target) = split_request_line(&request_line)?;
    let is_connect = method == "CONNECT";

    let mut headers: Vec<(String, String)> = Vec::new();
    loop {
        let line = read_line(reader, &mut head_bytes).await?;
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or(ProxyError::MalformedRequest("header field without a colon"))?;
        if key.is_empty() {
            return Err(ProxyError::MalformedRequest("header field without a name"));
        }
        headers.push((key.to_string(), value.trim().to_string()));
    }

    let credential = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("Proxy-Authorization"))
        .map(|(_, value)| value.clone())
        .unwrap_or_default();

    let (host, port) = resolve_target(is_connect, target, &headers)?;
    let raw_head = build_raw_head(&request_line, &headers);

    Ok(ProxyRequest {
        method: method.to_string(),
        is_connect,
        host,
        port,
        credential,
        raw_head,
    })
}

/// Read one line, accepting CRLF or bare LF terminators, rejecting EOF
/// before the terminator and heads larger than MAX_HEAD_BYTES. The read is
/// capped so a terminator-less stream cannot buffer without bound.
async fn read_line<R>(reader: &mut R, head_bytes: &mut usize) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let limit = (MAX_HEAD_BYTES - *head_bytes + 1) as u64;
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(limit)
        .read_until(b'\n', &mut buf)
        .await?;
    *head_bytes += n;
    if buf.last() != Some(&b'\n') {
        if n as u64 == limit {
            return Err(ProxyError::MalformedRequest("request head too large"));
        }
        return Err(ProxyError::MalformedRequest(
            "unexpected end of stream in request head",
        ));
    }
    if *head_bytes > MAX_HEAD_BYTES {
        return Err(ProxyError::MalformedRequest("request head too large"));
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf)
        .map_err(|_| ProxyError::MalformedRequest("request head is not valid UTF-8"))
}

/// Split "METHOD request-target PROTO" on its first two spaces. The
/// protocol token is ignored; fewer than two spaces is malformed.
fn split_request_line(line: &str) -> Result<(&str, &str)> {
    let first = line
        .find(' ')
        .ok_or(ProxyError::MalformedRequest("malformed request-line"))?;
    let rest = &line[first + 1..];
    let second = rest
        .find(' ')
        .ok_or(ProxyError::MalformedRequest("malformed request-line"))?;

    let method = &line[..first];
    let target = &rest[..second];
    if method.is_empty() || target.is_empty() {
        return Err(ProxyError::MalformedRequest("malformed request-line"));
    }
    Ok((method, target))
}

fn resolve_target(
    is_connect: bool,
    target: &str,
    headers: &[(String, String)],
) -> Result<(String, String)> {
    if is_connect {
        // Authority form; the port is used verbatim, never defaulted
        let (host, port) = target.rsplit_once(':').ok_or(ProxyError::MalformedRequest(
            "CONNECT target is not host:port",
        ))?;
        if host.is_empty() || port.is_empty() {
            return Err(ProxyError::MalformedRequest(
                "CONNECT target is not host:port",
            ));
        }
        return Ok((host.to_string(), port.to_string()));
    }

    let uri: http::Uri = target
        .parse()
        .map_err(|_| ProxyError::MalformedRequest("unparsable request-target"))?;

    if let Some(host) = uri.host() {
        let port = uri
            .port_u16()
            .map(|p| p.to_string())
            .unwrap_or_else(|| DEFAULT_HTTP_PORT.to_string());
        return Ok((host.to_string(), port));
    }

    // Relative target: the host comes from the Host header
    let value = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("Host"))
        .map(|(_, value)| value.as_str())
        .ok_or(ProxyError::MalformedRequest(
            "relative request-target without a Host header",
        ))?;
    Ok(split_host_port(value))
}

/// Split a Host header value into host and port, defaulting the port to 80.
/// Only a trailing all-digit component counts as a port, so bracketless
/// IPv6 literals fall through whole.
fn split_host_port(value: &str) -> (String, String) {
    match value.rsplit_once(':') {
        Some((host, port))
            if !host.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            (host.to_string(), port.to_string())
        }
        _ => (value.to_string(), DEFAULT_HTTP_PORT.to_string()),
    }
}

fn build_raw_head(request_line: &str, headers: &[(String, String)]) -> Bytes {
    let estimated = request_line.len()
        + headers
            .iter()
            .map(|(key, value)| key.len() + value.len() + 4)
            .sum::<usize>()
        + 4;
    let mut head = Vec::with_capacity(estimated);

    head.extend_from_slice(request_line.as_bytes());
    head.extend_from_slice(b"\r\n");
    for (key, value) in headers {
        head.extend_from_slice(key.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");

    Bytes::from(head)
}
