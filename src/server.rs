use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::credentials::CredentialSet;
use crate::error::{ProxyError, Result};
use crate::filter::DomainBlacklist;
use crate::metrics::TunnelGauge;
use crate::request::{self, ProxyRequest};
use crate::tunnel;

/// Literal challenge written when authorization is required and the
/// presented credential is absent or invalid
pub const AUTH_CHALLENGE: &[u8] =
    b"HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic realm=\"*\"\r\n\r\n";

/// Proxy server: listen address plus the immutable credential set,
/// blacklist and optional tunnel gauge shared read-only by every
/// connection handler.
#[derive(Debug)]
pub struct Server {
    listen_addr: SocketAddr,
    credentials: CredentialSet,
    blacklist: DomainBlacklist,
    gauge: Option<Arc<TunnelGauge>>,
}

impl Server {
    /// Build a server that has not yet bound its socket
    pub fn new(
        listen_addr: SocketAddr,
        credentials: CredentialSet,
        blacklist: DomainBlacklist,
        gauge: Option<Arc<TunnelGauge>>,
    ) -> Self {
        Self {
            listen_addr,
            credentials,
            blacklist,
            gauge,
        }
    }

    /// Whether clients must authenticate
    pub fn is_auth(&self) -> bool {
        !self.credentials.is_empty()
    }

    /// Whether a presented `Proxy-Authorization` value is acceptable
    pub fn validate_credential(&self, presented: &str) -> bool {
        self.credentials.validate(presented)
    }

    /// Whether the host may be proxied (blacklist non-membership)
    pub fn should_proxy(&self, host: &str) -> bool {
        !self.blacklist.is_blocked(host)
    }

    /// Bind the listening socket. A failure here is returned to the caller
    /// rather than aborting the process, so callers may retry on another
    /// address or shut down cleanly.
    pub async fn bind(self) -> Result<BoundServer> {
        let listener =
            TcpListener::bind(self.listen_addr)
                .await
                .map_err(|source| ProxyError::Bind {
                    addr: self.listen_addr,
                    source,
                })?;

        if self.is_auth() {
            info!(
                credentials = self.credentials.len(),
                "proxy authentication enabled"
            );
        }
        if !self.blacklist.is_empty() {
            info!(domains = self.blacklist.len(), "domain blacklist loaded");
        }

        Ok(BoundServer {
            listener,
            server: Arc::new(self),
        })
    }

    /// Bind and run the accept loop
    pub async fn start(self) -> Result<()> {
        self.bind().await?.run().await
    }
}

/// A server that holds its listening socket
#[derive(Debug)]
pub struct BoundServer {
    listener: TcpListener,
    server: Arc<Server>,
}

impl BoundServer {
    /// Actual bound address (useful with OS-assigned ports)
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Unbounded accept loop: one task per accepted connection. Accept
    /// errors are logged and the loop keeps going; per-connection failures
    /// never affect other connections.
    pub async fn run(self) -> Result<()> {
        info!("proxy listening on {}", self.listener.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let server = Arc::clone(&self.server);
                    tokio::spawn(async move {
                        if let Err(err) = serve_conn(stream, &server).await {
                            match err {
                                ProxyError::Io(err) => debug!(%peer, "connection error: {err}"),
                                err => warn!(%peer, "{err}"),
                            }
                        }
                    });
                }
                Err(err) => {
                    warn!("accept error: {err} (continuing)");
                }
            }
        }
    }
}

/// Serve one accepted connection: parse, authorize (at most one 407
/// challenge/retry), filter, tunnel.
async fn serve_conn(stream: TcpStream, server: &Server) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = request::read_request(&mut reader).await?;
    let request = authorize(server, request, &mut reader, &mut write_half).await?;

    if !server.should_proxy(&request.host) {
        return Err(ProxyError::DomainBlocked(request.host));
    }

    debug!(method = %request.method, target = %request.target(), "tunneling");
    tunnel::run(&request, reader, write_half, server.gauge.clone()).await
}

/// Authorization with at most one challenge/retry cycle. The retry parse
/// refreshes only the presented credential; the tunnel proceeds with the
/// first request's head and target (the client resends the whole request,
/// so the byte stream stays aligned).
async fn authorize<R, W>(
    server: &Server,
    request: ProxyRequest,
    reader: &mut R,
    writer: &mut W,
) -> Result<ProxyRequest>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if !server.is_auth() {
        return Ok(request);
    }
    if !request.credential.is_empty() && server.validate_credential(&request.credential) {
        return Ok(request);
    }

    writer.write_all(AUTH_CHALLENGE).await?;

    let retry = request::read_request(reader).await?;
    if server.validate_credential(&retry.credential) {
        Ok(request)
    } else {
        Err(ProxyError::AuthFailed)
    }
}
