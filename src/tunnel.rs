use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::buffer_pool;
use crate::error::{ProxyError, Result};
use crate::metrics::{TunnelGauge, TunnelGuard};
use crate::request::ProxyRequest;

/// Literal success line written to the client once a CONNECT tunnel is up
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// Dial the target and relay bytes both ways until both directions finish.
///
/// The target is dialed exactly once; a dial failure drops the connection
/// with no client-visible response. For CONNECT the literal 200 line goes
/// to the client first; otherwise the raw request head becomes the target's
/// first bytes. Either way the connection is a transparent pipe afterwards;
/// later requests on the same client socket are never parsed.
///
/// The gauge is incremented exactly once when the copy phase begins and
/// decremented exactly once when both directions have completed, whichever
/// side errored or finished first.
pub async fn run<CR, CW>(
    request: &ProxyRequest,
    client_reader: CR,
    mut client_writer: CW,
    gauge: Option<Arc<TunnelGauge>>,
) -> Result<()>
where
    CR: AsyncRead + Unpin,
    CW: AsyncWrite + Unpin + Send + 'static,
{
    let target_addr = request.target();
    let mut target = TcpStream::connect(&target_addr)
        .await
        .map_err(|source| ProxyError::Dial {
            target: target_addr.clone(),
            source,
        })?;

    if request.is_connect {
        client_writer.write_all(CONNECT_ESTABLISHED).await?;
    } else {
        target.write_all(&request.raw_head).await?;
    }

    let (target_reader, target_writer) = target.into_split();

    let _guard = TunnelGuard::acquire(gauge);

    let downstream = tokio::spawn(async move { copy_half(target_reader, client_writer).await });
    let upstream = copy_half(client_reader, target_writer).await;
    let downstream = downstream.await;

    match upstream {
        Ok(bytes) => debug!(bytes, target = %target_addr, "client to target finished"),
        Err(err) => debug!(target = %target_addr, "client to target error: {err}"),
    }
    match downstream {
        Ok(Ok(bytes)) => debug!(bytes, target = %target_addr, "target to client finished"),
        Ok(Err(err)) => debug!(target = %target_addr, "target to client error: {err}"),
        Err(err) => warn!(target = %target_addr, "tunnel copy task failed: {err}"),
    }

    Ok(())
}

/// Copy until EOF or I/O error, then half-close the destination so the peer
/// sees end-of-stream. Finishing first never force-closes the opposite
/// direction. There is deliberately no timeout or cancellation here: a
/// stalled peer parks this task until the connection goes away.
async fn copy_half<R, W>(mut src: R, mut dst: W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = buffer_pool::pool().acquire().await;
    let mut total = 0u64;

    let result = loop {
        match src.read(&mut buf).await {
            Ok(0) => break Ok(total),
            Ok(n) => {
                if let Err(err) = dst.write_all(&buf[..n]).await {
                    break Err(err);
                }
                total += n as u64;
            }
            Err(err) => break Err(err),
        }
    };

    // Half-close regardless of how the loop ended, then give the buffer
    // back exactly once.
    let _ = dst.shutdown().await;
    buffer_pool::pool().release(buf).await;

    result
}
