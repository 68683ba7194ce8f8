use std::convert::Infallible;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::warn;

/// Gauge of currently active tunnels.
///
/// The connection path only ever increments and decrements it; how the
/// value is surfaced is the metrics listener's concern.
#[derive(Debug, Default)]
pub struct TunnelGauge {
    active: AtomicI64,
}

impl TunnelGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn current(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }
}

/// RAII guard tying the gauge to the tunnel copy phase: increments exactly
/// once on acquire, decrements exactly once on drop.
pub struct TunnelGuard {
    gauge: Option<Arc<TunnelGauge>>,
}

impl TunnelGuard {
    pub fn acquire(gauge: Option<Arc<TunnelGauge>>) -> Self {
        if let Some(gauge) = &gauge {
            gauge.inc();
        }
        Self { gauge }
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        if let Some(gauge) = self.gauge.take() {
            gauge.dec();
        }
    }
}

/// Serve the metrics HTTP listener: `GET /metrics` reports the gauge in
/// Prometheus text format, anything else is a 404. Runs until the task is
/// dropped; per-connection errors are logged and do not stop the loop.
pub async fn serve_metrics(listener: TcpListener, gauge: Arc<TunnelGauge>) {
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let gauge = Arc::clone(&gauge);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let gauge = Arc::clone(&gauge);
                        async move { render(&req, &gauge) }
                    });
                    if let Err(err) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        warn!("metrics connection error: {err}");
                    }
                });
            }
            Err(err) => warn!("metrics accept error: {err}"),
        }
    }
}

fn render(
    req: &Request<hyper::body::Incoming>,
    gauge: &TunnelGauge,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let response = if req.uri().path() == "/metrics" {
        let body = format!(
            "# TYPE httun_active_tunnels gauge\nhttun_active_tunnels {}\n",
            gauge.current()
        );
        Response::new(Full::new(Bytes::from(body)))
    } else {
        let mut resp = Response::new(Full::new(Bytes::new()));
        *resp.status_mut() = StatusCode::NOT_FOUND;
        resp
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn test_gauge_inc_dec() {
        let gauge = TunnelGauge::new();
        assert_eq!(gauge.current(), 0);

        gauge.inc();
        gauge.inc();
        assert_eq!(gauge.current(), 2);

        gauge.dec();
        assert_eq!(gauge.current(), 1);
    }

    #[test]
    fn test_guard_increments_once_and_decrements_on_drop() {
        let gauge = Arc::new(TunnelGauge::new());

        {
            let _guard = TunnelGuard::acquire(Some(Arc::clone(&gauge)));
            assert_eq!(gauge.current(), 1);
        }

        assert_eq!(gauge.current(), 0);
    }

    #[test]
    fn test_guard_without_gauge_is_a_noop() {
        let _guard = TunnelGuard::acquire(None);
    }

    async fn metrics_request(path: &str, gauge: Arc<TunnelGauge>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_metrics(listener, gauge));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                    .as_bytes(),
            )
            .await
            .unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_metrics_endpoint_reports_gauge() {
        let gauge = Arc::new(TunnelGauge::new());
        gauge.inc();
        gauge.inc();

        let response = metrics_request("/metrics", Arc::clone(&gauge)).await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("httun_active_tunnels 2"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let gauge = Arc::new(TunnelGauge::new());
        let response = metrics_request("/other", gauge).await;
        assert!(response.starts_with("HTTP/1.1 404"));
    }
}
