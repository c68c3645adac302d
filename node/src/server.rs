use crate::errors::Result;
use crate::metrics::Metrics;
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// How long one tick waits for a client to connect.
pub const ACCEPT_POLL: Duration = Duration::from_millis(10);
/// Upper bound for reading, handling and answering one connection.
pub const REQUEST_BUDGET: Duration = Duration::from_secs(2);

/// Read buffer ceiling for request head and body (hyper's minimum).
const MAX_BUF_BYTES: usize = 8192;

/// Control surface listener, served one connection per tick.
pub struct ControlServer {
    listener: TcpListener,
    router: Router,
    metrics: Metrics,
}

impl ControlServer {
    pub async fn bind(addr: &str, router: Router, metrics: Metrics) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("HTTP control surface listening on {}", listener.local_addr()?);
        info!("  GET  /config");
        info!("  POST /config");
        info!("  GET  /status");
        Ok(Self {
            listener,
            router,
            metrics,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts at most one pending connection and serves it to completion,
    /// response flushed and socket closed. Returns whether a client was served.
    pub async fn poll(&mut self) -> bool {
        let (stream, peer) = match tokio::time::timeout(ACCEPT_POLL, self.listener.accept()).await {
            Err(_) => return false,
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("Failed to accept connection: {}", e);
                return false;
            }
        };

        debug!("HTTP connection from {}", peer);
        self.metrics.http_requests_total.inc();

        let service = TowerToHyperService::new(self.router.clone());
        let connection = http1::Builder::new()
            .keep_alive(false)
            .max_buf_size(MAX_BUF_BYTES)
            .serve_connection(TokioIo::new(stream), service);

        match tokio::time::timeout(REQUEST_BUDGET, connection).await {
            Ok(Ok(())) => debug!("HTTP connection from {} closed", peer),
            Ok(Err(e)) => warn!("HTTP connection from {} failed: {}", peer, e),
            Err(_) => warn!(
                "HTTP connection from {} exceeded {:?}, dropped",
                peer, REQUEST_BUDGET
            ),
        }

        true
    }
}
