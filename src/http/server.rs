//! HTTP server implementation.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{Result, TurnstileError};

/// HTTP server for the guarded application.
pub struct HttpServer {
    /// Bound listener
    listener: TcpListener,
    /// The application, already wrapped with the admission layer
    router: Router,
}

impl HttpServer {
    /// Bind the listen address.
    pub async fn bind(addr: SocketAddr, router: Router) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!(addr = %addr, error = %e, "Failed to bind HTTP listener");
            TurnstileError::Io(e)
        })?;
        Ok(Self { listener, router })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves. Peer addresses
    /// are exposed to handlers as `ConnectInfo<SocketAddr>`.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        info!(
            addr = ?self.listener.local_addr().ok(),
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitSettings;
    use crate::http::{application, with_admission, AdmissionState};
    use crate::ratelimit::{AdmissionController, ProtectedRoutes};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    async fn post_refresh(addr: SocketAddr) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                b"POST /api/refresh HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        String::from_utf8_lossy(&raw).to_lowercase()
    }

    #[tokio::test]
    async fn test_server_enforces_per_peer_quota() {
        let controller = Arc::new(AdmissionController::local_only(RateLimitSettings {
            max_requests: 1,
            ..Default::default()
        }));
        let state = AdmissionState::new(controller.clone(), ProtectedRoutes::default());
        let router = with_admission(application(), state);

        let server = HttpServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)), router)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(async {
            let _ = shutdown_rx.await;
        }));

        let first = post_refresh(addr).await;
        assert!(first.starts_with("http/1.1 200"));
        assert!(first.contains("x-ratelimit-remaining: 0"));

        let second = post_refresh(addr).await;
        assert!(second.starts_with("http/1.1 429"));
        assert!(second.contains("retry-after:"));

        // The peer address, not a header, keyed the quota
        assert!(controller.local().entry("127.0.0.1:/api/refresh").is_some());

        shutdown_tx.send(()).unwrap();
        tokio_test::assert_ok!(handle.await.unwrap());
    }
}
