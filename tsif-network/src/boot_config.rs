//! First-boot configuration endpoint.
//!
//! Guests fetch a static cloud-config document over plain HTTP from the URL
//! on their kernel command line. Every guest receives the same payload.

use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use tsif_core::{BootConfigSettings, Result, TsifError};

pub struct BootConfigServer {
    path: String,
    payload: Arc<str>,
}

impl BootConfigServer {
    pub fn new(settings: &BootConfigSettings) -> Self {
        Self {
            path: settings.path.clone(),
            payload: Arc::from(settings.payload.as_str()),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.path, get(serve_payload))
            .with_state(Arc::clone(&self.payload))
    }

    /// Binds `addr` and serves in a background task until the returned
    /// handle is shut down or dropped.
    pub async fn start(&self, addr: SocketAddr) -> Result<BootConfigHandle> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            TsifError::BootConfigError(format!("failed to bind {addr}: {e}"))
        })?;
        let local_addr = listener.local_addr()?;
        info!("Serving boot config at http://{}{}", local_addr, self.path);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = self.router();

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;

            if let Err(e) = result {
                error!("Boot config server failed: {}", e);
            }
        });

        Ok(BootConfigHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

async fn serve_payload(State(payload): State<Arc<str>>) -> impl IntoResponse {
    info!("Serving boot config ({} bytes)", payload.len());
    (
        [(header::CONTENT_TYPE, "text/cloud-config")],
        payload.to_string(),
    )
}

/// A running boot-config listener.
pub struct BootConfigHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl BootConfigHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signals the server to stop accepting connections.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Stops the server and waits for it to finish.
    pub async fn stop(mut self) -> Result<()> {
        self.shutdown();
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| TsifError::BootConfigError(format!("server task failed: {e}")))?;
        }
        info!("Boot config server on {} stopped", self.local_addr);
        Ok(())
    }
}

impl Drop for BootConfigHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
