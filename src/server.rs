//! Scene Server (component D): loopback-only static file server rooted at
//! the working directory, so the Render Pool's headless browser can load
//! `shapes.svg` and the assets it references.

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::services::ServeDir;
use tracing::{info, warn};

pub struct SceneServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl SceneServer {
    /// Binds to an OS-assigned loopback port and starts serving
    /// `working_dir` in the background. No request-tracing layer is
    /// attached; the server stays quiet on its own.
    pub async fn start(working_dir: &Path) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("binding scene server to a loopback port")?;
        let addr = listener.local_addr()?;

        let app = Router::new().fallback_service(ServeDir::new(working_dir));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            });
            if let Err(e) = server.await {
                warn!(error = %e, "scene server exited with an error");
            }
        });

        info!(%addr, "scene server listening");
        Ok(SceneServer {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Signals shutdown and waits up to 10s for the server task to exit,
    /// aborting it if it hasn't (mirrors the original's `thread.join(timeout=10)`).
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
                warn!("scene server did not shut down within grace period, abandoning task");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn serves_a_file_from_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("shapes.svg"), b"<svg></svg>").unwrap();

        let server = SceneServer::start(dir.path()).await.unwrap();
        let url = format!("{}/shapes.svg", server.base_url());
        let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
        assert_eq!(body, "<svg></svg>");

        server.shutdown().await;
    }
}
