//! Process lifecycle: store bootstrap, plaintext + TLS listeners, graceful shutdown.
//!
//! ```text
//! Starting -> StoreReady -> ListenersUp -> Serving
//!                    (signal) -> ShuttingDown -> Stopped
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum_server::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::build_app;
use crate::config::AppConfig;
use crate::db::{StorageError, Store};
use crate::state::AppState;
use crate::tls::load_tls_config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    StoreReady,
    ListenersUp,
    Serving,
    ShuttingDown,
    Stopped,
}

fn enter(phase: Phase) {
    info!(?phase, "lifecycle");
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("store initialization failed: {0}")]
    StoreInit(#[source] StorageError),
    #[error("invalid listen address {0:?}")]
    Address(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(#[from] std::io::Error),
    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Connects and initializes the store. Any failure here is fatal.
pub async fn prepare_store(config: &AppConfig) -> Result<Store, BootstrapError> {
    let store = Store::connect(&config.database_url)
        .await
        .map_err(BootstrapError::StoreInit)?;
    store.initialize().await.map_err(BootstrapError::StoreInit)?;
    if config.seed_sample_data {
        store
            .seed_sample_contacts()
            .await
            .map_err(BootstrapError::StoreInit)?;
    }
    Ok(store)
}

fn bind_std(host: &str, port: u16) -> Result<std::net::TcpListener, BootstrapError> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|_| BootstrapError::Address(format!("{host}:{port}")))?;
    let listener = std::net::TcpListener::bind(addr)
        .and_then(|l| l.set_nonblocking(true).map(|_| l))
        .map_err(|source| BootstrapError::Bind { addr, source })?;
    Ok(listener)
}

/// Running listeners and the handles used to stop them.
pub struct Listeners {
    pub http_addr: SocketAddr,
    pub https_addr: Option<SocketAddr>,
    handles: Vec<Handle>,
    tasks: Vec<JoinHandle<std::io::Result<()>>>,
}

impl Listeners {
    /// Binds the plaintext listener, then the TLS listener if the certificate
    /// loads. A certificate failure leaves the service on plaintext only.
    pub async fn bind(config: &AppConfig, app: Router) -> Result<Self, BootstrapError> {
        let mut handles = Vec::new();
        let mut tasks = Vec::new();

        let http = bind_std(&config.host, config.http_port)?;
        let http_addr = http.local_addr()?;
        let handle = Handle::new();
        let service = app.clone().into_make_service();
        let server = axum_server::from_tcp(http).handle(handle.clone());
        tasks.push(tokio::spawn(async move { server.serve(service).await }));
        handles.push(handle);
        info!(address = %http_addr, "HTTP listener started");

        let https_addr = match load_tls_config(&config.tls).await {
            Ok(tls) => {
                let https = bind_std(&config.host, config.https_port)?;
                let addr = https.local_addr()?;
                let handle = Handle::new();
                let service = app.into_make_service();
                let server = axum_server::from_tcp_rustls(https, tls).handle(handle.clone());
                tasks.push(tokio::spawn(async move { server.serve(service).await }));
                handles.push(handle);
                info!(address = %addr, "HTTPS listener started");
                Some(addr)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    cert = ?config.tls.cert_path,
                    key = ?config.tls.key_path,
                    "TLS certificate could not be loaded; serving HTTP only"
                );
                None
            }
        };

        Ok(Self {
            http_addr,
            https_addr,
            handles,
            tasks,
        })
    }

    /// Closes every listener and waits for each server to finish.
    pub async fn shutdown(self) -> Result<(), BootstrapError> {
        for handle in &self.handles {
            handle.graceful_shutdown(None);
        }
        for task in self.tasks {
            task.await??;
        }
        Ok(())
    }
}

/// Runs the service until `shutdown` resolves.
pub async fn serve<F>(config: AppConfig, shutdown: F) -> Result<(), BootstrapError>
where
    F: Future<Output = ()>,
{
    enter(Phase::Starting);
    let config = Arc::new(config);
    let store = prepare_store(&config).await?;
    enter(Phase::StoreReady);

    let app = build_app(AppState::from_parts(store, config.clone()));
    let listeners = Listeners::bind(&config, app).await?;
    enter(Phase::ListenersUp);
    info!(http = %listeners.http_addr, https = ?listeners.https_addr, "listeners up");

    enter(Phase::Serving);
    shutdown.await;

    enter(Phase::ShuttingDown);
    listeners.shutdown().await?;
    enter(Phase::Stopped);
    info!("shutdown complete");
    Ok(())
}

pub async fn run(config: AppConfig) -> Result<(), BootstrapError> {
    serve(config, shutdown_signal()).await
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
