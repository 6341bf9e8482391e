use std::net::SocketAddr;
use std::sync::Arc;

use solo_core::{DependencyError, LogicalName};
use solo_telemetry::MetricsRecorder;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::actor::{ActorConfig, SessionActor};
use crate::config::{ConfigError, ServerConfig};
use crate::dependency::{Dependency, HttpDependency};
use crate::directory::ActorDirectory;
use crate::handler::SessionHandler;
use crate::router::{build_router, RouterState};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build dependency client: {0}")]
    Dependency(#[from] DependencyError),
    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
}

/// Create and start the server against the configured HTTP dependency.
pub async fn start(
    config: ServerConfig,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, ServerError> {
    config.validate()?;
    let dependency = Arc::new(HttpDependency::new(config.dependency_url.clone())?);
    info!(url = %dependency.url(), "dependency configured");
    start_with_dependency(config, dependency, metrics).await
}

/// Start the server with an explicit dependency. Every instance the
/// directory creates shares it.
pub async fn start_with_dependency(
    config: ServerConfig,
    dependency: Arc<dyn Dependency>,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, ServerError> {
    config.validate()?;
    let actor_config = ActorConfig::from(&config);
    let directory = Arc::new(ActorDirectory::new(move |id| {
        let actor: Arc<dyn SessionHandler> = Arc::new(SessionActor::new(
            id.clone(),
            actor_config.clone(),
            Arc::clone(&dependency),
            Arc::clone(&metrics),
        ));
        actor
    }));

    let name = LogicalName::new(config.logical_name.clone());
    let router = build_router(RouterState::new(Arc::clone(&directory), name.clone()));
    let listener = TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;

    info!(%addr, logical_name = %name, "solo server started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: addr.port(),
        addr,
        name,
        directory,
        shutdown: shutdown_tx,
        server,
    })
}

/// Handle returned by `start()`. Dropping it stops accepting new connections.
pub struct ServerHandle {
    pub port: u16,
    addr: SocketAddr,
    name: LogicalName,
    directory: Arc<ActorDirectory>,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn directory(&self) -> &Arc<ActorDirectory> {
        &self.directory
    }

    /// The instance all routed traffic lands on.
    pub fn actor(&self) -> Arc<dyn SessionHandler> {
        self.directory.resolve(&self.name)
    }

    /// Stop accepting connections and wait for the listener task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.server.await {
            warn!(error = %e, "server task failed");
        }
        info!("solo server stopped");
    }
}
