use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use solo_core::{format_error, format_reply, ConnectionId, DependencyError, InstanceId, Payload};
use solo_telemetry::MetricsRecorder;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::{self, ConnectionHandle, ConnectionState, ABNORMAL_CLOSURE, NO_STATUS};
use crate::dependency::Dependency;
use crate::handler::SessionHandler;
use crate::router::NO_OP_PATH;
use crate::upgrade::Upgrade;

const TLS_HANDSHAKE_FAILURE: u16 = 1015;

pub const METRIC_ACCEPTED: &str = "solo.connections.accepted";
pub const METRIC_RECEIVED: &str = "solo.messages.received";
pub const METRIC_FAILURES: &str = "solo.dependency.failures";
pub const METRIC_LATENCY: &str = "solo.dependency.latency_ms";

/// Per-actor settings derived from [`ServerConfig`].
#[derive(Clone, Debug)]
pub struct ActorConfig {
    pub reply_tag: String,
    pub close_reason: String,
    pub dependency_timeout: Duration,
    pub max_send_queue: usize,
    pub max_message_size: usize,
}

impl From<&ServerConfig> for ActorConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            reply_tag: config.reply_tag.clone(),
            close_reason: config.close_reason.clone(),
            dependency_timeout: config.dependency_timeout(),
            max_send_queue: config.max_send_queue,
            max_message_size: config.max_message_size,
        }
    }
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// The single stateful instance serving every connection routed to one identity.
pub struct SessionActor {
    instance_id: InstanceId,
    config: ActorConfig,
    dependency: Arc<dyn Dependency>,
    metrics: Arc<MetricsRecorder>,
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    accepted_total: AtomicU64,
}

impl SessionActor {
    pub fn new(
        instance_id: InstanceId,
        config: ActorConfig,
        dependency: Arc<dyn Dependency>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        info!(instance_id = %instance_id, "session actor created");
        Self {
            instance_id,
            config,
            dependency,
            metrics,
            connections: DashMap::new(),
            accepted_total: AtomicU64::new(0),
        }
    }

    /// Connections accepted over the actor's lifetime.
    pub fn accepted_total(&self) -> u64 {
        self.accepted_total.load(Ordering::Relaxed)
    }

    fn accept(self: Arc<Self>, mut request: Request) -> Response {
        let upgrade = match Upgrade::negotiate(&mut request) {
            Ok(upgrade) => upgrade,
            Err(rejection) => {
                debug!(instance_id = %self.instance_id, reason = %rejection, "upgrade rejected");
                return rejection.into_response();
            }
        };

        let (tx, rx) = mpsc::channel(self.config.max_send_queue);
        let connection = Arc::new(ConnectionHandle::new(tx));
        let response = upgrade.response();

        tokio::spawn(async move {
            let socket = match upgrade.into_socket(self.config.max_message_size).await {
                Ok(socket) => socket,
                Err(e) => {
                    warn!(
                        instance_id = %self.instance_id,
                        connection_id = %connection.id(),
                        error = %e,
                        "upgrade did not complete"
                    );
                    return;
                }
            };
            self.register(&connection);
            let handler: Arc<dyn SessionHandler> = self.clone();
            connection::run(
                socket,
                Arc::clone(&connection),
                rx,
                handler,
                self.config.max_message_size,
            )
            .await;
            self.deregister(connection.id());
        });

        response
    }

    fn register(&self, connection: &Arc<ConnectionHandle>) {
        connection.set_state(ConnectionState::Open);
        self.connections
            .insert(connection.id().clone(), Arc::clone(connection));
        let accepted = self.accepted_total.fetch_add(1, Ordering::Relaxed) + 1;
        self.metrics.counter_inc(METRIC_ACCEPTED, &[], 1);
        info!(
            instance_id = %self.instance_id,
            connection_id = %connection.id(),
            accepted_total = accepted,
            open = self.connections.len(),
            "connection accepted"
        );
    }

    fn deregister(&self, id: &ConnectionId) {
        if self.connections.remove(id).is_some() {
            info!(
                instance_id = %self.instance_id,
                connection_id = %id,
                open = self.connections.len(),
                "connection closed"
            );
        }
    }
}

#[async_trait]
impl SessionHandler for SessionActor {
    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    async fn fetch(self: Arc<Self>, request: Request) -> Response {
        if request.uri().path() == NO_OP_PATH {
            return (StatusCode::OK, "No-op endpoint").into_response();
        }
        self.accept(request)
    }

    async fn on_message(
        &self,
        connection: &ConnectionHandle,
        payload: Payload,
    ) -> Result<(), DependencyError> {
        self.metrics.counter_inc(METRIC_RECEIVED, &[], 1);
        let timeout = self.config.dependency_timeout;

        let started = Instant::now();
        tokio::time::timeout(timeout, self.dependency.call(&payload))
            .await
            .map_err(|_| DependencyError::Timeout(timeout))??;
        let elapsed = started.elapsed();

        let latency_ms = elapsed.as_secs_f64() * 1000.0;
        self.metrics.histogram_observe(METRIC_LATENCY, &[], latency_ms);
        debug!(
            connection_id = %connection.id(),
            kind = payload.kind(),
            len = payload.len(),
            latency_ms,
            "dependency call completed"
        );

        let reply = format_reply(&self.config.reply_tag, &payload, elapsed);
        if !connection.send_text(reply).await {
            debug!(connection_id = %connection.id(), "connection closed before reply");
        }
        Ok(())
    }

    async fn on_error(&self, connection: &ConnectionHandle, error: DependencyError) {
        self.metrics
            .counter_inc(METRIC_FAILURES, &[("kind", error.error_kind())], 1);
        warn!(
            instance_id = %self.instance_id,
            connection_id = %connection.id(),
            error_kind = error.error_kind(),
            error = %error,
            "dependency call failed"
        );
        let frame = format_error(&self.config.reply_tag, &error);
        if !connection.send_text(frame).await {
            debug!(connection_id = %connection.id(), "connection closed before error report");
        }
    }

    async fn on_close(&self, connection: &ConnectionHandle, code: u16, reason: &str, clean: bool) {
        info!(
            instance_id = %self.instance_id,
            connection_id = %connection.id(),
            code,
            peer_reason = reason,
            clean,
            "peer closed connection"
        );
        // These codes are reserved for local reporting and may not go on the wire.
        let reply_code = match code {
            NO_STATUS | ABNORMAL_CLOSURE | TLS_HANDSHAKE_FAILURE => 1000,
            code => code,
        };
        if let Err(e) = connection.close(reply_code, &self.config.close_reason).await {
            debug!(connection_id = %connection.id(), error = %e, "local close failed");
        }
    }

    fn open_connections(&self) -> usize {
        self.connections.len()
    }
}
