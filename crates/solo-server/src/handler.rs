use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use solo_core::{DependencyError, InstanceId, Payload};

use crate::connection::ConnectionHandle;

/// Event interface of a session instance.
///
/// The router and the connection pump only ever hold `Arc<dyn SessionHandler>`.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    fn instance_id(&self) -> &InstanceId;

    /// Handle a request forwarded by the router, unmodified.
    async fn fetch(self: Arc<Self>, request: Request) -> Response;

    /// Handle one inbound data message on an open connection.
    async fn on_message(
        &self,
        connection: &ConnectionHandle,
        payload: Payload,
    ) -> Result<(), DependencyError>;

    /// Report a failed message back on its connection.
    async fn on_error(&self, connection: &ConnectionHandle, error: DependencyError);

    /// The peer closed the connection, or the socket failed.
    async fn on_close(&self, connection: &ConnectionHandle, code: u16, reason: &str, clean: bool);

    /// Number of currently registered connections.
    fn open_connections(&self) -> usize;
}
