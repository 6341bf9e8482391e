use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use solo_core::{LogicalName, RouteError};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::directory::ActorDirectory;

pub const WEBSOCKET_PATH: &str = "/websocket";
pub const NO_OP_PATH: &str = "/no-op";

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Router state: where instances live and which name all traffic resolves to.
#[derive(Clone)]
pub struct RouterState {
    directory: Arc<ActorDirectory>,
    name: LogicalName,
}

impl RouterState {
    pub fn new(directory: Arc<ActorDirectory>, name: LogicalName) -> Self {
        Self { directory, name }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: RouterState) -> Router {
    Router::new()
        .route("/", any(index_handler))
        .route(WEBSOCKET_PATH, any(websocket_handler))
        .route(NO_OP_PATH, any(no_op_handler))
        .fallback(not_found_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Reject anything that is not a GET carrying exactly `Upgrade: websocket`.
/// The header is checked before the method.
pub fn validate_upgrade(request: &Request) -> Result<(), RouteError> {
    let upgrade = request.headers().get(header::UPGRADE);
    if !upgrade.is_some_and(|v| v == "websocket") {
        return Err(RouteError::ProtocolMismatch);
    }
    if request.method() != Method::GET {
        return Err(RouteError::MethodNotAllowed);
    }
    Ok(())
}

fn reject(error: RouteError) -> Response {
    let status =
        StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, error.to_string()).into_response()
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn websocket_handler(State(state): State<RouterState>, request: Request) -> Response {
    if let Err(e) = validate_upgrade(&request) {
        debug!(method = %request.method(), error = %e, "rejected websocket request");
        return reject(e);
    }
    let actor = state.directory.resolve(&state.name);
    actor.fetch(request).await
}

async fn no_op_handler(State(state): State<RouterState>, request: Request) -> Response {
    let actor = state.directory.resolve(&state.name);
    actor.fetch(request).await
}

async fn not_found_handler() -> Response {
    reject(RouteError::NotFound)
}
