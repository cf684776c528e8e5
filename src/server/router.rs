use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};

use super::account::account_router;
use super::files::{files_router, world_download};
use crate::auth::carry_session_token;
use crate::cms::Cms;

pub struct AppState {
    pub cms: Cms,
}

impl AppState {
    #[must_use]
    pub fn new(cms: Cms) -> Self {
        Self { cms }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", account_router())
        .nest("/api/v1", files_router())
        .route("/users/{user_name}/{tag}", get(world_download))
        .layer(middleware::from_fn(carry_session_token))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
