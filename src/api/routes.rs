//! Route table.

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::identity::{self, Identity};

use super::handlers;
use super::state::AppState;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sandbox/acquire", post(handlers::acquire_sandbox))
        .route("/sandbox/release", post(handlers::release_sandbox))
        .route("/sandbox/stats", get(handlers::sandbox_stats))
        .route("/execute", post(handlers::execute))
        .route(
            "/files",
            get(handlers::list_files)
                .put(handlers::write_file)
                .delete(handlers::delete_file),
        )
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/{id}/pause", post(handlers::pause_session))
        .route("/sessions/{id}/resume", post(handlers::resume_session))
        .route("/sessions/{id}/touch", post(handlers::touch_session))
        .route(
            "/sessions/{id}/bind",
            post(handlers::bind_sandbox).delete(handlers::unbind_sandbox),
        )
        .layer(middleware::from_fn(identity_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the caller identity (from gateway-injected headers) around the
/// rest of the request. Requests without attribution run unscoped.
async fn identity_middleware(request: Request, next: Next) -> Response {
    let user_id = header_value(&request, "x-user-id");
    let role = header_value(&request, "x-user-role");

    match user_id {
        Some(user_id) => {
            let caller = Identity {
                user_id,
                role,
            };
            identity::scope(caller, next.run(request)).await
        }
        None => next.run(request).await,
    }
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
