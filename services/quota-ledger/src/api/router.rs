use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::ApiState;

pub fn create_router(state: Arc<ApiState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    Router::new()
        .route("/internal/quota/org", put(handlers::upsert_org_quota))
        .route("/internal/quota/org/:org_id", get(handlers::get_org_quota))
        .route(
            "/internal/quota/org/:org_id/projects",
            get(handlers::list_org_projects),
        )
        .route("/internal/quota/project", put(handlers::upsert_project_quota))
        .route(
            "/internal/quota/project/:org_id/:project_id",
            get(handlers::get_project_quota),
        )
        .route("/internal/quota/reconcile", post(handlers::run_reconciliation))
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(middleware)
}
