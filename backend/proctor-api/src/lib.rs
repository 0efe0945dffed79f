use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    // The candidate's browser posts frame reports from the test page.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/api/v1/assessments", assessment_routes().layer(cors))
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_id_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn assessment_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::assessments::create_assessment))
        .route("/{id}", get(handlers::assessments::get_assessment))
        .route("/{id}/start", post(handlers::assessments::start_assessment))
        .route("/{id}/answers", post(handlers::assessments::select_option))
        .route("/{id}/advance", post(handlers::assessments::advance_question))
        .route("/{id}/submit", post(handlers::assessments::submit_assessment))
        .route("/{id}/outcome", get(handlers::assessments::get_outcome))
        .route("/{id}/frames", post(handlers::assessments::push_frame))
        .route("/{id}/stream", get(handlers::sse::assessment_stream))
}
