use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{delete, get, post, put},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

pub mod auth;
pub mod config;
pub mod database;
pub mod device;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use handlers::{admin, credits, generate, health, images, metrics, session, AppState};

pub fn create_app(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/session", post(session::create_session))
        .route("/account", get(session::get_account))
        .route("/credits", get(credits::get_balance))
        .route("/credits/debit", post(credits::debit))
        .route("/generate", post(generate::generate))
        .route("/images", get(images::list_images))
        .route("/images/stats", get(images::image_stats))
        .route(
            "/images/:image_id",
            get(images::get_image).delete(images::delete_image),
        )
        .route(
            "/admin/accounts/:account_id/credits",
            put(admin::set_manual_balance),
        )
        .route(
            "/admin/accounts/:account_id/credits/manual",
            delete(admin::release_manual_balance),
        )
        .route(
            "/admin/accounts/:account_id/credits/grants",
            post(admin::grant_credits),
        )
        .route(
            "/admin/accounts/:account_id/images/repair-counter",
            post(admin::repair_image_counter),
        );

    Router::new()
        .route("/health", get(health::liveness))
        .route("/ready", get(health::readiness))
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/v1", v1)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::track_requests,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(state.config.request_timeout))
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(middleware::DEVICE_ID_HEADER),
            HeaderName::from_static(credits::IDEMPOTENCY_KEY_HEADER),
        ])
        .max_age(Duration::from_secs(60 * 60));

    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    cors.allow_origin(origins)
}
