use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::handlers::AppState;

pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();

    let response = next.run(request).await;

    let status_class = format!("{}xx", response.status().as_u16() / 100);
    state
        .metrics
        .http_requests
        .with_label_values(&[method.as_str(), status_class.as_str()])
        .inc();

    response
}
