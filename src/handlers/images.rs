use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
    middleware::AuthenticatedAccount,
    models::GeneratedImageRecord,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

pub async fn list_images(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Query(query): Query<ListQuery>,
) -> Json<serde_json::Value> {
    let images = state
        .images
        .list(&account.profile.account_id, query.limit)
        .await;

    Json(json!({
        "count": images.len(),
        "images": images
    }))
}

pub async fn get_image(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Path(image_id): Path<String>,
) -> Result<Json<GeneratedImageRecord>> {
    state
        .images
        .get(&account.profile.account_id, &image_id)
        .await
        .map(Json)
        .ok_or(AppError::NotFound)
}

pub async fn delete_image(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Path(image_id): Path<String>,
) -> Result<StatusCode> {
    if state
        .images
        .delete(&account.profile.account_id, &image_id)
        .await
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

pub async fn image_stats(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
) -> Result<Json<serde_json::Value>> {
    let total_created = state
        .images
        .total_created(&account.profile.account_id)
        .await
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Image counter unavailable")))?;

    Ok(Json(json!({ "totalCreated": total_created })))
}
