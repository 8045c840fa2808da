use axum::{extract::State, http::HeaderMap, response::Json};
use serde::Serialize;

use crate::{
    errors::{AppError, Result},
    handlers::{
        credits::{idempotency_key, BalanceResponse},
        AppState,
    },
    middleware::Caller,
    models::{Debit, NewGeneratedImage},
    services::GenerationRequest,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(flatten)]
    pub image: NewGeneratedImage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    pub saved: bool,
    pub credits: BalanceResponse,
}

/// Validate, spend one credit, build the image URL and record it for accounts.
pub async fn generate(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerateResponse>> {
    let image = state.generator.prepare(&request)?;

    let balance = match state
        .ledger
        .debit(&caller.owner, idempotency_key(&headers).as_ref())
        .await
    {
        Debit::Spent(balance) => balance,
        Debit::Replayed(_) => return Err(AppError::DuplicateRequest),
        Debit::Depleted => return Err(AppError::InsufficientCredits),
    };

    state.generator.warm_up(&image.image_url).await?;

    let saved = match caller.owner.account() {
        Some(account) => state.images.save(account, image.clone()).await,
        None => None,
    };

    Ok(Json(GenerateResponse {
        image,
        saved: saved.is_some(),
        image_id: saved.map(|saved| saved.image_id),
        credits: BalanceResponse::new(caller.owner.kind(), balance),
    }))
}
