use axum::{extract::State, http::HeaderMap, response::Json};
use serde::Serialize;

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
    middleware::Caller,
    models::{Balance, Debit},
    utils::IdempotencyKey,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub owner: &'static str,
    pub free_credits: u32,
    pub paid_credits: u32,
    pub total: u64,
}

impl BalanceResponse {
    pub fn new(owner: &'static str, balance: Balance) -> Self {
        Self {
            owner,
            free_credits: balance.free,
            paid_credits: balance.paid,
            total: balance.total(),
        }
    }
}

pub(crate) fn idempotency_key(headers: &HeaderMap) -> Option<IdempotencyKey> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(IdempotencyKey::parse)
}

pub async fn get_balance(State(state): State<AppState>, caller: Caller) -> Json<BalanceResponse> {
    let balance = state.ledger.balance(&caller.owner).await;
    Json(BalanceResponse::new(caller.owner.kind(), balance))
}

pub async fn debit(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
) -> Result<Json<BalanceResponse>> {
    let key = idempotency_key(&headers);

    match state.ledger.debit(&caller.owner, key.as_ref()).await {
        Debit::Spent(balance) | Debit::Replayed(balance) => {
            Ok(Json(BalanceResponse::new(caller.owner.kind(), balance)))
        }
        Debit::Depleted => Err(AppError::InsufficientCredits),
    }
}
