use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    errors::{AppError, Result},
    handlers::{credits::BalanceResponse, AppState},
    middleware::AdminAccount,
    models::{AccountId, CreditSource},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBalanceRequest {
    pub free_credits: u32,
    #[serde(default)]
    pub paid_credits: u32,
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub amount: u32,
    #[serde(default = "default_grant_source")]
    pub source: CreditSource,
}

fn default_grant_source() -> CreditSource {
    CreditSource::Purchase
}

fn parse_account(raw: &str) -> Result<AccountId> {
    AccountId::parse(raw).ok_or_else(|| AppError::Validation("Invalid account id".to_string()))
}

pub async fn set_manual_balance(
    State(state): State<AppState>,
    AdminAccount(admin): AdminAccount,
    Path(account_id): Path<String>,
    Json(request): Json<SetBalanceRequest>,
) -> Result<Json<BalanceResponse>> {
    let account = parse_account(&account_id)?;
    info!(
        "Admin {} pinning balance of {}",
        admin.profile.account_id, account
    );

    let balance = state
        .ledger
        .set_manual_balance(&account, request.free_credits, request.paid_credits)
        .await?;

    Ok(Json(BalanceResponse::new("account", balance)))
}

pub async fn release_manual_balance(
    State(state): State<AppState>,
    AdminAccount(admin): AdminAccount,
    Path(account_id): Path<String>,
) -> Result<Json<BalanceResponse>> {
    let account = parse_account(&account_id)?;
    info!(
        "Admin {} releasing manual balance of {}",
        admin.profile.account_id, account
    );

    let balance = state
        .ledger
        .release_manual_balance(&account)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(BalanceResponse::new("account", balance)))
}

pub async fn grant_credits(
    State(state): State<AppState>,
    AdminAccount(admin): AdminAccount,
    Path(account_id): Path<String>,
    Json(request): Json<GrantRequest>,
) -> Result<Json<BalanceResponse>> {
    let account = parse_account(&account_id)?;
    if request.amount == 0 {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }
    info!(
        "Admin {} granting {} credits to {}",
        admin.profile.account_id, request.amount, account
    );

    let balance = state
        .ledger
        .grant(&account, request.amount, request.source)
        .await?;

    Ok(Json(BalanceResponse::new("account", balance)))
}

pub async fn repair_image_counter(
    State(state): State<AppState>,
    AdminAccount(admin): AdminAccount,
    Path(account_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let account = parse_account(&account_id)?;
    info!(
        "Admin {} repairing image counter of {}",
        admin.profile.account_id, account
    );

    let total_count = state.images.repair_counter(&account).await?;

    Ok(Json(json!({ "totalCount": total_count })))
}
