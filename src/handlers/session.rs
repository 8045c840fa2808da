use axum::{extract::State, response::Json};
use serde::Serialize;

use crate::{
    errors::{AppError, Result},
    handlers::{credits::BalanceResponse, AppState},
    middleware::AuthenticatedAccount,
    models::{Account, Owner},
    services::SignIn,
};

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub sign_in: SignIn,
    pub credits: BalanceResponse,
}

/// Called by the client after every successful sign-in.
pub async fn create_session(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
) -> Result<Json<SessionResponse>> {
    let sign_in = state
        .accounts
        .record_sign_in(&account.profile, account.device.as_ref())
        .await?;

    let owner = Owner::Account(account.profile.account_id);
    let balance = state.ledger.balance(&owner).await;

    Ok(Json(SessionResponse {
        sign_in,
        credits: BalanceResponse::new(owner.kind(), balance),
    }))
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account: Account,
    pub credits: BalanceResponse,
}

pub async fn get_account(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
) -> Result<Json<AccountResponse>> {
    let stored = state
        .accounts
        .get(&account.profile.account_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let owner = Owner::Account(account.profile.account_id);
    let balance = state.ledger.balance(&owner).await;

    Ok(Json(AccountResponse {
        account: stored,
        credits: BalanceResponse::new(owner.kind(), balance),
    }))
}
