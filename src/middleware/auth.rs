use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
    models::{AccountProfile, DeviceId, Owner},
};

pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Whoever is spending credits: a signed-in account or an anonymous device.
#[derive(Debug, Clone)]
pub struct Caller {
    pub owner: Owner,
}

/// A request carrying a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedAccount {
    pub profile: AccountProfile,
    pub is_admin: bool,
    pub device: Option<DeviceId>,
}

#[derive(Debug, Clone)]
pub struct AdminAccount(pub AuthenticatedAccount);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
}

fn device_id(parts: &Parts) -> Result<Option<DeviceId>> {
    match parts
        .headers
        .get(DEVICE_ID_HEADER)
        .and_then(|header| header.to_str().ok())
    {
        Some(raw) => DeviceId::parse(raw)
            .map(Some)
            .ok_or_else(|| AppError::Validation("Invalid X-Device-Id header".to_string())),
        None => Ok(None),
    }
}

fn verify(parts: &Parts, state: &AppState, token: &str) -> Result<AuthenticatedAccount> {
    let claims = state.jwt.verify_token(token)?;

    Ok(AuthenticatedAccount {
        profile: claims.profile()?,
        is_admin: claims.is_admin,
        device: device_id(parts)?,
    })
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // A presented token must be valid; no fallback to the device id
        if let Some(token) = bearer_token(parts) {
            let account = verify(parts, state, token)?;
            return Ok(Caller {
                owner: Owner::Account(account.profile.account_id),
            });
        }

        match device_id(parts)? {
            Some(device) => Ok(Caller {
                owner: Owner::Anonymous(device),
            }),
            None => Err(AppError::Auth(
                "Sign in or send an X-Device-Id header".to_string(),
            )),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedAccount {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Auth("Authentication required".to_string()))?;
        verify(parts, state, token)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminAccount {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let account = AuthenticatedAccount::from_request_parts(parts, state).await?;
        if !account.is_admin {
            return Err(AppError::Forbidden);
        }
        Ok(AdminAccount(account))
    }
}
