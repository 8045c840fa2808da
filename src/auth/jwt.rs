use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{AppError, Result},
    models::{AccountId, AccountProfile},
};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Account ID
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn profile(&self) -> Result<AccountProfile> {
        let account_id = AccountId::parse(&self.sub)
            .ok_or_else(|| AppError::Auth("Invalid token subject".to_string()))?;

        Ok(AccountProfile {
            account_id,
            email: self.email.clone(),
            display_name: self.name.clone(),
        })
    }
}

/// HS256 tokens issued by the sign-in provider.
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_duration: Duration,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            token_duration: Duration::hours(1),
        }
    }

    pub fn generate_token(&self, profile: &AccountProfile, is_admin: bool) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: profile.account_id.to_string(),
            email: profile.email.clone(),
            name: profile.display_name.clone(),
            is_admin,
            exp: (now + self.token_duration).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Auth(format!("Failed to generate token: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> AccountProfile {
        AccountProfile {
            account_id: AccountId::parse("uid_42").unwrap(),
            email: "test@example.com".to_string(),
            display_name: Some("Test".to_string()),
        }
    }

    #[test]
    fn test_jwt_generation_and_verification() {
        let jwt_service = JwtService::new("test-secret");

        let token = jwt_service.generate_token(&profile(), true).unwrap();
        let claims = jwt_service.verify_token(&token).unwrap();

        assert_eq!(claims.sub, "uid_42");
        assert!(claims.is_admin);
        assert_eq!(claims.profile().unwrap(), profile());
    }

    #[test]
    fn test_rejects_foreign_signature() {
        let token = JwtService::new("one-secret")
            .generate_token(&profile(), false)
            .unwrap();

        assert!(JwtService::new("other-secret").verify_token(&token).is_err());
    }

    #[test]
    fn test_rejects_path_like_subject() {
        let claims = Claims {
            sub: "u1/meta".to_string(),
            email: "x@example.com".to_string(),
            name: None,
            is_admin: false,
            exp: 0,
            iat: 0,
        };
        assert!(claims.profile().is_err());
    }
}
