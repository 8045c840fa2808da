//! Per-account document layout.

use crate::models::AccountId;

pub fn account(account: &AccountId) -> String {
    format!("accounts/{}", account)
}

pub fn credits(account: &AccountId) -> String {
    format!("accounts/{}/meta/credits", account)
}

pub fn image_counter(account: &AccountId) -> String {
    format!("accounts/{}/meta/images", account)
}

pub fn images(account: &AccountId) -> String {
    format!("accounts/{}/images", account)
}

pub fn image(account: &AccountId, image_id: &str) -> String {
    format!("accounts/{}/images/{}", account, image_id)
}
