use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    models::{Account, AccountDocument, AccountId, AccountProfile, DeviceId},
    services::CreditLedger,
    store::{paths, Document, DocumentStore, Precondition, StoreError, StoreResult},
    utils::Clock,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignIn {
    pub account: Account,
    pub first_sign_in: bool,
    pub bonus_granted: bool,
    pub merged_credits: u32,
}

pub struct AccountService {
    documents: Arc<dyn DocumentStore>,
    ledger: Arc<CreditLedger>,
    clock: Arc<dyn Clock>,
    merge_anonymous: bool,
}

impl AccountService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        ledger: Arc<CreditLedger>,
        clock: Arc<dyn Clock>,
        merge_anonymous: bool,
    ) -> Self {
        Self {
            documents,
            ledger,
            clock,
            merge_anonymous,
        }
    }

    /// Creates or touches the account document, then hands out the login bonus.
    pub async fn record_sign_in(
        &self,
        profile: &AccountProfile,
        device: Option<&DeviceId>,
    ) -> StoreResult<SignIn> {
        let account_id = &profile.account_id;
        let path = paths::account(account_id);
        let data = serde_json::to_value(AccountDocument {
            email: profile.email.clone(),
            display_name: profile.display_name.clone(),
            last_login_at: self.clock.now(),
        })?;

        let (written, first_sign_in) = match self
            .documents
            .put(&path, data.clone(), Precondition::MustNotExist)
            .await
        {
            Ok(document) => (document, true),
            Err(StoreError::Conflict(_)) => (self.documents.merge(&path, data).await?, false),
            Err(e) => return Err(e),
        };

        if first_sign_in {
            info!("Created account {}", account_id);
        }

        let bonus_granted = self.ledger.grant_login_bonus(account_id).await;

        let mut merged_credits = 0;
        if let (true, Some(device)) = (self.merge_anonymous, device) {
            merged_credits = self
                .ledger
                .absorb_anonymous(device, account_id)
                .await
                .unwrap_or_else(|e| {
                    warn!("Could not merge anonymous credits into {}: {}", account_id, e);
                    0
                });
        }

        Ok(SignIn {
            account: to_account(account_id, &written)?,
            first_sign_in,
            bonus_granted,
            merged_credits,
        })
    }

    pub async fn get(&self, account_id: &AccountId) -> StoreResult<Option<Account>> {
        self.documents
            .get(&paths::account(account_id))
            .await?
            .map(|document| to_account(account_id, &document))
            .transpose()
    }
}

fn to_account(account_id: &AccountId, document: &Document) -> StoreResult<Account> {
    let stored: AccountDocument = serde_json::from_value(document.data.clone())?;
    Ok(Account {
        account_id: account_id.clone(),
        email: stored.email,
        display_name: stored.display_name,
        created_at: document.created_at,
        last_login_at: stored.last_login_at,
    })
}
