use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use crate::{
    config::CreditPolicy,
    device::DeviceStore,
    models::{AccountId, Balance, CreditBalance, CreditSource, Debit, DeviceId, Owner},
    services::Metrics,
    store::{paths, Document, DocumentStore, Precondition, StoreError, StoreResult},
    utils::{retry, short_hash, Clock, IdempotencyKey, RetryPolicy},
};

const ANONYMOUS_CREDITS_PREFIX: &str = "visiora:anonymous_credits";

/// Conditional writes lost to a concurrent writer before giving up.
const MAX_WRITE_ATTEMPTS: usize = 5;

pub fn anonymous_key(device: &DeviceId) -> String {
    format!("{}:{}", ANONYMOUS_CREDITS_PREFIX, short_hash(device.as_str()))
}

enum Transition<T> {
    Write(CreditBalance, T),
    Keep(T),
}

/// Credit balances for anonymous devices and signed-in accounts.
pub struct CreditLedger {
    documents: Arc<dyn DocumentStore>,
    devices: Arc<dyn DeviceStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    policy: CreditPolicy,
    fetch_retry: RetryPolicy,
    verify_writes: bool,
}

impl CreditLedger {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        devices: Arc<dyn DeviceStore>,
        policy: CreditPolicy,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            documents,
            devices,
            clock,
            metrics,
            policy,
            fetch_retry: RetryPolicy::fixed(1, Duration::from_millis(500)),
            verify_writes: true,
        }
    }

    pub fn with_fetch_retry(mut self, fetch_retry: RetryPolicy) -> Self {
        self.fetch_retry = fetch_retry;
        self
    }

    pub fn with_write_verification(mut self, verify_writes: bool) -> Self {
        self.verify_writes = verify_writes;
        self
    }

    /// Current balance. Store failures read as an empty balance.
    pub async fn balance(&self, owner: &Owner) -> Balance {
        let result = match owner {
            Owner::Anonymous(device) => self.anonymous_balance(device).await,
            Owner::Account(account) => self.account_balance(account).await,
        };

        result.unwrap_or_else(|e| {
            error!("Failed to read {} balance: {}", owner.kind(), e);
            self.metrics.record_store_error("balance");
            Balance::default()
        })
    }

    /// Spends one credit. Anything short of a confirmed write is `Depleted`;
    /// a key that was already charged is `Replayed` and spends nothing.
    pub async fn debit(&self, owner: &Owner, key: Option<&IdempotencyKey>) -> Debit {
        let result = match owner {
            Owner::Anonymous(device) => self.debit_anonymous(device).await,
            Owner::Account(account) => self.debit_account(account, key).await,
        };

        let debit = result.unwrap_or_else(|e| {
            error!("Debit for {} owner failed, treating as depleted: {}", owner.kind(), e);
            self.metrics.record_store_error("debit");
            Debit::Depleted
        });

        self.metrics.record_debit(owner.kind(), &debit);
        debit
    }

    /// Creates the initial balance for a new account. Returns whether it was created.
    pub async fn grant_login_bonus(&self, account: &AccountId) -> bool {
        match self.try_grant_login_bonus(account).await {
            Ok(created) => created,
            Err(e) => {
                error!("Failed to grant login bonus to {}: {}", account, e);
                self.metrics.record_store_error("login_bonus");
                false
            }
        }
    }

    async fn try_grant_login_bonus(&self, account: &AccountId) -> StoreResult<bool> {
        let initial = CreditBalance::login_bonus(self.policy.login_bonus_credits, self.clock.today());
        let path = paths::credits(account);

        match self
            .documents
            .put(&path, serde_json::to_value(&initial)?, Precondition::MustNotExist)
            .await
        {
            Ok(_) => {
                info!(
                    "Granted {} login bonus credits to {}",
                    initial.free_credits, account
                );
                Ok(true)
            }
            Err(StoreError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Pins an account balance. Pinned balances skip the daily refresh.
    pub async fn set_manual_balance(
        &self,
        account: &AccountId,
        free: u32,
        paid: u32,
    ) -> StoreResult<Balance> {
        let today = self.clock.today();
        let balance = self
            .transact(account, "manual balance", |current| {
                let mut next = current
                    .cloned()
                    .unwrap_or_else(|| CreditBalance::login_bonus(0, today));
                next.free_credits = free;
                next.paid_credits = paid;
                next.granted_by = CreditSource::Admin;
                let balance = next.balance();
                Transition::Write(next, balance)
            })
            .await?;

        info!("Pinned balance of {} to {}/{}", account, free, paid);
        Ok(balance)
    }

    /// Returns a pinned balance to the daily refresh, starting tomorrow.
    /// `None` when the account has no balance.
    pub async fn release_manual_balance(&self, account: &AccountId) -> StoreResult<Option<Balance>> {
        let today = self.clock.today();
        self.transact(account, "release manual balance", |current| match current {
            None => Transition::Keep(None),
            Some(balance) if !balance.is_manual() => Transition::Keep(Some(balance.balance())),
            Some(balance) => {
                let mut next = balance.clone();
                next.granted_by = CreditSource::Daily;
                next.last_refresh_date = next.last_refresh_date.max(today);
                let released = next.balance();
                Transition::Write(next, Some(released))
            }
        })
        .await
    }

    /// Adds `amount` paid credits.
    pub async fn grant(
        &self,
        account: &AccountId,
        amount: u32,
        source: CreditSource,
    ) -> StoreResult<Balance> {
        let today = self.clock.today();
        let policy = self.policy;
        let balance = self
            .transact(account, "grant", |current| {
                let mut next = Self::current_or_initial(current, today, policy);
                next.paid_credits = next.paid_credits.saturating_add(amount);
                if !next.is_manual() {
                    next.granted_by = source;
                }
                let balance = next.balance();
                Transition::Write(next, balance)
            })
            .await?;

        info!("Granted {} {:?} credits to {}", amount, source, account);
        Ok(balance)
    }

    /// Moves the remaining credits of a device onto an account. Returns how many moved.
    pub async fn absorb_anonymous(
        &self,
        device: &DeviceId,
        account: &AccountId,
    ) -> StoreResult<u32> {
        let key = anonymous_key(device);

        let mut moved = None;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let raw = match self.devices.get(&key).await? {
                Some(raw) => raw,
                None => return Ok(0),
            };
            let credits = parse_anonymous_credits(&key, &raw);
            if credits == 0 {
                return Ok(0);
            }
            if self.devices.compare_and_set(&key, Some(raw.as_str()), "0").await? {
                moved = Some(credits);
                break;
            }
        }
        let moved = moved.ok_or_else(|| StoreError::Conflict(key.clone()))?;

        let today = self.clock.today();
        let policy = self.policy;
        self.transact(account, "absorb anonymous", |current| {
            let mut next = Self::current_or_initial(current, today, policy);
            next.free_credits = next.free_credits.saturating_add(moved);
            Transition::Write(next, ())
        })
        .await?;

        info!("Moved {} anonymous credits onto {}", moved, account);
        Ok(moved)
    }

    async fn account_balance(&self, account: &AccountId) -> StoreResult<Balance> {
        let today = self.clock.today();
        let policy = self.policy;

        self.transact(account, "balance", |current| match current {
            None => {
                let created = CreditBalance::login_bonus(policy.login_bonus_credits, today);
                let balance = created.balance();
                Transition::Write(created, balance)
            }
            Some(stored) => match stored.refreshed(today, policy.daily_credits) {
                Some(next) => {
                    let balance = next.balance();
                    Transition::Write(next, balance)
                }
                None => Transition::Keep(stored.balance()),
            },
        })
        .await
    }

    async fn debit_account(
        &self,
        account: &AccountId,
        key: Option<&IdempotencyKey>,
    ) -> StoreResult<Debit> {
        let today = self.clock.today();
        let policy = self.policy;

        self.transact(account, "debit", |current| {
            let base = Self::current_or_initial(current, today, policy);

            // Replayed request
            if let Some(key) = key {
                if base.has_debit(key) {
                    return Transition::Keep(Debit::Replayed(base.balance()));
                }
            }

            match base.debited(key) {
                Some(next) => {
                    let balance = next.balance();
                    Transition::Write(next, Debit::Spent(balance))
                }
                None => Transition::Keep(Debit::Depleted),
            }
        })
        .await
    }

    /// Stored balance with today's refresh applied, or the login bonus when none exists.
    fn current_or_initial(
        current: Option<&CreditBalance>,
        today: chrono::NaiveDate,
        policy: CreditPolicy,
    ) -> CreditBalance {
        match current {
            Some(stored) => stored
                .refreshed(today, policy.daily_credits)
                .unwrap_or_else(|| stored.clone()),
            None => CreditBalance::login_bonus(policy.login_bonus_credits, today),
        }
    }

    /// Read-modify-write of an account balance guarded by the document revision.
    async fn transact<T, F>(&self, account: &AccountId, operation: &str, mut apply: F) -> StoreResult<T>
    where
        F: FnMut(Option<&CreditBalance>) -> Transition<T> + Send,
        T: Send,
    {
        let path = paths::credits(account);

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let document = self.fetch_document(&path, operation).await?;
            let current = document.as_ref().map(decode_balance).transpose()?;

            let (next, outcome) = match apply(current.as_ref()) {
                Transition::Keep(outcome) => return Ok(outcome),
                Transition::Write(next, outcome) => (next, outcome),
            };

            let precondition = match &document {
                Some(document) => Precondition::Revision(document.revision),
                None => Precondition::MustNotExist,
            };

            match self
                .documents
                .put(&path, serde_json::to_value(&next)?, precondition)
                .await
            {
                Ok(_) => {
                    self.verify_balance(&path, &next).await;
                    return Ok(outcome);
                }
                Err(StoreError::Conflict(_)) => {
                    debug!("{} lost a write race on {} (attempt {})", operation, path, attempt);
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            "{} on {} gave up after {} conflicting writes",
            operation, path, MAX_WRITE_ATTEMPTS
        );
        Err(StoreError::Conflict(path))
    }

    async fn fetch_document(&self, path: &str, operation: &str) -> StoreResult<Option<Document>> {
        let documents = &self.documents;
        retry(&self.fetch_retry, operation, move || documents.get(path)).await
    }

    async fn verify_balance(&self, path: &str, expected: &CreditBalance) {
        if !self.verify_writes {
            return;
        }

        match self.documents.get(path).await {
            Ok(Some(document)) => match decode_balance(&document) {
                Ok(stored) if stored.balance() == expected.balance() => {}
                Ok(stored) => warn!(
                    "Balance at {} reads back as {:?}, wrote {:?}",
                    path,
                    stored.balance(),
                    expected.balance()
                ),
                Err(e) => warn!("Balance at {} is unreadable after write: {}", path, e),
            },
            Ok(None) => warn!("Balance at {} disappeared after write", path),
            Err(e) => warn!("Could not verify balance at {}: {}", path, e),
        }
    }

    async fn anonymous_balance(&self, device: &DeviceId) -> StoreResult<Balance> {
        let (_, credits) = self.load_anonymous(&anonymous_key(device)).await?;
        Ok(Balance {
            free: credits,
            paid: 0,
        })
    }

    async fn debit_anonymous(&self, device: &DeviceId) -> StoreResult<Debit> {
        let key = anonymous_key(device);

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let (raw, credits) = self.load_anonymous(&key).await?;
            if credits == 0 {
                return Ok(Debit::Depleted);
            }

            let remaining = credits - 1;
            if self
                .devices
                .compare_and_set(&key, Some(raw.as_str()), &remaining.to_string())
                .await?
            {
                self.verify_anonymous(&key, remaining).await;
                return Ok(Debit::Spent(Balance {
                    free: remaining,
                    paid: 0,
                }));
            }
            debug!("Anonymous debit lost a write race on {} (attempt {})", key, attempt);
        }

        Err(StoreError::Conflict(key))
    }

    /// Raw stored value and the credits it holds, initializing absent devices.
    async fn load_anonymous(&self, key: &str) -> StoreResult<(String, u32)> {
        let devices = &self.devices;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let stored = retry(&self.fetch_retry, "anonymous fetch", move || devices.get(key)).await?;
            if let Some(raw) = stored {
                let credits = parse_anonymous_credits(key, &raw);
                return Ok((raw, credits));
            }

            let initial = self.policy.anonymous_credits.to_string();
            if self.devices.compare_and_set(key, None, &initial).await? {
                return Ok((initial, self.policy.anonymous_credits));
            }
        }

        Err(StoreError::Conflict(key.to_string()))
    }

    async fn verify_anonymous(&self, key: &str, expected: u32) {
        if !self.verify_writes {
            return;
        }

        match self.devices.get(key).await {
            Ok(Some(raw)) if raw.trim().parse::<u32>().ok() == Some(expected) => {}
            Ok(stored) => warn!(
                "Anonymous credits at {} read back as {:?}, wrote {}",
                key, stored, expected
            ),
            Err(e) => warn!("Could not verify anonymous credits at {}: {}", key, e),
        }
    }
}

fn decode_balance(document: &Document) -> StoreResult<CreditBalance> {
    Ok(serde_json::from_value(document.data.clone())?)
}

/// Unreadable values count as zero credits.
fn parse_anonymous_credits(key: &str, raw: &str) -> u32 {
    raw.trim().parse().unwrap_or_else(|_| {
        warn!("Unreadable anonymous credit value {:?} at {}", raw, key);
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::MemoryDeviceStore,
        store::MockDocumentStore,
        utils::ManualClock,
    };
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn owner() -> Owner {
        Owner::Account(AccountId::parse("u1").unwrap())
    }

    fn credits_document(balance: &CreditBalance, revision: u64) -> Document {
        let now = Utc::now();
        Document {
            path: "accounts/u1/meta/credits".to_string(),
            data: serde_json::to_value(balance).unwrap(),
            revision,
            created_at: now,
            updated_at: now,
        }
    }

    fn ledger(documents: MockDocumentStore, clock: Arc<ManualClock>) -> CreditLedger {
        CreditLedger::new(
            Arc::new(documents),
            Arc::new(MemoryDeviceStore::new()),
            CreditPolicy::default(),
            clock,
            Arc::new(Metrics::new().unwrap()),
        )
        .with_fetch_retry(RetryPolicy::fixed(1, Duration::from_millis(1)))
        .with_write_verification(false)
    }

    fn written(path: &str, data: serde_json::Value, revision: u64) -> StoreResult<Document> {
        let now = Utc::now();
        Ok(Document {
            path: path.to_string(),
            data,
            revision,
            created_at: now,
            updated_at: now,
        })
    }

    #[tokio::test]
    async fn test_debit_fetch_is_retried_once() {
        let clock = clock();
        let stored = CreditBalance::login_bonus(5, clock.today());
        let document = credits_document(&stored, 3);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut documents = MockDocumentStore::new();
        documents.expect_get().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::Unavailable("timeout".to_string()))
            } else {
                Ok(Some(document.clone()))
            }
        });
        documents
            .expect_put()
            .times(1)
            .withf(|_, data, precondition| {
                *precondition == Precondition::Revision(3) && data["freeCredits"] == 4
            })
            .returning(|path, data, _| written(path, data, 4));

        let debit = ledger(documents, clock).debit(&owner(), None).await;
        assert_eq!(debit, Debit::Spent(Balance { free: 4, paid: 0 }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_debit_fails_closed_when_fetch_keeps_failing() {
        let mut documents = MockDocumentStore::new();
        documents
            .expect_get()
            .times(2)
            .returning(|_| Err(StoreError::Unavailable("down".to_string())));
        documents.expect_put().never();

        let debit = ledger(documents, clock()).debit(&owner(), None).await;
        assert_eq!(debit, Debit::Depleted);
    }

    #[tokio::test]
    async fn test_debit_fails_closed_when_write_fails() {
        let clock = clock();
        let document = credits_document(&CreditBalance::login_bonus(5, clock.today()), 1);

        let mut documents = MockDocumentStore::new();
        documents
            .expect_get()
            .returning(move |_| Ok(Some(document.clone())));
        documents
            .expect_put()
            .times(1)
            .returning(|_, _, _| Err(StoreError::Unavailable("write rejected".to_string())));

        let debit = ledger(documents, clock).debit(&owner(), None).await;
        assert_eq!(debit, Debit::Depleted);
    }

    #[tokio::test]
    async fn test_debit_retries_after_losing_write_race() {
        let clock = clock();
        let today = clock.today();
        let first = credits_document(&CreditBalance::login_bonus(5, today), 1);
        let second = credits_document(&CreditBalance::login_bonus(4, today), 2);

        let reads = Arc::new(AtomicUsize::new(0));
        let counter = reads.clone();
        let mut documents = MockDocumentStore::new();
        documents.expect_get().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Some(first.clone()))
            } else {
                Ok(Some(second.clone()))
            }
        });
        documents
            .expect_put()
            .withf(|_, _, precondition| *precondition == Precondition::Revision(1))
            .times(1)
            .returning(|path, _, _| Err(StoreError::Conflict(path.to_string())));
        documents
            .expect_put()
            .withf(|_, data, precondition| {
                *precondition == Precondition::Revision(2) && data["freeCredits"] == 3
            })
            .times(1)
            .returning(|path, data, _| written(path, data, 3));

        let debit = ledger(documents, clock).debit(&owner(), None).await;
        assert_eq!(debit, Debit::Spent(Balance { free: 3, paid: 0 }));
    }

    #[tokio::test]
    async fn test_debit_keeps_computed_balance_when_read_back_disagrees() {
        let clock = clock();
        let today = clock.today();
        let before = credits_document(&CreditBalance::login_bonus(5, today), 1);
        let drifted = credits_document(&CreditBalance::login_bonus(99, today), 2);

        let reads = Arc::new(AtomicUsize::new(0));
        let counter = reads.clone();
        let mut documents = MockDocumentStore::new();
        documents.expect_get().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Some(before.clone()))
            } else {
                Ok(Some(drifted.clone()))
            }
        });
        documents
            .expect_put()
            .times(1)
            .withf(|_, data, _| data["freeCredits"] == 4)
            .returning(|path, data, _| written(path, data, 2));

        let debit = ledger(documents, clock)
            .with_write_verification(true)
            .debit(&owner(), None)
            .await;
        assert_eq!(debit, Debit::Spent(Balance { free: 4, paid: 0 }));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    /// Accepts every write but keeps reporting the value it started with.
    struct StaleDevices {
        value: String,
        writes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DeviceStore for StaleDevices {
        async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
            Ok(Some(self.value.clone()))
        }

        async fn compare_and_set(
            &self,
            _key: &str,
            _expected: Option<&str>,
            _value: &str,
        ) -> StoreResult<bool> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn ping(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_anonymous_debit_keeps_computed_balance_when_read_back_disagrees() {
        let devices = Arc::new(StaleDevices {
            value: "5".to_string(),
            writes: AtomicUsize::new(0),
        });
        let mut documents = MockDocumentStore::new();
        documents.expect_get().never();
        documents.expect_put().never();

        let ledger = CreditLedger::new(
            Arc::new(documents),
            devices.clone(),
            CreditPolicy::default(),
            clock(),
            Arc::new(Metrics::new().unwrap()),
        );

        let owner = Owner::Anonymous(DeviceId::parse("dev-1").unwrap());
        let debit = ledger.debit(&owner, None).await;
        assert_eq!(debit, Debit::Spent(Balance { free: 4, paid: 0 }));
        assert_eq!(devices.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replayed_key_writes_nothing() {
        let clock = clock();
        let key = IdempotencyKey::parse("gen-1").unwrap();
        let mut stored = CreditBalance::login_bonus(5, clock.today());
        stored.recent_debits.push("gen-1".to_string());
        let document = credits_document(&stored, 4);

        let mut documents = MockDocumentStore::new();
        documents
            .expect_get()
            .returning(move |_| Ok(Some(document.clone())));
        documents.expect_put().never();

        let debit = ledger(documents, clock).debit(&owner(), Some(&key)).await;
        assert_eq!(debit, Debit::Replayed(Balance { free: 5, paid: 0 }));
    }

    #[tokio::test]
    async fn test_balance_fails_closed_to_zero() {
        let mut documents = MockDocumentStore::new();
        documents
            .expect_get()
            .returning(|_| Err(StoreError::Unavailable("down".to_string())));

        let balance = ledger(documents, clock()).balance(&owner()).await;
        assert_eq!(balance, Balance::default());
    }

    #[test]
    fn test_anonymous_key_hides_device_id() {
        let device = DeviceId::parse("device-123").unwrap();
        let key = anonymous_key(&device);
        assert!(key.starts_with("visiora:anonymous_credits:"));
        assert!(!key.contains("device-123"));
        assert_eq!(key, anonymous_key(&DeviceId::parse(" device-123 ").unwrap()));
    }

    #[test]
    fn test_unreadable_anonymous_value_is_zero() {
        assert_eq!(parse_anonymous_credits("k", "7"), 7);
        assert_eq!(parse_anonymous_credits("k", "-3"), 0);
        assert_eq!(parse_anonymous_credits("k", "lots"), 0);
    }
}
