use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::utils::IdempotencyKey;

/// How many debit idempotency keys a balance remembers.
pub const MAX_RECENT_DEBITS: usize = 20;

/// Where the last balance assignment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditSource {
    Bonus,
    Daily,
    Purchase,
    Admin,
}

/// Persisted per-account balance at `accounts/{id}/meta/credits`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditBalance {
    pub free_credits: u32,
    #[serde(default)]
    pub paid_credits: u32,
    pub last_refresh_date: NaiveDate,
    #[serde(default = "default_source")]
    pub granted_by: CreditSource,
    #[serde(default)]
    pub recent_debits: Vec<String>,
}

fn default_source() -> CreditSource {
    CreditSource::Daily
}

impl CreditBalance {
    pub fn login_bonus(credits: u32, today: NaiveDate) -> Self {
        Self {
            free_credits: credits,
            paid_credits: 0,
            last_refresh_date: today,
            granted_by: CreditSource::Bonus,
            recent_debits: Vec::new(),
        }
    }

    pub fn balance(&self) -> Balance {
        Balance {
            free: self.free_credits,
            paid: self.paid_credits,
        }
    }

    /// Manually assigned balances are left alone by the daily refresh.
    pub fn is_manual(&self) -> bool {
        self.granted_by == CreditSource::Admin
    }

    /// The balance after today's refresh, or `None` when nothing changes.
    pub fn refreshed(&self, today: NaiveDate, daily_credits: u32) -> Option<Self> {
        if self.last_refresh_date >= today || self.is_manual() {
            return None;
        }

        let mut next = self.clone();
        next.free_credits = next.free_credits.saturating_add(daily_credits);
        next.last_refresh_date = today;
        next.granted_by = CreditSource::Daily;
        Some(next)
    }

    pub fn has_debit(&self, key: &IdempotencyKey) -> bool {
        self.recent_debits.iter().any(|k| k == key.as_str())
    }

    /// The balance after spending one credit, free before paid. `None` when depleted.
    pub fn debited(&self, key: Option<&IdempotencyKey>) -> Option<Self> {
        let mut next = self.clone();
        if next.free_credits > 0 {
            next.free_credits -= 1;
        } else if next.paid_credits > 0 {
            next.paid_credits -= 1;
        } else {
            return None;
        }

        if let Some(key) = key {
            next.recent_debits.push(key.as_str().to_string());
            let overflow = next.recent_debits.len().saturating_sub(MAX_RECENT_DEBITS);
            next.recent_debits.drain(..overflow);
        }
        Some(next)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub free: u32,
    pub paid: u32,
}

impl Balance {
    pub fn total(&self) -> u64 {
        u64::from(self.free) + u64::from(self.paid)
    }
}

/// Outcome of spending one credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debit {
    Spent(Balance),
    /// The idempotency key was already charged; nothing was written.
    Replayed(Balance),
    Depleted,
}

impl Debit {
    pub fn is_spent(&self) -> bool {
        matches!(self, Debit::Spent(_))
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Debit::Spent(_) => "spent",
            Debit::Replayed(_) => "replayed",
            Debit::Depleted => "depleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_refresh_once_per_day() {
        let balance = CreditBalance::login_bonus(10, day(1));
        assert!(balance.refreshed(day(1), 10).is_none());

        let next = balance.refreshed(day(2), 10).unwrap();
        assert_eq!(next.free_credits, 20);
        assert_eq!(next.last_refresh_date, day(2));
        assert_eq!(next.granted_by, CreditSource::Daily);
        assert!(next.refreshed(day(2), 10).is_none());
    }

    #[test]
    fn test_manual_balance_is_not_refreshed() {
        let mut balance = CreditBalance::login_bonus(75, day(1));
        balance.granted_by = CreditSource::Admin;
        assert!(balance.refreshed(day(9), 10).is_none());
    }

    #[test]
    fn test_debit_spends_free_before_paid() {
        let mut balance = CreditBalance::login_bonus(1, day(1));
        balance.paid_credits = 2;

        let once = balance.debited(None).unwrap();
        assert_eq!(once.balance(), Balance { free: 0, paid: 2 });

        let twice = once.debited(None).unwrap();
        assert_eq!(twice.balance(), Balance { free: 0, paid: 1 });
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let mut balance = CreditBalance::login_bonus(3, day(1));
        balance.paid_credits = 2;

        let mut spent = 0;
        while let Some(next) = balance.debited(None) {
            assert!(next.balance().total() < balance.balance().total());
            balance = next;
            spent += 1;
        }

        assert_eq!(spent, 5);
        assert_eq!(balance.balance().total(), 0);
        assert!(balance.debited(None).is_none());
    }

    #[test]
    fn test_recent_debits_are_bounded() {
        let mut balance = CreditBalance::login_bonus(100, day(1));
        for i in 0..(MAX_RECENT_DEBITS + 5) {
            let key = IdempotencyKey::parse(&format!("gen-{}", i)).unwrap();
            balance = balance.debited(Some(&key)).unwrap();
        }

        assert_eq!(balance.recent_debits.len(), MAX_RECENT_DEBITS);
        assert!(!balance.has_debit(&IdempotencyKey::parse("gen-0").unwrap()));
        assert!(balance.has_debit(&IdempotencyKey::parse("gen-24").unwrap()));
    }

    #[test]
    fn test_legacy_document_defaults() {
        let balance: CreditBalance = serde_json::from_value(serde_json::json!({
            "freeCredits": 4,
            "lastRefreshDate": "2024-05-01"
        }))
        .unwrap();

        assert_eq!(balance.paid_credits, 0);
        assert_eq!(balance.granted_by, CreditSource::Daily);
        assert!(balance.recent_debits.is_empty());
    }
}
