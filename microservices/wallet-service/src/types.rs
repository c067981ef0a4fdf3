//! Wallet Ledger Types

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use zentra_core::{round_money, Role};

/// Per-user wallet. `balance` and `reserved` are derived from the entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: Uuid,
    pub balance: Decimal,
    /// Sum of pending withdrawal amounts
    pub reserved: Decimal,
    pub frozen: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn open(account_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            account_id,
            balance: Decimal::ZERO,
            reserved: Decimal::ZERO,
            frozen: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Funds not committed to a pending withdrawal
    pub fn available(&self) -> Decimal {
        self.balance - self.reserved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    AdminTopup,
    AdminDebit,
    InvestmentOpen,
    InvestmentPayout,
    ReferralBonus,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdrawal => "WITHDRAWAL",
            Self::AdminTopup => "ADMIN_TOPUP",
            Self::AdminDebit => "ADMIN_DEBIT",
            Self::InvestmentOpen => "INVESTMENT_OPEN",
            Self::InvestmentPayout => "INVESTMENT_PAYOUT",
            Self::ReferralBonus => "REFERRAL_BONUS",
        }
    }

    /// Kinds that wait for an admin decision
    pub fn requires_approval(&self) -> bool {
        matches!(self, Self::Deposit | Self::Withdrawal)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Deposit => "Deposit",
            Self::Withdrawal => "Withdrawal",
            Self::AdminTopup => "Admin top-up",
            Self::AdminDebit => "Admin debit",
            Self::InvestmentOpen => "Investment",
            Self::InvestmentPayout => "Investment payout",
            Self::ReferralBonus => "Referral bonus",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(Self::Deposit),
            "WITHDRAWAL" => Ok(Self::Withdrawal),
            "ADMIN_TOPUP" => Ok(Self::AdminTopup),
            "ADMIN_DEBIT" => Ok(Self::AdminDebit),
            "INVESTMENT_OPEN" => Ok(Self::InvestmentOpen),
            "INVESTMENT_PAYOUT" => Ok(Self::InvestmentPayout),
            "REFERRAL_BONUS" => Ok(Self::ReferralBonus),
            other => Err(format!("unknown entry kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Pending,
    Approved,
    Disapproved,
    Applied,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Disapproved => "DISAPPROVED",
            Self::Applied => "APPLIED",
        }
    }

    /// Statuses whose amount counts toward the balance
    pub fn affects_balance(&self) -> bool {
        matches!(self, Self::Approved | Self::Applied)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "DISAPPROVED" => Ok(Self::Disapproved),
            "APPLIED" => Ok(Self::Applied),
            other => Err(format!("unknown entry status: {}", other)),
        }
    }
}

/// Where a withdrawal should be paid out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalDestination {
    pub payment_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

/// One immutable line in an account's history. Only `status` and
/// `resolved_at` change, and only once, out of PENDING.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub account_id: Uuid,
    /// Per-account position, assigned when the entry is appended
    pub sequence: u64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Signed: credits positive, debits negative
    pub amount: Decimal,
    pub status: EntryStatus,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<WithdrawalDestination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// Build an entry that has not been sequenced yet
    pub fn new(
        account_id: Uuid,
        kind: EntryKind,
        amount: Decimal,
        status: EntryStatus,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            account_id,
            sequence: 0,
            kind,
            amount,
            status,
            description: description.into(),
            destination: None,
            investment_id: None,
            created_at: now,
            resolved_at: None,
        }
    }

    pub fn with_destination(mut self, destination: Option<WithdrawalDestination>) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_investment(mut self, investment_id: Uuid) -> Self {
        self.investment_id = Some(investment_id);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }

    /// Amount this entry holds out of the available balance
    pub fn held_amount(&self) -> Decimal {
        if self.is_pending() && self.amount < Decimal::ZERO {
            -self.amount
        } else {
            Decimal::ZERO
        }
    }

    /// Contribution to the balance
    pub fn balance_effect(&self) -> Decimal {
        if self.status.affects_balance() {
            self.amount
        } else {
            Decimal::ZERO
        }
    }
}

/// Fixed-term plan definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentPlan {
    #[serde(alias = "id")]
    pub plan_id: String,
    pub name: String,
    pub min_amount: Decimal,
    /// Unbounded when absent
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    #[serde(alias = "dailyReturn")]
    pub daily_return_rate: Decimal,
    #[serde(alias = "duration")]
    pub duration_days: u32,
    #[serde(default)]
    pub perks: Vec<String>,
}

impl InvestmentPlan {
    pub fn accepts(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && self.max_amount.map_or(true, |max| amount <= max)
    }

    /// principal × rate × days, rounded to cents
    /// `None` when the return does not fit a `Decimal`
    pub fn expected_return(&self, principal: Decimal) -> Option<Decimal> {
        simple_return(principal, self.daily_return_rate, i64::from(self.duration_days))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvestmentStatus {
    Active,
    Matured,
    Cancelled,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Matured => "MATURED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for InvestmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "MATURED" => Ok(Self::Matured),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown investment status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Investment {
    pub investment_id: Uuid,
    pub account_id: Uuid,
    pub plan_id: String,
    pub plan_name: String,
    pub principal: Decimal,
    pub daily_return_rate: Decimal,
    pub duration_days: u32,
    pub status: InvestmentStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub expected_return: Decimal,
    pub accrued_return: Decimal,
    #[serde(default)]
    pub matured_at: Option<DateTime<Utc>>,
}

impl Investment {
    /// `None` when the expected return overflows
    pub fn open(account_id: Uuid, plan: &InvestmentPlan, principal: Decimal, now: DateTime<Utc>) -> Option<Self> {
        let expected_return = plan.expected_return(principal)?;
        Some(Self {
            investment_id: Uuid::new_v4(),
            account_id,
            plan_id: plan.plan_id.clone(),
            plan_name: plan.name.clone(),
            principal,
            daily_return_rate: plan.daily_return_rate,
            duration_days: plan.duration_days,
            status: InvestmentStatus::Active,
            start_date: now,
            end_date: now + chrono::Duration::days(i64::from(plan.duration_days)),
            expected_return,
            accrued_return: Decimal::ZERO,
            matured_at: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == InvestmentStatus::Active
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && now >= self.end_date
    }

    /// Return earned for the whole days elapsed so far, capped at the term
    pub fn accrued_at(&self, now: DateTime<Utc>) -> Option<Decimal> {
        let days = (now - self.start_date)
            .num_days()
            .clamp(0, i64::from(self.duration_days));
        let accrued = simple_return(self.principal, self.daily_return_rate, days)?;
        Some(accrued.min(self.expected_return))
    }

    /// Principal plus expected return
    pub fn payout_amount(&self) -> Option<Decimal> {
        self.principal.checked_add(self.expected_return)
    }

    /// Elapsed share of the term in 0..=1. A matured term reports 1, a
    /// cancelled one 0.
    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        match self.status {
            InvestmentStatus::Matured => return 1.0,
            InvestmentStatus::Cancelled => return 0.0,
            InvestmentStatus::Active => {}
        }
        let total = (self.end_date - self.start_date).num_seconds();
        if total <= 0 {
            return 1.0;
        }
        let elapsed = (now - self.start_date).num_seconds();
        (elapsed as f64 / total as f64).clamp(0.0, 1.0)
    }
}

fn simple_return(principal: Decimal, daily_rate: Decimal, days: i64) -> Option<Decimal> {
    principal
        .checked_mul(daily_rate)?
        .checked_mul(Decimal::from(days))
        .map(round_money)
}

/// Registered person. The user id doubles as the account id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    #[serde(default)]
    pub dob: Option<NaiveDate>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
    pub referral_code: String,
    #[serde(default)]
    pub referred_by: Option<Uuid>,
    /// Set once this user's first approved deposit has paid their referrer
    #[serde(default)]
    pub referral_bonus_paid: bool,
    pub created_at: DateTime<Utc>,
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
}

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

/// History page request: newest first, strictly before `before`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub limit: Option<usize>,
    pub before: Option<u64>,
}

impl Pagination {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Sequence to pass as `before` for the next page
    pub next_cursor: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn gold() -> InvestmentPlan {
        InvestmentPlan {
            plan_id: "gold".to_string(),
            name: "Gold".to_string(),
            min_amount: dec!(1000),
            max_amount: Some(dec!(4999)),
            daily_return_rate: dec!(0.18),
            duration_days: 14,
            perks: vec![],
        }
    }

    #[test]
    fn test_entry_kind_round_trips_through_text() {
        for kind in [EntryKind::Deposit, EntryKind::AdminDebit, EntryKind::ReferralBonus] {
            assert_eq!(kind.as_str().parse::<EntryKind>().unwrap(), kind);
        }
        assert!("REFUND".parse::<EntryKind>().is_err());
    }

    #[test]
    fn test_held_amount_only_for_pending_debits() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let pending = LedgerEntry::new(id, EntryKind::Withdrawal, dec!(-300), EntryStatus::Pending, "w", now);
        assert_eq!(pending.held_amount(), dec!(300));
        assert_eq!(pending.balance_effect(), Decimal::ZERO);

        let deposit = LedgerEntry::new(id, EntryKind::Deposit, dec!(300), EntryStatus::Pending, "d", now);
        assert_eq!(deposit.held_amount(), Decimal::ZERO);
    }

    #[test]
    fn test_plan_range_and_expected_return() {
        let plan = gold();
        assert!(plan.accepts(dec!(1000)));
        assert!(plan.accepts(dec!(4999)));
        assert!(!plan.accepts(dec!(999.99)));
        assert!(!plan.accepts(dec!(5000)));
        assert_eq!(plan.expected_return(dec!(1000)), Some(dec!(2520)));
    }

    #[test]
    fn test_oversized_principal_does_not_overflow() {
        let huge = dec!(50000000000000000000000000000);
        assert_eq!(gold().expected_return(huge), None);
        assert!(Investment::open(Uuid::new_v4(), &gold(), huge, Utc::now()).is_none());
    }

    #[test]
    fn test_investment_accrual_and_progress() {
        let start = Utc::now();
        let mut inv = Investment::open(Uuid::new_v4(), &gold(), dec!(1000), start).unwrap();
        assert_eq!(inv.end_date - inv.start_date, chrono::Duration::days(14));
        assert_eq!(inv.accrued_at(start), Some(Decimal::ZERO));
        assert_eq!(inv.accrued_at(start + chrono::Duration::days(2)), Some(dec!(360)));
        assert_eq!(inv.accrued_at(start + chrono::Duration::days(40)), Some(dec!(2520)));
        assert_eq!(inv.payout_amount(), Some(dec!(3520)));
        assert_eq!(inv.progress(start - chrono::Duration::days(1)), 0.0);
        assert_eq!(inv.progress(start + chrono::Duration::days(7)), 0.5);
        assert_eq!(inv.progress(start + chrono::Duration::days(30)), 1.0);

        inv.status = InvestmentStatus::Cancelled;
        assert_eq!(inv.progress(start + chrono::Duration::days(7)), 0.0);
        inv.status = InvestmentStatus::Matured;
        assert_eq!(inv.progress(start + chrono::Duration::days(7)), 1.0);
    }

    #[test]
    fn test_pagination_limit_is_clamped() {
        assert_eq!(Pagination::default().effective_limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(Pagination { limit: Some(0), before: None }.effective_limit(), 1);
        assert_eq!(Pagination { limit: Some(10_000), before: None }.effective_limit(), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_user_hash_is_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password_hash: "secret-hash".to_string(),
            role: Role::User,
            dob: None,
            country: None,
            nationality: None,
            referral_code: "ABC123".to_string(),
            referred_by: None,
            referral_bonus_paid: false,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("\"role\":\"USER\""));
    }
}
