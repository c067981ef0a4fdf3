//! Transaction Workflow Engine
//!
//! User deposits and withdrawals queue as PENDING entries until an admin
//! resolves them. Admin top-ups and debits apply immediately.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;
use uuid::Uuid;
use zentra_core::is_money_scale;

use crate::error::{Result, WalletError};
use crate::ledger::{BookChange, LedgerStore};
use crate::metrics::WalletMetrics;
use crate::types::{Account, EntryKind, EntryStatus, LedgerEntry, WithdrawalDestination};

/// Request-level policy knobs
#[derive(Debug, Clone, Default)]
pub struct WorkflowPolicy {
    /// Smallest deposit a user may request; unchecked when absent
    pub min_deposit: Option<Decimal>,
}

/// A committed entry with the account state it produced
#[derive(Debug, Clone)]
pub struct EntryOutcome {
    pub entry: LedgerEntry,
    pub account: Account,
}

/// Largest amount a single request may move
pub const MAX_AMOUNT: Decimal = dec!(1000000000000);

/// Reject non-positive amounts, amounts above `MAX_AMOUNT` and sub-cent precision
pub fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount);
    }
    if amount > MAX_AMOUNT {
        return Err(WalletError::Validation(format!(
            "Amount exceeds the maximum of {}",
            MAX_AMOUNT
        )));
    }
    if !is_money_scale(amount) {
        return Err(WalletError::Validation(
            "Amount supports at most 2 decimal places".to_string(),
        ));
    }
    Ok(())
}

fn description_or(description: Option<String>, fallback: &str) -> String {
    match description {
        Some(d) if !d.trim().is_empty() => d.trim().to_string(),
        _ => fallback.to_string(),
    }
}

#[derive(Clone)]
pub struct TransactionWorkflow {
    ledger: LedgerStore,
    policy: WorkflowPolicy,
    metrics: WalletMetrics,
}

impl TransactionWorkflow {
    pub fn new(ledger: LedgerStore, policy: WorkflowPolicy, metrics: WalletMetrics) -> Self {
        Self {
            ledger,
            policy,
            metrics,
        }
    }

    /// Queue a deposit for approval. No balance effect until approved.
    pub async fn request_deposit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<EntryOutcome> {
        validate_amount(amount)?;
        if let Some(min) = self.policy.min_deposit {
            if amount < min {
                return Err(WalletError::Validation(format!("Minimum deposit is {}", min)));
            }
        }

        let description = description_or(description, "Deposit");
        let committed = self
            .ledger
            .commit(account_id, |_book, now| {
                let entry = LedgerEntry::new(
                    account_id,
                    EntryKind::Deposit,
                    amount,
                    EntryStatus::Pending,
                    description,
                    now,
                );
                Ok((entry.entry_id, vec![BookChange::Append(entry)]))
            })
            .await?;

        self.metrics.deposits_requested.inc();
        info!(account_id = %account_id, amount = %amount, "Deposit requested");
        outcome(committed.value, committed.entries, committed.account)
    }

    /// Queue a withdrawal and hold its amount out of the available balance
    pub async fn request_withdrawal(
        &self,
        account_id: Uuid,
        amount: Decimal,
        description: Option<String>,
        destination: Option<WithdrawalDestination>,
    ) -> Result<EntryOutcome> {
        validate_amount(amount)?;
        let destination = destination.map(normalize_destination).transpose()?;

        let description = description_or(description, "Withdrawal");
        let committed = self
            .ledger
            .commit(account_id, |book, now| {
                let account = book.account();
                if account.frozen {
                    return Err(WalletError::AccountFrozen);
                }
                if amount > account.available() {
                    return Err(WalletError::InsufficientFunds {
                        available: account.available(),
                        requested: amount,
                    });
                }
                let entry = LedgerEntry::new(
                    account_id,
                    EntryKind::Withdrawal,
                    -amount,
                    EntryStatus::Pending,
                    description,
                    now,
                )
                .with_destination(destination);
                Ok((entry.entry_id, vec![BookChange::Append(entry)]))
            })
            .await?;

        self.metrics.withdrawals_requested.inc();
        info!(account_id = %account_id, amount = %amount, "Withdrawal requested");
        outcome(committed.value, committed.entries, committed.account)
    }

    /// Approve a PENDING entry of the given kind. Reached only through the admin gate.
    pub(crate) async fn approve(&self, entry_id: Uuid, kind: EntryKind) -> Result<EntryOutcome> {
        let outcome = self.resolve(entry_id, kind, EntryStatus::Approved).await?;
        self.metrics.approvals.inc();
        Ok(outcome)
    }

    /// Reject a PENDING entry of the given kind. Reached only through the admin gate.
    pub(crate) async fn disapprove(&self, entry_id: Uuid, kind: EntryKind) -> Result<EntryOutcome> {
        let outcome = self.resolve(entry_id, kind, EntryStatus::Disapproved).await?;
        self.metrics.disapprovals.inc();
        Ok(outcome)
    }

    async fn resolve(&self, entry_id: Uuid, kind: EntryKind, status: EntryStatus) -> Result<EntryOutcome> {
        let not_found = || WalletError::not_found(format!("{} {}", kind.label(), entry_id));
        let account_id = self.ledger.locate_entry(entry_id).ok_or_else(not_found)?;

        let committed = self
            .ledger
            .commit(account_id, |book, _now| {
                let entry = book.entry(entry_id).ok_or_else(not_found)?;
                if entry.kind != kind || !kind.requires_approval() {
                    return Err(not_found());
                }
                if !entry.is_pending() {
                    return Err(WalletError::AlreadyResolved(entry_id));
                }
                Ok(((), vec![BookChange::Resolve { entry_id, status }]))
            })
            .await?;

        info!(
            entry_id = %entry_id,
            account_id = %account_id,
            kind = %kind,
            status = %status,
            "Request resolved"
        );
        outcome(entry_id, committed.entries, committed.account)
    }

    /// Credit an account immediately
    pub(crate) async fn admin_top_up(
        &self,
        account_id: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<EntryOutcome> {
        validate_amount(amount)?;
        let description = description_or(description, "Admin top-up");
        let committed = self
            .ledger
            .commit(account_id, |_book, now| {
                let entry = LedgerEntry::new(
                    account_id,
                    EntryKind::AdminTopup,
                    amount,
                    EntryStatus::Applied,
                    description,
                    now,
                );
                Ok((entry.entry_id, vec![BookChange::Append(entry)]))
            })
            .await?;

        self.metrics.admin_adjustments.inc();
        info!(account_id = %account_id, amount = %amount, "Admin top-up applied");
        outcome(committed.value, committed.entries, committed.account)
    }

    /// Debit an account immediately; never below the available balance
    pub(crate) async fn admin_debit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<EntryOutcome> {
        validate_amount(amount)?;
        let description = description_or(description, "Admin debit");
        let committed = self
            .ledger
            .commit(account_id, |book, now| {
                let available = book.account().available();
                if amount > available {
                    return Err(WalletError::InsufficientFunds {
                        available,
                        requested: amount,
                    });
                }
                let entry = LedgerEntry::new(
                    account_id,
                    EntryKind::AdminDebit,
                    -amount,
                    EntryStatus::Applied,
                    description,
                    now,
                );
                Ok((entry.entry_id, vec![BookChange::Append(entry)]))
            })
            .await?;

        self.metrics.admin_adjustments.inc();
        info!(account_id = %account_id, amount = %amount, "Admin debit applied");
        outcome(committed.value, committed.entries, committed.account)
    }
}

fn outcome(entry_id: Uuid, entries: Vec<LedgerEntry>, account: Account) -> Result<EntryOutcome> {
    let entry = entries
        .into_iter()
        .find(|e| e.entry_id == entry_id)
        .ok_or_else(|| WalletError::Internal(format!("entry {} missing from commit", entry_id)))?;
    Ok(EntryOutcome { entry, account })
}

/// Crypto payouts need somewhere to go
fn normalize_destination(destination: WithdrawalDestination) -> Result<WithdrawalDestination> {
    let payment_method = destination.payment_method.trim().to_ascii_lowercase();
    if payment_method.is_empty() {
        return Err(WalletError::Validation("Payment method is required".to_string()));
    }
    let wallet_address = destination
        .wallet_address
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());
    if payment_method == "crypto" && wallet_address.is_none() {
        return Err(WalletError::Validation(
            "Wallet address is required for crypto withdrawals".to_string(),
        ));
    }

    Ok(WithdrawalDestination {
        payment_method,
        coin: destination
            .coin
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty()),
        wallet_address,
    })
}
