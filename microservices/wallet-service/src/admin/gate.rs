//! Admin Gate
//!
//! Every privileged operation enters here with an explicit `Caller`. The
//! role check runs before any state is read or written.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;
use zentra_core::Caller;

use crate::error::{Result, WalletError};
use crate::identity::{IdentityService, ReferralProgram};
use crate::investment::{InvestmentEngine, InvestmentOutcome, MaturationReport};
use crate::ledger::{JournalRecord, LedgerStore};
use crate::metrics::{MetricsSnapshot, WalletMetrics};
use crate::types::{Account, EntryKind, LedgerEntry, User};
use crate::workflow::{EntryOutcome, TransactionWorkflow};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

/// Pending request with its owner
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingView {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub user: Option<UserSummary>,
}

/// Account with its owner
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    #[serde(flatten)]
    pub account: Account,
    pub available_balance: Decimal,
    pub user: Option<UserSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub users: usize,
    pub accounts: usize,
    pub pending_requests: usize,
    pub total_balance: Decimal,
    pub total_reserved: Decimal,
    pub metrics: MetricsSnapshot,
}

#[derive(Clone)]
pub struct AdminGate {
    ledger: LedgerStore,
    workflow: TransactionWorkflow,
    investments: InvestmentEngine,
    identity: IdentityService,
    referrals: ReferralProgram,
    metrics: WalletMetrics,
}

impl AdminGate {
    pub fn new(
        ledger: LedgerStore,
        workflow: TransactionWorkflow,
        investments: InvestmentEngine,
        identity: IdentityService,
        referrals: ReferralProgram,
        metrics: WalletMetrics,
    ) -> Self {
        Self {
            ledger,
            workflow,
            investments,
            identity,
            referrals,
            metrics,
        }
    }

    fn authorize(&self, caller: &Caller, action: &str) -> Result<()> {
        if caller.is_admin() {
            return Ok(());
        }
        warn!(account_id = %caller.account_id, action, "Admin action denied");
        Err(WalletError::admin_required())
    }

    fn summary(&self, account_id: Uuid) -> Option<UserSummary> {
        self.identity.get(account_id).as_ref().map(UserSummary::from)
    }

    /// Approve a deposit, then pay any referral bonus it unlocks
    pub async fn approve_deposit(&self, caller: &Caller, entry_id: Uuid) -> Result<EntryOutcome> {
        self.authorize(caller, "approve_deposit")?;
        let outcome = self.workflow.approve(entry_id, EntryKind::Deposit).await?;

        // The deposit stands even if the bonus cannot be paid; the claim was
        // released so the referee's next approved deposit retries it
        if let Err(e) = self.referrals.on_deposit_approved(&outcome.entry).await {
            self.metrics.referral_failures.inc();
            error!(entry_id = %entry_id, account_id = %outcome.entry.account_id, error = %e, "Referral bonus failed");
        }
        info!(admin = %caller.account_id, entry_id = %entry_id, "Deposit approved");
        Ok(outcome)
    }

    pub async fn disapprove_deposit(&self, caller: &Caller, entry_id: Uuid) -> Result<EntryOutcome> {
        self.authorize(caller, "disapprove_deposit")?;
        let outcome = self.workflow.disapprove(entry_id, EntryKind::Deposit).await?;
        info!(admin = %caller.account_id, entry_id = %entry_id, "Deposit disapproved");
        Ok(outcome)
    }

    pub async fn approve_withdrawal(&self, caller: &Caller, entry_id: Uuid) -> Result<EntryOutcome> {
        self.authorize(caller, "approve_withdrawal")?;
        let outcome = self.workflow.approve(entry_id, EntryKind::Withdrawal).await?;
        info!(admin = %caller.account_id, entry_id = %entry_id, "Withdrawal approved");
        Ok(outcome)
    }

    pub async fn disapprove_withdrawal(&self, caller: &Caller, entry_id: Uuid) -> Result<EntryOutcome> {
        self.authorize(caller, "disapprove_withdrawal")?;
        let outcome = self.workflow.disapprove(entry_id, EntryKind::Withdrawal).await?;
        info!(admin = %caller.account_id, entry_id = %entry_id, "Withdrawal disapproved");
        Ok(outcome)
    }

    pub async fn top_up(
        &self,
        caller: &Caller,
        account_id: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<EntryOutcome> {
        self.authorize(caller, "top_up")?;
        self.workflow.admin_top_up(account_id, amount, description).await
    }

    pub async fn debit(
        &self,
        caller: &Caller,
        account_id: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<EntryOutcome> {
        self.authorize(caller, "debit")?;
        self.workflow.admin_debit(account_id, amount, description).await
    }

    pub async fn set_frozen(&self, caller: &Caller, account_id: Uuid, frozen: bool) -> Result<Account> {
        self.authorize(caller, "set_frozen")?;
        let account = self.ledger.set_frozen(account_id, frozen).await?;
        info!(admin = %caller.account_id, account_id = %account_id, frozen, "Account freeze updated");
        Ok(account)
    }

    pub async fn list_pending_deposits(&self, caller: &Caller) -> Result<Vec<PendingView>> {
        self.authorize(caller, "list_pending_deposits")?;
        Ok(self.pending_views(EntryKind::Deposit).await)
    }

    pub async fn list_pending_withdrawals(&self, caller: &Caller) -> Result<Vec<PendingView>> {
        self.authorize(caller, "list_pending_withdrawals")?;
        Ok(self.pending_views(EntryKind::Withdrawal).await)
    }

    async fn pending_views(&self, kind: EntryKind) -> Vec<PendingView> {
        self.ledger
            .pending_of_kind(kind)
            .await
            .into_iter()
            .map(|entry| PendingView {
                user: self.summary(entry.account_id),
                entry,
            })
            .collect()
    }

    pub async fn list_accounts(&self, caller: &Caller) -> Result<Vec<AccountView>> {
        self.authorize(caller, "list_accounts")?;
        Ok(self
            .ledger
            .list_accounts()
            .await
            .into_iter()
            .map(|account| AccountView {
                available_balance: account.available(),
                user: self.summary(account.account_id),
                account,
            })
            .collect())
    }

    pub async fn list_users(&self, caller: &Caller) -> Result<Vec<User>> {
        self.authorize(caller, "list_users")?;
        Ok(self.identity.list())
    }

    /// Remove a user and their account. The account must hold nothing:
    /// zero balance, no ACTIVE investments, no PENDING requests.
    pub async fn delete_account(&self, caller: &Caller, account_id: Uuid) -> Result<()> {
        self.authorize(caller, "delete_account")?;
        if caller.account_id == account_id {
            return Err(WalletError::Validation("You cannot delete your own account".to_string()));
        }
        if self.identity.get(account_id).is_none() && !self.ledger.contains(account_id) {
            return Err(WalletError::not_found("User"));
        }

        if self.ledger.contains(account_id) {
            // Account and user go out in one journal batch
            let _users = self.identity.lock_writes().await;
            self.ledger
                .delete_account(
                    account_id,
                    |book| {
                        let account = book.account();
                        if !account.balance.is_zero()
                            || book.has_active_investments()
                            || book.pending_entries().next().is_some()
                        {
                            return Err(WalletError::AccountNotEmpty);
                        }
                        Ok(())
                    },
                    vec![JournalRecord::UserDeleted(account_id)],
                )
                .await?;
            self.identity.forget(account_id);
        } else {
            self.identity.remove(account_id).await?;
        }

        info!(admin = %caller.account_id, account_id = %account_id, "User deleted");
        Ok(())
    }

    pub async fn cancel_investment(&self, caller: &Caller, investment_id: Uuid) -> Result<InvestmentOutcome> {
        self.authorize(caller, "cancel_investment")?;
        let outcome = self.investments.cancel_investment(investment_id).await?;
        info!(admin = %caller.account_id, investment_id = %investment_id, "Investment cancelled by admin");
        Ok(outcome)
    }

    /// Run a maturation scan now instead of waiting for the scheduler
    pub async fn run_maturation(&self, caller: &Caller) -> Result<MaturationReport> {
        self.authorize(caller, "run_maturation")?;
        Ok(self.investments.run_maturation().await)
    }

    pub async fn stats(&self, caller: &Caller) -> Result<AdminStats> {
        self.authorize(caller, "stats")?;
        let accounts = self.ledger.list_accounts().await;
        Ok(AdminStats {
            users: self.identity.list().len(),
            accounts: accounts.len(),
            pending_requests: self.ledger.pending_count(),
            total_balance: accounts.iter().map(|a| a.balance).sum(),
            total_reserved: accounts.iter().map(|a| a.reserved).sum(),
            metrics: self.metrics.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthService;
    use crate::clock::ManualClock;
    use crate::investment::PlanCatalog;
    use crate::ledger::{MemoryJournal, StoreOptions};
    use crate::types::EntryStatus;
    use crate::workflow::WorkflowPolicy;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        gate: AdminGate,
        ledger: LedgerStore,
        workflow: TransactionWorkflow,
        investments: InvestmentEngine,
        admin: Caller,
        user: Caller,
    }

    async fn fixture() -> Fixture {
        let metrics = WalletMetrics::new();
        let ledger = LedgerStore::new(
            Arc::new(MemoryJournal::new()),
            Arc::new(ManualClock::default()),
            StoreOptions::default(),
            metrics.clone(),
        );
        let identity = IdentityService::new(ledger.clone(), AuthService::new("secret", "zentra", 3600));
        let workflow = TransactionWorkflow::new(ledger.clone(), WorkflowPolicy::default(), metrics.clone());
        let investments = InvestmentEngine::new(ledger.clone(), PlanCatalog::default(), metrics.clone());
        let referrals = ReferralProgram::new(identity.clone(), ledger.clone(), dec!(0.05), metrics.clone());
        let gate = AdminGate::new(
            ledger.clone(),
            workflow.clone(),
            investments.clone(),
            identity,
            referrals,
            metrics,
        );

        let admin = Caller::admin(Uuid::new_v4());
        let user = Caller::user(Uuid::new_v4());
        ledger.open_account(admin.account_id).await.unwrap();
        ledger.open_account(user.account_id).await.unwrap();
        Fixture {
            gate,
            ledger,
            workflow,
            investments,
            admin,
            user,
        }
    }

    #[tokio::test]
    async fn test_non_admin_is_rejected_before_state_changes() {
        let f = fixture().await;
        let deposit = f.workflow.request_deposit(f.user.account_id, dec!(100), None).await.unwrap();

        let err = f.gate.approve_deposit(&f.user, deposit.entry.entry_id).await.unwrap_err();
        assert!(matches!(err, WalletError::Forbidden(_)));
        let entry = f.ledger.entry(f.user.account_id, deposit.entry.entry_id).await.unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);

        assert!(f.gate.top_up(&f.user, f.user.account_id, dec!(5), None).await.is_err());
        assert!(f.gate.list_users(&f.user).await.is_err());
        assert!(f.gate.run_maturation(&f.user).await.is_err());
        assert_eq!(f.ledger.get_balance(f.user.account_id).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_withdrawal_approval_and_disapproval() {
        let f = fixture().await;
        let id = f.user.account_id;
        f.gate.top_up(&f.admin, id, dec!(300), None).await.unwrap();

        let first = f.workflow.request_withdrawal(id, dec!(100), None, None).await.unwrap();
        let second = f.workflow.request_withdrawal(id, dec!(50), None, None).await.unwrap();
        assert_eq!(second.account.available(), dec!(150));

        let approved = f.gate.approve_withdrawal(&f.admin, first.entry.entry_id).await.unwrap();
        assert_eq!(approved.account.balance, dec!(200));
        let rejected = f.gate.disapprove_withdrawal(&f.admin, second.entry.entry_id).await.unwrap();
        assert_eq!(rejected.account.balance, dec!(200));
        assert_eq!(rejected.account.available(), dec!(200));

        let again = f.gate.approve_withdrawal(&f.admin, second.entry.entry_id).await.unwrap_err();
        assert!(matches!(again, WalletError::AlreadyResolved(_)));
    }

    #[tokio::test]
    async fn test_approving_with_wrong_kind_is_not_found() {
        let f = fixture().await;
        let deposit = f.workflow.request_deposit(f.user.account_id, dec!(10), None).await.unwrap();
        let err = f.gate.approve_withdrawal(&f.admin, deposit.entry.entry_id).await.unwrap_err();
        assert!(matches!(err, WalletError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_debit_never_overdraws() {
        let f = fixture().await;
        let id = f.user.account_id;
        f.gate.top_up(&f.admin, id, dec!(40), None).await.unwrap();

        let err = f.gate.debit(&f.admin, id, dec!(40.01), None).await.unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
        let page = f.ledger.list_entries(id, Default::default()).await.unwrap();
        assert_eq!(page.items.len(), 1);

        let debited = f.gate.debit(&f.admin, id, dec!(40), None).await.unwrap();
        assert_eq!(debited.account.balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_delete_requires_empty_account() {
        let f = fixture().await;
        let id = f.user.account_id;

        let own = f.gate.delete_account(&f.admin, f.admin.account_id).await.unwrap_err();
        assert!(matches!(own, WalletError::Validation(_)));

        f.gate.top_up(&f.admin, id, dec!(100), None).await.unwrap();
        let opened = f.investments.invest(id, "bronze", dec!(100)).await.unwrap();
        let err = f.gate.delete_account(&f.admin, id).await.unwrap_err();
        assert!(matches!(err, WalletError::AccountNotEmpty));

        f.gate.cancel_investment(&f.admin, opened.investment.investment_id).await.unwrap();
        f.gate.debit(&f.admin, id, dec!(100), None).await.unwrap();
        f.gate.delete_account(&f.admin, id).await.unwrap();
        assert!(!f.ledger.contains(id));

        let gone = f.gate.delete_account(&f.admin, id).await.unwrap_err();
        assert!(matches!(gone, WalletError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_freeze_blocks_withdrawals() {
        let f = fixture().await;
        let id = f.user.account_id;
        f.gate.top_up(&f.admin, id, dec!(50), None).await.unwrap();

        let account = f.gate.set_frozen(&f.admin, id, true).await.unwrap();
        assert!(account.frozen);
        let err = f.workflow.request_withdrawal(id, dec!(10), None, None).await.unwrap_err();
        assert!(matches!(err, WalletError::AccountFrozen));

        f.gate.set_frozen(&f.admin, id, false).await.unwrap();
        assert!(f.workflow.request_withdrawal(id, dec!(10), None, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_lists_and_stats() {
        let f = fixture().await;
        let id = f.user.account_id;
        f.workflow.request_deposit(id, dec!(25), None).await.unwrap();
        f.workflow.request_deposit(id, dec!(75), None).await.unwrap();

        let pending = f.gate.list_pending_deposits(&f.admin).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].entry.amount, dec!(25));
        assert!(f.gate.list_pending_withdrawals(&f.admin).await.unwrap().is_empty());

        let stats = f.gate.stats(&f.admin).await.unwrap();
        assert_eq!(stats.accounts, 2);
        assert_eq!(stats.pending_requests, 2);
        assert_eq!(stats.total_balance, Decimal::ZERO);
    }
}
