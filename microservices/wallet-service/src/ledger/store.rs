//! Ledger Store
//!
//! Arena of independently locked account books. Every mutation runs under
//! the owning account's async mutex: validate, stage, journal, install.
//! Different accounts never contend.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zentra_core::RetryPolicy;

use super::book::{AccountBook, BookChange, StagedCommit};
use super::journal::{Journal, JournalRecord, JournalSnapshot};
use crate::clock::Clock;
use crate::error::{Result, WalletError};
use crate::metrics::WalletMetrics;
use crate::types::{Account, EntryKind, EntryStatus, Investment, LedgerEntry, Page, Pagination};

/// Lock acquisition settings
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub lock_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of a committed mutation with the installed row versions
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    pub account: Account,
    pub entries: Vec<LedgerEntry>,
    pub investments: Vec<Investment>,
}

impl<T> Committed<T> {
    fn unchanged(value: T, account: Account) -> Self {
        Self {
            value,
            account,
            entries: Vec::new(),
            investments: Vec::new(),
        }
    }

    fn from_staged(value: T, staged: &StagedCommit) -> Self {
        Self {
            value,
            account: staged.account.clone(),
            entries: staged.entries.clone(),
            investments: staged.investments.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingRef {
    account_id: Uuid,
    kind: EntryKind,
}

#[derive(Clone)]
pub struct LedgerStore {
    books: Arc<DashMap<Uuid, Arc<Mutex<AccountBook>>>>,
    /// entry id -> owning account
    entry_owner: Arc<DashMap<Uuid, Uuid>>,
    /// investment id -> owning account
    investment_owner: Arc<DashMap<Uuid, Uuid>>,
    /// PENDING entries awaiting an admin decision
    pending: Arc<DashMap<Uuid, PendingRef>>,
    journal: Arc<dyn Journal>,
    clock: Arc<dyn Clock>,
    options: StoreOptions,
    metrics: WalletMetrics,
}

impl LedgerStore {
    pub fn new(journal: Arc<dyn Journal>, clock: Arc<dyn Clock>, options: StoreOptions, metrics: WalletMetrics) -> Self {
        Self {
            books: Arc::new(DashMap::new()),
            entry_owner: Arc::new(DashMap::new()),
            investment_owner: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            journal,
            clock,
            options,
            metrics,
        }
    }

    /// Rebuild the arena from a journal snapshot
    pub fn restore(&self, snapshot: &JournalSnapshot) {
        for account in &snapshot.accounts {
            let entries: Vec<LedgerEntry> = snapshot
                .entries
                .iter()
                .filter(|e| e.account_id == account.account_id)
                .cloned()
                .collect();
            let investments: Vec<Investment> = snapshot
                .investments
                .iter()
                .filter(|i| i.account_id == account.account_id)
                .cloned()
                .collect();

            let book = AccountBook::restore(account.clone(), entries, investments);
            if book.recomputed_balance() != account.balance {
                warn!(
                    account_id = %account.account_id,
                    stored = %account.balance,
                    recomputed = %book.recomputed_balance(),
                    "Journaled balance disagrees with entry log"
                );
            }
            self.index_book(&book);
            self.books.insert(account.account_id, Arc::new(Mutex::new(book)));
        }

        self.metrics.accounts.set(self.books.len() as u64);
        info!(accounts = self.books.len(), pending = self.pending.len(), "Ledger restored");
    }

    fn index_book(&self, book: &AccountBook) {
        for entry in book.entries() {
            self.index_entry(entry);
        }
        for investment in book.investments() {
            self.investment_owner
                .insert(investment.investment_id, investment.account_id);
        }
    }

    fn index_entry(&self, entry: &LedgerEntry) {
        self.entry_owner.insert(entry.entry_id, entry.account_id);
        if entry.is_pending() {
            self.pending.insert(
                entry.entry_id,
                PendingRef {
                    account_id: entry.account_id,
                    kind: entry.kind,
                },
            );
        } else {
            self.pending.remove(&entry.entry_id);
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn journal(&self) -> &Arc<dyn Journal> {
        &self.journal
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Open an empty account; returns the existing one if already open.
    ///
    /// The new book is claimed in the map, locked, before it is journaled so
    /// a concurrent opener waits for it instead of writing a second row.
    pub async fn open_account(&self, account_id: Uuid) -> Result<Account> {
        let account = Account::open(account_id, self.clock.now());
        let book = Arc::new(Mutex::new(AccountBook::new(account.clone())));
        let claimed = match self.books.entry(account_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let guard = book
                    .clone()
                    .try_lock_owned()
                    .map_err(|_| WalletError::Internal("fresh account book already locked".to_string()))?;
                slot.insert(book.clone());
                Some(guard)
            }
        };
        let mut guard = match claimed {
            Some(guard) => guard,
            None => return self.account(account_id).await,
        };

        if let Err(e) = self
            .journal
            .commit(&[JournalRecord::Account(account.clone())])
            .await
        {
            guard.close();
            self.books.remove_if(&account_id, |_, held| Arc::ptr_eq(held, &book));
            return Err(e);
        }
        drop(guard);

        self.metrics.accounts.set(self.books.len() as u64);
        debug!(account_id = %account_id, "Account opened");
        Ok(account)
    }

    /// Acquire the account lock with timeout and bounded retry
    async fn lock_book(&self, account_id: Uuid) -> Result<OwnedMutexGuard<AccountBook>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let book = self
                .books
                .get(&account_id)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| WalletError::not_found(format!("Account {}", account_id)))?;

            match tokio::time::timeout(self.options.lock_timeout, book.lock_owned()).await {
                Ok(guard) => {
                    if guard.is_closed() {
                        return Err(WalletError::not_found(format!("Account {}", account_id)));
                    }
                    return Ok(guard);
                }
                Err(_) => {
                    self.metrics.lock_timeouts.inc();
                    if !self.options.retry.should_retry(attempt) {
                        warn!(account_id = %account_id, attempts = attempt, "Account lock acquisition gave up");
                        return Err(WalletError::Unavailable);
                    }
                    let delay = self.options.retry.delay_after(attempt);
                    debug!(account_id = %account_id, attempt, ?delay, "Account lock busy, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Run a mutation under the account lock.
    ///
    /// `plan` inspects the book and returns a value plus the changes to make.
    /// The changes are staged, journaled, and only then installed; any error
    /// along the way leaves the account untouched.
    pub async fn commit<T, F>(&self, account_id: Uuid, plan: F) -> Result<Committed<T>>
    where
        F: FnOnce(&AccountBook, DateTime<Utc>) -> Result<(T, Vec<BookChange>)>,
    {
        let mut book = self.lock_book(account_id).await?;
        let now = self.clock.now();
        let (value, changes) = plan(&*book, now)?;
        if changes.is_empty() {
            return Ok(Committed::unchanged(value, book.account().clone()));
        }

        let staged = book.stage(changes, now)?;
        self.journal.commit(&journal_records(&staged)).await?;

        let committed = Committed::from_staged(value, &staged);
        for entry in &staged.entries {
            self.index_entry(entry);
        }
        for investment in &staged.investments {
            self.investment_owner
                .insert(investment.investment_id, investment.account_id);
        }
        book.install(staged);
        Ok(committed)
    }

    /// Read from a book under its lock
    pub async fn read<T>(&self, account_id: Uuid, f: impl FnOnce(&AccountBook) -> T) -> Result<T> {
        let book = self.lock_book(account_id).await?;
        Ok(f(&*book))
    }

    pub async fn account(&self, account_id: Uuid) -> Result<Account> {
        self.read(account_id, |book| book.account().clone()).await
    }

    pub async fn get_balance(&self, account_id: Uuid) -> Result<Decimal> {
        self.read(account_id, |book| book.account().balance).await
    }

    pub async fn entry(&self, account_id: Uuid, entry_id: Uuid) -> Result<LedgerEntry> {
        self.read(account_id, |book| book.entry(entry_id).cloned())
            .await?
            .ok_or_else(|| WalletError::not_found(format!("Transaction {}", entry_id)))
    }

    /// Append one entry. APPLIED debits may not overdraw the available balance.
    pub async fn append_entry(&self, entry: LedgerEntry) -> Result<Uuid> {
        if entry.amount.is_zero() {
            return Err(WalletError::Validation("Entry amount must not be zero".to_string()));
        }
        if matches!(entry.status, EntryStatus::Approved | EntryStatus::Disapproved) {
            return Err(WalletError::Validation(
                "Entries must be appended as PENDING or APPLIED".to_string(),
            ));
        }

        let account_id = entry.account_id;
        let entry_id = entry.entry_id;
        self.commit(account_id, move |book, _now| {
            let available = book.account().available();
            let debit = -entry.amount;
            if entry.status == EntryStatus::Applied && debit > available {
                return Err(WalletError::InsufficientFunds {
                    available,
                    requested: debit,
                });
            }
            Ok(((), vec![BookChange::Append(entry)]))
        })
        .await?;
        Ok(entry_id)
    }

    /// Newest-first history page
    pub async fn list_entries(&self, account_id: Uuid, pagination: Pagination) -> Result<Page<LedgerEntry>> {
        self.read(account_id, |book| book.page(pagination)).await
    }

    pub async fn set_frozen(&self, account_id: Uuid, frozen: bool) -> Result<Account> {
        let committed = self
            .commit(account_id, |book, _now| {
                if book.account().frozen == frozen {
                    return Ok(((), Vec::new()));
                }
                Ok(((), vec![BookChange::SetFrozen(frozen)]))
            })
            .await?;
        Ok(committed.account)
    }

    pub fn account_ids(&self) -> Vec<Uuid> {
        self.books.iter().map(|entry| *entry.key()).collect()
    }

    pub fn contains(&self, account_id: Uuid) -> bool {
        self.books.contains_key(&account_id)
    }

    /// Snapshot of every open account, oldest first
    pub async fn list_accounts(&self) -> Vec<Account> {
        let mut accounts = Vec::new();
        for account_id in self.account_ids() {
            // Accounts deleted mid-scan are skipped
            if let Ok(account) = self.account(account_id).await {
                accounts.push(account);
            }
        }
        accounts.sort_by_key(|a| a.created_at);
        accounts
    }

    pub fn locate_entry(&self, entry_id: Uuid) -> Option<Uuid> {
        self.entry_owner.get(&entry_id).map(|owner| *owner.value())
    }

    pub fn locate_investment(&self, investment_id: Uuid) -> Option<Uuid> {
        self.investment_owner
            .get(&investment_id)
            .map(|owner| *owner.value())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// PENDING entries of one kind across all accounts, oldest first
    pub async fn pending_of_kind(&self, kind: EntryKind) -> Vec<LedgerEntry> {
        let mut by_account: std::collections::HashMap<Uuid, Vec<Uuid>> = std::collections::HashMap::new();
        for item in self.pending.iter() {
            if item.value().kind == kind {
                by_account
                    .entry(item.value().account_id)
                    .or_default()
                    .push(*item.key());
            }
        }

        let mut pending = Vec::new();
        for (account_id, entry_ids) in by_account {
            let found = self
                .read(account_id, |book| {
                    entry_ids
                        .iter()
                        .filter_map(|id| book.entry(*id))
                        .filter(|e| e.is_pending())
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .await;
            if let Ok(entries) = found {
                pending.extend(entries);
            }
        }

        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        pending
    }

    /// Close and remove an account once `guard` accepts its final state.
    ///
    /// `also` is journaled in the same batch as the deletion. Tasks already
    /// queued on the lock see `NotFound` when they get it.
    pub async fn delete_account<G>(&self, account_id: Uuid, guard: G, also: Vec<JournalRecord>) -> Result<Account>
    where
        G: FnOnce(&AccountBook) -> Result<()>,
    {
        let mut book = self.lock_book(account_id).await?;
        guard(&*book)?;

        let mut records = Vec::with_capacity(1 + also.len());
        records.push(JournalRecord::AccountDeleted(account_id));
        records.extend(also);
        self.journal.commit(&records).await?;

        book.close();
        for entry in book.entries() {
            self.entry_owner.remove(&entry.entry_id);
            self.pending.remove(&entry.entry_id);
        }
        for investment in book.investments() {
            self.investment_owner.remove(&investment.investment_id);
        }
        self.books.remove(&account_id);
        self.metrics.accounts.set(self.books.len() as u64);
        info!(account_id = %account_id, "Account deleted");

        Ok(book.account().clone())
    }
}

fn journal_records(staged: &StagedCommit) -> Vec<JournalRecord> {
    let mut records = Vec::with_capacity(1 + staged.entries.len() + staged.investments.len());
    records.push(JournalRecord::Account(staged.account.clone()));
    records.extend(staged.entries.iter().cloned().map(JournalRecord::Entry));
    records.extend(staged.investments.iter().cloned().map(JournalRecord::Investment));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::MemoryJournal;
    use rust_decimal_macros::dec;

    fn store_with(journal: Arc<MemoryJournal>, options: StoreOptions) -> LedgerStore {
        LedgerStore::new(journal, Arc::new(ManualClock::default()), options, WalletMetrics::new())
    }

    fn store() -> (LedgerStore, Arc<MemoryJournal>) {
        let journal = Arc::new(MemoryJournal::new());
        (store_with(journal.clone(), StoreOptions::default()), journal)
    }

    fn topup(account_id: Uuid, amount: Decimal) -> LedgerEntry {
        LedgerEntry::new(account_id, EntryKind::AdminTopup, amount, EntryStatus::Applied, "top-up", Utc::now())
    }

    #[tokio::test]
    async fn test_append_and_balance() {
        let (store, _) = store();
        let id = Uuid::new_v4();
        store.open_account(id).await.unwrap();

        store.append_entry(topup(id, dec!(250))).await.unwrap();
        assert_eq!(store.get_balance(id).await.unwrap(), dec!(250));

        let debit = LedgerEntry::new(id, EntryKind::AdminDebit, dec!(-300), EntryStatus::Applied, "d", Utc::now());
        let err = store.append_entry(debit).await.unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
        assert_eq!(store.get_balance(id).await.unwrap(), dec!(250));
        assert_eq!(store.list_entries(id, Pagination::default()).await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let (store, _) = store();
        let err = store.get_balance(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, WalletError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_journal_failure_leaves_state_untouched() {
        let (store, journal) = store();
        let id = Uuid::new_v4();
        store.open_account(id).await.unwrap();
        store.append_entry(topup(id, dec!(100))).await.unwrap();

        journal.set_failing(true);
        let err = store.append_entry(topup(id, dec!(50))).await.unwrap_err();
        assert!(matches!(err, WalletError::Storage(_)));
        journal.set_failing(false);

        assert_eq!(store.get_balance(id).await.unwrap(), dec!(100));
        let page = store.list_entries(id, Pagination::default()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].sequence, 1);
    }

    #[tokio::test]
    async fn test_lock_timeout_surfaces_unavailable() {
        let journal = Arc::new(MemoryJournal::new());
        let options = StoreOptions {
            lock_timeout: Duration::from_millis(20),
            retry: RetryPolicy::default()
                .with_maximum_attempts(2)
                .with_initial_interval(Duration::from_millis(5)),
        };
        let store = store_with(journal, options);
        let id = Uuid::new_v4();
        store.open_account(id).await.unwrap();

        let held = store.lock_book(id).await.unwrap();
        let err = store.get_balance(id).await.unwrap_err();
        assert!(matches!(err, WalletError::Unavailable));
        drop(held);

        assert_eq!(store.get_balance(id).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_restore_rebuilds_books_and_pending_queue() {
        let (store, journal) = store();
        let id = Uuid::new_v4();
        store.open_account(id).await.unwrap();
        store.append_entry(topup(id, dec!(75))).await.unwrap();
        let deposit = LedgerEntry::new(id, EntryKind::Deposit, dec!(20), EntryStatus::Pending, "d", Utc::now());
        let deposit_id = store.append_entry(deposit).await.unwrap();

        let restored = store_with(journal.clone(), StoreOptions::default());
        restored.restore(&journal.snapshot().await.unwrap());

        assert_eq!(restored.get_balance(id).await.unwrap(), dec!(75));
        assert_eq!(restored.locate_entry(deposit_id), Some(id));
        let pending = restored.pending_of_kind(EntryKind::Deposit).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entry_id, deposit_id);
    }

    #[tokio::test]
    async fn test_delete_account_wakes_waiters_with_not_found() {
        let (store, _) = store();
        let id = Uuid::new_v4();
        store.open_account(id).await.unwrap();

        let deleted = store.delete_account(id, |_| Ok(()), Vec::new()).await.unwrap();
        assert_eq!(deleted.account_id, id);
        assert!(!store.contains(id));
        assert!(matches!(store.account(id).await, Err(WalletError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_set_frozen_round_trip() {
        let (store, _) = store();
        let id = Uuid::new_v4();
        store.open_account(id).await.unwrap();

        assert!(store.set_frozen(id, true).await.unwrap().frozen);
        assert!(!store.set_frozen(id, false).await.unwrap().frozen);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_open_journals_once() {
        let (store, journal) = store();
        let id = Uuid::new_v4();

        let (a, b, c, d) = tokio::join!(
            store.open_account(id),
            store.open_account(id),
            store.open_account(id),
            store.open_account(id),
        );
        for opened in [a, b, c, d] {
            assert_eq!(opened.unwrap().account_id, id);
        }
        assert_eq!(journal.commit_count(), 1);

        store.append_entry(topup(id, dec!(40))).await.unwrap();
        store.open_account(id).await.unwrap();
        assert_eq!(store.get_balance(id).await.unwrap(), dec!(40));
        assert_eq!(journal.commit_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_open_leaves_no_account() {
        let (store, journal) = store();
        let id = Uuid::new_v4();

        journal.set_failing(true);
        assert!(matches!(store.open_account(id).await, Err(WalletError::Storage(_))));
        assert!(!store.contains(id));

        journal.set_failing(false);
        store.open_account(id).await.unwrap();
        assert!(store.contains(id));
    }

    #[tokio::test]
    async fn test_delete_account_batches_extra_records() {
        let (store, journal) = store();
        let id = Uuid::new_v4();
        store.open_account(id).await.unwrap();

        journal.set_failing(true);
        let failed = store
            .delete_account(id, |_| Ok(()), vec![JournalRecord::UserDeleted(id)])
            .await;
        assert!(matches!(failed, Err(WalletError::Storage(_))));
        assert!(store.contains(id));
        journal.set_failing(false);

        let before = journal.commit_count();
        store
            .delete_account(id, |_| Ok(()), vec![JournalRecord::UserDeleted(id)])
            .await
            .unwrap();
        assert_eq!(journal.commit_count(), before + 1);
        assert!(journal.snapshot().await.unwrap().accounts.is_empty());
    }
}
