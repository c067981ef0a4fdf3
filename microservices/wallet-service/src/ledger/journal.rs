//! Ledger Journal
//!
//! Durability port for the ledger and identity state. A batch of records is
//! committed atomically before the in-memory state that produced it is
//! installed; start-up rebuilds memory from `snapshot()`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::{Result, WalletError};
use crate::types::{Account, Investment, LedgerEntry, User};

/// Latest version of one row
#[derive(Debug, Clone)]
pub enum JournalRecord {
    Account(Account),
    AccountDeleted(Uuid),
    Entry(LedgerEntry),
    Investment(Investment),
    User(User),
    UserDeleted(Uuid),
}

/// Everything needed to rebuild the service state
#[derive(Debug, Clone, Default)]
pub struct JournalSnapshot {
    pub accounts: Vec<Account>,
    pub entries: Vec<LedgerEntry>,
    pub investments: Vec<Investment>,
    pub users: Vec<User>,
}

#[async_trait]
pub trait Journal: Send + Sync + 'static {
    /// Backend name for readiness reporting
    fn backend(&self) -> &'static str;

    /// Persist a batch atomically: all records or none
    async fn commit(&self, records: &[JournalRecord]) -> Result<()>;

    /// Current state of every live row
    async fn snapshot(&self) -> Result<JournalSnapshot>;

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    entries: HashMap<Uuid, LedgerEntry>,
    investments: HashMap<Uuid, Investment>,
    users: HashMap<Uuid, User>,
}

/// Process-local journal
#[derive(Debug, Default)]
pub struct MemoryJournal {
    state: Mutex<MemoryState>,
    commits: AtomicU64,
    fail_commits: AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following commit fail with a storage error
    pub fn set_failing(&self, failing: bool) {
        self.fail_commits.store(failing, Ordering::SeqCst);
    }

    /// Number of successful commits
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn commit(&self, records: &[JournalRecord]) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(WalletError::Storage("journal unavailable".to_string()));
        }

        let mut state = self.state.lock();
        for record in records {
            match record {
                JournalRecord::Account(account) => {
                    state.accounts.insert(account.account_id, account.clone());
                }
                JournalRecord::AccountDeleted(id) => {
                    state.accounts.remove(id);
                }
                JournalRecord::Entry(entry) => {
                    state.entries.insert(entry.entry_id, entry.clone());
                }
                JournalRecord::Investment(investment) => {
                    state
                        .investments
                        .insert(investment.investment_id, investment.clone());
                }
                JournalRecord::User(user) => {
                    state.users.insert(user.id, user.clone());
                }
                JournalRecord::UserDeleted(id) => {
                    state.users.remove(id);
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn snapshot(&self) -> Result<JournalSnapshot> {
        let state = self.state.lock();
        // History of deleted accounts stays in the journal but is not replayed
        let live = |account_id: &Uuid| state.accounts.contains_key(account_id);

        let mut entries: Vec<LedgerEntry> = state
            .entries
            .values()
            .filter(|e| live(&e.account_id))
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.account_id, e.sequence));

        Ok(JournalSnapshot {
            accounts: state.accounts.values().cloned().collect(),
            entries,
            investments: state
                .investments
                .values()
                .filter(|i| live(&i.account_id))
                .cloned()
                .collect(),
            users: state.users.values().cloned().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryKind, EntryStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_memory_journal_keeps_latest_row_version() {
        let journal = MemoryJournal::new();
        let now = Utc::now();
        let account = Account::open(Uuid::new_v4(), now);
        let mut entry = LedgerEntry::new(account.account_id, EntryKind::Deposit, dec!(10), EntryStatus::Pending, "d", now);
        entry.sequence = 1;

        journal
            .commit(&[JournalRecord::Account(account.clone()), JournalRecord::Entry(entry.clone())])
            .await
            .unwrap();
        entry.status = EntryStatus::Approved;
        journal.commit(&[JournalRecord::Entry(entry.clone())]).await.unwrap();

        let snapshot = journal.snapshot().await.unwrap();
        assert_eq!(snapshot.accounts.len(), 1);
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].status, EntryStatus::Approved);
        assert_eq!(journal.commit_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_journal_rejects_whole_batch() {
        let journal = MemoryJournal::new();
        journal.set_failing(true);
        let account = Account::open(Uuid::new_v4(), Utc::now());

        let err = journal.commit(&[JournalRecord::Account(account)]).await.unwrap_err();
        assert!(matches!(err, WalletError::Storage(_)));
        assert!(journal.snapshot().await.unwrap().accounts.is_empty());
        assert_eq!(journal.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_deleted_account_history_is_not_replayed() {
        let journal = MemoryJournal::new();
        let now = Utc::now();
        let account = Account::open(Uuid::new_v4(), now);
        let entry = LedgerEntry::new(account.account_id, EntryKind::AdminTopup, dec!(1), EntryStatus::Applied, "t", now);
        journal
            .commit(&[JournalRecord::Account(account.clone()), JournalRecord::Entry(entry)])
            .await
            .unwrap();
        journal
            .commit(&[JournalRecord::AccountDeleted(account.account_id)])
            .await
            .unwrap();

        let snapshot = journal.snapshot().await.unwrap();
        assert!(snapshot.accounts.is_empty());
        assert!(snapshot.entries.is_empty());
    }
}
