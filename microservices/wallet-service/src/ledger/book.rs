//! Account Book
//!
//! In-memory state of one account: the account row, its entry log and its
//! investments. A book is only touched while its account lock is held.
//! Mutations are staged into new row versions first, so a failed journal
//! write leaves the book exactly as it was.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Result, WalletError};
use crate::types::{Account, EntryStatus, Investment, LedgerEntry, Page, Pagination};

/// One change requested against a book
#[derive(Debug, Clone)]
pub enum BookChange {
    /// Append a new entry; its sequence is assigned on staging
    Append(LedgerEntry),
    /// Move a PENDING entry to APPROVED or DISAPPROVED
    Resolve { entry_id: Uuid, status: EntryStatus },
    /// Insert or replace an investment
    PutInvestment(Investment),
    SetFrozen(bool),
}

/// Row versions produced by staging, ready to journal and install
#[derive(Debug, Clone)]
pub struct StagedCommit {
    pub account: Account,
    pub entries: Vec<LedgerEntry>,
    pub investments: Vec<Investment>,
}

#[derive(Debug)]
pub struct AccountBook {
    account: Account,
    entries: Vec<LedgerEntry>,
    entry_index: HashMap<Uuid, usize>,
    investments: Vec<Investment>,
    investment_index: HashMap<Uuid, usize>,
    closed: bool,
}

impl AccountBook {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            entries: Vec::new(),
            entry_index: HashMap::new(),
            investments: Vec::new(),
            investment_index: HashMap::new(),
            closed: false,
        }
    }

    /// Rebuild a book from journaled rows
    pub fn restore(account: Account, mut entries: Vec<LedgerEntry>, investments: Vec<Investment>) -> Self {
        entries.sort_by_key(|e| e.sequence);
        let mut book = Self::new(account);
        for entry in entries {
            book.entry_index.insert(entry.entry_id, book.entries.len());
            book.entries.push(entry);
        }
        for investment in investments {
            book.investment_index
                .insert(investment.investment_id, book.investments.len());
            book.investments.push(investment);
        }
        book
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn account_id(&self) -> Uuid {
        self.account.account_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub fn entry(&self, entry_id: Uuid) -> Option<&LedgerEntry> {
        self.entry_index.get(&entry_id).map(|&i| &self.entries[i])
    }

    /// Entries in commit order (oldest first)
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn investment(&self, investment_id: Uuid) -> Option<&Investment> {
        self.investment_index
            .get(&investment_id)
            .map(|&i| &self.investments[i])
    }

    pub fn investments(&self) -> &[Investment] {
        &self.investments
    }

    pub fn pending_entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().filter(|e| e.is_pending())
    }

    pub fn has_active_investments(&self) -> bool {
        self.investments.iter().any(|i| i.is_active())
    }

    /// Balance recomputed from the entry log
    pub fn recomputed_balance(&self) -> Decimal {
        self.entries.iter().map(|e| e.balance_effect()).sum()
    }

    /// Reservation recomputed from the entry log
    pub fn recomputed_reserved(&self) -> Decimal {
        self.entries.iter().map(|e| e.held_amount()).sum()
    }

    /// Newest-first page of entries with sequence below the cursor
    pub fn page(&self, pagination: Pagination) -> Page<LedgerEntry> {
        let limit = pagination.effective_limit();
        let mut items: Vec<LedgerEntry> = self
            .entries
            .iter()
            .rev()
            .filter(|e| pagination.before.map_or(true, |before| e.sequence < before))
            .take(limit + 1)
            .cloned()
            .collect();

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|e| e.sequence)
        } else {
            None
        };

        Page { items, next_cursor }
    }

    /// Apply changes to copies of the affected rows and check the result
    pub fn stage(&self, changes: Vec<BookChange>, now: DateTime<Utc>) -> Result<StagedCommit> {
        let mut account = self.account.clone();
        let mut entries: Vec<LedgerEntry> = Vec::new();
        let mut investments: Vec<Investment> = Vec::new();
        let mut next_sequence = self.entries.last().map_or(0, |e| e.sequence) + 1;

        for change in changes {
            match change {
                BookChange::Append(mut entry) => {
                    if entry.account_id != account.account_id {
                        return Err(WalletError::Internal(format!(
                            "entry {} belongs to another account",
                            entry.entry_id
                        )));
                    }
                    if entry.status == EntryStatus::Approved || entry.status == EntryStatus::Disapproved {
                        return Err(WalletError::Internal(format!(
                            "entry {} cannot be appended already resolved",
                            entry.entry_id
                        )));
                    }
                    entry.sequence = next_sequence;
                    next_sequence += 1;
                    account.balance = checked_sum(account.balance, entry.balance_effect())?;
                    account.reserved = checked_sum(account.reserved, entry.held_amount())?;
                    entries.push(entry);
                }
                BookChange::Resolve { entry_id, status } => {
                    if !matches!(status, EntryStatus::Approved | EntryStatus::Disapproved) {
                        return Err(WalletError::Internal(format!(
                            "cannot resolve entry to {}",
                            status
                        )));
                    }
                    let position = entries.iter().position(|e| e.entry_id == entry_id);
                    let current = match position {
                        Some(i) => entries[i].clone(),
                        None => self
                            .entry(entry_id)
                            .cloned()
                            .ok_or_else(|| WalletError::not_found(format!("Transaction {}", entry_id)))?,
                    };
                    if !current.is_pending() {
                        return Err(WalletError::AlreadyResolved(entry_id));
                    }

                    let mut resolved = current;
                    account.reserved = checked_sum(account.reserved, -resolved.held_amount())?;
                    resolved.status = status;
                    resolved.resolved_at = Some(now);
                    account.balance = checked_sum(account.balance, resolved.balance_effect())?;

                    match position {
                        Some(i) => entries[i] = resolved,
                        None => entries.push(resolved),
                    }
                }
                BookChange::PutInvestment(investment) => {
                    match investments
                        .iter()
                        .position(|i| i.investment_id == investment.investment_id)
                    {
                        Some(i) => investments[i] = investment,
                        None => investments.push(investment),
                    }
                }
                BookChange::SetFrozen(frozen) => account.frozen = frozen,
            }
        }

        if account.balance < Decimal::ZERO || account.available() < Decimal::ZERO {
            return Err(WalletError::InsufficientFunds {
                available: self.account.available(),
                requested: self.account.available() - account.available(),
            });
        }
        if account.reserved < Decimal::ZERO {
            return Err(WalletError::Internal(format!(
                "negative reservation on account {}",
                account.account_id
            )));
        }

        account.updated_at = now;
        Ok(StagedCommit {
            account,
            entries,
            investments,
        })
    }

    /// Install staged rows. Only called after the journal accepted them.
    pub fn install(&mut self, staged: StagedCommit) {
        for entry in staged.entries {
            match self.entry_index.get(&entry.entry_id) {
                Some(&i) => self.entries[i] = entry,
                None => {
                    self.entry_index.insert(entry.entry_id, self.entries.len());
                    self.entries.push(entry);
                }
            }
        }
        for investment in staged.investments {
            match self.investment_index.get(&investment.investment_id) {
                Some(&i) => self.investments[i] = investment,
                None => {
                    self.investment_index
                        .insert(investment.investment_id, self.investments.len());
                    self.investments.push(investment);
                }
            }
        }
        self.account = staged.account;
        debug_assert_eq!(self.account.balance, self.recomputed_balance());
    }
}

fn checked_sum(total: Decimal, delta: Decimal) -> Result<Decimal> {
    total.checked_add(delta).ok_or_else(WalletError::amount_too_large)
}
