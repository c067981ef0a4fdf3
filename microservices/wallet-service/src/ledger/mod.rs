//! Ledger: per-account books, the store that locks them, and the journal
//! that makes their changes durable.

mod book;
mod journal;
mod lumadb;
mod store;

pub use book::{AccountBook, BookChange, StagedCommit};
pub use journal::{Journal, JournalRecord, JournalSnapshot, MemoryJournal};
pub use lumadb::LumaDbJournal;
pub use store::{Committed, LedgerStore, StoreOptions};
