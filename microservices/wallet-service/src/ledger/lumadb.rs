//! LumaDB-backed journal
//!
//! Rows are upserted inside one transaction per batch. Deleted accounts keep
//! their entry history; only the account row is removed.

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;
use zentra_lumadb::{FromSql, LumaDbError, LumaDbPool, Row};

use super::journal::{Journal, JournalRecord, JournalSnapshot};
use crate::error::{Result, WalletError};
use crate::types::{
    Account, EntryKind, EntryStatus, Investment, InvestmentStatus, LedgerEntry, User,
    WithdrawalDestination,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wallet_accounts (
    account_id  UUID PRIMARY KEY,
    balance     NUMERIC(20, 2) NOT NULL,
    reserved    NUMERIC(20, 2) NOT NULL,
    frozen      BOOLEAN NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS wallet_ledger_entries (
    entry_id      UUID PRIMARY KEY,
    account_id    UUID NOT NULL,
    sequence      BIGINT NOT NULL,
    kind          TEXT NOT NULL,
    amount        NUMERIC(20, 2) NOT NULL,
    status        TEXT NOT NULL,
    description   TEXT NOT NULL,
    destination   JSONB,
    investment_id UUID,
    created_at    TIMESTAMPTZ NOT NULL,
    resolved_at   TIMESTAMPTZ,
    UNIQUE (account_id, sequence)
);

CREATE TABLE IF NOT EXISTS wallet_investments (
    investment_id     UUID PRIMARY KEY,
    account_id        UUID NOT NULL,
    plan_id           TEXT NOT NULL,
    plan_name         TEXT NOT NULL,
    principal         NUMERIC(20, 2) NOT NULL,
    daily_return_rate NUMERIC(10, 6) NOT NULL,
    duration_days     INTEGER NOT NULL,
    status            TEXT NOT NULL,
    start_date        TIMESTAMPTZ NOT NULL,
    end_date          TIMESTAMPTZ NOT NULL,
    expected_return   NUMERIC(20, 2) NOT NULL,
    accrued_return    NUMERIC(20, 2) NOT NULL,
    matured_at        TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS wallet_users (
    id                  UUID PRIMARY KEY,
    name                TEXT NOT NULL,
    email               TEXT NOT NULL UNIQUE,
    password_hash       TEXT NOT NULL,
    role                TEXT NOT NULL,
    dob                 DATE,
    country             TEXT,
    nationality         TEXT,
    referral_code       TEXT NOT NULL UNIQUE,
    referred_by         UUID,
    referral_bonus_paid BOOLEAN NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS wallet_entries_account_idx ON wallet_ledger_entries (account_id, sequence);
CREATE INDEX IF NOT EXISTS wallet_investments_account_idx ON wallet_investments (account_id);
"#;

pub struct LumaDbJournal {
    pool: LumaDbPool,
}

impl LumaDbJournal {
    /// Wrap a pool and make sure the schema exists
    pub async fn connect(pool: LumaDbPool) -> Result<Self> {
        pool.migrate(SCHEMA).await?;
        let stats = pool.stats();
        info!(pool_size = stats.size, available = stats.available, "Wallet journal schema ready");
        Ok(Self { pool })
    }

    async fn write_batch(&self, records: &[JournalRecord]) -> zentra_lumadb::Result<()> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;

        for record in records {
            match record {
                JournalRecord::Account(a) => {
                    tx.execute(
                        "INSERT INTO wallet_accounts (account_id, balance, reserved, frozen, created_at, updated_at)
                         VALUES ($1, $2, $3, $4, $5, $6)
                         ON CONFLICT (account_id) DO UPDATE SET
                         balance = $2, reserved = $3, frozen = $4, updated_at = $6",
                        &[&a.account_id, &a.balance, &a.reserved, &a.frozen, &a.created_at, &a.updated_at],
                    )
                    .await?;
                }
                JournalRecord::AccountDeleted(id) => {
                    tx.execute("DELETE FROM wallet_accounts WHERE account_id = $1", &[id])
                        .await?;
                }
                JournalRecord::Entry(e) => {
                    let destination = e
                        .destination
                        .as_ref()
                        .map(serde_json::to_value)
                        .transpose()
                        .map_err(|err| LumaDbError::Configuration(err.to_string()))?;
                    let sequence: i64 = fit_column("sequence", e.sequence)?;
                    tx.execute(
                        "INSERT INTO wallet_ledger_entries (entry_id, account_id, sequence, kind, amount, status, description, destination, investment_id, created_at, resolved_at)
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                         ON CONFLICT (entry_id) DO UPDATE SET
                         status = $6, resolved_at = $11",
                        &[
                            &e.entry_id,
                            &e.account_id,
                            &sequence,
                            &e.kind.as_str(),
                            &e.amount,
                            &e.status.as_str(),
                            &e.description,
                            &destination,
                            &e.investment_id,
                            &e.created_at,
                            &e.resolved_at,
                        ],
                    )
                    .await?;
                }
                JournalRecord::Investment(i) => {
                    let duration_days: i32 = fit_column("duration_days", i.duration_days)?;
                    tx.execute(
                        "INSERT INTO wallet_investments (investment_id, account_id, plan_id, plan_name, principal, daily_return_rate, duration_days, status, start_date, end_date, expected_return, accrued_return, matured_at)
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                         ON CONFLICT (investment_id) DO UPDATE SET
                         status = $8, accrued_return = $12, matured_at = $13",
                        &[
                            &i.investment_id,
                            &i.account_id,
                            &i.plan_id,
                            &i.plan_name,
                            &i.principal,
                            &i.daily_return_rate,
                            &duration_days,
                            &i.status.as_str(),
                            &i.start_date,
                            &i.end_date,
                            &i.expected_return,
                            &i.accrued_return,
                            &i.matured_at,
                        ],
                    )
                    .await?;
                }
                JournalRecord::User(u) => {
                    tx.execute(
                        "INSERT INTO wallet_users (id, name, email, password_hash, role, dob, country, nationality, referral_code, referred_by, referral_bonus_paid, created_at)
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                         ON CONFLICT (id) DO UPDATE SET
                         name = $2, email = $3, password_hash = $4, role = $5, referral_bonus_paid = $11",
                        &[
                            &u.id,
                            &u.name,
                            &u.email,
                            &u.password_hash,
                            &u.role.as_str(),
                            &u.dob,
                            &u.country,
                            &u.nationality,
                            &u.referral_code,
                            &u.referred_by,
                            &u.referral_bonus_paid,
                            &u.created_at,
                        ],
                    )
                    .await?;
                }
                JournalRecord::UserDeleted(id) => {
                    tx.execute("DELETE FROM wallet_users WHERE id = $1", &[id]).await?;
                }
            }
        }

        tx.commit().await?;
        debug!(records = records.len(), "Journal batch committed");
        Ok(())
    }
}

fn fit_column<T, U>(column: &str, value: U) -> std::result::Result<T, LumaDbError>
where
    T: TryFrom<U>,
    U: Copy + std::fmt::Display,
{
    T::try_from(value)
        .map_err(|_| LumaDbError::Configuration(format!("{} value {} does not fit its column", column, value)))
}

fn col<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T> {
    row.try_get(name)
        .map_err(|e| WalletError::from(LumaDbError::from(e)))
}

fn parse<T: std::str::FromStr<Err = String>>(value: String) -> Result<T> {
    value.parse().map_err(WalletError::Storage)
}

fn account_from_row(row: &Row) -> Result<Account> {
    Ok(Account {
        account_id: col(row, "account_id")?,
        balance: col(row, "balance")?,
        reserved: col(row, "reserved")?,
        frozen: col(row, "frozen")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn entry_from_row(row: &Row) -> Result<LedgerEntry> {
    let destination: Option<serde_json::Value> = col(row, "destination")?;
    let destination: Option<WithdrawalDestination> = destination
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| WalletError::Storage(e.to_string()))?;
    let sequence: i64 = col(row, "sequence")?;
    let sequence =
        u64::try_from(sequence).map_err(|_| WalletError::Storage(format!("negative entry sequence {}", sequence)))?;

    Ok(LedgerEntry {
        entry_id: col(row, "entry_id")?,
        account_id: col(row, "account_id")?,
        sequence,
        kind: parse::<EntryKind>(col(row, "kind")?)?,
        amount: col(row, "amount")?,
        status: parse::<EntryStatus>(col(row, "status")?)?,
        description: col(row, "description")?,
        destination,
        investment_id: col(row, "investment_id")?,
        created_at: col(row, "created_at")?,
        resolved_at: col(row, "resolved_at")?,
    })
}

fn investment_from_row(row: &Row) -> Result<Investment> {
    let duration_days: i32 = col(row, "duration_days")?;
    let duration_days = u32::try_from(duration_days)
        .map_err(|_| WalletError::Storage(format!("negative investment duration {}", duration_days)))?;
    Ok(Investment {
        investment_id: col(row, "investment_id")?,
        account_id: col(row, "account_id")?,
        plan_id: col(row, "plan_id")?,
        plan_name: col(row, "plan_name")?,
        principal: col(row, "principal")?,
        daily_return_rate: col(row, "daily_return_rate")?,
        duration_days,
        status: parse::<InvestmentStatus>(col(row, "status")?)?,
        start_date: col(row, "start_date")?,
        end_date: col(row, "end_date")?,
        expected_return: col(row, "expected_return")?,
        accrued_return: col(row, "accrued_return")?,
        matured_at: col(row, "matured_at")?,
    })
}

fn user_from_row(row: &Row) -> Result<User> {
    Ok(User {
        id: col(row, "id")?,
        name: col(row, "name")?,
        email: col(row, "email")?,
        password_hash: col(row, "password_hash")?,
        role: parse(col(row, "role")?)?,
        dob: col(row, "dob")?,
        country: col(row, "country")?,
        nationality: col(row, "nationality")?,
        referral_code: col(row, "referral_code")?,
        referred_by: col::<Option<Uuid>>(row, "referred_by")?,
        referral_bonus_paid: col(row, "referral_bonus_paid")?,
        created_at: col(row, "created_at")?,
    })
}

#[async_trait]
impl Journal for LumaDbJournal {
    fn backend(&self) -> &'static str {
        "lumadb"
    }

    async fn commit(&self, records: &[JournalRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.write_batch(records).await.map_err(WalletError::from)
    }

    async fn snapshot(&self) -> Result<JournalSnapshot> {
        let conn = self.pool.get().await?;

        let accounts = conn
            .query("SELECT * FROM wallet_accounts", &[])
            .await
            .map_err(LumaDbError::from)?;
        let entries = conn
            .query(
                "SELECT e.* FROM wallet_ledger_entries e
                 JOIN wallet_accounts a ON a.account_id = e.account_id
                 ORDER BY e.account_id, e.sequence",
                &[],
            )
            .await
            .map_err(LumaDbError::from)?;
        let investments = conn
            .query(
                "SELECT i.* FROM wallet_investments i
                 JOIN wallet_accounts a ON a.account_id = i.account_id",
                &[],
            )
            .await
            .map_err(LumaDbError::from)?;
        let users = conn
            .query("SELECT * FROM wallet_users", &[])
            .await
            .map_err(LumaDbError::from)?;

        let snapshot = JournalSnapshot {
            accounts: accounts.iter().map(account_from_row).collect::<Result<_>>()?,
            entries: entries.iter().map(entry_from_row).collect::<Result<_>>()?,
            investments: investments.iter().map(investment_from_row).collect::<Result<_>>()?,
            users: users.iter().map(user_from_row).collect::<Result<_>>()?,
        };

        info!(
            accounts = snapshot.accounts.len(),
            entries = snapshot.entries.len(),
            users = snapshot.users.len(),
            "Loaded wallet journal snapshot"
        );
        Ok(snapshot)
    }

    async fn is_healthy(&self) -> bool {
        self.pool.is_healthy().await
    }
}
