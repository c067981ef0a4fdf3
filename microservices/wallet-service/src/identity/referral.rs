//! Referral program
//!
//! A referrer earns a bonus on their referee's first approved deposit,
//! credited as an APPLIED REFERRAL_BONUS entry.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;
use zentra_core::round_money;

use super::service::IdentityService;
use crate::error::{Result, WalletError};
use crate::ledger::{AccountBook, BookChange, LedgerStore};
use crate::metrics::WalletMetrics;
use crate::types::{EntryKind, EntryStatus, LedgerEntry};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralSummary {
    pub referral_code: String,
    pub referred_count: usize,
    pub total_bonus: Decimal,
}

#[derive(Clone)]
pub struct ReferralProgram {
    identity: IdentityService,
    ledger: LedgerStore,
    bonus_rate: Decimal,
    metrics: WalletMetrics,
}

impl ReferralProgram {
    pub fn new(identity: IdentityService, ledger: LedgerStore, bonus_rate: Decimal, metrics: WalletMetrics) -> Self {
        Self {
            identity,
            ledger,
            bonus_rate,
            metrics,
        }
    }

    /// The bonus total is summed from the referrer's applied REFERRAL_BONUS
    /// entries, so it always agrees with the ledger.
    pub async fn summary(&self, user_id: Uuid) -> Result<ReferralSummary> {
        let user = self
            .identity
            .get(user_id)
            .ok_or_else(|| WalletError::not_found("User"))?;
        let total_bonus = match self.ledger.read(user_id, bonus_total).await {
            Ok(total) => total,
            Err(WalletError::NotFound(_)) => Decimal::ZERO,
            Err(e) => return Err(e),
        };
        Ok(ReferralSummary {
            referral_code: user.referral_code,
            referred_count: self.identity.referred_count(user_id),
            total_bonus,
        })
    }

    /// Pay the referrer of `deposit`'s owner if this is their first approved
    /// deposit. Returns the bonus entry when one was credited.
    ///
    /// The claim and the credit are separate commits; a failed credit
    /// releases the claim so a later deposit can pay it.
    pub async fn on_deposit_approved(&self, deposit: &LedgerEntry) -> Result<Option<LedgerEntry>> {
        if deposit.kind != EntryKind::Deposit || deposit.status != EntryStatus::Approved {
            return Ok(None);
        }
        let bonus = round_money(deposit.amount * self.bonus_rate);
        if bonus <= Decimal::ZERO {
            return Ok(None);
        }

        let referee = deposit.account_id;
        let referrer = match self.identity.claim_referral(referee).await? {
            Some(referrer) => referrer,
            None => return Ok(None),
        };

        let credited = self
            .ledger
            .commit(referrer, |_book, now| {
                let entry = LedgerEntry::new(
                    referrer,
                    EntryKind::ReferralBonus,
                    bonus,
                    EntryStatus::Applied,
                    "Referral bonus",
                    now,
                );
                Ok((entry.entry_id, vec![BookChange::Append(entry)]))
            })
            .await;

        let entry = match credited {
            Ok(committed) => committed
                .entries
                .into_iter()
                .find(|e| e.entry_id == committed.value)
                .ok_or_else(|| WalletError::Internal("bonus entry missing from commit".to_string()))?,
            Err(WalletError::NotFound(_)) => {
                warn!(referrer = %referrer, referee = %referee, "Referrer account is gone, bonus skipped");
                return Ok(None);
            }
            Err(e) => {
                if let Err(release) = self.identity.release_referral(referee).await {
                    error!(referee = %referee, error = %release, "Failed to release referral claim");
                }
                return Err(e);
            }
        };

        self.metrics.referral_bonuses.inc();
        info!(referrer = %referrer, referee = %referee, bonus = %bonus, "Referral bonus credited");
        Ok(Some(entry))
    }
}

fn bonus_total(book: &AccountBook) -> Decimal {
    book.entries()
        .iter()
        .filter(|e| e.kind == EntryKind::ReferralBonus && e.status == EntryStatus::Applied)
        .map(|e| e.amount)
        .fold(Decimal::ZERO, |total, amount| total.saturating_add(amount))
}
