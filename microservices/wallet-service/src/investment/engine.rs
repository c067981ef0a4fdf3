//! Investment Engine
//!
//! Opens fixed-term investments against the plan catalog and drives the
//! accrual/maturation scan. Maturation pays out only on the
//! ACTIVE -> MATURED transition, under the account lock, so repeated or
//! concurrent scans cannot pay twice.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::plans::PlanCatalog;
use crate::error::{Result, WalletError};
use crate::ledger::{BookChange, LedgerStore};
use crate::metrics::WalletMetrics;
use crate::types::{
    Account, EntryKind, EntryStatus, Investment, InvestmentPlan, InvestmentStatus, LedgerEntry,
};
use crate::workflow::validate_amount;

/// Investment plus its elapsed share of the term
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentView {
    #[serde(flatten)]
    pub investment: Investment,
    /// Fraction of the term in 0..=1; cancelled terms report 0
    pub progress: f64,
}

/// Totals from one maturation scan
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaturationReport {
    pub accounts_scanned: usize,
    pub matured: usize,
    pub accrued: usize,
    pub paid_out: Decimal,
    pub failed: usize,
}

/// A committed investment with the account state after the debit
#[derive(Debug, Clone)]
pub struct InvestmentOutcome {
    pub investment: Investment,
    pub account: Account,
}

#[derive(Clone)]
pub struct InvestmentEngine {
    ledger: LedgerStore,
    catalog: Arc<PlanCatalog>,
    metrics: WalletMetrics,
}

impl InvestmentEngine {
    pub fn new(ledger: LedgerStore, catalog: PlanCatalog, metrics: WalletMetrics) -> Self {
        Self {
            ledger,
            catalog: Arc::new(catalog),
            metrics,
        }
    }

    pub fn plans(&self) -> &[InvestmentPlan] {
        self.catalog.all()
    }

    /// Debit the principal and open an ACTIVE investment in one commit
    pub async fn invest(&self, account_id: Uuid, plan_id: &str, amount: Decimal) -> Result<InvestmentOutcome> {
        let plan = self
            .catalog
            .get(plan_id)
            .cloned()
            .ok_or_else(|| WalletError::PlanNotFound(plan_id.to_string()))?;
        validate_amount(amount)?;
        if !plan.accepts(amount) {
            let range = match plan.max_amount {
                Some(max) => format!("{} - {}", plan.min_amount, max),
                None => format!("{}+", plan.min_amount),
            };
            return Err(WalletError::AmountOutOfRange {
                plan: plan.name.clone(),
                amount,
                range,
            });
        }

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

                let investment =
                    Investment::open(account_id, &plan, amount, now).ok_or_else(WalletError::amount_too_large)?;
                let debit = LedgerEntry::new(
                    account_id,
                    EntryKind::InvestmentOpen,
                    -amount,
                    EntryStatus::Applied,
                    format!("{} plan investment", plan.name),
                    now,
                )
                .with_investment(investment.investment_id);

                Ok((
                    investment.clone(),
                    vec![BookChange::Append(debit), BookChange::PutInvestment(investment)],
                ))
            })
            .await?;

        self.metrics.investments_opened.inc();
        info!(
            account_id = %account_id,
            investment_id = %committed.value.investment_id,
            plan = %plan.plan_id,
            principal = %amount,
            "Investment opened"
        );
        Ok(InvestmentOutcome {
            investment: committed.value,
            account: committed.account,
        })
    }

    /// Investments for an account, newest first
    pub async fn list_investments(&self, account_id: Uuid) -> Result<Vec<InvestmentView>> {
        let now = self.ledger.now();
        let mut investments = self
            .ledger
            .read(account_id, |book| book.investments().to_vec())
            .await?;
        investments.sort_by(|a, b| b.start_date.cmp(&a.start_date));

        Ok(investments
            .into_iter()
            .map(|investment| InvestmentView {
                progress: investment.progress(now),
                investment,
            })
            .collect())
    }

    /// Accrue or mature every ACTIVE investment, one account lock at a time
    pub async fn run_maturation(&self) -> MaturationReport {
        let started = Instant::now();
        let mut report = MaturationReport::default();

        for account_id in self.ledger.account_ids() {
            report.accounts_scanned += 1;
            match self.mature_account(account_id).await {
                Ok((matured, accrued, paid)) => {
                    report.matured += matured;
                    report.accrued += accrued;
                    report.paid_out = report.paid_out.saturating_add(paid);
                }
                // Deleted while the scan was running
                Err(WalletError::NotFound(_)) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(account_id = %account_id, error = %e, "Maturation failed for account");
                }
            }
        }

        self.metrics.maturation_payouts.add(report.matured as u64);
        self.metrics
            .maturation_scan_ms
            .record(started.elapsed().as_secs_f64() * 1000.0);
        if report.matured > 0 || report.failed > 0 {
            info!(
                matured = report.matured,
                paid_out = %report.paid_out,
                failed = report.failed,
                "Maturation scan complete"
            );
        } else {
            debug!(accounts = report.accounts_scanned, accrued = report.accrued, "Maturation scan complete");
        }
        report
    }

    async fn mature_account(&self, account_id: Uuid) -> Result<(usize, usize, Decimal)> {
        let committed = self
            .ledger
            .commit(account_id, |book, now| {
                let mut changes = Vec::new();
                let mut matured = 0usize;
                let mut accrued = 0usize;
                let mut paid = Decimal::ZERO;

                for investment in book.investments().iter().filter(|i| i.is_active()) {
                    if investment.is_due(now) {
                        let payout = investment.payout_amount().ok_or_else(WalletError::amount_too_large)?;
                        changes.push(BookChange::Append(
                            LedgerEntry::new(
                                account_id,
                                EntryKind::InvestmentPayout,
                                payout,
                                EntryStatus::Applied,
                                format!("{} plan payout", investment.plan_name),
                                now,
                            )
                            .with_investment(investment.investment_id),
                        ));
                        changes.push(BookChange::PutInvestment(matured_copy(investment, now)));
                        matured += 1;
                        paid = paid.checked_add(payout).ok_or_else(WalletError::amount_too_large)?;
                    } else {
                        let accrued_return = investment.accrued_at(now).ok_or_else(WalletError::amount_too_large)?;
                        if accrued_return != investment.accrued_return {
                            let mut updated = investment.clone();
                            updated.accrued_return = accrued_return;
                            changes.push(BookChange::PutInvestment(updated));
                            accrued += 1;
                        }
                    }
                }

                Ok(((matured, accrued, paid), changes))
            })
            .await?;

        for investment in committed.investments.iter().filter(|i| i.status == InvestmentStatus::Matured) {
            info!(
                account_id = %account_id,
                investment_id = %investment.investment_id,
                payout = %investment.principal.saturating_add(investment.expected_return),
                "Investment matured"
            );
        }
        Ok(committed.value)
    }

    /// Cancel an ACTIVE investment and refund its principal. Reached only through the admin gate.
    pub(crate) async fn cancel_investment(&self, investment_id: Uuid) -> Result<InvestmentOutcome> {
        let not_found = || WalletError::not_found(format!("Investment {}", investment_id));
        let account_id = self.ledger.locate_investment(investment_id).ok_or_else(not_found)?;

        let committed = self
            .ledger
            .commit(account_id, |book, now| {
                let investment = book.investment(investment_id).ok_or_else(not_found)?;
                if !investment.is_active() {
                    return Err(WalletError::Conflict(format!(
                        "Investment {} is already {}",
                        investment_id,
                        investment.status.as_str()
                    )));
                }

                let mut cancelled = investment.clone();
                cancelled.status = InvestmentStatus::Cancelled;
                let refund = LedgerEntry::new(
                    account_id,
                    EntryKind::InvestmentPayout,
                    investment.principal,
                    EntryStatus::Applied,
                    format!("{} plan cancelled, principal refunded", investment.plan_name),
                    now,
                )
                .with_investment(investment_id);

                Ok((
                    cancelled.clone(),
                    vec![BookChange::Append(refund), BookChange::PutInvestment(cancelled)],
                ))
            })
            .await?;

        info!(account_id = %account_id, investment_id = %investment_id, "Investment cancelled");
        Ok(InvestmentOutcome {
            investment: committed.value,
            account: committed.account,
        })
    }
}

fn matured_copy(investment: &Investment, now: DateTime<Utc>) -> Investment {
    let mut matured = investment.clone();
    matured.status = InvestmentStatus::Matured;
    matured.accrued_return = matured.expected_return;
    matured.matured_at = Some(now);
    matured
}
