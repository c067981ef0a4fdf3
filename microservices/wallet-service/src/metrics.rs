//! Service counters

use serde::Serialize;
use zentra_telemetry::{Counter, Gauge, Histogram};

#[derive(Clone)]
pub struct WalletMetrics {
    pub accounts: Gauge,
    pub deposits_requested: Counter,
    pub withdrawals_requested: Counter,
    pub approvals: Counter,
    pub disapprovals: Counter,
    pub admin_adjustments: Counter,
    pub investments_opened: Counter,
    pub maturation_payouts: Counter,
    pub referral_bonuses: Counter,
    pub referral_failures: Counter,
    pub lock_timeouts: Counter,
    pub maturation_scan_ms: Histogram,
}

impl WalletMetrics {
    pub fn new() -> Self {
        Self {
            accounts: Gauge::new("wallet_accounts"),
            deposits_requested: Counter::new("wallet_deposits_requested_total"),
            withdrawals_requested: Counter::new("wallet_withdrawals_requested_total"),
            approvals: Counter::new("wallet_approvals_total"),
            disapprovals: Counter::new("wallet_disapprovals_total"),
            admin_adjustments: Counter::new("wallet_admin_adjustments_total"),
            investments_opened: Counter::new("wallet_investments_opened_total"),
            maturation_payouts: Counter::new("wallet_maturation_payouts_total"),
            referral_bonuses: Counter::new("wallet_referral_bonuses_total"),
            referral_failures: Counter::new("wallet_referral_failures_total"),
            lock_timeouts: Counter::new("wallet_lock_timeouts_total"),
            maturation_scan_ms: Histogram::new("wallet_maturation_scan_ms"),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accounts: self.accounts.get(),
            deposits_requested: self.deposits_requested.get(),
            withdrawals_requested: self.withdrawals_requested.get(),
            approvals: self.approvals.get(),
            disapprovals: self.disapprovals.get(),
            admin_adjustments: self.admin_adjustments.get(),
            investments_opened: self.investments_opened.get(),
            maturation_payouts: self.maturation_payouts.get(),
            referral_bonuses: self.referral_bonuses.get(),
            referral_failures: self.referral_failures.get(),
            lock_timeouts: self.lock_timeouts.get(),
            maturation_scans: self.maturation_scan_ms.count(),
            maturation_scan_p99_ms: self.maturation_scan_ms.percentile(99.0),
        }
    }
}

impl Default for WalletMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub accounts: u64,
    pub deposits_requested: u64,
    pub withdrawals_requested: u64,
    pub approvals: u64,
    pub disapprovals: u64,
    pub admin_adjustments: u64,
    pub investments_opened: u64,
    pub maturation_payouts: u64,
    pub referral_bonuses: u64,
    pub referral_failures: u64,
    pub lock_timeouts: u64,
    pub maturation_scans: usize,
    pub maturation_scan_p99_ms: f64,
}
