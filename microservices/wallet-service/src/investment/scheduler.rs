//! Maturation Scheduler
//!
//! Background ticker that drives the accrual/maturation scan.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use super::engine::InvestmentEngine;

pub struct MaturationScheduler;

impl MaturationScheduler {
    /// Run the scan every `period` until the handle is aborted
    pub fn spawn(engine: InvestmentEngine, period: Duration) -> JoinHandle<()> {
        info!(interval_secs = period.as_secs(), "Starting maturation scheduler");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                engine.run_maturation().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::investment::PlanCatalog;
    use crate::ledger::{LedgerStore, MemoryJournal, StoreOptions};
    use crate::metrics::WalletMetrics;
    use crate::types::{EntryKind, EntryStatus, LedgerEntry};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_scheduler_matures_due_investments() {
        let clock = Arc::new(ManualClock::default());
        let ledger = LedgerStore::new(
            Arc::new(MemoryJournal::new()),
            clock.clone(),
            StoreOptions::default(),
            WalletMetrics::new(),
        );
        let id = Uuid::new_v4();
        ledger.open_account(id).await.unwrap();
        let seed = LedgerEntry::new(id, EntryKind::AdminTopup, dec!(100), EntryStatus::Applied, "seed", clock.now());
        ledger.append_entry(seed).await.unwrap();

        let engine = InvestmentEngine::new(ledger.clone(), PlanCatalog::default(), WalletMetrics::new());
        engine.invest(id, "bronze", dec!(100)).await.unwrap();
        clock.advance(chrono::Duration::days(8));

        let handle = MaturationScheduler::spawn(engine, Duration::from_millis(10));
        let mut balance = dec!(0);
        for _ in 0..100 {
            balance = ledger.get_balance(id).await.unwrap();
            if balance > dec!(0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        // 100 principal + 100 × 0.10 × 7
        assert_eq!(balance, dec!(170));
    }
}
