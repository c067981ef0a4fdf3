//! Scenario tests for Wallet Ledger Service

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Arc;
    use uuid::Uuid;
    use zentra_core::Caller;

    use crate::clock::ManualClock;
    use crate::error::WalletError;
    use crate::identity::Registration;
    use crate::ledger::MemoryJournal;
    use crate::rates::{RateError, RateFeed};
    use crate::types::{EntryKind, EntryStatus, InvestmentStatus};
    use crate::{AppState, WalletConfig, WalletLedgerService};

    const ADMIN_EMAIL: &str = "admin@zentra.test";

    struct OfflineFeed;

    #[async_trait]
    impl RateFeed for OfflineFeed {
        fn source(&self) -> &'static str {
            "offline"
        }

        async fn fetch_usd(&self, _coin_ids: &[&str]) -> Result<HashMap<String, Decimal>, RateError> {
            Err(RateError::Api("offline".to_string()))
        }
    }

    struct Harness {
        service: WalletLedgerService,
        journal: Arc<MemoryJournal>,
        clock: Arc<ManualClock>,
        admin: Caller,
    }

    impl Harness {
        fn state(&self) -> &AppState {
            self.service.state()
        }

        async fn member(&self, email: &str) -> Caller {
            let user = self
                .state()
                .identity
                .register(Registration {
                    name: "Member".to_string(),
                    email: email.to_string(),
                    password: "member-pass".to_string(),
                    confirm_password: "member-pass".to_string(),
                    dob: NaiveDate::from_ymd_opt(1992, 3, 4),
                    ..Default::default()
                })
                .await
                .unwrap();
            Caller::new(user.id, user.role)
        }

        async fn fund(&self, account_id: Uuid, amount: Decimal) {
            self.state()
                .gate
                .top_up(&self.admin, account_id, amount, None)
                .await
                .unwrap();
        }

        async fn assert_balance_invariant(&self, account_id: Uuid) {
            let (balance, recomputed, reserved, held) = self
                .state()
                .ledger
                .read(account_id, |book| {
                    (
                        book.account().balance,
                        book.recomputed_balance(),
                        book.account().reserved,
                        book.recomputed_reserved(),
                    )
                })
                .await
                .unwrap();
            assert_eq!(balance, recomputed);
            assert_eq!(reserved, held);
        }
    }

    fn config() -> WalletConfig {
        WalletConfig {
            admin_email: ADMIN_EMAIL.to_string(),
            admin_password: Some("admin-pass-123".to_string()),
            ..WalletConfig::default()
        }
    }

    async fn harness_with(journal: Arc<MemoryJournal>, clock: Arc<ManualClock>) -> Harness {
        let service = WalletLedgerService::with_parts(config(), journal.clone(), clock.clone(), Arc::new(OfflineFeed))
            .await
            .unwrap();
        let admin = service.state().identity.find_by_email(ADMIN_EMAIL).unwrap();
        Harness {
            admin: Caller::new(admin.id, admin.role),
            service,
            journal,
            clock,
        }
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(MemoryJournal::new()), Arc::new(ManualClock::default())).await
    }

    #[tokio::test]
    async fn test_balance_matches_entries_after_mixed_activity() {
        let h = harness().await;
        let member = h.member("mixed@example.com").await;
        let id = member.account_id;
        let state = h.state();

        h.fund(id, dec!(1000)).await;
        let deposit = state.workflow.request_deposit(id, dec!(250.50), None).await.unwrap();
        h.assert_balance_invariant(id).await;
        state.gate.approve_deposit(&h.admin, deposit.entry.entry_id).await.unwrap();

        let w1 = state.workflow.request_withdrawal(id, dec!(300), None, None).await.unwrap();
        let w2 = state.workflow.request_withdrawal(id, dec!(100), None, None).await.unwrap();
        h.assert_balance_invariant(id).await;

        state.gate.approve_withdrawal(&h.admin, w1.entry.entry_id).await.unwrap();
        state.gate.disapprove_withdrawal(&h.admin, w2.entry.entry_id).await.unwrap();
        state.investments.invest(id, "bronze", dec!(150)).await.unwrap();
        state.gate.debit(&h.admin, id, dec!(0.50), None).await.unwrap();
        h.assert_balance_invariant(id).await;

        let account = state.ledger.account(id).await.unwrap();
        assert_eq!(account.balance, dec!(800));
        assert_eq!(account.reserved, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_gold_plan_lifecycle() {
        let h = harness().await;
        let member = h.member("gold@example.com").await;
        let id = member.account_id;
        let state = h.state();

        h.fund(id, dec!(1000)).await;
        let opened = state.investments.invest(id, "gold", dec!(1000)).await.unwrap();
        assert_eq!(opened.account.balance, Decimal::ZERO);
        assert_eq!(opened.investment.expected_return, dec!(2520));

        h.clock.advance(Duration::days(14) + Duration::minutes(1));
        let report = state.gate.run_maturation(&h.admin).await.unwrap();
        assert_eq!(report.matured, 1);

        assert_eq!(state.ledger.get_balance(id).await.unwrap(), dec!(3520));
        let views = state.investments.list_investments(id).await.unwrap();
        assert_eq!(views[0].investment.status, InvestmentStatus::Matured);
        assert_eq!(views[0].progress, 1.0);

        let history = state.ledger.list_entries(id, Default::default()).await.unwrap();
        assert_eq!(history.items[0].kind, EntryKind::InvestmentPayout);
        assert_eq!(history.items[0].amount, dec!(3520));
    }

    #[tokio::test]
    async fn test_pending_withdrawal_holds_funds() {
        let h = harness().await;
        let member = h.member("hold@example.com").await;
        let id = member.account_id;
        h.fund(id, dec!(500)).await;

        let held = h.state().workflow.request_withdrawal(id, dec!(500), None, None).await.unwrap();
        assert_eq!(held.account.balance, dec!(500));
        assert_eq!(held.account.available(), Decimal::ZERO);

        let err = h.state().workflow.request_withdrawal(id, dec!(1), None, None).await.unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
        let err = h.state().investments.invest(id, "bronze", dec!(100)).await.unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn test_member_cannot_approve_own_deposit() {
        let h = harness().await;
        let member = h.member("sneaky@example.com").await;
        let deposit = h
            .state()
            .workflow
            .request_deposit(member.account_id, dec!(1000), None)
            .await
            .unwrap();

        let err = h
            .state()
            .gate
            .approve_deposit(&member, deposit.entry.entry_id)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Forbidden(_)));

        let entry = h
            .state()
            .ledger
            .entry(member.account_id, deposit.entry.entry_id)
            .await
            .unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(h.state().ledger.get_balance(member.account_id).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_concurrent_maturation_scans_pay_once() {
        let h = harness().await;
        let member = h.member("race@example.com").await;
        let id = member.account_id;
        h.fund(id, dec!(600)).await;
        h.state().investments.invest(id, "silver", dec!(600)).await.unwrap();
        h.clock.advance(Duration::days(11));

        let engine = h.state().investments.clone();
        let (a, b, c) = tokio::join!(
            engine.run_maturation(),
            engine.run_maturation(),
            engine.run_maturation()
        );
        assert_eq!(a.matured + b.matured + c.matured, 1);

        // 600 + 600 * 0.15 * 10
        assert_eq!(h.state().ledger.get_balance(id).await.unwrap(), dec!(1500));
        h.assert_balance_invariant(id).await;
    }

    #[tokio::test]
    async fn test_referral_bonus_paid_once_through_gate() {
        let h = harness().await;
        let referrer = h.member("referrer@example.com").await;
        let code = h.state().identity.get(referrer.account_id).unwrap().referral_code;
        let referee = h
            .state()
            .identity
            .register(Registration {
                name: "Referee".to_string(),
                email: "referee@example.com".to_string(),
                password: "referee-pass".to_string(),
                confirm_password: "referee-pass".to_string(),
                dob: NaiveDate::from_ymd_opt(1999, 12, 31),
                referral_code: Some(code),
                ..Default::default()
            })
            .await
            .unwrap();

        for amount in [dec!(400), dec!(1000)] {
            let deposit = h.state().workflow.request_deposit(referee.id, amount, None).await.unwrap();
            h.state().gate.approve_deposit(&h.admin, deposit.entry.entry_id).await.unwrap();
        }

        assert_eq!(h.state().ledger.get_balance(referee.id).await.unwrap(), dec!(1400));
        assert_eq!(h.state().ledger.get_balance(referrer.account_id).await.unwrap(), dec!(20));
        let summary = h.state().referrals.summary(referrer.account_id).await.unwrap();
        assert_eq!(summary.referred_count, 1);
        assert_eq!(summary.total_bonus, dec!(20));
    }

    #[tokio::test]
    async fn test_journal_failure_leaves_state_untouched() {
        let h = harness().await;
        let member = h.member("rollback@example.com").await;
        let id = member.account_id;
        h.fund(id, dec!(100)).await;

        h.journal.set_failing(true);
        let err = h.state().workflow.request_withdrawal(id, dec!(40), None, None).await.unwrap_err();
        assert!(matches!(err, WalletError::Storage(_)));
        let err = h.state().gate.debit(&h.admin, id, dec!(40), None).await.unwrap_err();
        assert!(matches!(err, WalletError::Storage(_)));
        h.journal.set_failing(false);

        let account = h.state().ledger.account(id).await.unwrap();
        assert_eq!(account.balance, dec!(100));
        assert_eq!(account.available(), dec!(100));
        let page = h.state().ledger.list_entries(id, Default::default()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(h.state().ledger.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_restores_ledger_and_users() {
        let journal = Arc::new(MemoryJournal::new());
        let clock = Arc::new(ManualClock::default());

        let (member_id, investment_id) = {
            let h = harness_with(journal.clone(), clock.clone()).await;
            let member = h.member("restart@example.com").await;
            h.fund(member.account_id, dec!(700)).await;
            h.state()
                .workflow
                .request_withdrawal(member.account_id, dec!(100), None, None)
                .await
                .unwrap();
            let opened = h
                .state()
                .investments
                .invest(member.account_id, "bronze", dec!(200))
                .await
                .unwrap();
            (member.account_id, opened.investment.investment_id)
        };

        let h = harness_with(journal, clock).await;
        let account = h.state().ledger.account(member_id).await.unwrap();
        assert_eq!(account.balance, dec!(500));
        assert_eq!(account.reserved, dec!(100));
        h.assert_balance_invariant(member_id).await;

        assert!(h.state().identity.login("restart@example.com", "member-pass").await.is_ok());
        assert_eq!(h.state().gate.list_pending_withdrawals(&h.admin).await.unwrap().len(), 1);

        h.clock.advance(Duration::days(8));
        h.state().investments.run_maturation().await;
        let views = h.state().investments.list_investments(member_id).await.unwrap();
        assert_eq!(views[0].investment.investment_id, investment_id);
        assert_eq!(views[0].investment.status, InvestmentStatus::Matured);
        // 500 + 200 + 200 * 0.10 * 7
        assert_eq!(h.state().ledger.get_balance(member_id).await.unwrap(), dec!(840));
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_user_and_account_together() {
        let journal = Arc::new(MemoryJournal::new());
        let clock = Arc::new(ManualClock::default());
        let h = harness_with(journal.clone(), clock.clone()).await;
        let member = h.member("leaving@example.com").await;
        let id = member.account_id;

        h.journal.set_failing(true);
        let err = h.state().gate.delete_account(&h.admin, id).await.unwrap_err();
        assert!(matches!(err, WalletError::Storage(_)));
        h.journal.set_failing(false);

        assert!(h.state().identity.login("leaving@example.com", "member-pass").await.is_ok());
        assert!(h.state().ledger.account(id).await.is_ok());

        h.state().gate.delete_account(&h.admin, id).await.unwrap();
        assert!(h.state().identity.login("leaving@example.com", "member-pass").await.is_err());
        assert!(matches!(h.state().ledger.account(id).await, Err(WalletError::NotFound(_))));

        let restarted = harness_with(journal, clock).await;
        assert!(restarted.state().identity.find_by_email("leaving@example.com").is_none());
        assert!(!restarted.state().ledger.contains(id));
    }

    #[tokio::test]
    async fn test_oversized_amounts_are_rejected() {
        let h = harness().await;
        let member = h.member("whale@example.com").await;
        let id = member.account_id;
        let huge = dec!(50000000000000000000000000000);

        let err = h.state().gate.top_up(&h.admin, id, huge, None).await.unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
        let err = h.state().investments.invest(id, "diamond", huge).await.unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));

        h.fund(id, crate::workflow::MAX_AMOUNT).await;
        h.fund(id, crate::workflow::MAX_AMOUNT).await;
        let opened = h
            .state()
            .investments
            .invest(id, "diamond", crate::workflow::MAX_AMOUNT)
            .await
            .unwrap();
        assert_eq!(opened.account.balance, crate::workflow::MAX_AMOUNT);
        h.assert_balance_invariant(id).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_withdrawals_cannot_double_spend() {
        let h = harness().await;
        let member = h.member("racer@example.com").await;
        let id = member.account_id;
        h.fund(id, dec!(100)).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let workflow = h.state().workflow.clone();
            tasks.push(tokio::spawn(async move {
                workflow.request_withdrawal(id, dec!(100), None, None).await
            }));
        }

        let mut accepted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(WalletError::InsufficientFunds { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(accepted, 1);

        let account = h.state().ledger.account(id).await.unwrap();
        assert_eq!(account.balance, dec!(100));
        assert_eq!(account.reserved, dec!(100));
        assert_eq!(account.available(), Decimal::ZERO);
        assert_eq!(h.state().ledger.pending_count(), 1);
        h.assert_balance_invariant(id).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_maturation_races_invest_and_debit() {
        let h = harness().await;
        let member = h.member("busy@example.com").await;
        let id = member.account_id;
        h.fund(id, dec!(2000)).await;
        h.state().investments.invest(id, "silver", dec!(600)).await.unwrap();
        h.clock.advance(Duration::days(11));

        let state = h.state().clone();
        let admin = h.admin;
        let scan = {
            let investments = state.investments.clone();
            tokio::spawn(async move { investments.run_maturation().await })
        };
        let invest = {
            let investments = state.investments.clone();
            tokio::spawn(async move { investments.invest(id, "bronze", dec!(100)).await })
        };
        let debit = {
            let gate = state.gate.clone();
            tokio::spawn(async move { gate.debit(&admin, id, dec!(50), None).await })
        };

        let (scan, invest, debit) = tokio::join!(scan, invest, debit);
        let report = scan.unwrap();
        assert_eq!(report.matured, 1);
        assert_eq!(report.failed, 0);
        invest.unwrap().unwrap();
        debit.unwrap().unwrap();

        // 2000 - 600 + 600 * (1 + 0.15 * 10) - 100 - 50
        assert_eq!(state.ledger.get_balance(id).await.unwrap(), dec!(2750));
        h.assert_balance_invariant(id).await;

        let views = state.investments.list_investments(id).await.unwrap();
        let statuses: Vec<InvestmentStatus> = views.iter().map(|v| v.investment.status).collect();
        assert_eq!(statuses.iter().filter(|s| **s == InvestmentStatus::Matured).count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == InvestmentStatus::Active).count(), 1);
    }
}
