//! Wallet Ledger Service
//!
//! Custodial wallet backend for an investment platform:
//! - Append-only per-account ledger with derived balances and withdrawal holds
//! - Deposit/withdrawal requests resolved through an admin approval gate
//! - Fixed-term investment plans with scheduled accrual and maturation
//! - JWT auth, password reset and a first-deposit referral bonus
//! - Best-effort crypto USD quotes

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zentra_core::{
    DependencyStatus, HealthStatus, ReadinessStatus, Result, ZentraError, ZentraService,
};
use zentra_lumadb::{LumaDbPool, PoolConfig};

pub mod admin;
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod investment;
pub mod ledger;
pub mod metrics;
pub mod rates;
pub mod types;
pub mod workflow;

#[cfg(test)]
mod tests;

pub use admin::AdminGate;
pub use api::AppState;
pub use config::{JournalBackend, WalletConfig};
pub use error::WalletError;
pub use identity::{IdentityService, ReferralProgram};
pub use investment::{InvestmentEngine, MaturationScheduler, PlanCatalog};
pub use ledger::LedgerStore;
pub use workflow::TransactionWorkflow;

use auth::AuthService;
use clock::{Clock, SystemClock};
use ledger::{Journal, LumaDbJournal, MemoryJournal};
use metrics::WalletMetrics;
use rates::{CoinGeckoFeed, RateBook, RateFeed};
use workflow::WorkflowPolicy;

pub struct WalletLedgerService {
    config: WalletConfig,
    state: AppState,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    start_time: Instant,
}

impl WalletLedgerService {
    /// Build the service with the configured journal and the live rate feed
    pub async fn new(config: WalletConfig) -> Result<Self> {
        let journal: Arc<dyn Journal> = match config.journal_backend {
            JournalBackend::Memory => {
                warn!("Using in-memory journal; ledger state is lost on restart");
                Arc::new(MemoryJournal::new())
            }
            JournalBackend::LumaDb => {
                let pool = LumaDbPool::new(PoolConfig::from_env().with_url(config.lumadb_url.clone()))
                    .map_err(WalletError::from)?;
                Arc::new(LumaDbJournal::connect(pool).await?)
            }
        };

        let feed = CoinGeckoFeed::new(&config.rate_feed_url, config.rate_feed_timeout)
            .map_err(|e| ZentraError::Network(e.to_string()))?;

        Self::with_parts(config, journal, Arc::new(SystemClock), Arc::new(feed)).await
    }

    /// Build the service from explicit parts and restore journaled state
    pub async fn with_parts(
        config: WalletConfig,
        journal: Arc<dyn Journal>,
        clock: Arc<dyn Clock>,
        feed: Arc<dyn RateFeed>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = WalletMetrics::new();

        let ledger = LedgerStore::new(journal.clone(), clock, config.store_options(), metrics.clone());
        let snapshot = journal.snapshot().await?;
        ledger.restore(&snapshot);

        let auth = AuthService::new(&config.jwt_secret, &config.jwt_issuer, config.jwt_expiry_secs);
        let identity = IdentityService::new(ledger.clone(), auth.clone());
        identity.restore(&snapshot.users);

        let catalog = match &config.plans_file {
            Some(path) => PlanCatalog::from_file(path)?,
            None => PlanCatalog::default(),
        };
        info!(plans = catalog.all().len(), "Plan catalog loaded");

        let workflow = TransactionWorkflow::new(
            ledger.clone(),
            WorkflowPolicy {
                min_deposit: config.min_deposit,
            },
            metrics.clone(),
        );
        let investments = InvestmentEngine::new(ledger.clone(), catalog, metrics.clone());
        let referrals = ReferralProgram::new(
            identity.clone(),
            ledger.clone(),
            config.referral_bonus_rate,
            metrics.clone(),
        );
        let gate = AdminGate::new(
            ledger.clone(),
            workflow.clone(),
            investments.clone(),
            identity.clone(),
            referrals.clone(),
            metrics.clone(),
        );
        let rates = RateBook::new(feed, config.rate_feed_timeout);

        match &config.admin_password {
            Some(password) => {
                identity
                    .ensure_admin(&config.admin_name, &config.admin_email, password)
                    .await?;
            }
            None => warn!("ADMIN_PASSWORD not set; no bootstrap admin"),
        }

        let state = AppState {
            auth,
            identity,
            referrals,
            ledger,
            workflow,
            investments,
            gate,
            rates,
            metrics,
        };

        Ok(Self {
            config,
            state,
            tasks: Mutex::new(Vec::new()),
            start_time: Instant::now(),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> axum::Router {
        api::create_router(self.state.clone())
    }

    /// Start the maturation scheduler and rate refresher
    pub fn spawn_background(&self) {
        let scheduler = MaturationScheduler::spawn(
            self.state.investments.clone(),
            self.config.maturation_interval,
        );
        let refresher = self.state.rates.clone().spawn_refresher(self.config.rate_refresh);
        self.tasks.lock().extend([scheduler, refresher]);
    }
}

#[async_trait]
impl ZentraService for WalletLedgerService {
    fn service_id(&self) -> &'static str {
        "wallet-service"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn ready(&self) -> ReadinessStatus {
        let journal = self.state.ledger.journal();
        let started = Instant::now();
        let available = journal.is_healthy().await;

        ReadinessStatus {
            ready: available,
            dependencies: vec![DependencyStatus {
                name: journal.backend().to_string(),
                available,
                latency_ms: Some(started.elapsed().as_millis() as u64),
            }],
        }
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down Wallet Ledger Service");
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        info!(http = %self.config.http_bind, "Starting Wallet Ledger HTTP server");
        self.spawn_background();

        let listener = tokio::net::TcpListener::bind(&self.config.http_bind)
            .await
            .map_err(|e| ZentraError::Network(format!("bind {}: {}", self.config.http_bind, e)))?;
        axum::serve(listener, self.router())
            .await
            .map_err(|e| ZentraError::Network(e.to_string()))?;

        Ok(())
    }
}
