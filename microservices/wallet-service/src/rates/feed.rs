//! Crypto Rate Feed
//!
//! Best-effort USD quotes for the coins the wallet accepts. Quotes are
//! informational only and never take part in a ledger mutation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RateError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Rate fetch timed out")]
    Timeout,
}

/// Tracked coins: (symbol, CoinGecko id, fallback USD price)
const COINS: &[(&str, &str, Decimal)] = &[
    ("BTC", "bitcoin", dec!(60000)),
    ("ETH", "ethereum", dec!(3000)),
    ("LTC", "litecoin", dec!(80)),
];

fn coin_id(symbol: &str) -> Option<&'static str> {
    COINS
        .iter()
        .find(|(s, _, _)| s.eq_ignore_ascii_case(symbol))
        .map(|(_, id, _)| *id)
}

/// Source of USD prices keyed by CoinGecko coin id
#[async_trait]
pub trait RateFeed: Send + Sync + 'static {
    fn source(&self) -> &'static str;

    async fn fetch_usd(&self, coin_ids: &[&str]) -> Result<HashMap<String, Decimal>, RateError>;
}

/// CoinGecko `simple/price` client
pub struct CoinGeckoFeed {
    client: Client,
    base_url: String,
}

impl CoinGeckoFeed {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RateError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RateFeed for CoinGeckoFeed {
    fn source(&self) -> &'static str {
        "coingecko"
    }

    async fn fetch_usd(&self, coin_ids: &[&str]) -> Result<HashMap<String, Decimal>, RateError> {
        let url = format!("{}/simple/price", self.base_url);
        let ids = coin_ids.join(",");

        let response = self
            .client
            .get(&url)
            .query(&[("ids", ids.as_str()), ("vs_currencies", "usd")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RateError::Api(format!("status {}", response.status())));
        }

        let body: HashMap<String, HashMap<String, Decimal>> = response.json().await?;
        Ok(body
            .into_iter()
            .filter_map(|(id, prices)| prices.get("usd").map(|usd| (id, *usd)))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSource {
    Live,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub usd: Decimal,
    pub source: QuoteSource,
    pub as_of: DateTime<Utc>,
}

/// Cached quotes with fallbacks
#[derive(Clone)]
pub struct RateBook {
    feed: Arc<dyn RateFeed>,
    quotes: Arc<DashMap<String, Quote>>,
    timeout: Duration,
}

impl RateBook {
    pub fn new(feed: Arc<dyn RateFeed>, timeout: Duration) -> Self {
        let started = Utc::now();
        let quotes = DashMap::new();
        for (symbol, _, fallback) in COINS {
            quotes.insert(
                symbol.to_string(),
                Quote {
                    symbol: symbol.to_string(),
                    usd: *fallback,
                    source: QuoteSource::Fallback,
                    as_of: started,
                },
            );
        }
        Self {
            feed,
            quotes: Arc::new(quotes),
            timeout,
        }
    }

    pub fn quote(&self, symbol: &str) -> Option<Quote> {
        coin_id(symbol)?;
        self.quotes
            .get(&symbol.to_ascii_uppercase())
            .map(|q| q.value().clone())
    }

    /// All tracked quotes, in a fixed order
    pub fn all(&self) -> Vec<Quote> {
        COINS
            .iter()
            .filter_map(|(symbol, _, _)| self.quote(symbol))
            .collect()
    }

    /// Pull fresh prices. On failure the previous quotes stay in place.
    pub async fn refresh(&self) -> usize {
        let ids: Vec<&str> = COINS.iter().map(|(_, id, _)| *id).collect();
        let fetched = match tokio::time::timeout(self.timeout, self.feed.fetch_usd(&ids)).await {
            Ok(result) => result,
            Err(_) => Err(RateError::Timeout),
        };

        let prices = match fetched {
            Ok(prices) => prices,
            Err(e) => {
                warn!(source = self.feed.source(), error = %e, "Rate refresh failed, keeping previous quotes");
                return 0;
            }
        };

        let now = Utc::now();
        let mut updated = 0;
        for (symbol, id, _) in COINS {
            if let Some(usd) = prices.get(*id).filter(|usd| **usd > Decimal::ZERO) {
                self.quotes.insert(
                    symbol.to_string(),
                    Quote {
                        symbol: symbol.to_string(),
                        usd: *usd,
                        source: QuoteSource::Live,
                        as_of: now,
                    },
                );
                updated += 1;
            }
        }
        debug!(source = self.feed.source(), updated, "Rates refreshed");
        updated
    }

    pub fn spawn_refresher(self, period: Duration) -> JoinHandle<()> {
        info!(period_secs = period.as_secs(), source = self.feed.source(), "Rate refresher started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.refresh().await;
            }
        })
    }
}
