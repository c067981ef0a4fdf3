//! USD price quotes

mod feed;

pub use feed::{CoinGeckoFeed, Quote, QuoteSource, RateBook, RateError, RateFeed};
