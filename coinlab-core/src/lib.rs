//! coinlab core: daily crypto price data and the buy-and-hold index.
//!
//! - CoinGecko `market_chart` fetcher with a JSON file cache, TTL and a
//!   one-shot free-tier range fallback
//! - Normalization into a fixed daily OHLC schema
//! - Inner-join merge of two assets with prefixed columns
//! - Cumulative-return index builder
//!
//! Network access goes through the [`data::HttpFetcher`] trait so everything
//! above the transport can run against a scripted fake.

pub mod data;
pub mod index;

pub use index::{build_index, IndexRecord, NullReturnPolicy, DEFAULT_BASE};
