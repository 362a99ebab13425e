//! Price data: fetching, caching, normalization, merging and persistence.

pub mod cache;
pub mod coingecko;
pub mod download;
pub mod http;
pub mod merge;
pub mod normalize;
pub mod parquet;
pub mod provider;
pub mod schema;

pub use cache::{CacheEntry, JsonCache};
pub use coingecko::{FetchOrigin, FetchOutcome, NonNumericPolicy, PriceFetcher};
pub use download::{download_assets, DownloadSummary, FailurePolicy};
pub use http::{BackoffClient, BackoffConfig};
pub use merge::{merge, MergedRecord, MergedSeries};
pub use normalize::{duplicate_dates, normalize, validate_daily, DailyRecord};
pub use provider::{
    DataError, FetchProgress, HttpFetcher, HttpResponse, Lookback, QueryParams, RawPricePoint,
    SilentProgress, StdoutProgress,
};
pub use schema::{DailySchema, SchemaError};
