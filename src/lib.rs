//! Microstructure Library
//!
//! Resilient multi-source market microstructure aggregation: per-source
//! circuit breakers, token-bucket rate limiting, a TTL + LRU order book cache,
//! and weighted fusion of order books, liquidations, funding, open interest
//! and long/short ratios into one `MicrostructureContext`.

pub mod aggregator;
pub mod book;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod provider;
pub mod resilience;
pub mod types;
pub mod util;

pub use aggregator::MicrostructureAggregator;
pub use book::{compute_book_metrics, BookSnapshot, PriceLevel};
pub use config::AppConfig;
pub use context::{AggregatedBook, ContextStatus, MarketBias, MicrostructureContext, WhaleWall};
pub use error::{AggregatorError, SourceError};
pub use provider::ExchangeProvider;
pub use resilience::Resilience;
pub use types::{ContextFlags, DataKind};
