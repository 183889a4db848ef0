pub mod alignment;
pub mod db;
pub mod error;
pub mod predictions;
pub mod quotes;
pub mod strategies;
pub mod watchlist;

pub use alignment::AlignmentEngine;
pub use db::ForecastDb;
pub use error::{ForecastError, ForecastResult};
pub use predictions::PredictionStore;
pub use quotes::QuoteResolver;
pub use strategies::StrategyParamsStore;
pub use watchlist::WatchlistStore;
