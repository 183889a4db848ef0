//! Forecast Engine
//!
//! Entry point for the HTTP layer: symbol normalization, quote resolution,
//! prediction/backtest/strategy persistence, user watchlists and prediction
//! alignment, all behind one handle sharing a single connection pool.

pub mod config;
pub mod telemetry;

pub use config::{EngineConfig, LogFormat};
pub use forecast_core::*;
pub use forecast_store::{ForecastError, ForecastResult};

use chrono::NaiveDate;
use forecast_store::{
    AlignmentEngine, ForecastDb, PredictionStore, QuoteResolver, StrategyParamsStore,
    WatchlistStore,
};

#[derive(Clone)]
pub struct ForecastEngine {
    db: ForecastDb,
    quotes: QuoteResolver,
    predictions: PredictionStore,
    strategies: StrategyParamsStore,
    watchlist: WatchlistStore,
    alignment: AlignmentEngine,
}

impl ForecastEngine {
    /// Open the configured database and apply the schema.
    pub async fn connect(config: &EngineConfig) -> ForecastResult<Self> {
        let db = ForecastDb::new(&config.database_url, config.max_connections).await?;
        tracing::info!(
            "Forecast store ready at {} (default visibility: {:?})",
            config.database_url,
            config.default_visibility
        );
        Ok(Self::with_db(db, config.default_visibility))
    }

    pub fn with_db(db: ForecastDb, default_visibility: Visibility) -> Self {
        let pool = db.pool().clone();
        let predictions =
            PredictionStore::new(pool.clone()).with_default_visibility(default_visibility);
        Self {
            quotes: QuoteResolver::new(pool.clone()),
            strategies: StrategyParamsStore::new(pool.clone()),
            watchlist: WatchlistStore::new(pool),
            alignment: AlignmentEngine::new(predictions.clone()),
            predictions,
            db,
        }
    }

    pub fn db(&self) -> &ForecastDb {
        &self.db
    }

    // Symbols and quotes

    pub fn normalize_symbol(raw: &str) -> CanonicalSymbol {
        normalize_symbol(raw)
    }

    pub async fn resolve_latest_quotes<S: AsRef<str>>(&self, symbols: &[S]) -> ForecastResult<Vec<Quote>> {
        self.quotes.resolve_latest(symbols).await
    }

    pub async fn lookup_instrument_name(
        &self,
        symbol: &str,
        class: InstrumentClass,
    ) -> ForecastResult<String> {
        self.quotes.lookup_name(symbol, class).await
    }

    pub async fn upsert_equity_daily(&self, rows: &[EquityDailyRow]) -> ForecastResult<u64> {
        self.quotes.upsert_equity_daily(rows).await
    }

    pub async fn upsert_fund_daily(&self, rows: &[FundDailyRow]) -> ForecastResult<u64> {
        self.quotes.upsert_fund_daily(rows).await
    }

    // Predictions

    pub async fn save_best_prediction(&self, input: &BestPredictionInput) -> ForecastResult<()> {
        self.predictions.save_best_prediction(input).await
    }

    pub async fn get_best_prediction(&self, unique_key: &str) -> ForecastResult<BestPrediction> {
        self.predictions.get_best_prediction(unique_key).await
    }

    pub async fn list_public_predictions(
        &self,
        filter: PredictionFilter,
    ) -> ForecastResult<Vec<BestPrediction>> {
        self.predictions.list_public(filter).await
    }

    pub async fn list_user_predictions(&self, user_id: i64) -> ForecastResult<Vec<BestPrediction>> {
        self.predictions.list_by_user(user_id).await
    }

    pub async fn save_validation_chunk(&self, chunk: &ValidationChunk) -> ForecastResult<()> {
        self.predictions.save_validation_chunk(chunk).await
    }

    pub async fn list_validation_chunks(&self, unique_key: &str) -> ForecastResult<Vec<ValidationChunk>> {
        self.predictions.list_validation_chunks(unique_key).await
    }

    pub async fn latest_validation_chunk(&self, unique_key: &str) -> ForecastResult<ValidationChunk> {
        self.predictions.latest_validation_chunk(unique_key).await
    }

    pub async fn save_backtest_result(&self, result: &BacktestResult) -> ForecastResult<()> {
        self.predictions.save_backtest_result(result).await
    }

    pub async fn get_backtest_result(&self, unique_key: &str) -> ForecastResult<BacktestResult> {
        self.predictions.get_backtest_result(unique_key).await
    }

    // Alignment

    pub async fn align_public_with_validation(
        &self,
        filter: PredictionFilter,
    ) -> ForecastResult<Vec<PublicPredictionView>> {
        self.alignment.align_public_with_validation(filter).await
    }

    pub async fn future_projection(&self, unique_key: &str) -> ForecastResult<FutureProjection> {
        self.alignment.future_projection(unique_key).await
    }

    pub async fn future_projection_as_of(
        &self,
        unique_key: &str,
        today: NaiveDate,
    ) -> ForecastResult<FutureProjection> {
        self.alignment.future_projection_as_of(unique_key, today).await
    }

    // Strategies

    pub async fn save_strategy_params(&self, params: &StrategyParams) -> ForecastResult<i64> {
        self.strategies.save(params).await
    }

    pub async fn get_strategy_params(&self, unique_key: &str) -> ForecastResult<StrategyParams> {
        self.strategies.get_by_unique_key(unique_key).await
    }

    pub async fn list_user_strategies(&self, user_id: i64) -> ForecastResult<Vec<StrategyParams>> {
        self.strategies.list_for_user(user_id).await
    }

    // Watchlist

    pub async fn add_to_watchlist(
        &self,
        user_id: i64,
        input: &WatchlistEntryInput,
    ) -> ForecastResult<WatchlistItem> {
        self.watchlist.add(user_id, input).await
    }

    pub async fn get_watchlist(&self, user_id: i64) -> ForecastResult<Vec<WatchlistItem>> {
        self.watchlist.list(user_id).await
    }

    pub async fn bind_watchlist_strategy(
        &self,
        user_id: i64,
        symbol: &str,
        strategy_unique_key: &str,
    ) -> ForecastResult<()> {
        self.watchlist.bind_strategy(user_id, symbol, strategy_unique_key).await
    }

    pub async fn remove_from_watchlist(&self, user_id: i64, id: i64) -> ForecastResult<()> {
        self.watchlist.remove(user_id, id).await
    }

    pub async fn update_watchlist_item(
        &self,
        user_id: i64,
        id: i64,
        notes: Option<&str>,
    ) -> ForecastResult<WatchlistItem> {
        self.watchlist.update_notes(user_id, id, notes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn engine(visibility: Visibility) -> ForecastEngine {
        let config = EngineConfig {
            database_url: "sqlite::memory:".to_string(),
            default_visibility: visibility,
            ..EngineConfig::default()
        };
        ForecastEngine::connect(&config).await.unwrap()
    }

    fn input(unique_key: &str) -> BestPredictionInput {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        BestPredictionInput {
            unique_key: unique_key.to_string(),
            symbol: "sz000001".to_string(),
            model_version: "2.5".to_string(),
            best_series_name: "q50".to_string(),
            best_metrics: json!({"mae": 0.1}),
            is_public: None,
            train_start_date: d(1, 1),
            train_end_date: d(1, 31),
            test_start_date: d(2, 1),
            test_end_date: d(2, 29),
            val_start_date: d(3, 1),
            val_end_date: d(3, 31),
            context_len: 128,
            horizon_len: 7,
            display_name: None,
            instrument_class: None,
        }
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(ForecastEngine::normalize_symbol("SZ000001").as_str(), "000001");
    }

    #[tokio::test]
    async fn test_configured_visibility_flows_to_store() {
        let private = engine(Visibility::Private).await;
        private.save_best_prediction(&input("uk-1")).await.unwrap();
        assert!(private
            .list_public_predictions(PredictionFilter::default())
            .await
            .unwrap()
            .is_empty());

        let public = engine(Visibility::Public).await;
        public.save_best_prediction(&input("uk-1")).await.unwrap();
        let listed = public
            .list_public_predictions(PredictionFilter::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_errors_map_to_status_codes() {
        let engine = engine(Visibility::DEFAULT).await;
        let err = engine.get_strategy_params("missing").await.unwrap_err();
        assert_eq!(err.status_code(), 404);

        let err = engine
            .lookup_instrument_name("sh600000", InstrumentClass::Equity)
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::SymbolNotFound(_)));
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_watchlist_round_trip() {
        let engine = engine(Visibility::DEFAULT).await;
        engine
            .upsert_equity_daily(&[EquityDailyRow {
                code: "000001".to_string(),
                trading_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                name: Some("PA Bank".to_string()),
                latest_price: Some(11.0),
                change_percent: None,
                turnover_rate: None,
                pe_ratio: None,
            }])
            .await
            .unwrap();
        engine.save_best_prediction(&input("uk-1")).await.unwrap();

        let entry = WatchlistEntryInput {
            symbol: "SZ000001".to_string(),
            notes: Some("watch".to_string()),
            stock_type: Some(1),
        };
        let item = engine.add_to_watchlist(3, &entry).await.unwrap();
        assert_eq!(item.display_name, "PA Bank");
        assert_eq!(item.prediction_unique_key.as_deref(), Some("uk-1"));

        let err = engine.add_to_watchlist(3, &entry).await.unwrap_err();
        assert_eq!(err.status_code(), 409);

        let updated = engine.update_watchlist_item(3, item.id, None).await.unwrap();
        assert_eq!(updated.notes, None);
        assert_eq!(engine.get_watchlist(3).await.unwrap().len(), 1);

        engine.remove_from_watchlist(3, item.id).await.unwrap();
        assert!(engine.get_watchlist(3).await.unwrap().is_empty());
    }
}
