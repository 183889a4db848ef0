use chrono::NaiveDate;
use forecast_core::{
    nullable_floats, BacktestResult, BestPrediction, BestPredictionInput, PredictionFilter,
    PredictionValue, ValidationChunk, Visibility,
};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::error::{ForecastError, ForecastResult};
use crate::quotes::QuoteResolver;

const BEST_PREDICTION_COLUMNS: &str = "id, unique_key, symbol, model_version, best_series_name, \
    best_metrics, is_public, train_start_date, train_end_date, test_start_date, test_end_date, \
    val_start_date, val_end_date, context_len, horizon_len, display_name, created_at, updated_at";

const CHUNK_COLUMNS: &str = "unique_key, chunk_index, start_date, end_date, symbol, user_id, \
    predictions, actual_values, dates";

fn encode_floats(values: &[f64]) -> ForecastResult<String> {
    let mut buf = Vec::new();
    nullable_floats::serialize(values, &mut serde_json::Serializer::new(&mut buf))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn decode_floats(json: &str) -> ForecastResult<Vec<f64>> {
    let mut de = serde_json::Deserializer::from_str(json);
    Ok(nullable_floats::deserialize(&mut de)?)
}

fn require(value: &str, field: &str) -> ForecastResult<()> {
    if value.trim().is_empty() {
        return Err(ForecastError::missing(field));
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct BestPredictionRow {
    id: i64,
    unique_key: String,
    symbol: String,
    model_version: String,
    best_series_name: String,
    best_metrics: String,
    is_public: bool,
    train_start_date: NaiveDate,
    train_end_date: NaiveDate,
    test_start_date: NaiveDate,
    test_end_date: NaiveDate,
    val_start_date: NaiveDate,
    val_end_date: NaiveDate,
    context_len: i32,
    horizon_len: i32,
    display_name: String,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl BestPredictionRow {
    fn into_prediction(self) -> ForecastResult<BestPrediction> {
        Ok(BestPrediction {
            id: Some(self.id),
            best_metrics: serde_json::from_str(&self.best_metrics)?,
            unique_key: self.unique_key,
            symbol: self.symbol,
            model_version: self.model_version,
            best_series_name: self.best_series_name,
            is_public: self.is_public,
            train_start_date: self.train_start_date,
            train_end_date: self.train_end_date,
            test_start_date: self.test_start_date,
            test_end_date: self.test_end_date,
            val_start_date: self.val_start_date,
            val_end_date: self.val_end_date,
            context_len: self.context_len,
            horizon_len: self.horizon_len,
            display_name: self.display_name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChunkRow {
    unique_key: String,
    chunk_index: i32,
    start_date: NaiveDate,
    end_date: NaiveDate,
    symbol: Option<String>,
    user_id: Option<i64>,
    predictions: String,
    actual_values: String,
    dates: String,
}

impl ChunkRow {
    fn into_chunk(self) -> ForecastResult<ValidationChunk> {
        let predictions: BTreeMap<String, PredictionValue> = serde_json::from_str(&self.predictions)?;
        Ok(ValidationChunk {
            predictions,
            actual_values: decode_floats(&self.actual_values)?,
            dates: serde_json::from_str(&self.dates)?,
            unique_key: self.unique_key,
            chunk_index: self.chunk_index,
            start_date: self.start_date,
            end_date: self.end_date,
            symbol: self.symbol,
            user_id: self.user_id,
        })
    }
}

/// Decode chunk rows, skipping any whose JSON columns are unreadable.
fn decode_chunks(rows: Vec<ChunkRow>) -> Vec<ValidationChunk> {
    rows.into_iter()
        .filter_map(|row| {
            let (key, index) = (row.unique_key.clone(), row.chunk_index);
            match row.into_chunk() {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    tracing::warn!("Skipping undecodable chunk {}#{}: {}", key, index, e);
                    None
                }
            }
        })
        .collect()
}

#[derive(sqlx::FromRow)]
struct BacktestRow {
    unique_key: String,
    symbol: String,
    model_version: String,
    context_len: i32,
    horizon_len: i32,
    user_id: Option<i64>,
    strategy_params_id: Option<i64>,
    used_quantile: Option<String>,
    buy_threshold_pct: f64,
    sell_threshold_pct: f64,
    trade_fee_rate: f64,
    total_fees_paid: f64,
    actual_total_return_pct: f64,
    benchmark_return_pct: f64,
    benchmark_annualized_return_pct: f64,
    period_days: i32,
    validation_start_date: Option<NaiveDate>,
    validation_end_date: Option<NaiveDate>,
    validation_benchmark_return_pct: f64,
    validation_benchmark_annualized_return_pct: f64,
    validation_period_days: i32,
    position_control: String,
    predicted_change_stats: String,
    per_chunk_signals: String,
    equity_curve_values: String,
    equity_curve_pct: String,
    equity_curve_pct_gross: String,
    curve_dates: String,
    actual_end_prices: String,
    trades: String,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl BacktestRow {
    fn into_result(self) -> ForecastResult<BacktestResult> {
        Ok(BacktestResult {
            position_control: serde_json::from_str(&self.position_control)?,
            predicted_change_stats: serde_json::from_str(&self.predicted_change_stats)?,
            per_chunk_signals: serde_json::from_str(&self.per_chunk_signals)?,
            equity_curve_values: decode_floats(&self.equity_curve_values)?,
            equity_curve_pct: decode_floats(&self.equity_curve_pct)?,
            equity_curve_pct_gross: decode_floats(&self.equity_curve_pct_gross)?,
            curve_dates: serde_json::from_str(&self.curve_dates)?,
            actual_end_prices: decode_floats(&self.actual_end_prices)?,
            trades: serde_json::from_str(&self.trades)?,
            unique_key: self.unique_key,
            symbol: self.symbol,
            model_version: self.model_version,
            context_len: self.context_len,
            horizon_len: self.horizon_len,
            user_id: self.user_id,
            strategy_params_id: self.strategy_params_id,
            used_quantile: self.used_quantile,
            buy_threshold_pct: self.buy_threshold_pct,
            sell_threshold_pct: self.sell_threshold_pct,
            trade_fee_rate: self.trade_fee_rate,
            total_fees_paid: self.total_fees_paid,
            actual_total_return_pct: self.actual_total_return_pct,
            benchmark_return_pct: self.benchmark_return_pct,
            benchmark_annualized_return_pct: self.benchmark_annualized_return_pct,
            period_days: self.period_days,
            validation_start_date: self.validation_start_date,
            validation_end_date: self.validation_end_date,
            validation_benchmark_return_pct: self.validation_benchmark_return_pct,
            validation_benchmark_annualized_return_pct: self.validation_benchmark_annualized_return_pct,
            validation_period_days: self.validation_period_days,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Persistence for best predictions, their validation chunks and backtests.
#[derive(Clone)]
pub struct PredictionStore {
    pool: SqlitePool,
    quotes: QuoteResolver,
    default_visibility: Visibility,
}

impl PredictionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            quotes: QuoteResolver::new(pool.clone()),
            pool,
            default_visibility: Visibility::DEFAULT,
        }
    }

    /// Visibility applied when a caller saves without choosing one.
    pub fn with_default_visibility(mut self, visibility: Visibility) -> Self {
        self.default_visibility = visibility;
        self
    }

    /// Full upsert keyed by `unique_key`. Everything but `created_at` is
    /// overwritten on conflict.
    pub async fn save_best_prediction(&self, input: &BestPredictionInput) -> ForecastResult<()> {
        require(&input.unique_key, "unique_key")?;
        require(&input.symbol, "symbol")?;
        require(&input.model_version, "model_version")?;
        require(&input.best_series_name, "best_series_name")?;

        let is_public = input
            .is_public
            .unwrap_or_else(|| self.default_visibility.is_public());

        let mut display_name = input.display_name.clone().unwrap_or_default().trim().to_string();
        if display_name.is_empty() {
            if let Some(class) = input.instrument_class {
                match self.quotes.lookup_name(&input.symbol, class).await {
                    Ok(name) => display_name = name,
                    Err(ForecastError::SymbolNotFound(_)) => {
                        tracing::debug!("No display name found for {}", input.symbol);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let best_metrics = serde_json::to_string(&input.best_metrics)?;

        sqlx::query(
            "INSERT INTO best_predictions (
                unique_key, symbol, model_version, best_series_name, best_metrics, is_public,
                train_start_date, train_end_date, test_start_date, test_end_date,
                val_start_date, val_end_date, context_len, horizon_len, display_name, update_seq
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                (SELECT COALESCE(MAX(update_seq), 0) + 1 FROM best_predictions))
            ON CONFLICT(unique_key) DO UPDATE SET
                symbol = excluded.symbol,
                model_version = excluded.model_version,
                best_series_name = excluded.best_series_name,
                best_metrics = excluded.best_metrics,
                is_public = excluded.is_public,
                train_start_date = excluded.train_start_date,
                train_end_date = excluded.train_end_date,
                test_start_date = excluded.test_start_date,
                test_end_date = excluded.test_end_date,
                val_start_date = excluded.val_start_date,
                val_end_date = excluded.val_end_date,
                context_len = excluded.context_len,
                horizon_len = excluded.horizon_len,
                display_name = excluded.display_name,
                update_seq = excluded.update_seq,
                updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')",
        )
        .bind(&input.unique_key)
        .bind(&input.symbol)
        .bind(&input.model_version)
        .bind(&input.best_series_name)
        .bind(&best_metrics)
        .bind(is_public)
        .bind(input.train_start_date)
        .bind(input.train_end_date)
        .bind(input.test_start_date)
        .bind(input.test_end_date)
        .bind(input.val_start_date)
        .bind(input.val_end_date)
        .bind(input.context_len)
        .bind(input.horizon_len)
        .bind(&display_name)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "Saved best prediction {} ({} {}, public={})",
            input.unique_key,
            input.symbol,
            input.model_version,
            is_public
        );
        Ok(())
    }

    pub async fn get_best_prediction(&self, unique_key: &str) -> ForecastResult<BestPrediction> {
        let sql = format!(
            "SELECT {} FROM best_predictions WHERE unique_key = ?",
            BEST_PREDICTION_COLUMNS
        );
        let row = sqlx::query_as::<_, BestPredictionRow>(&sql)
            .bind(unique_key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.into_prediction(),
            None => Err(ForecastError::NotFound(format!("best prediction {}", unique_key))),
        }
    }

    /// Public predictions, most recently saved first.
    pub async fn list_public(&self, filter: PredictionFilter) -> ForecastResult<Vec<BestPrediction>> {
        let rows = match filter.horizon_len {
            Some(horizon_len) => {
                let sql = format!(
                    "SELECT {} FROM best_predictions WHERE is_public = 1 AND horizon_len = ?
                     ORDER BY update_seq DESC",
                    BEST_PREDICTION_COLUMNS
                );
                sqlx::query_as::<_, BestPredictionRow>(&sql)
                    .bind(horizon_len)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM best_predictions WHERE is_public = 1
                     ORDER BY update_seq DESC",
                    BEST_PREDICTION_COLUMNS
                );
                sqlx::query_as::<_, BestPredictionRow>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(BestPredictionRow::into_prediction).collect()
    }

    /// Predictions that have at least one validation chunk tagged with `user_id`.
    pub async fn list_by_user(&self, user_id: i64) -> ForecastResult<Vec<BestPrediction>> {
        let sql = format!(
            "SELECT {} FROM best_predictions bp
             WHERE EXISTS (
                SELECT 1 FROM validation_chunks vc
                WHERE vc.unique_key = bp.unique_key AND vc.user_id = ?
             )
             ORDER BY bp.update_seq DESC",
            BEST_PREDICTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, BestPredictionRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(BestPredictionRow::into_prediction).collect()
    }

    /// Upsert keyed by (unique_key, chunk_index). The parent prediction must exist.
    pub async fn save_validation_chunk(&self, chunk: &ValidationChunk) -> ForecastResult<()> {
        require(&chunk.unique_key, "unique_key")?;
        if chunk.chunk_index < 0 {
            return Err(ForecastError::Validation(format!(
                "chunk_index must be non-negative, got {}",
                chunk.chunk_index
            )));
        }
        if chunk.start_date > chunk.end_date {
            return Err(ForecastError::Validation(format!(
                "start_date {} is after end_date {}",
                chunk.start_date, chunk.end_date
            )));
        }

        let predictions = serde_json::to_string(&chunk.predictions)?;
        let actual_values = encode_floats(&chunk.actual_values)?;
        let dates = serde_json::to_string(&chunk.dates)?;

        sqlx::query(
            "INSERT INTO validation_chunks (
                unique_key, chunk_index, start_date, end_date, symbol, user_id,
                predictions, actual_values, dates
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(unique_key, chunk_index) DO UPDATE SET
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                symbol = excluded.symbol,
                user_id = excluded.user_id,
                predictions = excluded.predictions,
                actual_values = excluded.actual_values,
                dates = excluded.dates,
                updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')",
        )
        .bind(&chunk.unique_key)
        .bind(chunk.chunk_index)
        .bind(chunk.start_date)
        .bind(chunk.end_date)
        .bind(&chunk.symbol)
        .bind(chunk.user_id)
        .bind(&predictions)
        .bind(&actual_values)
        .bind(&dates)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Saved validation chunk {}#{} ({} points)",
            chunk.unique_key,
            chunk.chunk_index,
            chunk.dates.len()
        );
        Ok(())
    }

    /// All chunks of a prediction, ascending by chunk index.
    pub async fn list_validation_chunks(&self, unique_key: &str) -> ForecastResult<Vec<ValidationChunk>> {
        let sql = format!(
            "SELECT {} FROM validation_chunks WHERE unique_key = ? ORDER BY chunk_index ASC",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query_as::<_, ChunkRow>(&sql)
            .bind(unique_key)
            .fetch_all(&self.pool)
            .await?;

        Ok(decode_chunks(rows))
    }

    /// Chunks starting on or after `from`, ascending by chunk index.
    pub async fn list_validation_chunks_from(
        &self,
        unique_key: &str,
        from: NaiveDate,
    ) -> ForecastResult<Vec<ValidationChunk>> {
        let sql = format!(
            "SELECT {} FROM validation_chunks WHERE unique_key = ? AND start_date >= ?
             ORDER BY chunk_index ASC",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query_as::<_, ChunkRow>(&sql)
            .bind(unique_key)
            .bind(from)
            .fetch_all(&self.pool)
            .await?;

        Ok(decode_chunks(rows))
    }

    /// Chunks starting on or before `until`, ascending by chunk index.
    pub async fn list_validation_chunks_until(
        &self,
        unique_key: &str,
        until: NaiveDate,
    ) -> ForecastResult<Vec<ValidationChunk>> {
        let sql = format!(
            "SELECT {} FROM validation_chunks WHERE unique_key = ? AND start_date <= ?
             ORDER BY chunk_index ASC",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query_as::<_, ChunkRow>(&sql)
            .bind(unique_key)
            .bind(until)
            .fetch_all(&self.pool)
            .await?;

        Ok(decode_chunks(rows))
    }

    /// Highest-index chunk of a prediction.
    pub async fn latest_validation_chunk(&self, unique_key: &str) -> ForecastResult<ValidationChunk> {
        let sql = format!(
            "SELECT {} FROM validation_chunks WHERE unique_key = ?
             ORDER BY chunk_index DESC LIMIT 1",
            CHUNK_COLUMNS
        );
        let row = sqlx::query_as::<_, ChunkRow>(&sql)
            .bind(unique_key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.into_chunk(),
            None => Err(ForecastError::NotFound(format!(
                "validation chunks for {}",
                unique_key
            ))),
        }
    }

    /// Upsert keyed by `unique_key`. A missing `strategy_params_id` is resolved
    /// from the strategy with the same unique key, scoped to the user if given.
    pub async fn save_backtest_result(&self, result: &BacktestResult) -> ForecastResult<()> {
        require(&result.unique_key, "unique_key")?;
        require(&result.symbol, "symbol")?;
        require(&result.model_version, "model_version")?;

        let strategy_params_id = match result.strategy_params_id {
            Some(id) => Some(id),
            None => self.resolve_strategy_id(&result.unique_key, result.user_id).await?,
        };

        let position_control = serde_json::to_string(&result.position_control)?;
        let predicted_change_stats = serde_json::to_string(&result.predicted_change_stats)?;
        let per_chunk_signals = serde_json::to_string(&result.per_chunk_signals)?;
        let equity_curve_values = encode_floats(&result.equity_curve_values)?;
        let equity_curve_pct = encode_floats(&result.equity_curve_pct)?;
        let equity_curve_pct_gross = encode_floats(&result.equity_curve_pct_gross)?;
        let curve_dates = serde_json::to_string(&result.curve_dates)?;
        let actual_end_prices = encode_floats(&result.actual_end_prices)?;
        let trades = serde_json::to_string(&result.trades)?;

        sqlx::query(
            "INSERT INTO backtest_results (
                unique_key, symbol, model_version, context_len, horizon_len, user_id,
                strategy_params_id, used_quantile, buy_threshold_pct, sell_threshold_pct,
                trade_fee_rate, total_fees_paid, actual_total_return_pct, benchmark_return_pct,
                benchmark_annualized_return_pct, period_days, validation_start_date,
                validation_end_date, validation_benchmark_return_pct,
                validation_benchmark_annualized_return_pct, validation_period_days,
                position_control, predicted_change_stats, per_chunk_signals,
                equity_curve_values, equity_curve_pct, equity_curve_pct_gross, curve_dates,
                actual_end_prices, trades
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(unique_key) DO UPDATE SET
                symbol = excluded.symbol,
                model_version = excluded.model_version,
                context_len = excluded.context_len,
                horizon_len = excluded.horizon_len,
                user_id = excluded.user_id,
                strategy_params_id = excluded.strategy_params_id,
                used_quantile = excluded.used_quantile,
                buy_threshold_pct = excluded.buy_threshold_pct,
                sell_threshold_pct = excluded.sell_threshold_pct,
                trade_fee_rate = excluded.trade_fee_rate,
                total_fees_paid = excluded.total_fees_paid,
                actual_total_return_pct = excluded.actual_total_return_pct,
                benchmark_return_pct = excluded.benchmark_return_pct,
                benchmark_annualized_return_pct = excluded.benchmark_annualized_return_pct,
                period_days = excluded.period_days,
                validation_start_date = excluded.validation_start_date,
                validation_end_date = excluded.validation_end_date,
                validation_benchmark_return_pct = excluded.validation_benchmark_return_pct,
                validation_benchmark_annualized_return_pct = excluded.validation_benchmark_annualized_return_pct,
                validation_period_days = excluded.validation_period_days,
                position_control = excluded.position_control,
                predicted_change_stats = excluded.predicted_change_stats,
                per_chunk_signals = excluded.per_chunk_signals,
                equity_curve_values = excluded.equity_curve_values,
                equity_curve_pct = excluded.equity_curve_pct,
                equity_curve_pct_gross = excluded.equity_curve_pct_gross,
                curve_dates = excluded.curve_dates,
                actual_end_prices = excluded.actual_end_prices,
                trades = excluded.trades,
                updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')",
        )
        .bind(&result.unique_key)
        .bind(&result.symbol)
        .bind(&result.model_version)
        .bind(result.context_len)
        .bind(result.horizon_len)
        .bind(result.user_id)
        .bind(strategy_params_id)
        .bind(&result.used_quantile)
        .bind(result.buy_threshold_pct)
        .bind(result.sell_threshold_pct)
        .bind(result.trade_fee_rate)
        .bind(result.total_fees_paid)
        .bind(result.actual_total_return_pct)
        .bind(result.benchmark_return_pct)
        .bind(result.benchmark_annualized_return_pct)
        .bind(result.period_days)
        .bind(result.validation_start_date)
        .bind(result.validation_end_date)
        .bind(result.validation_benchmark_return_pct)
        .bind(result.validation_benchmark_annualized_return_pct)
        .bind(result.validation_period_days)
        .bind(&position_control)
        .bind(&predicted_change_stats)
        .bind(&per_chunk_signals)
        .bind(&equity_curve_values)
        .bind(&equity_curve_pct)
        .bind(&equity_curve_pct_gross)
        .bind(&curve_dates)
        .bind(&actual_end_prices)
        .bind(&trades)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "Saved backtest {} for {} ({} trades)",
            result.unique_key,
            result.symbol,
            result.trades.len()
        );
        Ok(())
    }

    async fn resolve_strategy_id(&self, unique_key: &str, user_id: Option<i64>) -> ForecastResult<Option<i64>> {
        let id: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM strategy_params
             WHERE unique_key = ? AND (? IS NULL OR user_id = ?)
             ORDER BY id DESC LIMIT 1",
        )
        .bind(unique_key)
        .bind(user_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id.map(|(id,)| id))
    }

    pub async fn get_backtest_result(&self, unique_key: &str) -> ForecastResult<BacktestResult> {
        let row = sqlx::query_as::<_, BacktestRow>(
            "SELECT unique_key, symbol, model_version, context_len, horizon_len, user_id,
                strategy_params_id, used_quantile, buy_threshold_pct, sell_threshold_pct,
                trade_fee_rate, total_fees_paid, actual_total_return_pct, benchmark_return_pct,
                benchmark_annualized_return_pct, period_days, validation_start_date,
                validation_end_date, validation_benchmark_return_pct,
                validation_benchmark_annualized_return_pct, validation_period_days,
                position_control, predicted_change_stats, per_chunk_signals,
                equity_curve_values, equity_curve_pct, equity_curve_pct_gross, curve_dates,
                actual_end_prices, trades, created_at, updated_at
             FROM backtest_results WHERE unique_key = ?",
        )
        .bind(unique_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_result(),
            None => Err(ForecastError::NotFound(format!("backtest result {}", unique_key))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ForecastDb;
    use forecast_core::{EquityDailyRow, InstrumentClass};
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn input(unique_key: &str) -> BestPredictionInput {
        BestPredictionInput {
            unique_key: unique_key.to_string(),
            symbol: "600000".to_string(),
            model_version: "2.5".to_string(),
            best_series_name: "q50".to_string(),
            best_metrics: json!({"mae": 0.12}),
            is_public: None,
            train_start_date: date(2022, 1, 1),
            train_end_date: date(2023, 6, 30),
            test_start_date: date(2023, 7, 1),
            test_end_date: date(2023, 12, 31),
            val_start_date: date(2024, 1, 1),
            val_end_date: date(2024, 3, 31),
            context_len: 256,
            horizon_len: 7,
            display_name: None,
            instrument_class: None,
        }
    }

    async fn store() -> PredictionStore {
        let db = ForecastDb::in_memory().await.unwrap();
        PredictionStore::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_visibility_defaults_to_public() {
        let store = store().await;
        store.save_best_prediction(&input("uk-1")).await.unwrap();
        assert!(store.get_best_prediction("uk-1").await.unwrap().is_public);

        let private = store.clone().with_default_visibility(Visibility::Private);
        private.save_best_prediction(&input("uk-2")).await.unwrap();
        assert!(!private.get_best_prediction("uk-2").await.unwrap().is_public);

        let mut explicit = input("uk-3");
        explicit.is_public = Some(true);
        private.save_best_prediction(&explicit).await.unwrap();
        assert!(private.get_best_prediction("uk-3").await.unwrap().is_public);
    }

    #[tokio::test]
    async fn test_required_fields() {
        let store = store().await;
        let mut bad = input("uk-1");
        bad.best_series_name = "  ".to_string();
        let err = store.save_best_prediction(&bad).await.unwrap_err();
        assert!(matches!(err, ForecastError::Validation(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_display_name_autofill() {
        let store = store().await;
        store
            .quotes
            .upsert_equity_daily(&[EquityDailyRow {
                code: "600000".to_string(),
                trading_date: date(2024, 3, 1),
                name: Some("PF Bank".to_string()),
                latest_price: Some(10.0),
                change_percent: None,
                turnover_rate: None,
                pe_ratio: None,
            }])
            .await
            .unwrap();

        let mut with_class = input("uk-1");
        with_class.instrument_class = Some(InstrumentClass::Equity);
        store.save_best_prediction(&with_class).await.unwrap();
        assert_eq!(store.get_best_prediction("uk-1").await.unwrap().display_name, "PF Bank");

        // A miss in the fund table leaves the name empty instead of failing.
        let mut fund = input("uk-2");
        fund.instrument_class = Some(InstrumentClass::Fund);
        store.save_best_prediction(&fund).await.unwrap();
        assert_eq!(store.get_best_prediction("uk-2").await.unwrap().display_name, "");

        let mut named = input("uk-3");
        named.display_name = Some("Custom".to_string());
        named.instrument_class = Some(InstrumentClass::Equity);
        store.save_best_prediction(&named).await.unwrap();
        assert_eq!(store.get_best_prediction("uk-3").await.unwrap().display_name, "Custom");
    }

    #[tokio::test]
    async fn test_list_public_filters_horizon() {
        let store = store().await;
        store.save_best_prediction(&input("uk-7")).await.unwrap();

        let mut long = input("uk-30");
        long.horizon_len = 30;
        store.save_best_prediction(&long).await.unwrap();

        let mut hidden = input("uk-hidden");
        hidden.is_public = Some(false);
        store.save_best_prediction(&hidden).await.unwrap();

        assert_eq!(store.list_public(PredictionFilter::default()).await.unwrap().len(), 2);
        let week = store.list_public(PredictionFilter::horizon(7)).await.unwrap();
        assert_eq!(week.len(), 1);
        assert_eq!(week[0].unique_key, "uk-7");
    }

    #[tokio::test]
    async fn test_latest_chunk_and_invalid_chunk() {
        let store = store().await;
        store.save_best_prediction(&input("uk-1")).await.unwrap();

        for index in [0, 2, 1] {
            let chunk = ValidationChunk {
                unique_key: "uk-1".to_string(),
                chunk_index: index,
                start_date: date(2024, 1, 1),
                end_date: date(2024, 1, 7),
                symbol: Some("600000".to_string()),
                user_id: None,
                predictions: BTreeMap::new(),
                actual_values: vec![],
                dates: vec![],
            };
            store.save_validation_chunk(&chunk).await.unwrap();
        }
        assert_eq!(store.latest_validation_chunk("uk-1").await.unwrap().chunk_index, 2);
        assert!(store.latest_validation_chunk("uk-missing").await.unwrap_err().is_not_found());

        let mut backwards = store.latest_validation_chunk("uk-1").await.unwrap();
        backwards.start_date = date(2024, 2, 1);
        assert!(matches!(
            store.save_validation_chunk(&backwards).await,
            Err(ForecastError::Validation(_))
        ));
    }

    #[test]
    fn test_float_codec_keeps_nan_as_null() {
        let encoded = encode_floats(&[1.5, f64::NAN, f64::NEG_INFINITY]).unwrap();
        assert_eq!(encoded, "[1.5,null,null]");
        let decoded = decode_floats(&encoded).unwrap();
        assert_eq!(decoded[0], 1.5);
        assert!(decoded[1].is_nan() && decoded[2].is_nan());
    }
}
