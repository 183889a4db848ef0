use forecast_core::StrategyParams;
use sqlx::SqlitePool;

use crate::error::{ForecastError, ForecastResult};

const STRATEGY_COLUMNS: &str = "id, unique_key, user_id, name, is_public, buy_threshold_pct, \
    sell_threshold_pct, initial_cash, enable_rebalance, max_position_pct, min_position_pct, \
    slope_position_per_pct, rebalance_tolerance_pct, trade_fee_rate, take_profit_threshold_pct, \
    take_profit_sell_frac, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct StrategyRow {
    id: i64,
    unique_key: String,
    user_id: Option<i64>,
    name: Option<String>,
    is_public: bool,
    buy_threshold_pct: f64,
    sell_threshold_pct: f64,
    initial_cash: f64,
    enable_rebalance: bool,
    max_position_pct: f64,
    min_position_pct: f64,
    slope_position_per_pct: f64,
    rebalance_tolerance_pct: f64,
    trade_fee_rate: f64,
    take_profit_threshold_pct: f64,
    take_profit_sell_frac: f64,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl From<StrategyRow> for StrategyParams {
    fn from(row: StrategyRow) -> Self {
        StrategyParams {
            id: Some(row.id),
            unique_key: row.unique_key,
            user_id: row.user_id,
            name: row.name,
            is_public: row.is_public,
            buy_threshold_pct: row.buy_threshold_pct,
            sell_threshold_pct: row.sell_threshold_pct,
            initial_cash: row.initial_cash,
            enable_rebalance: row.enable_rebalance,
            max_position_pct: row.max_position_pct,
            min_position_pct: row.min_position_pct,
            slope_position_per_pct: row.slope_position_per_pct,
            rebalance_tolerance_pct: row.rebalance_tolerance_pct,
            trade_fee_rate: row.trade_fee_rate,
            take_profit_threshold_pct: row.take_profit_threshold_pct,
            take_profit_sell_frac: row.take_profit_sell_frac,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct StrategyParamsStore {
    pool: SqlitePool,
}

impl StrategyParamsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert keyed by `unique_key`; returns the row id.
    pub async fn save(&self, params: &StrategyParams) -> ForecastResult<i64> {
        if params.unique_key.trim().is_empty() {
            return Err(ForecastError::missing("unique_key"));
        }

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO strategy_params (
                unique_key, user_id, name, is_public, buy_threshold_pct, sell_threshold_pct,
                initial_cash, enable_rebalance, max_position_pct, min_position_pct,
                slope_position_per_pct, rebalance_tolerance_pct, trade_fee_rate,
                take_profit_threshold_pct, take_profit_sell_frac, update_seq
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                (SELECT COALESCE(MAX(update_seq), 0) + 1 FROM strategy_params))
            ON CONFLICT(unique_key) DO UPDATE SET
                user_id = excluded.user_id,
                name = excluded.name,
                is_public = excluded.is_public,
                buy_threshold_pct = excluded.buy_threshold_pct,
                sell_threshold_pct = excluded.sell_threshold_pct,
                initial_cash = excluded.initial_cash,
                enable_rebalance = excluded.enable_rebalance,
                max_position_pct = excluded.max_position_pct,
                min_position_pct = excluded.min_position_pct,
                slope_position_per_pct = excluded.slope_position_per_pct,
                rebalance_tolerance_pct = excluded.rebalance_tolerance_pct,
                trade_fee_rate = excluded.trade_fee_rate,
                take_profit_threshold_pct = excluded.take_profit_threshold_pct,
                take_profit_sell_frac = excluded.take_profit_sell_frac,
                update_seq = excluded.update_seq,
                updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
            RETURNING id",
        )
        .bind(&params.unique_key)
        .bind(params.user_id)
        .bind(&params.name)
        .bind(params.is_public)
        .bind(params.buy_threshold_pct)
        .bind(params.sell_threshold_pct)
        .bind(params.initial_cash)
        .bind(params.enable_rebalance)
        .bind(params.max_position_pct)
        .bind(params.min_position_pct)
        .bind(params.slope_position_per_pct)
        .bind(params.rebalance_tolerance_pct)
        .bind(params.trade_fee_rate)
        .bind(params.take_profit_threshold_pct)
        .bind(params.take_profit_sell_frac)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Saved strategy params {} (id {})", params.unique_key, id);
        Ok(id)
    }

    pub async fn get_by_unique_key(&self, unique_key: &str) -> ForecastResult<StrategyParams> {
        let sql = format!("SELECT {} FROM strategy_params WHERE unique_key = ?", STRATEGY_COLUMNS);
        let row = sqlx::query_as::<_, StrategyRow>(&sql)
            .bind(unique_key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(StrategyParams::from)
            .ok_or_else(|| ForecastError::NotFound(format!("strategy params {}", unique_key)))
    }

    /// The user's own strategies plus every public preset, presets first.
    pub async fn list_for_user(&self, user_id: i64) -> ForecastResult<Vec<StrategyParams>> {
        let sql = format!(
            "SELECT {} FROM strategy_params WHERE user_id = ? OR is_public = 1
             ORDER BY is_public DESC, update_seq DESC",
            STRATEGY_COLUMNS
        );
        let rows = sqlx::query_as::<_, StrategyRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(StrategyParams::from).collect())
    }
}
