//! Per-user watchlists, each entry optionally bound to a strategy preset.

use forecast_core::{normalize_symbol, InstrumentClass, WatchlistEntryInput, WatchlistItem};
use sqlx::SqlitePool;

use crate::error::{ForecastError, ForecastResult};
use crate::quotes::QuoteResolver;

// Newest prediction is matched on either the full or the bare symbol.
const WATCHLIST_SELECT: &str = "SELECT
        uw.id, uw.user_id, uw.symbol, uw.code, uw.display_name, uw.notes, uw.stock_type,
        uw.strategy_unique_key, sp.name AS strategy_name,
        (SELECT bp.unique_key FROM best_predictions bp
         WHERE LOWER(bp.symbol) IN (uw.symbol, uw.code)
         ORDER BY bp.id DESC LIMIT 1) AS prediction_unique_key,
        (SELECT bp.model_version FROM best_predictions bp
         WHERE LOWER(bp.symbol) IN (uw.symbol, uw.code)
         ORDER BY bp.id DESC LIMIT 1) AS model_version,
        uw.added_at
    FROM user_watchlist uw
    LEFT JOIN strategy_params sp ON sp.unique_key = uw.strategy_unique_key";

#[derive(sqlx::FromRow)]
struct WatchlistRow {
    id: i64,
    user_id: i64,
    symbol: String,
    code: String,
    display_name: String,
    notes: Option<String>,
    stock_type: i64,
    strategy_unique_key: Option<String>,
    strategy_name: Option<String>,
    prediction_unique_key: Option<String>,
    model_version: Option<String>,
    added_at: Option<String>,
}

impl From<WatchlistRow> for WatchlistItem {
    fn from(row: WatchlistRow) -> Self {
        WatchlistItem {
            id: row.id,
            user_id: row.user_id,
            symbol: row.symbol,
            code: row.code,
            display_name: row.display_name,
            notes: row.notes,
            instrument_class: InstrumentClass::from_stock_type(row.stock_type),
            strategy_unique_key: row.strategy_unique_key,
            strategy_name: row.strategy_name,
            prediction_unique_key: row.prediction_unique_key,
            model_version: row.model_version,
            added_at: row.added_at,
        }
    }
}

#[derive(Clone)]
pub struct WatchlistStore {
    pool: SqlitePool,
    quotes: QuoteResolver,
}

impl WatchlistStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            quotes: QuoteResolver::new(pool.clone()),
            pool,
        }
    }

    /// Add a symbol to the user's watchlist.
    ///
    /// Fails with `DuplicateSymbol` when the user already watches it, and with
    /// `SymbolNotFound` when the class's daily table has never seen the code.
    pub async fn add(&self, user_id: i64, input: &WatchlistEntryInput) -> ForecastResult<WatchlistItem> {
        let symbol = input.symbol.trim().to_lowercase();
        if symbol.is_empty() {
            return Err(ForecastError::missing("symbol"));
        }

        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM user_watchlist WHERE user_id = ? AND symbol = ?)",
        )
        .bind(user_id)
        .bind(&symbol)
        .fetch_one(&self.pool)
        .await?;
        if exists {
            return Err(ForecastError::DuplicateSymbol(symbol));
        }

        let class = input.instrument_class();
        let display_name = self.quotes.lookup_name(&symbol, class).await?;
        let code = normalize_symbol(&symbol);

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO user_watchlist (user_id, symbol, code, display_name, notes, stock_type)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(user_id)
        .bind(&symbol)
        .bind(code.as_str())
        .bind(&display_name)
        .bind(&input.notes)
        .bind(class.stock_type())
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            "User {} added {} ({}) to watchlist as entry {}",
            user_id,
            symbol,
            class.as_str(),
            id
        );
        self.get(user_id, id).await
    }

    /// Newest entries first.
    pub async fn list(&self, user_id: i64) -> ForecastResult<Vec<WatchlistItem>> {
        let sql = format!("{} WHERE uw.user_id = ? ORDER BY uw.id DESC", WATCHLIST_SELECT);
        let rows = sqlx::query_as::<_, WatchlistRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(WatchlistItem::from).collect())
    }

    pub async fn get(&self, user_id: i64, id: i64) -> ForecastResult<WatchlistItem> {
        let sql = format!("{} WHERE uw.user_id = ? AND uw.id = ?", WATCHLIST_SELECT);
        let row = sqlx::query_as::<_, WatchlistRow>(&sql)
            .bind(user_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(WatchlistItem::from)
            .ok_or_else(|| ForecastError::NotFound(format!("watchlist entry {}", id)))
    }

    /// Bind a strategy the user can see (their own, a preset, or a public one)
    /// to a watched symbol.
    pub async fn bind_strategy(
        &self,
        user_id: i64,
        symbol: &str,
        strategy_unique_key: &str,
    ) -> ForecastResult<()> {
        let (visible,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM strategy_params
             WHERE unique_key = ? AND (user_id = ? OR user_id IS NULL OR is_public = 1))",
        )
        .bind(strategy_unique_key)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        if !visible {
            return Err(ForecastError::NotFound(format!(
                "strategy params {}",
                strategy_unique_key
            )));
        }

        let symbol = symbol.trim().to_lowercase();
        let result = sqlx::query(
            "UPDATE user_watchlist SET strategy_unique_key = ? WHERE user_id = ? AND symbol = ?",
        )
        .bind(strategy_unique_key)
        .bind(user_id)
        .bind(&symbol)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ForecastError::NotFound(format!("watchlist entry for {}", symbol)));
        }

        tracing::info!("User {} bound {} to {}", user_id, strategy_unique_key, symbol);
        Ok(())
    }

    pub async fn remove(&self, user_id: i64, id: i64) -> ForecastResult<()> {
        let result = sqlx::query("DELETE FROM user_watchlist WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ForecastError::NotFound(format!("watchlist entry {}", id)));
        }
        Ok(())
    }

    /// Replace the entry's notes. `None` clears them.
    pub async fn update_notes(
        &self,
        user_id: i64,
        id: i64,
        notes: Option<&str>,
    ) -> ForecastResult<WatchlistItem> {
        let result = sqlx::query("UPDATE user_watchlist SET notes = ? WHERE id = ? AND user_id = ?")
            .bind(notes)
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ForecastError::NotFound(format!("watchlist entry {}", id)));
        }
        self.get(user_id, id).await
    }
}
