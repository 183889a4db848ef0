//! Latest-quote resolution across the equity and fund daily-metrics tables.

use chrono::NaiveDate;
use forecast_core::{
    normalize_symbol, CanonicalSymbol, EquityDailyRow, FundDailyRow, InstrumentClass, Quote,
};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;

use crate::error::{ForecastError, ForecastResult};

#[derive(Debug, Clone, sqlx::FromRow)]
struct QuoteRow {
    code: String,
    trading_date: NaiveDate,
    latest_price: Option<f64>,
    change_percent: Option<f64>,
    turnover_rate: Option<f64>,
}

impl QuoteRow {
    fn into_quote(self, symbol: &str) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            latest_price: self.latest_price,
            change_percent: self.change_percent,
            trading_date: Some(self.trading_date),
            turnover_rate: self.turnover_rate,
        }
    }
}

#[derive(Clone)]
pub struct QuoteResolver {
    pool: SqlitePool,
}

impl QuoteResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// One quote per input symbol, in input order.
    ///
    /// Symbols are normalized before lookup; the returned `symbol` is the
    /// caller's original string. A code present in the equity table is always
    /// answered from there, even when the fund table has a newer row.
    pub async fn resolve_latest<S: AsRef<str>>(&self, symbols: &[S]) -> ForecastResult<Vec<Quote>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let mut codes: Vec<CanonicalSymbol> = Vec::with_capacity(symbols.len());
        let mut full_symbols: Vec<String> = Vec::with_capacity(symbols.len());
        for raw in symbols {
            let raw = raw.as_ref();
            let code = normalize_symbol(raw);
            if !codes.contains(&code) {
                codes.push(code);
            }
            let full = raw.trim().to_lowercase();
            if !full.is_empty() && !full_symbols.contains(&full) {
                full_symbols.push(full);
            }
        }

        let mut latest: HashMap<CanonicalSymbol, QuoteRow> = self
            .latest_equity_rows(&codes)
            .await?
            .into_iter()
            .map(|row| (CanonicalSymbol::normalize(&row.code), row))
            .collect();

        let missing: Vec<CanonicalSymbol> = codes
            .iter()
            .filter(|c| !latest.contains_key(*c))
            .cloned()
            .collect();

        if !missing.is_empty() {
            let fund_rows = self.latest_fund_rows(&codes, &full_symbols).await?;
            let mut fund_latest: HashMap<CanonicalSymbol, QuoteRow> = HashMap::new();
            for row in fund_rows {
                let key = CanonicalSymbol::normalize(&row.code);
                // A fund may be stored under both its bare and prefixed code.
                let newer = fund_latest
                    .get(&key)
                    .map_or(true, |existing| row.trading_date > existing.trading_date);
                if newer {
                    fund_latest.insert(key, row);
                }
            }
            for code in missing {
                if let Some(row) = fund_latest.remove(&code) {
                    latest.insert(code, row);
                }
            }
        }

        tracing::debug!(
            "Resolved {} of {} requested symbols",
            latest.len(),
            codes.len()
        );

        Ok(symbols
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                match latest.get(&normalize_symbol(raw)) {
                    Some(row) => row.clone().into_quote(raw),
                    None => Quote::empty(raw),
                }
            })
            .collect())
    }

    async fn latest_equity_rows(&self, codes: &[CanonicalSymbol]) -> ForecastResult<Vec<QuoteRow>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT code, trading_date, latest_price, change_percent, turnover_rate FROM (
                SELECT code, trading_date, latest_price, change_percent, turnover_rate,
                       ROW_NUMBER() OVER (PARTITION BY code ORDER BY trading_date DESC) AS rn
                FROM a_stock_comment_daily WHERE code IN (",
        );
        let mut separated = qb.separated(", ");
        for code in codes {
            separated.push_bind(code.as_str());
        }
        separated.push_unseparated(")) WHERE rn = 1");

        Ok(qb.build_query_as::<QuoteRow>().fetch_all(&self.pool).await?)
    }

    /// Fund rows are matched on the bare code or on the full lowercase ticker,
    /// since the upstream feed stores both forms.
    async fn latest_fund_rows(
        &self,
        codes: &[CanonicalSymbol],
        full_symbols: &[String],
    ) -> ForecastResult<Vec<QuoteRow>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT code, trading_date, latest_price, change_percent, CAST(NULL AS REAL) AS turnover_rate FROM (
                SELECT code, trading_date, latest_price, change_percent,
                       ROW_NUMBER() OVER (PARTITION BY code ORDER BY trading_date DESC) AS rn
                FROM etf_daily WHERE code IN (",
        );
        let mut separated = qb.separated(", ");
        for code in codes {
            separated.push_bind(code.as_str());
        }
        separated.push_unseparated(")");

        if !full_symbols.is_empty() {
            qb.push(" OR LOWER(code) IN (");
            let mut separated = qb.separated(", ");
            for full in full_symbols {
                separated.push_bind(full.as_str());
            }
            separated.push_unseparated(")");
        }
        qb.push(") WHERE rn = 1");

        Ok(qb.build_query_as::<QuoteRow>().fetch_all(&self.pool).await?)
    }

    /// Most recent display name for a symbol in its class's table.
    pub async fn lookup_name(&self, symbol: &str, class: InstrumentClass) -> ForecastResult<String> {
        let code = normalize_symbol(symbol);

        let name: Option<(String,)> = match class {
            InstrumentClass::Equity => {
                sqlx::query_as(
                    "SELECT COALESCE(name, '') FROM a_stock_comment_daily
                     WHERE code = ? ORDER BY trading_date DESC LIMIT 1",
                )
                .bind(code.as_str())
                .fetch_optional(&self.pool)
                .await?
            }
            InstrumentClass::Fund => {
                sqlx::query_as(
                    "SELECT COALESCE(name, '') FROM etf_daily
                     WHERE code = ? OR code = ? ORDER BY trading_date DESC LIMIT 1",
                )
                .bind(code.as_str())
                .bind(symbol.trim().to_lowercase())
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match name {
            Some((name,)) => Ok(name.trim().to_string()),
            None => Err(ForecastError::SymbolNotFound(symbol.to_string())),
        }
    }

    /// Batch upsert of equity daily rows keyed by (code, trading_date).
    pub async fn upsert_equity_daily(&self, rows: &[EquityDailyRow]) -> ForecastResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for row in rows {
            affected += sqlx::query(
                "INSERT INTO a_stock_comment_daily
                    (code, trading_date, name, latest_price, change_percent, turnover_rate, pe_ratio)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(code, trading_date) DO UPDATE SET
                    name = excluded.name,
                    latest_price = excluded.latest_price,
                    change_percent = excluded.change_percent,
                    turnover_rate = excluded.turnover_rate,
                    pe_ratio = excluded.pe_ratio",
            )
            .bind(normalize_symbol(&row.code).as_str())
            .bind(row.trading_date)
            .bind(&row.name)
            .bind(row.latest_price)
            .bind(row.change_percent)
            .bind(row.turnover_rate)
            .bind(row.pe_ratio)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        tracing::info!("Upserted {} equity daily rows", affected);
        Ok(affected)
    }

    /// Batch upsert of fund daily rows. Codes are stored lowercased but keep
    /// any exchange prefix, matching how the feed delivers them.
    pub async fn upsert_fund_daily(&self, rows: &[FundDailyRow]) -> ForecastResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for row in rows {
            affected += sqlx::query(
                "INSERT INTO etf_daily
                    (code, trading_date, name, latest_price, change_amount, change_percent, volume)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(code, trading_date) DO UPDATE SET
                    name = excluded.name,
                    latest_price = excluded.latest_price,
                    change_amount = excluded.change_amount,
                    change_percent = excluded.change_percent,
                    volume = excluded.volume",
            )
            .bind(row.code.trim().to_lowercase())
            .bind(row.trading_date)
            .bind(&row.name)
            .bind(row.latest_price)
            .bind(row.change_amount)
            .bind(row.change_percent)
            .bind(row.volume)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        tracing::info!("Upserted {} fund daily rows", affected);
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ForecastDb;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn equity(code: &str, d: NaiveDate, price: f64, name: &str) -> EquityDailyRow {
        EquityDailyRow {
            code: code.to_string(),
            trading_date: d,
            name: Some(name.to_string()),
            latest_price: Some(price),
            change_percent: Some(1.0),
            turnover_rate: Some(0.5),
            pe_ratio: None,
        }
    }

    fn fund(code: &str, d: NaiveDate, price: f64, name: &str) -> FundDailyRow {
        FundDailyRow {
            code: code.to_string(),
            trading_date: d,
            name: Some(name.to_string()),
            latest_price: Some(price),
            change_amount: None,
            change_percent: Some(-0.2),
            volume: Some(1000),
        }
    }

    async fn resolver() -> QuoteResolver {
        let db = ForecastDb::in_memory().await.unwrap();
        QuoteResolver::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_latest_equity_row_wins_within_table() {
        let r = resolver().await;
        r.upsert_equity_daily(&[
            equity("600000", date(2024, 3, 1), 10.0, "PF Bank"),
            equity("600000", date(2024, 3, 4), 10.5, "PF Bank"),
        ])
        .await
        .unwrap();

        let quotes = r.resolve_latest(&["SH600000"]).await.unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "SH600000");
        assert_eq!(quotes[0].latest_price, Some(10.5));
        assert_eq!(quotes[0].trading_date, Some(date(2024, 3, 4)));
        assert_eq!(quotes[0].turnover_rate, Some(0.5));
    }

    #[tokio::test]
    async fn test_fund_fills_missing_and_matches_full_ticker() {
        let r = resolver().await;
        r.upsert_fund_daily(&[
            fund("sh510300", date(2024, 3, 5), 3.9, "CSI 300 ETF"),
            fund("510300", date(2024, 3, 4), 3.8, "CSI 300 ETF"),
        ])
        .await
        .unwrap();

        let quotes = r.resolve_latest(&["sh510300", "000001"]).await.unwrap();
        assert_eq!(quotes[0].latest_price, Some(3.9));
        assert_eq!(quotes[0].turnover_rate, None);
        assert_eq!(quotes[1], Quote::empty("000001"));
        assert!(!quotes[1].has_data());
    }

    #[tokio::test]
    async fn test_empty_request() {
        let r = resolver().await;
        let none: [&str; 0] = [];
        assert!(r.resolve_latest(&none).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_name() {
        let r = resolver().await;
        r.upsert_equity_daily(&[
            equity("600000", date(2024, 3, 1), 10.0, "Old Name"),
            equity("600000", date(2024, 3, 2), 10.0, "  New Name "),
        ])
        .await
        .unwrap();
        r.upsert_fund_daily(&[fund("sz159915", date(2024, 3, 1), 2.0, "ChiNext ETF")])
            .await
            .unwrap();

        assert_eq!(
            r.lookup_name("sh600000", InstrumentClass::Equity).await.unwrap(),
            "New Name"
        );
        assert_eq!(
            r.lookup_name("SZ159915", InstrumentClass::Fund).await.unwrap(),
            "ChiNext ETF"
        );

        let err = r.lookup_name("600000", InstrumentClass::Fund).await.unwrap_err();
        assert!(matches!(err, ForecastError::SymbolNotFound(_)));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_day() {
        let r = resolver().await;
        r.upsert_equity_daily(&[equity("600000", date(2024, 3, 1), 10.0, "A")])
            .await
            .unwrap();
        r.upsert_equity_daily(&[equity("600000", date(2024, 3, 1), 11.0, "A")])
            .await
            .unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM a_stock_comment_daily")
            .fetch_one(&r.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let quotes = r.resolve_latest(&["600000"]).await.unwrap();
        assert_eq!(quotes[0].latest_price, Some(11.0));
    }
}
