use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::symbol::InstrumentClass;

/// Latest quote for one requested symbol. Every field but `symbol` is empty
/// when neither source table has a row for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub latest_price: Option<f64>,
    pub change_percent: Option<f64>,
    pub trading_date: Option<NaiveDate>,
    pub turnover_rate: Option<f64>,
}

impl Quote {
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            latest_price: None,
            change_percent: None,
            trading_date: None,
            turnover_rate: None,
        }
    }

    pub fn has_data(&self) -> bool {
        self.trading_date.is_some()
    }
}

/// One row of the equity daily-metrics feed (`a_stock_comment_daily`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityDailyRow {
    pub code: String,
    pub trading_date: NaiveDate,
    pub name: Option<String>,
    pub latest_price: Option<f64>,
    pub change_percent: Option<f64>,
    pub turnover_rate: Option<f64>,
    pub pe_ratio: Option<f64>,
}

/// One row of the fund/ETF daily-metrics feed (`etf_daily`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundDailyRow {
    pub code: String,
    pub trading_date: NaiveDate,
    pub name: Option<String>,
    pub latest_price: Option<f64>,
    pub change_amount: Option<f64>,
    pub change_percent: Option<f64>,
    pub volume: Option<i64>,
}

/// Visibility applied to a best prediction when the caller does not choose one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    /// Predictions are published unless the caller opts out.
    pub const DEFAULT: Visibility = Visibility::Public;

    pub fn is_public(self) -> bool {
        matches!(self, Visibility::Public)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "public" | "1" | "true" => Some(Visibility::Public),
            "private" | "0" | "false" => Some(Visibility::Private),
            _ => None,
        }
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Stored best-prediction artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPrediction {
    pub id: Option<i64>,
    pub unique_key: String,
    pub symbol: String,
    pub model_version: String,
    /// Name of the predicted series inside each chunk's `predictions` map.
    pub best_series_name: String,
    pub best_metrics: serde_json::Value,
    pub is_public: bool,
    pub train_start_date: NaiveDate,
    pub train_end_date: NaiveDate,
    pub test_start_date: NaiveDate,
    pub test_end_date: NaiveDate,
    pub val_start_date: NaiveDate,
    pub val_end_date: NaiveDate,
    pub context_len: i32,
    pub horizon_len: i32,
    pub display_name: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Write model for [`BestPrediction`]. `is_public: None` means "use the
/// store's default visibility".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPredictionInput {
    pub unique_key: String,
    pub symbol: String,
    pub model_version: String,
    pub best_series_name: String,
    #[serde(default)]
    pub best_metrics: serde_json::Value,
    #[serde(default)]
    pub is_public: Option<bool>,
    pub train_start_date: NaiveDate,
    pub train_end_date: NaiveDate,
    pub test_start_date: NaiveDate,
    pub test_end_date: NaiveDate,
    pub val_start_date: NaiveDate,
    pub val_end_date: NaiveDate,
    pub context_len: i32,
    pub horizon_len: i32,
    #[serde(default)]
    pub display_name: Option<String>,
    /// When set and `display_name` is blank, the name is looked up from the
    /// matching daily-metrics table.
    #[serde(default)]
    pub instrument_class: Option<InstrumentClass>,
}

/// Filter for listing public predictions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionFilter {
    pub horizon_len: Option<i32>,
}

impl PredictionFilter {
    pub fn horizon(horizon_len: i32) -> Self {
        Self {
            horizon_len: Some(horizon_len),
        }
    }
}

/// A value inside a chunk's `predictions` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionValue {
    Series(#[serde(with = "nullable_floats")] Vec<f64>),
    Scalar(f64),
    Label(String),
}

impl PredictionValue {
    pub fn as_series(&self) -> Option<&[f64]> {
        match self {
            PredictionValue::Series(values) => Some(values),
            _ => None,
        }
    }
}

/// One contiguous validation window of predicted vs. actual values.
///
/// `predictions[name]`, `actual_values` and `dates` are parallel by index but
/// may disagree in length; readers clamp to the shortest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationChunk {
    pub unique_key: String,
    pub chunk_index: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub predictions: BTreeMap<String, PredictionValue>,
    #[serde(with = "nullable_floats")]
    pub actual_values: Vec<f64>,
    pub dates: Vec<String>,
}

impl ValidationChunk {
    /// The named predicted series, or an empty slice when it is missing or
    /// not an array.
    pub fn series(&self, name: &str) -> &[f64] {
        self.predictions
            .get(name)
            .and_then(PredictionValue::as_series)
            .unwrap_or(&[])
    }
}

/// Stored backtest bundle. Curve and log fields are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub unique_key: String,
    pub symbol: String,
    pub model_version: String,
    pub context_len: i32,
    pub horizon_len: i32,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub strategy_params_id: Option<i64>,
    #[serde(default)]
    pub used_quantile: Option<String>,
    #[serde(default)]
    pub buy_threshold_pct: f64,
    #[serde(default)]
    pub sell_threshold_pct: f64,
    #[serde(default)]
    pub trade_fee_rate: f64,
    #[serde(default)]
    pub total_fees_paid: f64,
    #[serde(default)]
    pub actual_total_return_pct: f64,
    #[serde(default)]
    pub benchmark_return_pct: f64,
    #[serde(default)]
    pub benchmark_annualized_return_pct: f64,
    #[serde(default)]
    pub period_days: i32,
    #[serde(default)]
    pub validation_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub validation_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub validation_benchmark_return_pct: f64,
    #[serde(default)]
    pub validation_benchmark_annualized_return_pct: f64,
    #[serde(default)]
    pub validation_period_days: i32,
    #[serde(default)]
    pub position_control: serde_json::Value,
    #[serde(default)]
    pub predicted_change_stats: serde_json::Value,
    #[serde(default)]
    pub per_chunk_signals: serde_json::Value,
    #[serde(default, with = "nullable_floats")]
    pub equity_curve_values: Vec<f64>,
    #[serde(default, with = "nullable_floats")]
    pub equity_curve_pct: Vec<f64>,
    #[serde(default, with = "nullable_floats")]
    pub equity_curve_pct_gross: Vec<f64>,
    #[serde(default)]
    pub curve_dates: Vec<String>,
    #[serde(default, with = "nullable_floats")]
    pub actual_end_prices: Vec<f64>,
    #[serde(default)]
    pub trades: Vec<serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Named trading-rule parameter set. `user_id: None` marks a system preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    #[serde(default)]
    pub id: Option<i64>,
    pub unique_key: String,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    pub buy_threshold_pct: f64,
    pub sell_threshold_pct: f64,
    pub initial_cash: f64,
    pub enable_rebalance: bool,
    pub max_position_pct: f64,
    pub min_position_pct: f64,
    pub slope_position_per_pct: f64,
    pub rebalance_tolerance_pct: f64,
    pub trade_fee_rate: f64,
    pub take_profit_threshold_pct: f64,
    pub take_profit_sell_frac: f64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// A public prediction with its filtered validation chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicPredictionView {
    pub best: BestPrediction,
    pub chunks: Vec<ValidationChunk>,
    pub max_deviation_percent: f64,
}

/// Forward-looking slice of a prediction plus its headline change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FutureProjection {
    pub unique_key: String,
    pub dates: Vec<String>,
    pub predicted_values: Vec<f64>,
    pub predicted_latest: f64,
    pub actual_latest: f64,
    pub change_percent: f64,
}

impl FutureProjection {
    pub fn count(&self) -> usize {
        self.dates.len()
    }
}

/// Request to pin a symbol to a user's watchlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntryInput {
    pub symbol: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// Upstream numeric instrument type; 2 marks a fund.
    #[serde(default)]
    pub stock_type: Option<i64>,
}

impl WatchlistEntryInput {
    pub fn instrument_class(&self) -> InstrumentClass {
        self.stock_type
            .map(InstrumentClass::from_stock_type)
            .unwrap_or_default()
    }
}

/// A watchlist row joined with its bound strategy and the newest prediction
/// stored for the same symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistItem {
    pub id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub code: String,
    pub display_name: String,
    pub notes: Option<String>,
    pub instrument_class: InstrumentClass,
    pub strategy_unique_key: Option<String>,
    pub strategy_name: Option<String>,
    pub prediction_unique_key: Option<String>,
    pub model_version: Option<String>,
    pub added_at: Option<String>,
}

/// Serde adapter for float arrays that may hold NaN/Inf: non-finite values
/// encode as `null`, and `null` decodes back as NaN.
pub mod nullable_floats {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: Vec<Option<f64>> = values
            .iter()
            .map(|v| if v.is_finite() { Some(*v) } else { None })
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let decoded = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(decoded.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_json() -> &'static str {
        r#"{
            "unique_key": "uk-1",
            "chunk_index": 0,
            "start_date": "2024-01-01",
            "end_date": "2024-01-03",
            "predictions": {"q50": [1.1, null, 3.1], "best_pct": 0.4, "note": "tsf"},
            "actual_values": [1.0, 2.0, null],
            "dates": ["2024-01-01", "2024-01-02", "2024-01-03"]
        }"#
    }

    #[test]
    fn test_chunk_decodes_nulls_as_nan() {
        let chunk: ValidationChunk = serde_json::from_str(chunk_json()).unwrap();
        let q50 = chunk.series("q50");
        assert_eq!(q50.len(), 3);
        assert!(q50[1].is_nan());
        assert!(chunk.actual_values[2].is_nan());
        assert_eq!(chunk.predictions["best_pct"], PredictionValue::Scalar(0.4));
        assert_eq!(chunk.predictions["note"], PredictionValue::Label("tsf".to_string()));
    }

    #[test]
    fn test_missing_or_scalar_series_is_empty() {
        let chunk: ValidationChunk = serde_json::from_str(chunk_json()).unwrap();
        assert!(chunk.series("q90").is_empty());
        assert!(chunk.series("best_pct").is_empty());
    }

    #[test]
    fn test_non_finite_encodes_as_null() {
        let value = PredictionValue::Series(vec![1.0, f64::NAN, f64::INFINITY]);
        assert_eq!(serde_json::to_string(&value).unwrap(), "[1.0,null,null]");
    }

    #[test]
    fn test_visibility_default_is_public() {
        assert_eq!(Visibility::default(), Visibility::Public);
        assert!(Visibility::DEFAULT.is_public());
        assert_eq!(Visibility::parse("Private"), Some(Visibility::Private));
        assert_eq!(Visibility::parse("maybe"), None);
    }

    #[test]
    fn test_backtest_defaults_fill_optional_fields() {
        let bt: BacktestResult = serde_json::from_str(
            r#"{"unique_key":"bt-1","symbol":"600000","model_version":"2.5","context_len":256,"horizon_len":7}"#,
        )
        .unwrap();
        assert!(bt.equity_curve_values.is_empty());
        assert!(bt.position_control.is_null());
        assert_eq!(bt.user_id, None);
    }

    #[test]
    fn test_watchlist_input_stock_type() {
        let fund: WatchlistEntryInput =
            serde_json::from_str(r#"{"symbol":"sh510300","stock_type":2}"#).unwrap();
        assert_eq!(fund.instrument_class(), InstrumentClass::Fund);

        let plain: WatchlistEntryInput = serde_json::from_str(r#"{"symbol":"600000"}"#).unwrap();
        assert_eq!(plain.instrument_class(), InstrumentClass::Equity);
        assert_eq!(plain.notes, None);
    }
}
