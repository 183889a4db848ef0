//! Predicted-vs-actual alignment math.
//!
//! Source series are sparse: exchange feeds leave zeros on non-trading days and
//! the forecasting service emits `null` for points it could not produce. Every
//! function here treats those as missing and never fails.

use crate::types::{PredictionValue, ValidationChunk};

/// A point is degenerate when it is zero, NaN or infinite.
pub fn is_degenerate(value: f64) -> bool {
    value == 0.0 || !value.is_finite()
}

/// `|p - a| / a * 100`. Callers must only pass non-degenerate values.
pub fn deviation_percent(actual: f64, predicted: f64) -> f64 {
    ((predicted - actual) / actual).abs() * 100.0
}

/// Index-aligned subsequences that survived filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignedSeries {
    pub actual: Vec<f64>,
    pub predicted: Vec<f64>,
    pub dates: Vec<String>,
}

impl AlignedSeries {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Largest deviation over the surviving points, 0 when none survived.
    pub fn max_deviation_percent(&self) -> f64 {
        self.actual
            .iter()
            .zip(&self.predicted)
            .map(|(a, p)| deviation_percent(*a, *p))
            .fold(0.0, f64::max)
    }
}

/// Clamp the three parallel arrays to the shortest and drop every index where
/// either the actual or the predicted value is degenerate.
pub fn align_series(actual: &[f64], predicted: &[f64], dates: &[String]) -> AlignedSeries {
    let len = actual.len().min(predicted.len()).min(dates.len());
    let mut out = AlignedSeries::default();

    for i in 0..len {
        let (a, p) = (actual[i], predicted[i]);
        if is_degenerate(a) || is_degenerate(p) {
            continue;
        }
        out.actual.push(a);
        out.predicted.push(p);
        out.dates.push(dates[i].clone());
    }

    out
}

/// Like [`align_series`] but only the predicted values are checked. Used for
/// future windows where no actual prices exist yet.
pub fn filter_predicted(predicted: &[f64], dates: &[String]) -> (Vec<String>, Vec<f64>) {
    let len = predicted.len().min(dates.len());
    let mut kept_dates = Vec::with_capacity(len);
    let mut kept_values = Vec::with_capacity(len);

    for i in 0..len {
        if is_degenerate(predicted[i]) {
            continue;
        }
        kept_dates.push(dates[i].clone());
        kept_values.push(predicted[i]);
    }

    (kept_dates, kept_values)
}

/// Last non-degenerate value, scanning backward.
pub fn last_valid(values: &[f64]) -> Option<f64> {
    values.iter().rev().copied().find(|v| !is_degenerate(*v))
}

/// Percent move from `actual` to `predicted`.
///
/// Returns 0 unless both inputs are strictly positive, so "no data" and
/// "no change" are indistinguishable here.
pub fn change_percent(predicted: f64, actual: f64) -> f64 {
    if predicted > 0.0 && actual > 0.0 {
        (predicted - actual) / actual * 100.0
    } else {
        0.0
    }
}

/// Rewrite a chunk in place to its filtered subsequences and return the
/// chunk's max deviation, or `None` when nothing survived.
///
/// The predicted series is only written back when `series_name` was present
/// in the map; a missing series is read as empty and leaves the map untouched.
pub fn align_chunk(chunk: &mut ValidationChunk, series_name: &str) -> Option<f64> {
    let aligned = align_series(&chunk.actual_values, chunk.series(series_name), &chunk.dates);
    let max_dev = if aligned.is_empty() {
        None
    } else {
        Some(aligned.max_deviation_percent())
    };

    if let Some(slot) = chunk.predictions.get_mut(series_name) {
        *slot = PredictionValue::Series(aligned.predicted);
    }
    chunk.actual_values = aligned.actual;
    chunk.dates = aligned.dates;

    max_dev
}
