//! Post-processing of stored validation chunks for display.

use chrono::{Days, Local, NaiveDate};
use forecast_core::{
    align_chunk, change_percent, filter_predicted, last_valid, FutureProjection,
    PredictionFilter, PublicPredictionView,
};

use crate::error::ForecastResult;
use crate::predictions::PredictionStore;

#[derive(Clone)]
pub struct AlignmentEngine {
    store: PredictionStore,
}

impl AlignmentEngine {
    pub fn new(store: PredictionStore) -> Self {
        Self { store }
    }

    /// Every public prediction with its chunks reduced to non-degenerate,
    /// index-aligned points and the largest deviation across them.
    ///
    /// Nothing is written back to storage.
    pub async fn align_public_with_validation(
        &self,
        filter: PredictionFilter,
    ) -> ForecastResult<Vec<PublicPredictionView>> {
        let predictions = self.store.list_public(filter).await?;
        let mut views = Vec::with_capacity(predictions.len());

        for best in predictions {
            let mut chunks = self.store.list_validation_chunks(&best.unique_key).await?;
            let mut max_deviation_percent: f64 = 0.0;

            for chunk in chunks.iter_mut() {
                if let Some(dev) = align_chunk(chunk, &best.best_series_name) {
                    max_deviation_percent = max_deviation_percent.max(dev);
                }
            }

            tracing::debug!(
                "Aligned {} chunks for {} (max deviation {:.2}%)",
                chunks.len(),
                best.unique_key,
                max_deviation_percent
            );

            views.push(PublicPredictionView {
                best,
                chunks,
                max_deviation_percent,
            });
        }

        Ok(views)
    }

    /// Future window of a prediction relative to the local calendar date.
    pub async fn future_projection(&self, unique_key: &str) -> ForecastResult<FutureProjection> {
        self.future_projection_as_of(unique_key, Local::now().date_naive())
            .await
    }

    /// Future window relative to `today`.
    ///
    /// Chunks starting after `today` supply the predicted series; chunks
    /// starting on or before it supply the latest known actual price. An empty
    /// future window yields empty arrays and zero scalars.
    pub async fn future_projection_as_of(
        &self,
        unique_key: &str,
        today: NaiveDate,
    ) -> ForecastResult<FutureProjection> {
        let best = self.store.get_best_prediction(unique_key).await?;
        let series_name = best.best_series_name.as_str();

        let mut projection = FutureProjection {
            unique_key: unique_key.to_string(),
            ..Default::default()
        };

        if let Some(tomorrow) = today.checked_add_days(Days::new(1)) {
            for chunk in self.store.list_validation_chunks_from(unique_key, tomorrow).await? {
                let (dates, values) = filter_predicted(chunk.series(series_name), &chunk.dates);
                projection.dates.extend(dates);
                projection.predicted_values.extend(values);
            }
        }

        let mut actual_latest = None;
        for chunk in self.store.list_validation_chunks_until(unique_key, today).await? {
            if let Some(value) = last_valid(&chunk.actual_values) {
                actual_latest = Some(value);
            }
        }

        projection.predicted_latest = last_valid(&projection.predicted_values).unwrap_or(0.0);
        projection.actual_latest = actual_latest.unwrap_or(0.0);
        projection.change_percent =
            change_percent(projection.predicted_latest, projection.actual_latest);

        tracing::debug!(
            "Future projection for {}: {} points, change {:.2}%",
            unique_key,
            projection.count(),
            projection.change_percent
        );

        Ok(projection)
    }
}
