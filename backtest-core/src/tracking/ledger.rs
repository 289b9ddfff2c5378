//! Durable record of predictions and their outcome classification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::fmt;

use crate::errors::{CoreError, CoreResult};
use crate::market::types::{validate_unit_interval, Ticker};
use crate::store::BacktestStore;

/// Predicted price direction.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PredictedDirection {
    Up,
    Down,
}

impl PredictedDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

/// Prediction lifecycle. Transitions only Pending → {Correct, Incorrect,
/// Expired}; a finalized row is never reopened.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Pending,
    Correct,
    Incorrect,
    Expired,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "correct" => Some(Self::Correct),
            "incorrect" => Some(Self::Incorrect),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Correct | Self::Incorrect)
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed verification horizons. Each maps to its own pair of columns;
/// column names are never built from input.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Horizon {
    OneDay,
    ThreeDay,
    SevenDay,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Self::OneDay, Self::ThreeDay, Self::SevenDay];

    pub fn from_days(days: u32) -> Option<Self> {
        match days {
            1 => Some(Self::OneDay),
            3 => Some(Self::ThreeDay),
            7 => Some(Self::SevenDay),
            _ => None,
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            Self::OneDay => 1,
            Self::ThreeDay => 3,
            Self::SevenDay => 7,
        }
    }
}

/// One directional prediction for one instrument.
///
/// Created by the model-consuming caller; only the outcome tracker mutates
/// the outcome fields afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Option<i64>,
    pub ticker: Ticker,
    pub prediction_date: DateTime<Utc>,
    pub predicted_direction: PredictedDirection,
    pub probability: f64,
    pub expected_return: f64,
    pub confidence: f64,
    /// Close at prediction time, the base for return calculations.
    pub base_price: Option<f64>,
    pub actual_price_1d: Option<f64>,
    pub actual_price_3d: Option<f64>,
    pub actual_price_7d: Option<f64>,
    pub actual_return_1d: Option<f64>,
    pub actual_return_3d: Option<f64>,
    pub actual_return_7d: Option<f64>,
    pub status: PredictionStatus,
    pub checked_at: Option<DateTime<Utc>>,
    pub model_version: String,
}

impl Prediction {
    pub fn new(
        ticker: Ticker,
        prediction_date: DateTime<Utc>,
        predicted_direction: PredictedDirection,
        probability: f64,
        expected_return: f64,
        confidence: f64,
    ) -> Self {
        Self {
            id: None,
            ticker,
            prediction_date,
            predicted_direction,
            probability,
            expected_return,
            confidence,
            base_price: None,
            actual_price_1d: None,
            actual_price_3d: None,
            actual_price_7d: None,
            actual_return_1d: None,
            actual_return_3d: None,
            actual_return_7d: None,
            status: PredictionStatus::Pending,
            checked_at: None,
            model_version: "v1.0".to_string(),
        }
    }

    /// Range-validates model-supplied fields at the boundary.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.ticker.validate() {
            return Err(CoreError::DataValidation(format!(
                "invalid ticker: {:?}",
                self.ticker.0
            )));
        }
        validate_unit_interval("probability", self.probability)?;
        validate_unit_interval("confidence", self.confidence)?;
        Ok(())
    }

    pub fn actual_return(&self, horizon: Horizon) -> Option<f64> {
        match horizon {
            Horizon::OneDay => self.actual_return_1d,
            Horizon::ThreeDay => self.actual_return_3d,
            Horizon::SevenDay => self.actual_return_7d,
        }
    }
}

/// Query filter for prediction listings.
#[derive(Clone, Debug, Default)]
pub struct PredictionFilter {
    pub ticker: Option<Ticker>,
    pub status: Option<PredictionStatus>,
    pub limit: i64,
}

/// CRUD over the predictions table. Status transitions are guarded here:
/// finalization updates only rows still pending.
#[derive(Clone)]
pub struct PredictionLedger {
    pool: SqlitePool,
}

impl PredictionLedger {
    pub fn new(store: &BacktestStore) -> Self {
        Self {
            pool: store.pool().clone(),
        }
    }

    pub async fn save(&self, prediction: &Prediction) -> CoreResult<i64> {
        prediction.validate()?;

        let result = sqlx::query(
            r#"
            INSERT INTO predictions (
                ticker, prediction_date, predicted_direction, probability,
                expected_return, confidence, base_price, status, model_version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(prediction.ticker.as_str())
        .bind(prediction.prediction_date)
        .bind(prediction.predicted_direction.as_str())
        .bind(prediction.probability)
        .bind(prediction.expected_return)
        .bind(prediction.confidence)
        .bind(prediction.base_price)
        .bind(prediction.status.as_str())
        .bind(&prediction.model_version)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Predictions still awaiting the given horizon, dated at or before
    /// `due_before`. For the 1-day horizon only pending rows qualify; for
    /// 3/7 days a finalized row still needs its late returns recorded.
    pub async fn awaiting_horizon(
        &self,
        horizon: Horizon,
        due_before: DateTime<Utc>,
    ) -> CoreResult<Vec<Prediction>> {
        let sql = match horizon {
            Horizon::OneDay => {
                r#"
                SELECT * FROM predictions
                WHERE actual_return_1d IS NULL AND status = 'pending'
                  AND prediction_date <= ?
                ORDER BY prediction_date ASC
                "#
            }
            Horizon::ThreeDay => {
                r#"
                SELECT * FROM predictions
                WHERE actual_return_3d IS NULL AND status != 'expired'
                  AND prediction_date <= ?
                ORDER BY prediction_date ASC
                "#
            }
            Horizon::SevenDay => {
                r#"
                SELECT * FROM predictions
                WHERE actual_return_7d IS NULL AND status != 'expired'
                  AND prediction_date <= ?
                ORDER BY prediction_date ASC
                "#
            }
        };

        let rows = sqlx::query(sql).bind(due_before).fetch_all(&self.pool).await?;
        rows.iter().map(prediction_from_row).collect()
    }

    /// Records the realized price/return for one horizon.
    pub async fn record_outcome(
        &self,
        id: i64,
        horizon: Horizon,
        actual_price: f64,
        actual_return: f64,
        checked_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let sql = match horizon {
            Horizon::OneDay => {
                "UPDATE predictions SET actual_price_1d = ?, actual_return_1d = ?, checked_at = ? WHERE id = ?"
            }
            Horizon::ThreeDay => {
                "UPDATE predictions SET actual_price_3d = ?, actual_return_3d = ?, checked_at = ? WHERE id = ?"
            }
            Horizon::SevenDay => {
                "UPDATE predictions SET actual_price_7d = ?, actual_return_7d = ?, checked_at = ? WHERE id = ?"
            }
        };

        sqlx::query(sql)
            .bind(actual_price)
            .bind(actual_return)
            .bind(checked_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Finalizes a pending prediction. Rows already finalized or expired
    /// are left untouched, preserving the one-way lifecycle.
    pub async fn finalize_status(&self, id: i64, status: PredictionStatus) -> CoreResult<bool> {
        let result = sqlx::query(
            "UPDATE predictions SET status = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: i64) -> CoreResult<Option<Prediction>> {
        let row = sqlx::query("SELECT * FROM predictions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(prediction_from_row).transpose()
    }

    pub async fn recent(&self, filter: &PredictionFilter) -> CoreResult<Vec<Prediction>> {
        let limit = if filter.limit > 0 { filter.limit } else { 100 };

        // Optional filters bind as (? IS NULL OR col = ?) so the statement
        // stays a single fixed string.
        let rows = sqlx::query(
            r#"
            SELECT * FROM predictions
            WHERE (? IS NULL OR ticker = ?)
              AND (? IS NULL OR status = ?)
            ORDER BY prediction_date DESC
            LIMIT ?
            "#,
        )
        .bind(filter.ticker.as_ref().map(|t| t.as_str().to_string()))
        .bind(filter.ticker.as_ref().map(|t| t.as_str().to_string()))
        .bind(filter.status.map(|s| s.as_str().to_string()))
        .bind(filter.status.map(|s| s.as_str().to_string()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(prediction_from_row).collect()
    }

    pub async fn between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<Prediction>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM predictions
            WHERE prediction_date BETWEEN ? AND ?
            ORDER BY prediction_date ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(prediction_from_row).collect()
    }

    /// Retention pass: deletes finalized rows older than the window and
    /// expires still-pending ones instead of silently dropping them.
    /// Returns (purged, expired) counts.
    pub async fn cleanup(&self, cutoff: DateTime<Utc>) -> CoreResult<(u64, u64)> {
        let expired = sqlx::query(
            "UPDATE predictions SET status = 'expired' WHERE status = 'pending' AND prediction_date < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let purged = sqlx::query(
            "DELETE FROM predictions WHERE status IN ('correct', 'incorrect') AND prediction_date < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok((purged, expired))
    }
}

fn prediction_from_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Prediction> {
    let direction: String = row.try_get("predicted_direction")?;
    let direction = PredictedDirection::parse(&direction).ok_or_else(|| {
        CoreError::DataValidation(format!("unknown predicted direction: {direction}"))
    })?;
    let status: String = row.try_get("status")?;
    let status = PredictionStatus::parse(&status)
        .ok_or_else(|| CoreError::DataValidation(format!("unknown prediction status: {status}")))?;

    Ok(Prediction {
        id: Some(row.try_get("id")?),
        ticker: Ticker::new(row.try_get::<String, _>("ticker")?),
        prediction_date: row.try_get("prediction_date")?,
        predicted_direction: direction,
        probability: row.try_get("probability")?,
        expected_return: row.try_get("expected_return")?,
        confidence: row.try_get("confidence")?,
        base_price: row.try_get("base_price")?,
        actual_price_1d: row.try_get("actual_price_1d")?,
        actual_price_3d: row.try_get("actual_price_3d")?,
        actual_price_7d: row.try_get("actual_price_7d")?,
        actual_return_1d: row.try_get("actual_return_1d")?,
        actual_return_3d: row.try_get("actual_return_3d")?,
        actual_return_7d: row.try_get("actual_return_7d")?,
        status,
        checked_at: row.try_get("checked_at")?,
        model_version: row.try_get("model_version")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ledger() -> (BacktestStore, PredictionLedger) {
        let store = BacktestStore::connect("sqlite::memory:").await.unwrap();
        let ledger = PredictionLedger::new(&store);
        (store, ledger)
    }

    fn sample(days_ago: i64) -> Prediction {
        let mut p = Prediction::new(
            Ticker::new("005930"),
            Utc::now() - chrono::Duration::days(days_ago),
            PredictedDirection::Up,
            0.72,
            1.5,
            0.8,
        );
        p.base_price = Some(50_000.0);
        p
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let (_store, ledger) = ledger().await;
        let id = ledger.save(&sample(2)).await.unwrap();

        let loaded = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PredictionStatus::Pending);
        assert_eq!(loaded.predicted_direction, PredictedDirection::Up);
        assert_eq!(loaded.base_price, Some(50_000.0));
    }

    #[tokio::test]
    async fn test_save_rejects_out_of_range_probability() {
        let (_store, ledger) = ledger().await;
        let mut p = sample(1);
        p.probability = 1.2;
        assert!(ledger.save(&p).await.is_err());
    }

    #[tokio::test]
    async fn test_status_transition_is_one_way() {
        let (_store, ledger) = ledger().await;
        let id = ledger.save(&sample(2)).await.unwrap();

        assert!(ledger.finalize_status(id, PredictionStatus::Correct).await.unwrap());
        // A second finalization must not flip the row.
        assert!(!ledger.finalize_status(id, PredictionStatus::Incorrect).await.unwrap());

        let loaded = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PredictionStatus::Correct);
    }

    #[tokio::test]
    async fn test_awaiting_horizon_selection() {
        let (_store, ledger) = ledger().await;
        let id = ledger.save(&sample(5)).await.unwrap();

        let due = ledger.awaiting_horizon(Horizon::OneDay, Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);

        // After the 1d outcome lands and status finalizes, the row leaves
        // the 1d queue but still awaits the 3d horizon.
        ledger
            .record_outcome(id, Horizon::OneDay, 51_000.0, 2.0, Utc::now())
            .await
            .unwrap();
        ledger.finalize_status(id, PredictionStatus::Correct).await.unwrap();

        let due_1d = ledger.awaiting_horizon(Horizon::OneDay, Utc::now()).await.unwrap();
        assert!(due_1d.is_empty());
        let due_3d = ledger.awaiting_horizon(Horizon::ThreeDay, Utc::now()).await.unwrap();
        assert_eq!(due_3d.len(), 1);
    }

    #[tokio::test]
    async fn test_recent_filters() {
        let (_store, ledger) = ledger().await;
        ledger.save(&sample(1)).await.unwrap();
        let mut other = sample(1);
        other.ticker = Ticker::new("000660");
        ledger.save(&other).await.unwrap();

        let filter = PredictionFilter {
            ticker: Some(Ticker::new("005930")),
            ..Default::default()
        };
        let rows = ledger.recent(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ticker, Ticker::new("005930"));
    }

    #[tokio::test]
    async fn test_cleanup_expires_pending_and_purges_finalized() {
        let (_store, ledger) = ledger().await;
        let old_pending = ledger.save(&sample(120)).await.unwrap();
        let old_finalized = ledger.save(&sample(120)).await.unwrap();
        ledger
            .finalize_status(old_finalized, PredictionStatus::Correct)
            .await
            .unwrap();
        let fresh = ledger.save(&sample(1)).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(90);
        let (purged, expired) = ledger.cleanup(cutoff).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(expired, 1);

        // Old pending row is still present, marked expired.
        let loaded = ledger.get(old_pending).await.unwrap().unwrap();
        assert_eq!(loaded.status, PredictionStatus::Expired);
        assert!(ledger.get(old_finalized).await.unwrap().is_none());
        assert!(ledger.get(fresh).await.unwrap().is_some());
    }
}
