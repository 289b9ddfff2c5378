//! SQLite persistence for trades, snapshots and instruments
//!
//! Trades and snapshots are append-only, time-ordered records; nothing in
//! the store mutates them after insert. The engine treats a failed insert
//! as fatal for the tick: in-memory state only advances once the row is
//! durable.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;

use crate::errors::{CoreError, CoreResult};
use crate::market::types::{Ticker, TradingAction};
use crate::paper_trading::executor::Trade;
use crate::paper_trading::portfolio::PortfolioSnapshot;

/// Shared handle to the backtesting database.
#[derive(Clone)]
pub struct BacktestStore {
    pool: SqlitePool,
}

/// Aggregate statistics over closed trades.
#[derive(Clone, Debug, Default)]
pub struct ClosedTradeStats {
    pub total: u64,
    pub wins: u64,
    pub losses: u64,
    pub avg_win: f64,
    pub avg_loss: f64,
}

impl BacktestStore {
    /// Opens (creating if missing) the database and runs schema setup.
    ///
    /// `url` accepts `sqlite://path/to/backtesting.db` or `sqlite::memory:`.
    pub async fn connect(url: &str) -> CoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(CoreError::Storage)?
            .create_if_missing(true);

        // In-memory databases are per-connection; a larger pool would hand
        // out empty schemas.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> CoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                prediction_date TIMESTAMP NOT NULL,
                predicted_direction TEXT NOT NULL,
                probability REAL NOT NULL,
                expected_return REAL NOT NULL DEFAULT 0,
                confidence REAL NOT NULL,
                base_price REAL,
                actual_price_1d REAL,
                actual_price_3d REAL,
                actual_price_7d REAL,
                actual_return_1d REAL,
                actual_return_3d REAL,
                actual_return_7d REAL,
                status TEXT NOT NULL DEFAULT 'pending',
                checked_at TIMESTAMP,
                model_version TEXT NOT NULL DEFAULT 'v1.0',
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paper_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ref_id TEXT NOT NULL,
                prediction_id INTEGER,
                ticker TEXT NOT NULL,
                action TEXT NOT NULL,
                trade_date TIMESTAMP NOT NULL,
                price REAL NOT NULL,
                quantity INTEGER NOT NULL,
                total_value REAL NOT NULL,
                position_before INTEGER NOT NULL,
                position_after INTEGER NOT NULL,
                cash_before REAL NOT NULL,
                cash_after REAL NOT NULL,
                realized_pnl REAL NOT NULL DEFAULT 0,
                commission REAL NOT NULL DEFAULT 0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (prediction_id) REFERENCES predictions(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TIMESTAMP NOT NULL,
                cash REAL NOT NULL,
                positions TEXT NOT NULL,
                total_value REAL NOT NULL,
                daily_return REAL,
                cumulative_return REAL,
                drawdown REAL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instruments (
                ticker TEXT PRIMARY KEY,
                sector TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_predictions_ticker_date ON predictions(ticker, prediction_date)",
            "CREATE INDEX IF NOT EXISTS idx_predictions_status ON predictions(status)",
            "CREATE INDEX IF NOT EXISTS idx_trades_date ON paper_trades(trade_date)",
            "CREATE INDEX IF NOT EXISTS idx_trades_ticker ON paper_trades(ticker)",
            "CREATE INDEX IF NOT EXISTS idx_history_date ON portfolio_history(date)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        Ok(())
    }

    // ----- trades -----

    pub async fn insert_trade(&self, trade: &Trade) -> CoreResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO paper_trades (
                ref_id, prediction_id, ticker, action, trade_date, price, quantity,
                total_value, position_before, position_after,
                cash_before, cash_after, realized_pnl, commission
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.ref_id)
        .bind(trade.prediction_id)
        .bind(trade.ticker.as_str())
        .bind(trade.action.as_str())
        .bind(trade.trade_date)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.total_value)
        .bind(trade.position_before)
        .bind(trade.position_after)
        .bind(trade.cash_before)
        .bind(trade.cash_after)
        .bind(trade.realized_pnl)
        .bind(trade.commission)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn trades_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT id, ref_id, prediction_id, ticker, action, trade_date, price,
                   quantity, total_value, position_before, position_after,
                   cash_before, cash_after, realized_pnl, commission
            FROM paper_trades
            WHERE trade_date BETWEEN ? AND ?
            ORDER BY trade_date ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| trade_from_row(&row)).collect()
    }

    /// Aggregates over the closed (SELL) side of the trade ledger, used to
    /// refresh the portfolio's cumulative statistics after each trade.
    pub async fn closed_trade_stats(&self) -> CoreResult<ClosedTradeStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN realized_pnl > 0 THEN 1 ELSE 0 END) AS wins,
                SUM(CASE WHEN realized_pnl < 0 THEN 1 ELSE 0 END) AS losses,
                AVG(CASE WHEN realized_pnl > 0 THEN realized_pnl ELSE NULL END) AS avg_win,
                AVG(CASE WHEN realized_pnl < 0 THEN realized_pnl ELSE NULL END) AS avg_loss
            FROM paper_trades
            WHERE action = 'sell'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ClosedTradeStats {
            total: row.try_get::<Option<i64>, _>("total")?.unwrap_or(0) as u64,
            wins: row.try_get::<Option<i64>, _>("wins")?.unwrap_or(0) as u64,
            losses: row.try_get::<Option<i64>, _>("losses")?.unwrap_or(0) as u64,
            avg_win: row.try_get::<Option<f64>, _>("avg_win")?.unwrap_or(0.0),
            avg_loss: row.try_get::<Option<f64>, _>("avg_loss")?.unwrap_or(0.0),
        })
    }

    // ----- snapshots -----

    pub async fn insert_snapshot(&self, snapshot: &PortfolioSnapshot) -> CoreResult<i64> {
        let positions = serde_json::to_string(&snapshot.positions)
            .map_err(|e| CoreError::DataValidation(format!("snapshot encode: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO portfolio_history (
                date, cash, positions, total_value,
                daily_return, cumulative_return, drawdown
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.date)
        .bind(snapshot.cash)
        .bind(&positions)
        .bind(snapshot.total_value)
        .bind(snapshot.daily_return)
        .bind(snapshot.cumulative_return)
        .bind(snapshot.drawdown)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn latest_snapshot(&self) -> CoreResult<Option<PortfolioSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT id, date, cash, positions, total_value,
                   daily_return, cumulative_return, drawdown
            FROM portfolio_history
            ORDER BY date DESC, id DESC LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| snapshot_from_row(&row)).transpose()
    }

    /// Highest total_value ever snapshotted; the running drawdown peak.
    pub async fn peak_total_value(&self) -> CoreResult<Option<f64>> {
        let row = sqlx::query("SELECT MAX(total_value) AS peak FROM portfolio_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<Option<f64>, _>("peak")?)
    }

    /// Deepest drawdown ever snapshotted (a negative fraction, or 0).
    pub async fn min_drawdown(&self) -> CoreResult<f64> {
        let row = sqlx::query("SELECT MIN(drawdown) AS dd FROM portfolio_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<Option<f64>, _>("dd")?.unwrap_or(0.0))
    }

    /// Most recent daily returns, oldest first, capped at `limit`.
    pub async fn recent_daily_returns(&self, limit: i64) -> CoreResult<Vec<f64>> {
        let rows = sqlx::query(
            r#"
            SELECT daily_return FROM portfolio_history
            WHERE daily_return IS NOT NULL
            ORDER BY date DESC, id DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut returns: Vec<f64> = rows
            .into_iter()
            .filter_map(|row| row.try_get::<Option<f64>, _>("daily_return").ok().flatten())
            .collect();
        returns.reverse();
        Ok(returns)
    }

    pub async fn snapshots_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<PortfolioSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, date, cash, positions, total_value,
                   daily_return, cumulative_return, drawdown
            FROM portfolio_history
            WHERE date BETWEEN ? AND ?
            ORDER BY date ASC, id ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| snapshot_from_row(&row)).collect()
    }

    // ----- instruments -----

    pub async fn upsert_instrument(&self, ticker: &Ticker, sector: Option<&str>) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO instruments (ticker, sector) VALUES (?, ?)
            ON CONFLICT(ticker) DO UPDATE SET sector = excluded.sector
            "#,
        )
        .bind(ticker.as_str())
        .bind(sector)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn sectors(&self) -> CoreResult<HashMap<String, String>> {
        let rows = sqlx::query("SELECT ticker, sector FROM instruments WHERE sector IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let ticker: String = row.try_get("ticker").ok()?;
                let sector: Option<String> = row.try_get("sector").ok()?;
                Some((ticker, sector?))
            })
            .collect())
    }
}

fn trade_from_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Trade> {
    let action: String = row.try_get("action")?;
    let action = TradingAction::parse(&action)
        .ok_or_else(|| CoreError::DataValidation(format!("unknown trade action: {action}")))?;

    Ok(Trade {
        id: Some(row.try_get("id")?),
        ref_id: row.try_get("ref_id")?,
        prediction_id: row.try_get("prediction_id")?,
        ticker: Ticker::new(row.try_get::<String, _>("ticker")?),
        action,
        trade_date: row.try_get("trade_date")?,
        price: row.try_get("price")?,
        quantity: row.try_get("quantity")?,
        total_value: row.try_get("total_value")?,
        position_before: row.try_get("position_before")?,
        position_after: row.try_get("position_after")?,
        cash_before: row.try_get("cash_before")?,
        cash_after: row.try_get("cash_after")?,
        realized_pnl: row.try_get("realized_pnl")?,
        commission: row.try_get("commission")?,
    })
}

fn snapshot_from_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<PortfolioSnapshot> {
    let positions: String = row.try_get("positions")?;
    let positions = serde_json::from_str(&positions)
        .map_err(|e| CoreError::DataValidation(format!("snapshot decode: {e}")))?;

    Ok(PortfolioSnapshot {
        id: Some(row.try_get("id")?),
        date: row.try_get("date")?,
        cash: row.try_get("cash")?,
        positions,
        total_value: row.try_get("total_value")?,
        daily_return: row.try_get::<Option<f64>, _>("daily_return")?.unwrap_or(0.0),
        cumulative_return: row
            .try_get::<Option<f64>, _>("cumulative_return")?
            .unwrap_or(0.0),
        drawdown: row.try_get::<Option<f64>, _>("drawdown")?.unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper_trading::portfolio::{PortfolioState, Position};

    async fn memory_store() -> BacktestStore {
        BacktestStore::connect("sqlite::memory:").await.unwrap()
    }

    fn sample_trade() -> Trade {
        Trade {
            id: None,
            ref_id: "TRD_test".to_string(),
            prediction_id: None,
            ticker: Ticker::new("005930"),
            action: TradingAction::Buy,
            trade_date: Utc::now(),
            price: 50_000.0,
            quantity: 100,
            total_value: 5_000_000.0,
            position_before: 0,
            position_after: 100,
            cash_before: 10_000_000.0,
            cash_after: 4_999_250.0,
            realized_pnl: 0.0,
            commission: 750.0,
        }
    }

    #[tokio::test]
    async fn test_trade_round_trip() {
        let store = memory_store().await;
        let id = store.insert_trade(&sample_trade()).await.unwrap();
        assert!(id > 0);

        let start = Utc::now() - chrono::Duration::hours(1);
        let end = Utc::now() + chrono::Duration::hours(1);
        let trades = store.trades_between(start, end).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].id, Some(id));
        assert_eq!(trades[0].action, TradingAction::Buy);
        assert!((trades[0].cash_after - 4_999_250.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_and_latest() {
        let store = memory_store().await;
        let mut state = PortfolioState::new(10_000_000.0);
        state.cash = 4_999_250.0;
        state.positions.insert(
            Ticker::new("005930"),
            Position::open(Ticker::new("005930"), 100, 50_000.0),
        );
        state.recompute_valuation();

        let snapshot = PortfolioSnapshot::capture(&state, Utc::now(), 10_000_000.0, 10_000_000.0);
        store.insert_snapshot(&snapshot).await.unwrap();

        let restored = store.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(restored.cash, snapshot.cash);
        assert_eq!(restored.total_value, snapshot.total_value);
        assert_eq!(
            restored.positions.get(&Ticker::new("005930")).unwrap().quantity,
            100
        );
    }

    #[tokio::test]
    async fn test_recent_daily_returns_ordered_oldest_first() {
        let store = memory_store().await;
        let state = PortfolioState::new(1_000_000.0);

        for (offset, value) in [(3i64, 1.00), (2, 1.01), (1, 0.99)] {
            let mut snapshot =
                PortfolioSnapshot::capture(&state, Utc::now() - chrono::Duration::days(offset), 1.0, 1.0);
            snapshot.daily_return = value - 1.0;
            store.insert_snapshot(&snapshot).await.unwrap();
        }

        let returns = store.recent_daily_returns(2).await.unwrap();
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.01).abs() < 1e-9);
        assert!((returns[1] + 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_instrument_sector_upsert() {
        let store = memory_store().await;
        let ticker = Ticker::new("005930");
        store.upsert_instrument(&ticker, Some("전자")).await.unwrap();
        store.upsert_instrument(&ticker, Some("IT")).await.unwrap();

        let sectors = store.sectors().await.unwrap();
        assert_eq!(sectors.get("005930").map(String::as_str), Some("IT"));
    }
}
