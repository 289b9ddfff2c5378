//! REST API over the paper trader
//!
//! HTTP endpoints consumed by the dashboard and schedulers: portfolio
//! state, prediction history, performance reports and the operational
//! triggers (submit prediction, push prices, run outcome checks).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::{Filter, Reply};

use crate::analytics::MetricsPeriod;
use crate::errors::CoreError;
use crate::market::types::Ticker;
use crate::tracking::ledger::PredictionStatus;
use crate::{PaperTrader, PredictionInput};

#[derive(Debug, Deserialize)]
pub struct PredictionQuery {
    pub ticker: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub days_after: u32,
}

#[derive(Debug, Deserialize)]
pub struct CloseRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

/// API server exposing the trading core.
pub struct ApiServer {
    trader: Arc<PaperTrader>,
    port: u16,
}

impl ApiServer {
    pub fn new(trader: Arc<PaperTrader>, port: u16) -> Self {
        Self { trader, port }
    }

    /// Starts serving; runs until the process shuts down.
    pub async fn start(&self) {
        let trader = self.trader.clone();

        let health = warp::path("health").and(warp::get()).map(|| {
            warp::reply::json(&json!({
                "status": "ok",
                "service": "paper-trader",
                "timestamp": Utc::now()
            }))
        });

        let portfolio = warp::path!("api" / "v1" / "portfolio")
            .and(warp::get())
            .and(with_trader(trader.clone()))
            .and_then(get_portfolio);

        let predictions = warp::path!("api" / "v1" / "predictions")
            .and(warp::get())
            .and(warp::query::<PredictionQuery>())
            .and(with_trader(trader.clone()))
            .and_then(get_predictions);

        let prediction_detail = warp::path!("api" / "v1" / "predictions" / i64)
            .and(warp::get())
            .and(with_trader(trader.clone()))
            .and_then(get_prediction_detail);

        let submit = warp::path!("api" / "v1" / "predictions")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_trader(trader.clone()))
            .and_then(post_prediction);

        let report = warp::path!("api" / "v1" / "report")
            .and(warp::get())
            .and(warp::query::<ReportQuery>())
            .and(with_trader(trader.clone()))
            .and_then(get_report);

        let performance = warp::path!("api" / "v1" / "metrics" / "performance")
            .and(warp::get())
            .and(warp::query::<PeriodQuery>())
            .and(with_trader(trader.clone()))
            .and_then(get_performance_metrics);

        let risk = warp::path!("api" / "v1" / "metrics" / "risk")
            .and(warp::get())
            .and(warp::query::<ReportQuery>())
            .and(with_trader(trader.clone()))
            .and_then(get_risk_metrics);

        let prices = warp::path!("api" / "v1" / "prices")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_trader(trader.clone()))
            .and_then(post_prices);

        let check = warp::path!("api" / "v1" / "check")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_trader(trader.clone()))
            .and_then(post_check);

        let close = warp::path!("api" / "v1" / "positions" / String / "close")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_trader(trader.clone()))
            .and_then(post_close);

        let cors = warp::cors()
            .allow_any_origin()
            .allow_headers(vec!["content-type"])
            .allow_methods(vec!["GET", "POST", "OPTIONS"]);

        let routes = health
            .or(portfolio)
            .or(prediction_detail)
            .or(predictions)
            .or(submit)
            .or(report)
            .or(performance)
            .or(risk)
            .or(prices)
            .or(check)
            .or(close)
            .with(cors);

        info!(port = self.port, "api_server_started");
        warp::serve(routes).run(([0, 0, 0, 0], self.port)).await;
    }
}

fn with_trader(
    trader: Arc<PaperTrader>,
) -> impl Filter<Extract = (Arc<PaperTrader>,), Error = Infallible> + Clone {
    warp::any().map(move || trader.clone())
}

fn reply_error(status: StatusCode, message: String) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&ApiError { error: message }), status)
}

fn reply_core_error(e: CoreError) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = match &e {
        CoreError::Trade(_) | CoreError::DataValidation(_) | CoreError::Config(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => {
            error!(error = %e, "api_internal_error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    reply_error(status, e.to_string())
}

async fn get_portfolio(trader: Arc<PaperTrader>) -> Result<impl Reply, Infallible> {
    let summary = trader.get_portfolio_summary();
    Ok(warp::reply::with_status(
        warp::reply::json(&summary),
        StatusCode::OK,
    ))
}

async fn get_predictions(
    query: PredictionQuery,
    trader: Arc<PaperTrader>,
) -> Result<impl Reply, Infallible> {
    let status = match query.status.as_deref() {
        None => None,
        Some(s) => match PredictionStatus::parse(s) {
            Some(status) => Some(status),
            None => {
                return Ok(reply_error(
                    StatusCode::BAD_REQUEST,
                    format!("unknown status: {s}"),
                ))
            }
        },
    };
    let ticker = query.ticker.map(Ticker::new);
    let limit = query.limit.unwrap_or(100).min(1000);

    match trader.recent_predictions(ticker, status, limit).await {
        Ok(predictions) => {
            let total = predictions.len();
            Ok(warp::reply::with_status(
                warp::reply::json(&json!({
                    "predictions": predictions,
                    "total": total
                })),
                StatusCode::OK,
            ))
        }
        Err(e) => Ok(reply_core_error(e)),
    }
}

async fn get_prediction_detail(
    id: i64,
    trader: Arc<PaperTrader>,
) -> Result<impl Reply, Infallible> {
    match trader.prediction(id).await {
        Ok(Some(prediction)) => Ok(warp::reply::with_status(
            warp::reply::json(&prediction),
            StatusCode::OK,
        )),
        Ok(None) => Ok(reply_error(
            StatusCode::NOT_FOUND,
            "prediction not found".to_string(),
        )),
        Err(e) => Ok(reply_core_error(e)),
    }
}

async fn get_risk_metrics(
    query: ReportQuery,
    trader: Arc<PaperTrader>,
) -> Result<impl Reply, Infallible> {
    let end = query.end.unwrap_or_else(Utc::now);
    let start = query.start.unwrap_or(end - Duration::days(30));

    match trader.generate_report(start, end).await {
        Ok(report) => Ok(warp::reply::with_status(
            warp::reply::json(&report.risk_metrics),
            StatusCode::OK,
        )),
        Err(e) => Ok(reply_core_error(e)),
    }
}

async fn post_prediction(
    input: PredictionInput,
    trader: Arc<PaperTrader>,
) -> Result<impl Reply, Infallible> {
    match trader.submit_prediction(input).await {
        Ok(outcome) => Ok(warp::reply::with_status(
            warp::reply::json(&outcome),
            StatusCode::CREATED,
        )),
        Err(e) => Ok(reply_core_error(e)),
    }
}

async fn get_report(
    query: ReportQuery,
    trader: Arc<PaperTrader>,
) -> Result<impl Reply, Infallible> {
    let end = query.end.unwrap_or_else(Utc::now);
    let start = query.start.unwrap_or(end - Duration::days(30));

    match trader.generate_report(start, end).await {
        Ok(report) => Ok(warp::reply::with_status(
            warp::reply::json(&report),
            StatusCode::OK,
        )),
        Err(e) => Ok(reply_core_error(e)),
    }
}

async fn get_performance_metrics(
    query: PeriodQuery,
    trader: Arc<PaperTrader>,
) -> Result<impl Reply, Infallible> {
    let period = query.period.as_deref().unwrap_or("weekly");
    let Some(period) = MetricsPeriod::parse(period) else {
        return Ok(reply_error(
            StatusCode::BAD_REQUEST,
            format!("unknown period: {period}"),
        ));
    };

    match trader.calculate_performance_metrics(period).await {
        Ok(metrics) => Ok(warp::reply::with_status(
            warp::reply::json(&metrics),
            StatusCode::OK,
        )),
        Err(e) => Ok(reply_core_error(e)),
    }
}

async fn post_prices(
    prices: HashMap<String, f64>,
    trader: Arc<PaperTrader>,
) -> Result<impl Reply, Infallible> {
    let prices: HashMap<Ticker, f64> = prices
        .into_iter()
        .map(|(ticker, price)| (Ticker::new(ticker), price))
        .collect();

    match trader.update_portfolio_values(&prices).await {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&json!({"updated": prices.len()})),
            StatusCode::OK,
        )),
        Err(e) => Ok(reply_core_error(e)),
    }
}

async fn post_check(
    request: CheckRequest,
    trader: Arc<PaperTrader>,
) -> Result<impl Reply, Infallible> {
    match trader.check_predictions(request.days_after).await {
        Ok(checked) => Ok(warp::reply::with_status(
            warp::reply::json(&json!({"checked": checked})),
            StatusCode::OK,
        )),
        Err(e) => Ok(reply_core_error(e)),
    }
}

async fn post_close(
    ticker: String,
    request: CloseRequest,
    trader: Arc<PaperTrader>,
) -> Result<impl Reply, Infallible> {
    let reason = request.reason.unwrap_or_else(|| "manual".to_string());
    match trader.close_position(&Ticker::new(ticker), &reason).await {
        Ok(Some(trade)) => Ok(warp::reply::with_status(
            warp::reply::json(&trade),
            StatusCode::OK,
        )),
        Ok(None) => Ok(reply_error(
            StatusCode::NOT_FOUND,
            "no open position".to_string(),
        )),
        Err(e) => Ok(reply_core_error(e)),
    }
}
