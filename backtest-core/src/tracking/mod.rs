//! Prediction ledger and outcome verification

pub mod ledger;
pub mod tracker;

pub use ledger::{
    Horizon, PredictedDirection, Prediction, PredictionLedger, PredictionStatus,
};
pub use tracker::OutcomeTracker;
