//! Risk analytics and performance reporting

pub mod analyzer;
pub mod risk;

pub use analyzer::{
    ComparisonReport, Insight, MetricsPeriod, PerformanceAnalyzer, PerformanceMetrics, Report,
};
pub use risk::{DrawdownAnalysis, RiskReport};
