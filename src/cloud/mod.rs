//! Cloud backend: strategy polling and state-change reports.

pub mod reporter;
pub mod strategy;

pub use reporter::{CloudReporter, ReportError, ReportPayload};
pub use strategy::{
    CachedStrategy, SignalRequest, StrategyCache, StrategyError, StrategyPoller,
    StrategyPollerSettings,
};
