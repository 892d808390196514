use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// State transition reported to the cloud for bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    PeakStarted,
    PeakCleared,
    PeakFailure,
    SolarOverride,
    SolarOverrideCleared,
}

impl ReportKind {
    /// Path segment of the reporting endpoint
    pub fn endpoint(&self) -> &'static str {
        match self {
            ReportKind::PeakStarted => "report_peak",
            ReportKind::PeakCleared => "report_peak_clear",
            ReportKind::PeakFailure => "report_peak_failure",
            ReportKind::SolarOverride => "report_solar_override",
            ReportKind::SolarOverrideCleared => "report_solar_override_clear",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReportKind::PeakStarted => "PeakGuard triggered",
            ReportKind::PeakCleared => "PeakGuard cleared",
            ReportKind::PeakFailure => "PeakGuard failure",
            ReportKind::SolarOverride => "solar override",
            ReportKind::SolarOverrideCleared => "solar override cleared",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportEvent {
    pub kind: ReportKind,
    pub load_w: f64,
    pub limit_w: f64,
}

impl ReportEvent {
    pub fn new(kind: ReportKind, load_w: f64, limit_w: f64) -> Self {
        Self {
            kind,
            load_w,
            limit_w,
        }
    }

    pub fn grid_power_kw(&self) -> f64 {
        watts_to_kw_2dp(self.load_w)
    }

    pub fn limit_kw(&self) -> f64 {
        watts_to_kw_2dp(self.limit_w)
    }
}

fn watts_to_kw_2dp(watts: f64) -> f64 {
    (watts / 1000.0 * 100.0).round() / 100.0
}

/// Fire-and-forget destination for report events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn report(&self, event: ReportEvent) -> Result<()>;
}
