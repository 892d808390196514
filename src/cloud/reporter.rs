use anyhow::Result;
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::{default_on_request_failure, Retryable, RetryableStrategy, RetryTransientMiddleware};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::domain::{ReportEvent, ReportKind, ReportSink};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("{kind} report rejected: HTTP {status}")]
    Status { kind: ReportKind, status: u16 },

    #[error("{kind} report failed: {source}")]
    Transport {
        kind: ReportKind,
        #[source]
        source: reqwest_middleware::Error,
    },

    #[error("failed to build report client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Body posted to every report endpoint
#[derive(Debug, Serialize, PartialEq)]
pub struct ReportPayload<'a> {
    pub api_key: &'a str,
    pub grid_power_kw: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_kw: Option<f64>,
}

/// Retries connection level failures only. A response of any status is
/// final; the backend has seen the report.
struct TransportOnly;

impl RetryableStrategy for TransportOnly {
    fn handle(
        &self,
        res: &std::result::Result<reqwest::Response, reqwest_middleware::Error>,
    ) -> Option<Retryable> {
        match res {
            Ok(_) => None,
            Err(e) => default_on_request_failure(e),
        }
    }
}

pub struct CloudReporter {
    client: ClientWithMiddleware,
    api_url: String,
    api_key: String,
}

impl CloudReporter {
    pub fn new(
        api_url: &str,
        api_key: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, ReportError> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        let policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                policy,
                TransportOnly,
            ))
            .build();
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn endpoint_url(&self, kind: ReportKind) -> String {
        format!("{}/{}", self.api_url, kind.endpoint())
    }

    fn payload(&self, event: &ReportEvent) -> ReportPayload<'_> {
        ReportPayload {
            api_key: &self.api_key,
            grid_power_kw: event.grid_power_kw(),
            limit_kw: Some(event.limit_kw()),
        }
    }

    pub async fn send(&self, event: ReportEvent) -> Result<(), ReportError> {
        let kind = event.kind;
        let resp = self
            .client
            .post(self.endpoint_url(kind))
            .json(&self.payload(&event))
            .send()
            .await
            .map_err(|source| ReportError::Transport { kind, source })?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(ReportError::Status {
                kind,
                status: status.as_u16(),
            });
        }
        debug!(%kind, grid_power_kw = event.grid_power_kw(), "report delivered");
        Ok(())
    }
}

#[async_trait]
impl ReportSink for CloudReporter {
    async fn report(&self, event: ReportEvent) -> Result<()> {
        if let Err(e) = self.send(event).await {
            error!(kind = %event.kind, error = %e, "failed to report to cloud");
            return Err(e.into());
        }
        Ok(())
    }
}
