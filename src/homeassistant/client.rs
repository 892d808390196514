use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

use super::error::{HaError, HaResult};

/// Entity as returned by `GET /api/states/<entity_id>`
#[derive(Debug, Clone, Deserialize)]
pub struct HaEntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Home Assistant REST API client
#[derive(Clone)]
pub struct HomeAssistantClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HomeAssistantClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> HaResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("peak-guard/0.3"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| HaError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    pub async fn get_state(&self, entity_id: &str) -> HaResult<HaEntityState> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => {
                let state = resp.json::<HaEntityState>().await?;
                trace!(entity_id, state = %state.state, "entity state");
                Ok(state)
            }
            StatusCode::NOT_FOUND => Err(HaError::EntityNotFound(entity_id.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(HaError::AuthenticationFailed),
            status => Err(HaError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Call a service given as `"domain.service"`, e.g. `"script.turn_on"`.
    pub async fn call_service(&self, service: &str, data: Value) -> HaResult<()> {
        let Some((domain, name)) = service.split_once('.') else {
            return Err(HaError::ServiceCallFailed {
                service: service.to_string(),
                reason: "expected 'domain.service'".to_string(),
            });
        };
        if domain.is_empty() || name.is_empty() || name.contains('.') {
            return Err(HaError::ServiceCallFailed {
                service: service.to_string(),
                reason: "expected 'domain.service'".to_string(),
            });
        }

        let url = format!("{}/api/services/{}/{}", self.base_url, domain, name);
        debug!(service, data = %data, "calling service");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&data)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(HaError::AuthenticationFailed);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(HaError::ServiceCallFailed {
            service: service.to_string(),
            reason: format!("HTTP {status}: {body}"),
        })
    }
}
