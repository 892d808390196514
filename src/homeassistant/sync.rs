use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::client::HomeAssistantClient;
use super::error::HaError;
use crate::sensors::{StateStore, STATE_UNAVAILABLE};

/// Mirrors watched Home Assistant entities into the local [`StateStore`].
pub struct StateSync {
    client: HomeAssistantClient,
    store: Arc<StateStore>,
    entities: Vec<String>,
}

impl StateSync {
    pub fn new(client: HomeAssistantClient, store: Arc<StateStore>, entities: Vec<String>) -> Self {
        let mut entities = entities;
        entities.sort();
        entities.dedup();
        Self {
            client,
            store,
            entities,
        }
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    /// Fetch every watched entity once. Returns how many states changed.
    ///
    /// An entity the host does not know reads as unavailable. Any other
    /// failure keeps the previously mirrored value.
    pub async fn sync_once(&self) -> usize {
        let mut changed = 0;
        for entity_id in &self.entities {
            if self.mirror(entity_id).await {
                changed += 1;
            }
        }
        debug!(changed, watched = self.entities.len(), "state sync");
        changed
    }

    /// Fetch entities outside the watched set once, e.g. those named by a
    /// manual run. Watched ids are left to the regular sync.
    pub async fn refresh_unwatched(&self, entity_ids: &[&str]) -> usize {
        let mut changed = 0;
        for entity_id in entity_ids {
            if self.entities.iter().any(|e| e == entity_id) {
                continue;
            }
            if self.mirror(entity_id).await {
                changed += 1;
            }
        }
        changed
    }

    async fn mirror(&self, entity_id: &str) -> bool {
        let state = match self.client.get_state(entity_id).await {
            Ok(entity) => entity.state,
            Err(HaError::EntityNotFound(_)) => STATE_UNAVAILABLE.to_string(),
            Err(e) => {
                warn!(error = %e, entity_id = %entity_id, "state fetch failed, keeping last value");
                return false;
            }
        };
        self.store.set(entity_id, state)
    }

    pub async fn run(&self, poll_seconds: u64) {
        let mut interval = tokio::time::interval(Duration::from_secs(poll_seconds.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.sync_once().await;
        }
    }
}
