use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::trace;

use super::{is_available, SensorSource};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// In-memory mirror of host entity states.
///
/// Writers call [`StateStore::set`]; every change of an entity's raw state is
/// announced on a broadcast channel carrying the entity id.
pub struct StateStore {
    states: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<String>,
}

impl StateStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            states: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Store a raw state. Returns `true` (and notifies subscribers) when the
    /// value differs from what was stored before.
    pub fn set(&self, entity_id: impl Into<String>, state: impl Into<String>) -> bool {
        let entity_id = entity_id.into();
        let state = state.into();
        let changed = {
            let mut states = self.states.write();
            match states.get(&entity_id) {
                Some(previous) if *previous == state => false,
                _ => {
                    states.insert(entity_id.clone(), state);
                    true
                }
            }
        };
        if changed {
            trace!(entity_id = %entity_id, "state changed");
            // No subscribers is fine; nobody is watching yet.
            let _ = self.changes.send(entity_id);
        }
        changed
    }

    /// Raw state including `unknown`/`unavailable`
    pub fn raw(&self, entity_id: &str) -> Option<String> {
        self.states.read().get(entity_id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for StateStore {
    fn read(&self, entity_id: &str) -> Option<String> {
        self.states
            .read()
            .get(entity_id)
            .filter(|state| is_available(state))
            .cloned()
    }
}
