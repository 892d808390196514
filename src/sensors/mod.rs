//! Sensor access for the guard.
//!
//! The host platform is modelled as a key-value observation store: an
//! entity id maps to a raw textual state. Everything the guard reads goes
//! through the narrow [`SensorSource`] capability so tests can substitute a
//! deterministic fixture.

pub mod load;
pub mod store;

pub use load::{LoadEstimator, LoadSources};
pub use store::StateStore;

use thiserror::Error;

pub const STATE_UNKNOWN: &str = "unknown";
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Limit readings below this are taken to be kilowatts
pub const LIMIT_KW_THRESHOLD: f64 = 100.0;

#[derive(Debug, Error, PartialEq)]
pub enum SensorError {
    #[error("Entity {entity_id} has non-numeric state '{value}'")]
    InvalidReading { entity_id: String, value: String },
}

/// Read access to current entity states
pub trait SensorSource: Send + Sync {
    /// Raw state of `entity_id`; `None` when it is missing, unknown or unavailable.
    fn read(&self, entity_id: &str) -> Option<String>;
}

/// Whether a raw host state carries a usable value
pub fn is_available(state: &str) -> bool {
    state != STATE_UNKNOWN && state != STATE_UNAVAILABLE
}

/// Interpret a raw limit reading as watts.
///
/// Values below 100 are assumed to be kW; no real installation has a
/// sub-100 W limit.
pub fn normalize_limit_w(raw: f64) -> f64 {
    if raw < LIMIT_KW_THRESHOLD {
        raw * 1000.0
    } else {
        raw
    }
}

/// Numeric and textual reads on top of a [`SensorSource`]
#[derive(Clone, Copy)]
pub struct SampleReader<'a> {
    source: &'a dyn SensorSource,
}

impl<'a> SampleReader<'a> {
    pub fn new(source: &'a dyn SensorSource) -> Self {
        Self { source }
    }

    pub fn text(&self, entity_id: &str) -> Option<String> {
        self.source.read(entity_id)
    }

    /// `Ok(None)` when the entity is unavailable, an error when its state is
    /// present but not a number.
    pub fn number(&self, entity_id: &str) -> Result<Option<f64>, SensorError> {
        match self.source.read(entity_id) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| SensorError::InvalidReading {
                    entity_id: entity_id.to_string(),
                    value: raw,
                }),
        }
    }

    /// Optional entity read that substitutes `default` for anything missing.
    pub fn number_or(&self, entity_id: Option<&str>, default: f64) -> Result<f64, SensorError> {
        match entity_id {
            Some(id) => Ok(self.number(id)?.unwrap_or(default)),
            None => Ok(default),
        }
    }

    /// Peak limit in watts, `Ok(None)` when unavailable.
    pub fn limit_w(&self, entity_id: &str) -> Result<Option<f64>, SensorError> {
        Ok(self.number(entity_id)?.map(normalize_limit_w))
    }
}
