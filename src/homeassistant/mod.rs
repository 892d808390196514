//! Home Assistant integration: REST access to entity states and services,
//! mirroring of watched entities into the [`StateStore`](crate::sensors::StateStore)
//! and the script based [`CommandSink`](crate::domain::CommandSink).

pub mod client;
pub mod error;
pub mod scripts;
pub mod sync;

pub use client::{HaEntityState, HomeAssistantClient};
pub use error::{HaError, HaResult};
pub use scripts::{ScriptCommandSink, ScriptNames};
pub use sync::StateSync;
