//! PeakGuard: keeps a household under its grid peak limit by discharging a
//! home battery, while otherwise following a cloud-computed strategy.

pub mod api;
pub mod auth;
pub mod cloud;
pub mod config;
pub mod controller;
pub mod domain;
pub mod homeassistant;
pub mod sensors;
pub mod telemetry;
