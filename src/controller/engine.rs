//! # PeakGuard decision engine
//!
//! Keeps the household's grid draw under a peak limit by discharging the
//! battery, and otherwise reconciles the cloud strategy with two local
//! overrides (maintenance pause and solar override).
//!
//! One call to [`PeakGuardEngine::evaluate`] is one control cycle. The engine
//! is synchronous: it reads sensors through a [`SensorSource`], takes the
//! cached cloud strategy as an input, mutates its own hysteresis flags and
//! writes at most one inverter command plus any number of report events into
//! a [`Cycle`]. Dispatching them is the caller's job.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{
    CloudAction, GuardSnapshot, InverterCommand, ReportEvent, ReportKind, StrategySnapshot,
};
use crate::sensors::{LoadEstimator, LoadSources, SampleReader, SensorError, SensorSource};

/// Fraction of the limit below which a quiet household is not evaluated
pub const WAKE_UP_RATIO: f64 = 0.90;
/// Load below this counts as net export (W)
pub const EXPORT_THRESHOLD_W: f64 = -200.0;
/// An engaged solar override is released once load rises to this (W)
pub const SOLAR_OVERRIDE_RELEASE_W: f64 = -100.0;
/// The battery is only used above this state of charge (%)
pub const MIN_SOC_PERCENT: f64 = 5.0;
/// Gap between the peak trigger and the peak clear thresholds (W)
pub const CLEAR_HYSTERESIS_W: f64 = 1000.0;
/// Discharge needs at or below this are not commanded (W)
pub const DISCHARGE_DEADBAND_W: f64 = 100.0;
/// Battery flow at or below this counts as standing still (W)
pub const BATTERY_IDLE_W: f64 = 100.0;
/// Margin kept under the limit when throttling a cloud charge (W)
pub const CHARGE_MARGIN_W: f64 = 200.0;

pub const DEFAULT_MAINTENANCE_KEYWORDS: &str =
    "battery_care, puls_orange, calibration, firmware_update, solid_red, warning_internet";

#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    Sensor(#[from] SensorError),
}

/// Static inputs of the engine
#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub soc_entity: String,
    pub load: LoadSources,
    pub battery_status_entity: Option<String>,
    /// Lower-cased keywords; a status containing any of them pauses control
    pub maintenance_keywords: Vec<String>,
}

impl GuardSettings {
    /// Split a comma separated keyword list, dropping empty entries.
    pub fn parse_keywords(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }
}

/// Side effects requested by one control cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cycle {
    pub command: Option<InverterCommand>,
    pub reports: Vec<ReportEvent>,
}

impl Cycle {
    pub fn is_empty(&self) -> bool {
        self.command.is_none() && self.reports.is_empty()
    }
}

pub struct PeakGuardEngine {
    settings: GuardSettings,
    /// A peak episode is open
    has_reported: bool,
    hold_command_sent: bool,
    capacity_exceeded_logged: bool,
    is_solar_override: bool,
    in_maintenance: bool,
    maintenance_reason: Option<String>,
    last_charge_command_w: Option<u32>,
}

impl PeakGuardEngine {
    pub fn new(settings: GuardSettings) -> Self {
        Self {
            settings,
            has_reported: false,
            hold_command_sent: false,
            capacity_exceeded_logged: false,
            is_solar_override: false,
            in_maintenance: false,
            maintenance_reason: None,
            last_charge_command_w: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.has_reported
    }

    pub fn is_solar_override(&self) -> bool {
        self.is_solar_override
    }

    pub fn in_maintenance(&self) -> bool {
        self.in_maintenance
    }

    pub fn maintenance_reason(&self) -> Option<&str> {
        self.maintenance_reason.as_deref()
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        GuardSnapshot {
            peak_active: self.has_reported,
            solar_override: self.is_solar_override,
            in_maintenance: self.in_maintenance,
            maintenance_reason: self.maintenance_reason.clone(),
        }
    }

    /// Run one control cycle.
    ///
    /// Missing mandatory data ends the cycle quietly with `Ok`. An error
    /// leaves whatever was already written to `cycle` in place; flags changed
    /// before the fault are not rolled back.
    pub fn evaluate(
        &mut self,
        sensors: &dyn SensorSource,
        strategy: &StrategySnapshot,
        virtual_load_entity: Option<&str>,
        limit_entity: &str,
        cycle: &mut Cycle,
    ) -> Result<(), GuardError> {
        if !strategy.peak_shaving_active() {
            if self.has_reported {
                self.set_peak_active(false);
            }
            return Ok(());
        }

        let reader = SampleReader::new(sensors);
        if self.check_maintenance(&reader) {
            return Ok(());
        }

        let Some(limit_w) = reader.limit_w(limit_entity)? else {
            return Ok(());
        };
        let Some(load_w) =
            LoadEstimator::new(reader, &self.settings.load).virtual_load_w(virtual_load_entity)?
        else {
            return Ok(());
        };

        let action = strategy.cloud_action();
        if self.is_quiet(load_w, limit_w, &action) {
            return Ok(());
        }

        let soc = reader.number(&self.settings.soc_entity)?.unwrap_or(0.0);
        let safe_limit_w = limit_w - CLEAR_HYSTERESIS_W;

        if !self.has_reported && load_w > limit_w && soc > MIN_SOC_PERCENT {
            info!(load_w, limit_w, soc, "PEAK DETECTED, engaging battery");
            self.set_peak_active(true);
            cycle
                .reports
                .push(ReportEvent::new(ReportKind::PeakStarted, load_w, limit_w));
        } else if self.has_reported && load_w <= safe_limit_w {
            info!(load_w, limit_w, "PEAK CLEARED, returning to strategy");
            self.set_peak_active(false);
            cycle
                .reports
                .push(ReportEvent::new(ReportKind::PeakCleared, load_w, limit_w));
        }

        if self.has_reported && soc > MIN_SOC_PERCENT {
            self.shave(load_w, limit_w, strategy, cycle);
            Ok(())
        } else {
            self.follow_strategy(&reader, load_w, limit_w, strategy, action, cycle)
        }
    }

    /// Undo the bookkeeping for a command the sink could not deliver, so the
    /// next cycle sends it again.
    pub fn command_failed(&mut self, command: InverterCommand) {
        if let InverterCommand::ForceCharge { power_w } = command {
            if command == InverterCommand::hold() {
                self.hold_command_sent = false;
            }
            if self.last_charge_command_w == Some(power_w) {
                self.last_charge_command_w = None;
            }
        }
    }

    fn set_peak_active(&mut self, active: bool) {
        if self.has_reported == active {
            return;
        }
        self.has_reported = active;
        if active {
            self.hold_command_sent = false;
            self.last_charge_command_w = None;
        } else {
            self.capacity_exceeded_logged = false;
        }
    }

    /// Returns `true` while control is paused for battery maintenance.
    fn check_maintenance(&mut self, reader: &SampleReader<'_>) -> bool {
        let Some(status_entity) = self.settings.battery_status_entity.as_deref() else {
            return false;
        };
        let Some(status) = reader.text(status_entity) else {
            return false;
        };

        let lowered = status.to_lowercase();
        if self
            .settings
            .maintenance_keywords
            .iter()
            .any(|k| lowered.contains(k.as_str()))
        {
            if !self.in_maintenance {
                info!(status = %status, "Maintenance mode detected, pausing control");
                self.in_maintenance = true;
            }
            self.maintenance_reason = Some(status);
            if self.has_reported {
                self.set_peak_active(false);
            }
            return true;
        }

        if self.in_maintenance {
            info!("Maintenance mode ended, resuming control");
            self.in_maintenance = false;
            self.maintenance_reason = None;
        }
        false
    }

    /// Far from every boundary: nothing to evaluate. A cloud charge is always
    /// evaluated so the throttle keeps tracking the load.
    fn is_quiet(&self, load_w: f64, limit_w: f64, action: &CloudAction) -> bool {
        !self.has_reported
            && !self.is_solar_override
            && *action != CloudAction::Charge
            && load_w < limit_w * WAKE_UP_RATIO
            && load_w > EXPORT_THRESHOLD_W
    }

    fn shave(&mut self, load_w: f64, limit_w: f64, strategy: &StrategySnapshot, cycle: &mut Cycle) {
        let max_inverter_w = strategy.max_discharge_w();
        let need_w = load_w - limit_w;

        if need_w > max_inverter_w && !self.capacity_exceeded_logged {
            warn!(
                need_w,
                max_inverter_w, limit_w, "PeakGuard capacity exceeded, limit cannot be held"
            );
            self.capacity_exceeded_logged = true;
            cycle
                .reports
                .push(ReportEvent::new(ReportKind::PeakFailure, load_w, limit_w));
        }

        let power_w = need_w.max(0.0).min(max_inverter_w);
        if power_w > DISCHARGE_DEADBAND_W {
            cycle.command = Some(InverterCommand::Discharge {
                power_w: power_w as u32,
            });
        }
    }

    fn follow_strategy(
        &mut self,
        reader: &SampleReader<'_>,
        load_w: f64,
        limit_w: f64,
        strategy: &StrategySnapshot,
        mut action: CloudAction,
        cycle: &mut Cycle,
    ) -> Result<(), GuardError> {
        let exporting = if self.is_solar_override {
            load_w < SOLAR_OVERRIDE_RELEASE_W
        } else {
            load_w < EXPORT_THRESHOLD_W
        };
        let solar_override = action == CloudAction::Hold && exporting;
        if solar_override {
            action = CloudAction::Idle;
        }

        if solar_override != self.is_solar_override {
            let kind = if solar_override {
                info!(load_w, "Exporting during cloud HOLD, solar override engaged");
                ReportKind::SolarOverride
            } else {
                info!(load_w, "Solar override released");
                ReportKind::SolarOverrideCleared
            };
            cycle.reports.push(ReportEvent::new(kind, load_w, limit_w));
            self.is_solar_override = solar_override;
        }

        if action != CloudAction::Hold {
            self.hold_command_sent = false;
        }
        if action != CloudAction::Charge {
            self.last_charge_command_w = None;
        }

        match action {
            CloudAction::Discharge => {}
            CloudAction::Charge => self.throttle_charge(load_w, limit_w, strategy, cycle),
            CloudAction::Hold => self.hold(reader, cycle)?,
            CloudAction::Idle => cycle.command = Some(InverterCommand::SetAutoMode),
            CloudAction::Other(raw) => debug!(action = %raw, "unknown cloud action, doing nothing"),
        }
        Ok(())
    }

    fn hold(&mut self, reader: &SampleReader<'_>, cycle: &mut Cycle) -> Result<(), GuardError> {
        let battery_w =
            reader.number_or(self.settings.load.battery_power_entity.as_deref(), 0.0)?;

        if battery_w.abs() > BATTERY_IDLE_W {
            if !self.hold_command_sent {
                debug!(battery_w, "HOLD requested but battery is active, sending stop");
                cycle.command = Some(InverterCommand::hold());
                self.hold_command_sent = true;
            }
        } else {
            if self.hold_command_sent {
                debug!("battery is idle, re-arming hold command");
            }
            self.hold_command_sent = false;
        }
        Ok(())
    }

    /// Forward the cloud's charge request, capped so charging cannot itself
    /// push the household over the limit.
    fn throttle_charge(
        &mut self,
        load_w: f64,
        limit_w: f64,
        strategy: &StrategySnapshot,
        cycle: &mut Cycle,
    ) {
        let Some(target_w) = strategy.charge_target_w() else {
            debug!("CHARGE without target power, leaving it to the cloud");
            return;
        };
        let headroom_w = limit_w - load_w - CHARGE_MARGIN_W;
        let power_w = target_w.min(headroom_w).max(0.0) as u32;

        if self.last_charge_command_w == Some(power_w) {
            return;
        }
        if f64::from(power_w) < target_w {
            info!(target_w, headroom_w, power_w, "throttling cloud charge to stay under limit");
        }
        cycle.command = Some(InverterCommand::ForceCharge { power_w });
        self.last_charge_command_w = Some(power_w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::StateStore;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    const LOAD: &str = "sensor.virtual_load";
    const LIMIT: &str = "sensor.peak_limit";
    const SOC: &str = "sensor.soc";
    const GRID: &str = "sensor.grid";
    const BATTERY: &str = "sensor.bat_power";
    const STATUS: &str = "sensor.battery_status";

    /// Store wrapper that records which entities were read
    struct Fixture {
        store: StateStore,
        reads: Mutex<Vec<String>>,
    }

    impl Fixture {
        fn new(entries: &[(&str, &str)]) -> Self {
            let store = StateStore::new();
            for (id, state) in entries {
                store.set(*id, *state);
            }
            Self {
                store,
                reads: Mutex::new(Vec::new()),
            }
        }

        fn set(&self, id: &str, state: &str) {
            self.store.set(id, state);
        }

        fn was_read(&self, id: &str) -> bool {
            self.reads.lock().iter().any(|r| r == id)
        }

        fn clear_reads(&self) {
            self.reads.lock().clear();
        }
    }

    impl SensorSource for Fixture {
        fn read(&self, entity_id: &str) -> Option<String> {
            self.reads.lock().push(entity_id.to_string());
            self.store.read(entity_id)
        }
    }

    fn settings() -> GuardSettings {
        GuardSettings {
            soc_entity: SOC.to_string(),
            load: LoadSources {
                grid_entity: Some(GRID.to_string()),
                battery_power_entity: Some(BATTERY.to_string()),
                invert_grid: false,
            },
            battery_status_entity: None,
            maintenance_keywords: GuardSettings::parse_keywords(DEFAULT_MAINTENANCE_KEYWORDS),
        }
    }

    fn strategy(action: &str) -> StrategySnapshot {
        StrategySnapshot {
            action: Some(action.to_string()),
            ..Default::default()
        }
    }

    fn run(
        engine: &mut PeakGuardEngine,
        sensors: &Fixture,
        strategy: &StrategySnapshot,
    ) -> Cycle {
        let mut cycle = Cycle::default();
        engine
            .evaluate(sensors, strategy, Some(LOAD), LIMIT, &mut cycle)
            .unwrap();
        cycle
    }

    fn kinds(cycle: &Cycle) -> Vec<ReportKind> {
        cycle.reports.iter().map(|r| r.kind).collect()
    }

    #[test]
    fn test_peak_triggers_discharge_once() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5.0"), (LOAD, "7000"), (SOC, "50")]);
        let hold = strategy("HOLD");

        let cycle = run(&mut engine, &sensors, &hold);
        assert!(engine.is_active());
        assert_eq!(cycle.command, Some(InverterCommand::Discharge { power_w: 2000 }));
        assert_eq!(
            cycle.reports,
            vec![ReportEvent::new(ReportKind::PeakStarted, 7000.0, 5000.0)]
        );

        // Edge-triggered: same inputs keep discharging without a second report
        let cycle = run(&mut engine, &sensors, &hold);
        assert_eq!(cycle.command, Some(InverterCommand::Discharge { power_w: 2000 }));
        assert!(cycle.reports.is_empty());
    }

    #[test]
    fn test_peak_needs_charge() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "7000"), (SOC, "5")]);

        let cycle = run(&mut engine, &sensors, &strategy("DISCHARGE"));
        assert!(!engine.is_active());
        assert!(cycle.is_empty());
    }

    #[test]
    fn test_peak_clears_below_safe_limit() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5.0"), (LOAD, "7000"), (SOC, "50")]);
        let idle = strategy("IDLE");
        run(&mut engine, &sensors, &idle);
        assert!(engine.is_active());

        // Inside the hysteresis band: still shaving, nothing needed
        sensors.set(LOAD, "4500");
        let cycle = run(&mut engine, &sensors, &idle);
        assert!(engine.is_active());
        assert_eq!(cycle, Cycle::default());

        sensors.set(LOAD, "3000");
        let cycle = run(&mut engine, &sensors, &idle);
        assert!(!engine.is_active());
        assert_eq!(
            cycle.reports,
            vec![ReportEvent::new(ReportKind::PeakCleared, 3000.0, 5000.0)]
        );
        assert_eq!(cycle.command, Some(InverterCommand::SetAutoMode));

        // Back in the quiet zone: no further reports
        let cycle = run(&mut engine, &sensors, &idle);
        assert!(cycle.is_empty());
    }

    #[test]
    fn test_clear_exactly_at_safe_limit() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "6000"), (SOC, "50")]);
        let discharge = strategy("DISCHARGE");
        run(&mut engine, &sensors, &discharge);

        sensors.set(LOAD, "4000");
        let cycle = run(&mut engine, &sensors, &discharge);
        assert_eq!(kinds(&cycle), vec![ReportKind::PeakCleared]);
        assert_eq!(cycle.command, None);
    }

    #[test]
    fn test_quiet_filter_skips_soc_read() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "4400"), (SOC, "50"), (BATTERY, "900")]);

        let cycle = run(&mut engine, &sensors, &strategy("HOLD"));
        assert!(cycle.is_empty());
        assert!(!sensors.was_read(SOC));
        assert!(!sensors.was_read(BATTERY));

        sensors.clear_reads();
        sensors.set(LOAD, "-150");
        let cycle = run(&mut engine, &sensors, &strategy("IDLE"));
        assert!(cycle.is_empty());
        assert!(!sensors.was_read(SOC));
    }

    #[test]
    fn test_wake_up_zone_is_evaluated() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "4600"), (SOC, "50"), (BATTERY, "900")]);

        let cycle = run(&mut engine, &sensors, &strategy("HOLD"));
        assert!(sensors.was_read(SOC));
        assert!(!engine.is_active());
        assert_eq!(cycle.command, Some(InverterCommand::hold()));
    }

    #[test]
    fn test_missing_limit_or_load_aborts_silently() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "unavailable"), (LOAD, "9000"), (SOC, "50")]);
        let cycle = run(&mut engine, &sensors, &strategy("IDLE"));
        assert!(cycle.is_empty());
        assert!(!sensors.was_read(LOAD));

        let sensors = Fixture::new(&[(LIMIT, "5.0"), (LOAD, "unknown"), (SOC, "50")]);
        let cycle = run(&mut engine, &sensors, &strategy("IDLE"));
        assert!(cycle.is_empty());
        assert!(!engine.is_active());
    }

    #[test]
    fn test_non_numeric_load_is_an_error() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5.0"), (LOAD, "n/a"), (SOC, "50")]);
        let mut cycle = Cycle::default();
        let result = engine.evaluate(&sensors, &strategy("IDLE"), Some(LOAD), LIMIT, &mut cycle);
        assert!(matches!(result, Err(GuardError::Sensor(_))));
        assert!(cycle.is_empty());
    }

    #[test]
    fn test_capacity_exceeded_reported_once_per_episode() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5.0"), (LOAD, "9000"), (SOC, "50")]);
        let hold = StrategySnapshot {
            action: Some("HOLD".to_string()),
            max_discharge_kw: Some(3.3),
            ..Default::default()
        };

        let cycle = run(&mut engine, &sensors, &hold);
        assert_eq!(
            kinds(&cycle),
            vec![ReportKind::PeakStarted, ReportKind::PeakFailure]
        );
        assert_eq!(cycle.reports[1], ReportEvent::new(ReportKind::PeakFailure, 9000.0, 5000.0));
        assert_eq!(cycle.command, Some(InverterCommand::Discharge { power_w: 3300 }));

        let cycle = run(&mut engine, &sensors, &hold);
        assert!(cycle.reports.is_empty());
        assert_eq!(cycle.command, Some(InverterCommand::Discharge { power_w: 3300 }));

        // Close the episode and open a new one
        sensors.set(LOAD, "1000");
        run(&mut engine, &sensors, &hold);
        assert!(!engine.is_active());

        sensors.set(LOAD, "9000");
        let cycle = run(&mut engine, &sensors, &hold);
        assert_eq!(
            kinds(&cycle),
            vec![ReportKind::PeakStarted, ReportKind::PeakFailure]
        );
    }

    #[test]
    fn test_default_inverter_capacity() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5.0"), (LOAD, "12000"), (SOC, "50")]);
        let cycle = run(&mut engine, &sensors, &StrategySnapshot::default());
        assert_eq!(cycle.command, Some(InverterCommand::Discharge { power_w: 3300 }));
    }

    #[test]
    fn test_small_need_is_not_commanded() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "5080"), (SOC, "50")]);
        let cycle = run(&mut engine, &sensors, &strategy("HOLD"));
        assert!(engine.is_active());
        assert_eq!(kinds(&cycle), vec![ReportKind::PeakStarted]);
        assert_eq!(cycle.command, None);
    }

    #[test]
    fn test_low_soc_during_peak_falls_back_to_strategy() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "7000"), (SOC, "50")]);
        run(&mut engine, &sensors, &strategy("IDLE"));
        assert!(engine.is_active());

        sensors.set(SOC, "4");
        let cycle = run(&mut engine, &sensors, &strategy("IDLE"));
        assert!(engine.is_active());
        assert_eq!(cycle.command, Some(InverterCommand::SetAutoMode));
    }

    #[test]
    fn test_missing_soc_counts_as_empty() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "7000")]);
        let cycle = run(&mut engine, &sensors, &strategy("IDLE"));
        assert!(!engine.is_active());
        assert_eq!(cycle.command, Some(InverterCommand::SetAutoMode));
    }

    #[test]
    fn test_shaving_disabled_suppresses_everything() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5.0"), (LOAD, "7000"), (SOC, "50")]);
        let disabled = StrategySnapshot {
            action: Some("HOLD".to_string()),
            is_peak_shaving_active: Some(false),
            ..Default::default()
        };

        let cycle = run(&mut engine, &sensors, &disabled);
        assert!(cycle.is_empty());
        assert!(!sensors.was_read(LIMIT));

        // An open episode is closed without a report
        run(&mut engine, &sensors, &strategy("HOLD"));
        assert!(engine.is_active());
        let cycle = run(&mut engine, &sensors, &disabled);
        assert!(!engine.is_active());
        assert!(cycle.is_empty());
    }

    #[test]
    fn test_solar_override_hysteresis() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "-450"), (SOC, "50")]);
        let hold = strategy("HOLD");

        let cycle = run(&mut engine, &sensors, &hold);
        assert!(engine.is_solar_override());
        assert_eq!(
            cycle.reports,
            vec![ReportEvent::new(ReportKind::SolarOverride, -450.0, 5000.0)]
        );
        assert_eq!(cycle.command, Some(InverterCommand::SetAutoMode));

        // Midpoint of the band: stays engaged, no new report
        sensors.set(LOAD, "-200");
        let cycle = run(&mut engine, &sensors, &hold);
        assert!(engine.is_solar_override());
        assert!(cycle.reports.is_empty());
        assert_eq!(cycle.command, Some(InverterCommand::SetAutoMode));

        sensors.set(LOAD, "-50");
        let cycle = run(&mut engine, &sensors, &hold);
        assert!(!engine.is_solar_override());
        assert_eq!(kinds(&cycle), vec![ReportKind::SolarOverrideCleared]);
    }

    #[test]
    fn test_solar_override_only_replaces_hold() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "-800"), (SOC, "50")]);

        let cycle = run(&mut engine, &sensors, &strategy("DISCHARGE"));
        assert!(!engine.is_solar_override());
        assert!(cycle.is_empty());

        run(&mut engine, &sensors, &strategy("HOLD"));
        assert!(engine.is_solar_override());

        // Cloud moves away from HOLD: override no longer applies
        let cycle = run(&mut engine, &sensors, &strategy("IDLE"));
        assert!(!engine.is_solar_override());
        assert_eq!(kinds(&cycle), vec![ReportKind::SolarOverrideCleared]);
        assert_eq!(cycle.command, Some(InverterCommand::SetAutoMode));
    }

    #[test]
    fn test_inverted_grid_engages_solar_override() {
        let mut engine = PeakGuardEngine::new(GuardSettings {
            load: LoadSources {
                invert_grid: true,
                ..settings().load
            },
            ..settings()
        });
        let sensors = Fixture::new(&[(LIMIT, "5.0"), (GRID, "5000"), (BATTERY, "0")]);
        let mut cycle = Cycle::default();
        engine
            .evaluate(&sensors, &strategy("HOLD"), None, LIMIT, &mut cycle)
            .unwrap();
        assert!(engine.is_solar_override());
        assert_eq!(cycle.reports[0].load_w, -5000.0);
    }

    #[test]
    fn test_hold_sends_stop_once_per_episode() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "4800"), (SOC, "50"), (BATTERY, "-1500")]);
        let hold = strategy("HOLD");

        let cycle = run(&mut engine, &sensors, &hold);
        assert_eq!(cycle.command, Some(InverterCommand::hold()));

        let cycle = run(&mut engine, &sensors, &hold);
        assert_eq!(cycle.command, None);

        // Battery settles: flag re-arms, next movement gets a new stop
        sensors.set(BATTERY, "20");
        assert_eq!(run(&mut engine, &sensors, &hold).command, None);
        sensors.set(BATTERY, "700");
        assert_eq!(
            run(&mut engine, &sensors, &hold).command,
            Some(InverterCommand::hold())
        );
    }

    #[test]
    fn test_leaving_hold_rearms_stop_command() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "4800"), (SOC, "50"), (BATTERY, "1500")]);

        assert_eq!(
            run(&mut engine, &sensors, &strategy("HOLD")).command,
            Some(InverterCommand::hold())
        );
        assert_eq!(
            run(&mut engine, &sensors, &strategy("DISCHARGE")).command,
            None
        );
        assert_eq!(
            run(&mut engine, &sensors, &strategy("HOLD")).command,
            Some(InverterCommand::hold())
        );
    }

    #[test]
    fn test_failed_dispatch_is_resent() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "4800"), (SOC, "50"), (BATTERY, "1500")]);
        let hold = strategy("HOLD");

        let cycle = run(&mut engine, &sensors, &hold);
        engine.command_failed(cycle.command.unwrap());
        assert_eq!(run(&mut engine, &sensors, &hold).command, Some(InverterCommand::hold()));
        assert_eq!(run(&mut engine, &sensors, &hold).command, None);

        sensors.set(LOAD, "4000");
        let charge = StrategySnapshot {
            action: Some("CHARGE".to_string()),
            target_power_kw: Some(3.0),
            ..Default::default()
        };
        let cycle = run(&mut engine, &sensors, &charge);
        assert_eq!(cycle.command, Some(InverterCommand::ForceCharge { power_w: 800 }));
        engine.command_failed(InverterCommand::ForceCharge { power_w: 800 });
        assert_eq!(
            run(&mut engine, &sensors, &charge).command,
            Some(InverterCommand::ForceCharge { power_w: 800 })
        );
        assert_eq!(run(&mut engine, &sensors, &charge).command, None);
    }

    #[test]
    fn test_hold_without_battery_reading() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "4800"), (SOC, "50")]);
        let cycle = run(&mut engine, &sensors, &strategy("HOLD"));
        assert_eq!(cycle.command, None);
    }

    #[test]
    fn test_unknown_action_does_nothing() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "4800"), (SOC, "50"), (BATTERY, "1500")]);
        let cycle = run(&mut engine, &sensors, &strategy("BOOST"));
        assert!(cycle.is_empty());
    }

    #[test]
    fn test_charge_is_throttled_to_headroom() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "4000"), (SOC, "50")]);
        let charge = StrategySnapshot {
            action: Some("CHARGE".to_string()),
            target_power_kw: Some(3.0),
            ..Default::default()
        };

        let cycle = run(&mut engine, &sensors, &charge);
        assert_eq!(cycle.command, Some(InverterCommand::ForceCharge { power_w: 800 }));

        // Unchanged headroom is not re-sent
        assert_eq!(run(&mut engine, &sensors, &charge).command, None);

        sensors.set(LOAD, "1000");
        assert_eq!(
            run(&mut engine, &sensors, &charge).command,
            Some(InverterCommand::ForceCharge { power_w: 3000 })
        );

        sensors.set(LOAD, "4950");
        assert_eq!(
            run(&mut engine, &sensors, &charge).command,
            Some(InverterCommand::ForceCharge { power_w: 0 })
        );
    }

    #[test]
    fn test_charge_without_target_defers_to_cloud() {
        let mut engine = PeakGuardEngine::new(settings());
        let sensors = Fixture::new(&[(LIMIT, "5000"), (LOAD, "4000"), (SOC, "50")]);
        let cycle = run(&mut engine, &sensors, &strategy("CHARGE"));
        assert!(cycle.is_empty());
    }

    #[test]
    fn test_maintenance_pauses_and_resumes() {
        let mut engine = PeakGuardEngine::new(GuardSettings {
            battery_status_entity: Some(STATUS.to_string()),
            maintenance_keywords: GuardSettings::parse_keywords("service mode, critical error"),
            ..settings()
        });
        let sensors = Fixture::new(&[
            (LIMIT, "5.0"),
            (LOAD, "7000"),
            (SOC, "50"),
            (STATUS, "System is in Service Mode"),
        ]);
        let hold = strategy("HOLD");

        let cycle = run(&mut engine, &sensors, &hold);
        assert!(engine.in_maintenance());
        assert_eq!(engine.maintenance_reason(), Some("System is in Service Mode"));
        assert!(cycle.is_empty());
        assert!(!engine.is_active());

        sensors.set(STATUS, "Normal operation");
        let cycle = run(&mut engine, &sensors, &hold);
        assert!(!engine.in_maintenance());
        assert_eq!(engine.maintenance_reason(), None);
        assert!(engine.is_active());
        assert_eq!(kinds(&cycle), vec![ReportKind::PeakStarted]);
    }

    #[test]
    fn test_maintenance_closes_open_peak_silently() {
        let mut engine = PeakGuardEngine::new(GuardSettings {
            battery_status_entity: Some(STATUS.to_string()),
            ..settings()
        });
        let sensors = Fixture::new(&[(LIMIT, "5.0"), (LOAD, "7000"), (SOC, "50"), (STATUS, "normal")]);
        run(&mut engine, &sensors, &strategy("HOLD"));
        assert!(engine.is_active());

        sensors.set(STATUS, "BATTERY_CARE");
        let cycle = run(&mut engine, &sensors, &strategy("HOLD"));
        assert!(!engine.is_active());
        assert!(engine.in_maintenance());
        assert!(cycle.is_empty());
    }

    #[test]
    fn test_unavailable_status_keeps_previous_mode() {
        let mut engine = PeakGuardEngine::new(GuardSettings {
            battery_status_entity: Some(STATUS.to_string()),
            ..settings()
        });
        let sensors = Fixture::new(&[(LIMIT, "5.0"), (LOAD, "7000"), (SOC, "50"), (STATUS, "calibration")]);
        run(&mut engine, &sensors, &strategy("HOLD"));
        assert!(engine.in_maintenance());

        sensors.set(STATUS, "unavailable");
        let cycle = run(&mut engine, &sensors, &strategy("HOLD"));
        assert!(engine.in_maintenance());
        assert!(engine.is_active());
        assert_eq!(kinds(&cycle), vec![ReportKind::PeakStarted]);
    }

    #[test]
    fn test_parse_keywords() {
        assert_eq!(
            GuardSettings::parse_keywords(" Service Mode, ,critical error,"),
            vec!["service mode".to_string(), "critical error".to_string()]
        );
        assert_eq!(GuardSettings::parse_keywords(DEFAULT_MAINTENANCE_KEYWORDS).len(), 6);
    }

    proptest! {
        #[test]
        fn prop_discharge_is_clamped(load in 0.0f64..30_000.0, limit in 1_000.0f64..20_000.0, max_kw in 0.5f64..10.0) {
            let mut engine = PeakGuardEngine::new(settings());
            let (limit_raw, load_raw) = (limit.to_string(), load.to_string());
            let sensors = Fixture::new(&[
                (LIMIT, limit_raw.as_str()),
                (LOAD, load_raw.as_str()),
                (SOC, "50"),
            ]);
            let hold = StrategySnapshot {
                action: Some("HOLD".to_string()),
                max_discharge_kw: Some(max_kw),
                ..Default::default()
            };
            let cycle = run(&mut engine, &sensors, &hold);
            if let Some(InverterCommand::Discharge { power_w }) = cycle.command {
                let expected = (load - limit).max(0.0).min(max_kw * 1000.0);
                prop_assert!(f64::from(power_w) <= max_kw * 1000.0);
                prop_assert!(f64::from(power_w) > DISCHARGE_DEADBAND_W - 1.0);
                prop_assert_eq!(power_w, expected as u32);
            } else {
                prop_assert!(load - limit <= DISCHARGE_DEADBAND_W || !engine.is_active());
            }
        }
    }
}
