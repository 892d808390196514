use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, trace};

use super::engine::{Cycle, GuardSettings, PeakGuardEngine};
use crate::cloud::StrategyCache;
use crate::domain::{CommandSink, GuardSnapshot, ReportSink};
use crate::sensors::SensorSource;

/// Async front of the [`PeakGuardEngine`].
///
/// Triggers may arrive concurrently; cycles are serialised by an async mutex
/// so a cycle always sees the flags the previous one left behind.
pub struct PeakGuardService {
    engine: Mutex<PeakGuardEngine>,
    sensors: Arc<dyn SensorSource>,
    strategy: StrategyCache,
    commands: Arc<dyn CommandSink>,
    reports: Arc<dyn ReportSink>,
    guard_tx: watch::Sender<GuardSnapshot>,
}

impl PeakGuardService {
    pub fn new(
        settings: GuardSettings,
        sensors: Arc<dyn SensorSource>,
        strategy: StrategyCache,
        commands: Arc<dyn CommandSink>,
        reports: Arc<dyn ReportSink>,
    ) -> Self {
        let (guard_tx, _) = watch::channel(GuardSnapshot::default());
        Self {
            engine: Mutex::new(PeakGuardEngine::new(settings)),
            sensors,
            strategy,
            commands,
            reports,
            guard_tx,
        }
    }

    /// Guard flags, updated after every cycle
    pub fn subscribe(&self) -> watch::Receiver<GuardSnapshot> {
        self.guard_tx.subscribe()
    }

    pub fn guard(&self) -> GuardSnapshot {
        self.guard_tx.borrow().clone()
    }

    pub fn strategy(&self) -> &StrategyCache {
        &self.strategy
    }

    /// Run one control cycle and dispatch what it asks for.
    ///
    /// Never fails: faults are logged and the cycle ends. Reports produced
    /// before a fault are still delivered.
    pub async fn update(&self, virtual_load_entity: Option<&str>, limit_entity: &str) -> Cycle {
        let mut engine = self.engine.lock().await;
        let strategy = self.strategy.snapshot_or_default();

        let mut cycle = Cycle::default();
        if let Err(e) = engine.evaluate(
            self.sensors.as_ref(),
            &strategy,
            virtual_load_entity,
            limit_entity,
            &mut cycle,
        ) {
            error!(error = %e, "PeakGuard cycle failed");
        }
        self.guard_tx.send_replace(engine.snapshot());

        if let Some(command) = cycle.command {
            if let Err(e) = self.commands.send(command).await {
                error!(error = %e, %command, "inverter command failed, retrying next cycle");
                engine.command_failed(command);
            }
        }
        for event in &cycle.reports {
            if let Err(e) = self.reports.report(*event).await {
                error!(kind = %event.kind, error = %e, "report failed");
            }
        }

        if cycle.is_empty() {
            trace!("PeakGuard cycle: nothing to do");
        }
        cycle
    }
}
