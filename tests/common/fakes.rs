//! Scripted stand-ins for the zone automation and alert rule services.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use greenhouse_core::devices::{CommandPayload, DeviceCommand};
use greenhouse_core::error::{GreenhouseError, GreenhouseResult};
use greenhouse_core::jobs::{AlertProcessor, IncomingAlert};
use greenhouse_core::scheduler::{
    ConditionCheck, ExecutionMode, PlannedCommand, SchedulerTaskStatus, ZoneAutomation,
};

pub fn node_for_zone(zone_id: i64) -> String {
    format!("nd-zone-{zone_id}")
}

#[derive(Debug, Clone)]
struct ZoneScript {
    condition: ConditionCheck,
    mode: ExecutionMode,
    confirms: bool,
    sensor_offline: bool,
}

impl Default for ZoneScript {
    fn default() -> Self {
        Self {
            condition: ConditionCheck::Unmet,
            mode: ExecutionMode::Synchronous,
            confirms: true,
            sensor_offline: false,
        }
    }
}

/// Zone automation answering from per-zone scripts.
///
/// Unscripted zones report `Unmet`, plan a synchronous pump run and confirm it.
#[derive(Debug, Default)]
pub struct ScriptedAutomation {
    zones: Mutex<HashMap<i64, ZoneScript>>,
    checks: AtomicU32,
}

impl ScriptedAutomation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_condition(&self, zone_id: i64, condition: ConditionCheck) {
        self.zones.lock().entry(zone_id).or_default().condition = condition;
    }

    pub fn set_mode(&self, zone_id: i64, mode: ExecutionMode) {
        self.zones.lock().entry(zone_id).or_default().mode = mode;
    }

    pub fn set_confirms(&self, zone_id: i64, confirms: bool) {
        self.zones.lock().entry(zone_id).or_default().confirms = confirms;
    }

    pub fn take_sensor_offline(&self, zone_id: i64) {
        self.zones.lock().entry(zone_id).or_default().sensor_offline = true;
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }

    fn script(&self, zone_id: i64) -> ZoneScript {
        self.zones.lock().get(&zone_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ZoneAutomation for ScriptedAutomation {
    async fn check_condition(&self, task: &SchedulerTaskStatus) -> GreenhouseResult<ConditionCheck> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let script = self.script(task.zone_id);
        if script.sensor_offline {
            return Err(GreenhouseError::transport(
                format!("zone-{}-sensors", task.zone_id),
                "sensor bridge unreachable",
            ));
        }
        Ok(script.condition)
    }

    async fn plan_command(&self, task: &SchedulerTaskStatus) -> GreenhouseResult<PlannedCommand> {
        let seconds = task
            .payload
            .get("seconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(30);
        Ok(PlannedCommand {
            command: DeviceCommand::new(
                node_for_zone(task.zone_id),
                "pump",
                CommandPayload::RunFor { seconds },
            ),
            mode: self.script(task.zone_id).mode,
        })
    }

    async fn confirm_command(
        &self,
        task: &SchedulerTaskStatus,
        _command: &DeviceCommand,
    ) -> GreenhouseResult<bool> {
        Ok(self.script(task.zone_id).confirms)
    }
}

/// Alert rule processor that counts calls, can fail a number of times, and can be slow
#[derive(Debug, Default)]
pub struct RecordingAlertProcessor {
    calls: AtomicU32,
    failures_left: AtomicU32,
    latency: Mutex<Option<Duration>>,
    processed: Mutex<Vec<String>>,
}

impl RecordingAlertProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, times: u32) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> Vec<String> {
        self.processed.lock().clone()
    }
}

#[async_trait]
impl AlertProcessor for RecordingAlertProcessor {
    async fn process(&self, alert: &IncomingAlert) -> GreenhouseResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GreenhouseError::transport("alert-rules", "rule engine unavailable"));
        }
        self.processed.lock().push(alert.dedupe_key.clone());
        Ok(())
    }
}
