// src/hardware/simulated.rs - In-process device bank for standalone runs and tests
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Axis, Device, DeviceActivity, DeviceDirectory, DeviceError, DeviceStatus, HomedAxes};
use crate::config::PrinterEntry;

/// Recorded commands and moves kept per printer; older entries are dropped.
pub const HISTORY_LIMIT: usize = 256;

/// A recorded axis movement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisMove {
    pub axis: Axis,
    pub distance: f64,
    pub feed_rate: u32,
}

#[derive(Debug)]
struct SimState {
    activity: DeviceActivity,
    nozzle_temp: f64,
    nozzle_target: f64,
    bed_temp: f64,
    bed_target: f64,
    homed: [bool; 3],
    position: [f64; 4],
    print_progress: u8,
    faulted: bool,
    moves: VecDeque<AxisMove>,
    commands: VecDeque<String>,
}

fn record<T>(history: &mut VecDeque<T>, entry: T) {
    if history.len() == HISTORY_LIMIT {
        history.pop_front();
    }
    history.push_back(entry);
}

/// A printer simulated in memory. Heaters report whatever reading was last
/// injected; motion updates the position and is recorded.
#[derive(Debug)]
pub struct SimulatedPrinter {
    id: String,
    name: String,
    model: String,
    bed_temp_limit: i64,
    state: Mutex<SimState>,
}

impl SimulatedPrinter {
    pub fn new(entry: &PrinterEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone().unwrap_or_else(|| entry.id.clone()),
            model: entry.model.clone(),
            bed_temp_limit: entry.bed_temp_limit,
            state: Mutex::new(SimState {
                activity: DeviceActivity::Idle,
                nozzle_temp: entry.nozzle_temp,
                nozzle_target: 0.0,
                bed_temp: 25.0,
                bed_target: 0.0,
                homed: [false; 3],
                position: [0.0; 4],
                print_progress: 0,
                faulted: false,
                moves: VecDeque::new(),
                commands: VecDeque::new(),
            }),
        }
    }

    /// Shorthand for a printer with default settings.
    pub fn with_id(id: &str) -> Self {
        Self::new(&PrinterEntry {
            id: id.to_string(),
            name: None,
            model: "simulated".to_string(),
            bed_temp_limit: 110,
            nozzle_temp: 25.0,
        })
    }

    pub async fn set_activity(&self, activity: DeviceActivity) {
        self.state.lock().await.activity = activity;
    }

    pub async fn set_nozzle_reading(&self, celsius: f64) {
        self.state.lock().await.nozzle_temp = celsius;
    }

    pub async fn set_homed(&self, homed: bool) {
        self.state.lock().await.homed = [homed; 3];
    }

    /// Make every subsequent command fail.
    pub async fn set_faulted(&self, faulted: bool) {
        self.state.lock().await.faulted = faulted;
    }

    /// The most recent moves, oldest first.
    pub async fn moves(&self) -> Vec<AxisMove> {
        self.state.lock().await.moves.iter().copied().collect()
    }

    /// The most recent state-changing commands, oldest first.
    pub async fn commands(&self) -> Vec<String> {
        self.state.lock().await.commands.iter().cloned().collect()
    }

    pub async fn bed_target(&self) -> f64 {
        self.state.lock().await.bed_target
    }

    pub async fn nozzle_target(&self) -> f64 {
        self.state.lock().await.nozzle_target
    }

    async fn issue<F>(&self, command: String, apply: F) -> Result<(), DeviceError>
    where
        F: FnOnce(&mut SimState),
    {
        let mut state = self.state.lock().await;
        if state.activity == DeviceActivity::Offline {
            return Err(DeviceError::NotConnected);
        }
        record(&mut state.commands, command.clone());
        if state.faulted {
            return Err(DeviceError::Rejected(command));
        }
        apply(&mut state);
        tracing::debug!(printer = %self.id, "simulated command: {}", command);
        Ok(())
    }
}

#[async_trait]
impl Device for SimulatedPrinter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn status(&self) -> DeviceStatus {
        let state = self.state.lock().await;
        DeviceStatus {
            printer_id: self.id.clone(),
            name: self.name.clone(),
            model: self.model.clone(),
            state: state.activity,
            nozzle_temp: state.nozzle_temp,
            nozzle_target: state.nozzle_target,
            bed_temp: state.bed_temp,
            bed_target: state.bed_target,
            bed_temp_limit: self.bed_temp_limit,
            position: state.position,
            homed: HomedAxes { x: state.homed[0], y: state.homed[1], z: state.homed[2] },
            print_progress: state.print_progress,
        }
    }

    async fn can_pause(&self) -> bool {
        self.state.lock().await.activity == DeviceActivity::Printing
    }

    async fn can_resume(&self) -> bool {
        self.state.lock().await.activity == DeviceActivity::Paused
    }

    async fn can_abort(&self) -> bool {
        matches!(self.state.lock().await.activity, DeviceActivity::Printing | DeviceActivity::Paused)
    }

    async fn can_accept_control(&self) -> bool {
        self.state.lock().await.activity == DeviceActivity::Idle
    }

    async fn pause(&self) -> Result<(), DeviceError> {
        self.issue("pause".to_string(), |s| s.activity = DeviceActivity::Paused).await
    }

    async fn resume(&self) -> Result<(), DeviceError> {
        self.issue("resume".to_string(), |s| s.activity = DeviceActivity::Printing).await
    }

    async fn abort(&self) -> Result<(), DeviceError> {
        self.issue("abort".to_string(), |s| {
            s.activity = DeviceActivity::Idle;
            s.print_progress = 0;
        })
        .await
    }

    async fn set_nozzle_temperature(&self, celsius: i64) -> Result<(), DeviceError> {
        self.issue(format!("set_nozzle {celsius}"), |s| s.nozzle_target = celsius as f64).await
    }

    async fn set_bed_temperature(&self, celsius: i64) -> Result<(), DeviceError> {
        self.issue(format!("set_bed {celsius}"), |s| s.bed_target = celsius as f64).await
    }

    async fn bed_temperature_limit(&self) -> i64 {
        self.bed_temp_limit
    }

    async fn nozzle_temperature(&self) -> f64 {
        self.state.lock().await.nozzle_temp
    }

    async fn is_axis_homed(&self, axis: Axis) -> bool {
        match axis {
            Axis::E => true,
            linear => self.state.lock().await.homed[linear.index()],
        }
    }

    async fn move_axis(&self, axis: Axis, distance: f64, feed_rate: u32) -> Result<(), DeviceError> {
        self.issue(format!("move {axis} {distance} F{feed_rate}"), |s| {
            s.position[axis.index()] += distance;
            record(&mut s.moves, AxisMove { axis, distance, feed_rate });
        })
        .await
    }

    async fn home(&self) -> Result<(), DeviceError> {
        self.issue("home".to_string(), |s| {
            s.homed = [true; 3];
            s.position[..3].fill(0.0);
        })
        .await
    }
}

/// A fixed list of devices plus the currently selected one.
pub struct InMemoryDirectory {
    devices: Vec<Arc<dyn Device>>,
    selected: Mutex<Option<String>>,
}

impl InMemoryDirectory {
    pub fn new(devices: Vec<Arc<dyn Device>>) -> Self {
        Self { devices, selected: Mutex::new(None) }
    }

    /// Build a simulated printer for each configured entry.
    pub fn from_entries(entries: &[PrinterEntry]) -> Self {
        let devices = entries
            .iter()
            .map(|entry| Arc::new(SimulatedPrinter::new(entry)) as Arc<dyn Device>)
            .collect();
        Self::new(devices)
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDirectory {
    async fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.devices.clone()
    }

    async fn find(&self, id: &str) -> Option<Arc<dyn Device>> {
        self.devices.iter().find(|d| d.id() == id).cloned()
    }

    async fn select(&self, id: &str) -> bool {
        if self.devices.iter().any(|d| d.id() == id) {
            *self.selected.lock().await = Some(id.to_string());
            true
        } else {
            false
        }
    }

    async fn selected(&self) -> Option<String> {
        self.selected.lock().await.clone()
    }
}
