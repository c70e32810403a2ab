// src/hardware/mod.rs
//! Device collaborator interfaces.
//!
//! The control server never talks to printers directly. It resolves a device
//! through a [`DeviceDirectory`] and drives it through the [`Device`] trait,
//! consulting capability predicates before every gated action.

pub mod simulated;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use simulated::{AxisMove, InMemoryDirectory, SimulatedPrinter};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    #[error("device is not connected")]
    NotConnected,
    #[error("device rejected command: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Axis {
    X,
    Y,
    Z,
    E,
}

impl Axis {
    pub const LINEAR: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Parse a jog axis name. Only X, Y and Z are accepted, in any case.
    pub fn parse_linear(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "X" => Some(Axis::X),
            "Y" => Some(Axis::Y),
            "Z" => Some(Axis::Z),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::E => 3,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
            Axis::E => "E",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceActivity {
    Idle,
    Printing,
    Paused,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HomedAxes {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

/// Snapshot of a device, reported by `get_status` and `get_machine_list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub printer_id: String,
    pub name: String,
    pub model: String,
    pub state: DeviceActivity,
    pub nozzle_temp: f64,
    pub nozzle_target: f64,
    pub bed_temp: f64,
    pub bed_target: f64,
    pub bed_temp_limit: i64,
    pub position: [f64; 4],
    pub homed: HomedAxes,
    pub print_progress: u8,
}

/// A controllable device.
#[async_trait]
pub trait Device: Send + Sync {
    fn id(&self) -> &str;

    async fn status(&self) -> DeviceStatus;

    async fn can_pause(&self) -> bool;
    async fn can_resume(&self) -> bool;
    async fn can_abort(&self) -> bool;
    /// True when the device is free to accept manual control actions and new prints.
    async fn can_accept_control(&self) -> bool;

    async fn pause(&self) -> Result<(), DeviceError>;
    async fn resume(&self) -> Result<(), DeviceError>;
    async fn abort(&self) -> Result<(), DeviceError>;

    async fn set_nozzle_temperature(&self, celsius: i64) -> Result<(), DeviceError>;
    async fn set_bed_temperature(&self, celsius: i64) -> Result<(), DeviceError>;
    async fn bed_temperature_limit(&self) -> i64;
    /// Live nozzle reading.
    async fn nozzle_temperature(&self) -> f64;

    async fn is_axis_homed(&self, axis: Axis) -> bool;
    async fn move_axis(&self, axis: Axis, distance: f64, feed_rate: u32) -> Result<(), DeviceError>;
    async fn home(&self) -> Result<(), DeviceError>;
}

/// The set of devices known to this host.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn devices(&self) -> Vec<Arc<dyn Device>>;
    async fn find(&self, id: &str) -> Option<Arc<dyn Device>>;
    /// Make `id` the device monitored for status. Returns false if unknown.
    async fn select(&self, id: &str) -> bool;
    async fn selected(&self) -> Option<String>;
}
