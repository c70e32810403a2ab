// src/error.rs - Command error taxonomy shared by the router and the job worker
use thiserror::Error;

use crate::print_job::JobError;

/// Minimum nozzle temperature (°C) before extrusion moves are allowed.
pub const EXTRUDE_MIN_TEMP: f64 = 170.0;

/// Every failure a command can end in. Each one becomes exactly one
/// `error` envelope; the `Display` text is the envelope's `error_detail`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("invalid printago command: {0}")]
    MalformedCommand(String),
    #[error("invalid printago command")]
    UnknownCommand,
    #[error("no printer_id specified")]
    MissingTarget,
    #[error("no printer found with ID: {0}")]
    TargetNotFound(String),
    #[error("{0}")]
    MissingParameter(String),
    #[error("{0}")]
    InvalidParameter(String),
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("nozzle temperature too low to extrude (min: {:.1})", EXTRUDE_MIN_TEMP)]
    UnsafeTemperature,
    #[error("{0}")]
    ExecutionFailed(String),
    #[error("{0}")]
    DownloadFailed(String),
    #[error("config not found; valid types are: print, printer, or filament")]
    ConfigNotFound,
    #[error("{0}")]
    Busy(String),
    #[error("session is not authorized for this command")]
    Unauthorized,
}

impl CommandError {
    /// Stable machine-readable name, reported as `error_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::MalformedCommand(_) => "MalformedCommand",
            CommandError::UnknownCommand => "UnknownCommand",
            CommandError::MissingTarget => "MissingTarget",
            CommandError::TargetNotFound(_) => "TargetNotFound",
            CommandError::MissingParameter(_) => "MissingParameter",
            CommandError::InvalidParameter(_) => "InvalidParameter",
            CommandError::PreconditionFailed(_) => "PreconditionFailed",
            CommandError::UnsafeTemperature => "UnsafeTemperature",
            CommandError::ExecutionFailed(_) => "ExecutionFailed",
            CommandError::DownloadFailed(_) => "DownloadFailed",
            CommandError::ConfigNotFound => "ConfigNotFound",
            CommandError::Busy(_) => "Busy",
            CommandError::Unauthorized => "Unauthorized",
        }
    }
}

impl From<JobError> for CommandError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Busy { .. } => CommandError::Busy("busy with current job - check status".to_string()),
            other => CommandError::ExecutionFailed(other.to_string()),
        }
    }
}
