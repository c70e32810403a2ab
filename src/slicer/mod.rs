// src/slicer/mod.rs
//! Preset and compute collaborators used by the multi-phase job.
//!
//! [`PresetStore`] imports and applies the printer/filament/print bundles a
//! job downloads. [`Slicer`] loads the model and starts execution; it reports
//! completion later through the [`JobCompletion`](crate::print_job::JobCompletion)
//! handle it is given.

pub mod presets;
pub mod process;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::print_job::{JobCompletion, JobOptions};

pub use presets::DirectoryPresetStore;
pub use process::ProcessSlicer;

/// Role of a configuration file within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetKind {
    Printer,
    Filament,
    Print,
}

impl PresetKind {
    pub const ALL: [PresetKind; 3] = [PresetKind::Printer, PresetKind::Filament, PresetKind::Print];

    pub fn as_str(self) -> &'static str {
        match self {
            PresetKind::Printer => "printer",
            PresetKind::Filament => "filament",
            PresetKind::Print => "print",
        }
    }
}

impl fmt::Display for PresetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresetKind {
    type Err = PresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "printer" => Ok(PresetKind::Printer),
            "filament" => Ok(PresetKind::Filament),
            "print" => Ok(PresetKind::Print),
            other => Err(PresetError::UnknownKind(other.to_string())),
        }
    }
}

/// Downloaded configuration files by role.
pub type ConfigFiles = BTreeMap<PresetKind, PathBuf>;

/// Preset names registered by an import, by role.
pub type ImportedPresets = BTreeMap<PresetKind, String>;

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("unknown preset type '{0}'")]
    UnknownKind(String),
    #[error("preset IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("preset is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing {0} preset")]
    Missing(PresetKind),
}

#[async_trait]
pub trait PresetStore: Send + Sync {
    /// Look up a named preset bundle. `Ok(None)` when it does not exist.
    async fn find(&self, kind: PresetKind, name: &str) -> Result<Option<Value>, PresetError>;
    /// Register downloaded files as presets.
    async fn import(&self, files: &ConfigFiles) -> Result<ImportedPresets, PresetError>;
    /// Make the given presets the active selection.
    async fn apply(&self, presets: &ImportedPresets) -> Result<(), PresetError>;
}

/// How a model file is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// A bundled project that may carry its own configuration.
    Project,
    /// A plain mesh; the active configuration is kept.
    Model,
}

impl ModelFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("3mf") => ModelFormat::Project,
            _ => ModelFormat::Model,
        }
    }
}

/// Everything the compute collaborator needs to execute a job.
#[derive(Debug, Clone)]
pub struct SliceJob {
    pub job_id: String,
    pub printer_id: String,
    pub model: PathBuf,
    pub format: ModelFormat,
    pub configs: ConfigFiles,
    pub options: JobOptions,
}

#[derive(Debug, Error)]
pub enum SlicerError {
    #[error("no slicer program configured")]
    NotConfigured,
    #[error("failed to load {path}: {reason}")]
    Load { path: String, reason: String },
    #[error("failed to start slicer: {0}")]
    Spawn(#[from] std::io::Error),
}

#[async_trait]
pub trait Slicer: Send + Sync {
    async fn load(&self, model: &Path, format: ModelFormat) -> Result<(), SlicerError>;
    /// Start execution. Returns once started; completion is signalled through `completion`.
    async fn start(&self, job: SliceJob, completion: JobCompletion) -> Result<(), SlicerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_format_from_extension() {
        assert_eq!(ModelFormat::from_path(Path::new("a/b/cube.3MF")), ModelFormat::Project);
        assert_eq!(ModelFormat::from_path(Path::new("cube.3mf")), ModelFormat::Project);
        assert_eq!(ModelFormat::from_path(Path::new("cube.stl")), ModelFormat::Model);
        assert_eq!(ModelFormat::from_path(Path::new("cube")), ModelFormat::Model);
    }

    #[test]
    fn test_preset_kind_parse() {
        assert_eq!("filament".parse::<PresetKind>().unwrap(), PresetKind::Filament);
        assert!("process".parse::<PresetKind>().is_err());
    }
}
