// src/slicer/process.rs - Slicer collaborator backed by an external program
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::{ModelFormat, PresetKind, SliceJob, Slicer, SlicerError};
use crate::config::SlicerConfig;
use crate::print_job::JobCompletion;

/// Runs the configured slicer program once per job. The job moves to
/// `Sending` when the program exits successfully and is released either way.
/// A run that outlives `timeout` is killed and fails the job.
#[derive(Debug)]
pub struct ProcessSlicer {
    program: Option<String>,
    args: Vec<String>,
    output_dir: PathBuf,
    timeout: Duration,
    loaded: Mutex<Option<(PathBuf, ModelFormat)>>,
}

impl ProcessSlicer {
    pub fn new(config: &SlicerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            output_dir: config.output_dir.clone(),
            timeout: config.timeout(),
            loaded: Mutex::new(None),
        }
    }

    /// Substitute `{model}`, `{printer}`, `{filament}`, `{print}` and `{output}`.
    pub fn render_args(&self, job: &SliceJob, output: &Path) -> Vec<String> {
        let config = |kind: PresetKind| {
            job.configs
                .get(&kind)
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{model}", &job.model.display().to_string())
                    .replace("{printer}", &config(PresetKind::Printer))
                    .replace("{filament}", &config(PresetKind::Filament))
                    .replace("{print}", &config(PresetKind::Print))
                    .replace("{output}", &output.display().to_string())
            })
            .collect()
    }
}

#[async_trait]
impl Slicer for ProcessSlicer {
    async fn load(&self, model: &Path, format: ModelFormat) -> Result<(), SlicerError> {
        let metadata = tokio::fs::metadata(model).await.map_err(|e| SlicerError::Load {
            path: model.display().to_string(),
            reason: e.to_string(),
        })?;
        if !metadata.is_file() {
            return Err(SlicerError::Load {
                path: model.display().to_string(),
                reason: "not a file".to_string(),
            });
        }
        tracing::info!("Loaded {:?} {}", format, model.display());
        *self.loaded.lock().await = Some((model.to_path_buf(), format));
        Ok(())
    }

    async fn start(&self, job: SliceJob, completion: JobCompletion) -> Result<(), SlicerError> {
        let program = self.program.as_deref().ok_or(SlicerError::NotConfigured)?;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output = self.output_dir.join(format!("{}.gcode.3mf", job.job_id));
        let args = self.render_args(&job, &output);

        tracing::info!("Starting slicer for job {}: {} {:?}", job.job_id, program, args);
        let mut child = Command::new(program).args(&args).kill_on_drop(true).spawn()?;
        let limit = self.timeout;

        tokio::spawn(async move {
            let Ok(exit) = tokio::time::timeout(limit, child.wait()).await else {
                tracing::warn!("Slicer for job {} still running after {:?}, killing it", job.job_id, limit);
                if let Err(e) = child.kill().await {
                    tracing::error!("Failed to kill slicer for job {}: {}", job.job_id, e);
                }
                completion.failed("slicer timed out".to_string()).await;
                return;
            };
            match exit {
                Ok(status) if status.success() => {
                    tracing::info!("Slicer finished job {} -> {}", job.job_id, output.display());
                    if let Err(e) = completion.sending().await {
                        tracing::warn!("Job {} could not enter sending: {}", job.job_id, e);
                        return;
                    }
                    if let Err(e) = completion.finished().await {
                        tracing::warn!("Job {} could not finish: {}", job.job_id, e);
                    }
                }
                Ok(status) => completion.failed(format!("slicer exited with {status}")).await,
                Err(e) => completion.failed(format!("slicer did not run: {e}")).await,
            }
        });
        Ok(())
    }
}
