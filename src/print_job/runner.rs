// src/print_job/runner.rs - The multi-phase job pipeline, run off the read loop
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use super::completion::remove_job_dir;
use super::{JobCompletion, JobRequest, JobSources, JobState, JobTicket, JobTracker, StartPrint};
use crate::config::JobConfig;
use crate::error::CommandError;
use crate::file_manager::Downloader;
use crate::protocol::Envelope;
use crate::slicer::{ConfigFiles, ImportedPresets, ModelFormat, PresetKind, PresetStore, SliceJob, Slicer};
use crate::web::SessionSlot;

/// Depth of the request queue. The gate admits one job at a time, so this
/// only absorbs a burst of stale requests.
const QUEUE_DEPTH: usize = 8;

/// Drives admitted jobs through `Download → Configure → Executing`. The
/// compute collaborator takes it from there via [`JobCompletion`].
pub struct JobRunner {
    jobs: JobTracker,
    downloader: Arc<dyn Downloader>,
    presets: Arc<dyn PresetStore>,
    slicer: Arc<dyn Slicer>,
    sessions: SessionSlot,
    config: JobConfig,
}

impl JobRunner {
    pub fn new(
        jobs: JobTracker,
        downloader: Arc<dyn Downloader>,
        presets: Arc<dyn PresetStore>,
        slicer: Arc<dyn Slicer>,
        sessions: SessionSlot,
        config: JobConfig,
    ) -> Self {
        Self { jobs, downloader, presets, slicer, sessions, config }
    }

    /// Start the worker task and return the handle the router sends to.
    pub fn spawn(self) -> mpsc::Sender<JobRequest> {
        let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                match request {
                    JobRequest::Start { request, ticket } => self.run(request, ticket).await,
                }
            }
            tracing::debug!("Job worker stopped");
        });
        tx
    }

    /// Run one job. Any failure releases the gate and is reported to the
    /// active session.
    pub async fn run(&self, request: StartPrint, ticket: JobTicket) {
        let job_dir = self.config.work_dir.join(Uuid::new_v4().to_string());
        let Err(err) = self.pipeline(&request, ticket, &job_dir).await else {
            return;
        };
        remove_job_dir(&job_dir).await;
        match self.jobs.fail(ticket).await {
            Ok(failed) => {
                tracing::warn!("Job {} for {} failed: {}", failed.job_id, request.target_id, err);
                let local_command = format!("start_print_bbl:{}", failed.state);
                let envelope = Envelope::error(request.target_id.clone(), &local_command, request.command.clone(), &err);
                self.sessions.publish(&envelope).await;
            }
            Err(e) => tracing::debug!("Job for {} already released ({}): {}", request.target_id, e, err),
        }
    }

    async fn pipeline(&self, request: &StartPrint, ticket: JobTicket, job_dir: &Path) -> Result<(), CommandError> {
        let snapshot = self.jobs.advance(ticket, JobState::Download).await?;
        self.sessions.publish(&snapshot.envelope()).await;

        let (model, configs) = timeout(self.config.download_timeout(), self.download_all(&request.sources, job_dir))
            .await
            .unwrap_or_else(|_| Err(CommandError::DownloadFailed("download timed out".to_string())))?;

        self.jobs.set_working_file(ticket, model.clone()).await?;
        self.jobs.set_auxiliary_files(ticket, configs.clone()).await?;
        let snapshot = self.jobs.advance(ticket, JobState::Configure).await?;
        self.sessions.publish(&snapshot.envelope()).await;

        let imported = timeout(self.config.configure_timeout(), self.configure(&configs))
            .await
            .map_err(|_| CommandError::ExecutionFailed("configuration timed out".to_string()))??;

        let snapshot = self.jobs.advance(ticket, JobState::Executing).await?;
        self.sessions.publish(&snapshot.envelope()).await;

        let job = SliceJob {
            job_id: snapshot.job_id.clone(),
            printer_id: request.target_id.clone(),
            format: ModelFormat::from_path(&model),
            model,
            configs,
            options: request.options.clone(),
        };
        let completion = JobCompletion::new(self.jobs.clone(), self.sessions.clone(), ticket, job_dir.to_path_buf());
        timeout(self.config.execute_timeout(), self.execute(job, &imported, completion))
            .await
            .map_err(|_| CommandError::ExecutionFailed("timed out starting the print".to_string()))?
    }

    /// Fetch the model and the three configuration files, in that order.
    async fn download_all(&self, sources: &JobSources, job_dir: &Path) -> Result<(PathBuf, ConfigFiles), CommandError> {
        let model = self
            .downloader
            .fetch(&sources.model, &job_dir.join("model"))
            .await
            .map_err(|e| {
                tracing::warn!("Model download from {} failed: {}", sources.model, e);
                CommandError::DownloadFailed("model download failed".to_string())
            })?;

        let mut configs = ConfigFiles::new();
        for (kind, url) in [
            (PresetKind::Printer, &sources.printer_conf),
            (PresetKind::Filament, &sources.filament_conf),
            (PresetKind::Print, &sources.print_conf),
        ] {
            let path = self.downloader.fetch(url, &job_dir.join(kind.as_str())).await.map_err(|e| {
                tracing::warn!("{} config download from {} failed: {}", kind, url, e);
                CommandError::DownloadFailed("config download failed".to_string())
            })?;
            configs.insert(kind, path);
        }
        Ok((model, configs))
    }

    async fn configure(&self, configs: &ConfigFiles) -> Result<ImportedPresets, CommandError> {
        let imported = self.presets.import(configs).await.map_err(|e| {
            tracing::warn!("Preset import failed: {}", e);
            CommandError::ExecutionFailed("failed to import configurations".to_string())
        })?;
        self.presets.apply(&imported).await.map_err(|e| {
            tracing::warn!("Preset apply failed: {}", e);
            CommandError::ExecutionFailed("failed to apply configurations".to_string())
        })?;
        Ok(imported)
    }

    async fn execute(&self, job: SliceJob, imported: &ImportedPresets, completion: JobCompletion) -> Result<(), CommandError> {
        let load_failed = || CommandError::ExecutionFailed("an error occurred loading the model and config".to_string());

        self.slicer.load(&job.model, job.format).await.map_err(|e| {
            tracing::warn!("Loading {} failed: {}", job.model.display(), e);
            load_failed()
        })?;
        // A project may carry its own settings; put ours back on top.
        if job.format == ModelFormat::Project {
            self.presets.apply(imported).await.map_err(|e| {
                tracing::warn!("Re-applying presets failed: {}", e);
                load_failed()
            })?;
        }

        let job_id = job.job_id.clone();
        self.slicer.start(job, completion).await.map_err(|e| {
            tracing::warn!("Starting job {} failed: {}", job_id, e);
            CommandError::ExecutionFailed("cannot start print".to_string())
        })?;
        tracing::info!("Job {} executing", job_id);
        Ok(())
    }
}
