// src/print_job/completion.rs - Late completion signals from the compute collaborator
use std::path::{Path, PathBuf};

use super::{JobError, JobState, JobTicket, JobTracker};
use crate::error::CommandError;
use crate::protocol::Envelope;
use crate::web::SessionSlot;

/// Handed to the slicer when execution starts. Signals for a job that has
/// since been released are ignored. The job's download directory is removed
/// once the job ends either way.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    jobs: JobTracker,
    sessions: SessionSlot,
    ticket: JobTicket,
    job_dir: PathBuf,
}

impl JobCompletion {
    pub fn new(jobs: JobTracker, sessions: SessionSlot, ticket: JobTicket, job_dir: PathBuf) -> Self {
        Self { jobs, sessions, ticket, job_dir }
    }

    pub fn ticket(&self) -> JobTicket {
        self.ticket
    }

    /// `Executing → Sending`.
    pub async fn sending(&self) -> Result<(), JobError> {
        let snapshot = self.jobs.advance(self.ticket, JobState::Sending).await?;
        self.sessions.publish(&snapshot.envelope()).await;
        Ok(())
    }

    /// `Sending → Idle`, releasing the gate.
    pub async fn finished(&self) -> Result<(), JobError> {
        let done = self.jobs.finish(self.ticket).await?;
        remove_job_dir(&self.job_dir).await;
        let envelope = Envelope::success(
            done.printer_id.clone(),
            "start_print_bbl",
            done.command.clone(),
            format!("job {} sent", done.job_id),
        );
        self.sessions.publish(&envelope).await;
        Ok(())
    }

    /// Release the gate and report `detail` as the job's failure.
    pub async fn failed(&self, detail: String) {
        match self.jobs.fail(self.ticket).await {
            Ok(failed) => {
                remove_job_dir(&self.job_dir).await;
                let local_command = format!("start_print_bbl:{}", failed.state);
                let envelope = Envelope::error(
                    failed.printer_id,
                    &local_command,
                    failed.command,
                    &CommandError::ExecutionFailed(detail),
                );
                self.sessions.publish(&envelope).await;
            }
            Err(e) => tracing::debug!("Ignoring failure for ticket {:?}: {}", self.ticket, e),
        }
    }
}

/// Remove a job's download directory. A directory that is already gone is
/// not an error.
pub(crate) async fn remove_job_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::debug!("Removed job directory {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove job directory {}: {}", dir.display(), e),
    }
}
