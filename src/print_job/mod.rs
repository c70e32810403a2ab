// src/print_job/mod.rs
//! The long-running print job and its mutual-exclusion gate.
//!
//! At most one job exists per process. [`JobTracker`] owns it behind a mutex
//! so `{state, progress, target}` are always read together. A job moves
//! strictly forward through `Idle → Download → Configure → Executing →
//! Sending → Idle`, or drops straight back to `Idle` when it fails or is
//! released. Progress is a fixed function of the state.

pub mod completion;
pub mod request;
pub mod runner;

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::protocol::Envelope;
use crate::slicer::ConfigFiles;

pub use completion::JobCompletion;
pub use request::{JobRequest, JobSources, StartPrint};
pub use runner::JobRunner;

/// Job id used when the orchestrator does not supply one.
pub const DEFAULT_JOB_ID: &str = "ptgo_default";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("job gate held by {owner}")]
    Busy { owner: String },
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },
    #[error("no job in progress")]
    NotRunning,
    #[error("job ticket {0} is stale")]
    Stale(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Download,
    Configure,
    Executing,
    Sending,
}

impl JobState {
    /// Fixed progress percentage for each state.
    pub fn progress(self) -> u8 {
        match self {
            JobState::Idle => 0,
            JobState::Download => 10,
            JobState::Configure => 30,
            JobState::Executing => 45,
            JobState::Sending => 90,
        }
    }

    /// The only legal forward successor.
    pub fn next(self) -> JobState {
        match self {
            JobState::Idle => JobState::Download,
            JobState::Download => JobState::Configure,
            JobState::Configure => JobState::Executing,
            JobState::Executing => JobState::Sending,
            JobState::Sending => JobState::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Download => "download",
            JobState::Configure => "configure",
            JobState::Executing => "executing",
            JobState::Sending => "sending",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase-local flags carried by `start_print_bbl`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobOptions {
    pub use_ams: bool,
    pub bed_leveling: bool,
    pub bed_type: Option<String>,
}

/// Identifies one admitted job so late signals from an earlier job are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobTicket(pub u64);

#[derive(Debug, Clone)]
pub struct PrintJob {
    pub state: JobState,
    pub job_id: String,
    pub target_id: Option<String>,
    pub command: String,
    pub working_file: Option<PathBuf>,
    pub auxiliary_files: ConfigFiles,
    pub blocked: bool,
    pub options: JobOptions,
    ticket: u64,
}

impl Default for PrintJob {
    fn default() -> Self {
        Self {
            state: JobState::Idle,
            job_id: DEFAULT_JOB_ID.to_string(),
            target_id: None,
            command: String::new(),
            working_file: None,
            auxiliary_files: ConfigFiles::new(),
            blocked: false,
            options: JobOptions::default(),
            ticket: 0,
        }
    }
}

impl PrintJob {
    pub fn progress(&self) -> u8 {
        self.state.progress()
    }

    fn reset(&mut self) {
        let ticket = self.ticket;
        *self = PrintJob { ticket, ..PrintJob::default() };
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            state: self.state,
            progress: self.progress(),
            printer_id: self.target_id.clone().unwrap_or_default(),
            blocked: self.blocked,
            local_file: self.working_file.as_ref().map(|p| p.display().to_string()),
            ticket: JobTicket(self.ticket),
            command: self.command.clone(),
        }
    }

    fn check_ticket(&self, ticket: JobTicket) -> Result<(), JobError> {
        if !self.blocked {
            return Err(JobError::NotRunning);
        }
        if ticket.0 != self.ticket {
            return Err(JobError::Stale(ticket.0));
        }
        Ok(())
    }
}

/// A consistent copy of the job, as reported in progress events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub state: JobState,
    pub progress: u8,
    pub printer_id: String,
    pub blocked: bool,
    pub local_file: Option<String>,
    #[serde(skip)]
    pub ticket: JobTicket,
    #[serde(skip)]
    pub command: String,
}

impl JobSnapshot {
    /// Progress event for the orchestrator.
    pub fn envelope(&self) -> Envelope {
        let data = serde_json::json!({
            "job_id": self.job_id,
            "state": self.state,
            "progress": self.progress,
            "printer_id": self.printer_id,
            "blocked": self.blocked,
            "local_file": self.local_file,
        });
        Envelope::status(self.printer_id.clone(), self.command.clone(), data)
    }
}

/// Outcome of asking to start a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The gate was free and is now held for this target.
    Started(JobSnapshot),
    /// The gate is already held by a job for the same target.
    Continuation(JobSnapshot),
}

/// Shared handle to the process-wide job.
#[derive(Debug, Clone, Default)]
pub struct JobTracker {
    inner: Arc<Mutex<PrintJob>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> JobSnapshot {
        self.inner.lock().await.snapshot()
    }

    /// Full copy of the job, including file paths.
    pub async fn current(&self) -> PrintJob {
        self.inner.lock().await.clone()
    }

    pub async fn is_blocked(&self) -> bool {
        self.inner.lock().await.blocked
    }

    /// True while a job for `target` holds the gate.
    pub async fn is_owned_by(&self, target: &str) -> bool {
        let job = self.inner.lock().await;
        job.blocked && job.target_id.as_deref() == Some(target)
    }

    /// Fails with `Busy` when the gate is held for a different target.
    pub async fn ensure_available(&self, target: &str) -> Result<(), JobError> {
        let job = self.inner.lock().await;
        match (&job.target_id, job.blocked) {
            (Some(owner), true) if owner != target => Err(JobError::Busy { owner: owner.clone() }),
            (None, true) => Err(JobError::Busy { owner: String::new() }),
            _ => Ok(()),
        }
    }

    /// Acquire the gate for `target` and enter `Download`, or report that the
    /// same target already holds it.
    pub async fn admit(
        &self,
        target: &str,
        command: &str,
        job_id: Option<&str>,
        options: JobOptions,
    ) -> Result<Admission, JobError> {
        let mut job = self.inner.lock().await;
        if job.blocked {
            return match job.target_id.as_deref() {
                Some(owner) if owner == target => Ok(Admission::Continuation(job.snapshot())),
                owner => Err(JobError::Busy { owner: owner.unwrap_or_default().to_string() }),
            };
        }
        job.reset();
        job.ticket += 1;
        job.blocked = true;
        job.target_id = Some(target.to_string());
        job.command = command.to_string();
        job.job_id = job_id.filter(|id| !id.is_empty()).unwrap_or(DEFAULT_JOB_ID).to_string();
        job.options = options;
        job.state = JobState::Download;
        tracing::info!("Job {} admitted for printer {}", job.job_id, target);
        Ok(Admission::Started(job.snapshot()))
    }

    /// Move to `to`, which must be the current state or its successor.
    /// Returning to `Idle` goes through [`finish`](Self::finish) or
    /// [`release`](Self::release) instead.
    pub async fn advance(&self, ticket: JobTicket, to: JobState) -> Result<JobSnapshot, JobError> {
        let mut job = self.inner.lock().await;
        job.check_ticket(ticket)?;
        let from = job.state;
        if to == from {
            return Ok(job.snapshot());
        }
        if to == JobState::Idle || from.next() != to {
            return Err(JobError::InvalidTransition { from, to });
        }
        job.state = to;
        tracing::info!("Job {} {} -> {} ({}%)", job.job_id, from, to, to.progress());
        Ok(job.snapshot())
    }

    pub async fn set_working_file(&self, ticket: JobTicket, path: PathBuf) -> Result<(), JobError> {
        let mut job = self.inner.lock().await;
        job.check_ticket(ticket)?;
        job.working_file = Some(path);
        Ok(())
    }

    pub async fn set_auxiliary_files(&self, ticket: JobTicket, files: ConfigFiles) -> Result<(), JobError> {
        let mut job = self.inner.lock().await;
        job.check_ticket(ticket)?;
        job.auxiliary_files = files;
        Ok(())
    }

    /// `Sending → Idle`: the job completed. Returns the job as it was just
    /// before the reset.
    pub async fn finish(&self, ticket: JobTicket) -> Result<JobSnapshot, JobError> {
        let mut job = self.inner.lock().await;
        job.check_ticket(ticket)?;
        if job.state != JobState::Sending {
            return Err(JobError::InvalidTransition { from: job.state, to: JobState::Idle });
        }
        let done = job.snapshot();
        job.reset();
        tracing::info!("Job {} complete, gate released", done.job_id);
        Ok(done)
    }

    /// Abort the job identified by `ticket` and release the gate. Returns the
    /// job as it was when it failed.
    pub async fn fail(&self, ticket: JobTicket) -> Result<JobSnapshot, JobError> {
        let mut job = self.inner.lock().await;
        job.check_ticket(ticket)?;
        let failed = job.snapshot();
        job.reset();
        tracing::warn!("Job {} failed during {}, gate released", failed.job_id, failed.state);
        Ok(failed)
    }

    /// Unconditionally reset to `Idle` and release the gate.
    pub async fn release(&self) -> JobSnapshot {
        let mut job = self.inner.lock().await;
        let previous = job.snapshot();
        job.reset();
        if previous.blocked {
            tracing::info!("Job {} released from {}", previous.job_id, previous.state);
        }
        previous
    }
}
