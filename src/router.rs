// src/router.rs - Validates decoded commands and dispatches them
//! Command dispatch.
//!
//! Every frame that decodes as a command produces exactly one envelope,
//! except an accepted `start_print_bbl`, whose outcome arrives later as job
//! progress events. No handler fault escapes [`Router::handle_frame`].

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::ControlConfig;
use crate::error::{CommandError, EXTRUDE_MIN_TEMP};
use crate::hardware::{Axis, Device, DeviceDirectory, DeviceError};
use crate::print_job::{Admission, JobRequest, JobTracker, StartPrint};
use crate::protocol::{Action, Command, CommandType, Envelope, ParseError};
use crate::slicer::{PresetKind, PresetStore};
use crate::web::SessionSlot;

pub struct Router {
    devices: Arc<dyn DeviceDirectory>,
    presets: Arc<dyn PresetStore>,
    jobs: JobTracker,
    job_tx: mpsc::Sender<JobRequest>,
    sessions: SessionSlot,
    config: ControlConfig,
}

/// Result of a handler: an envelope to send back, or nothing when the reply
/// is delivered asynchronously.
type Reply = Result<Option<Envelope>, CommandError>;

impl Router {
    pub fn new(
        devices: Arc<dyn DeviceDirectory>,
        presets: Arc<dyn PresetStore>,
        jobs: JobTracker,
        job_tx: mpsc::Sender<JobRequest>,
        sessions: SessionSlot,
        config: ControlConfig,
    ) -> Self {
        Self { devices, presets, jobs, job_tx, sessions, config }
    }

    /// Decode and handle one text frame. Frames outside the control scheme
    /// are dropped without a reply.
    pub async fn handle_frame(&self, raw: &str, authorized: bool) -> Option<Envelope> {
        match Command::decode(raw) {
            Ok(cmd) => self.dispatch(&cmd, authorized).await,
            Err(ParseError::NotACommand) => {
                tracing::debug!("Ignoring non-command frame ({} bytes)", raw.len());
                None
            }
            Err(e) => {
                let err = CommandError::MalformedCommand(e.to_string());
                tracing::warn!("Malformed command '{}': {}", raw.trim(), err);
                Some(Envelope::error("", "", raw.trim(), &err))
            }
        }
    }

    /// Handle a decoded command.
    pub async fn dispatch(&self, cmd: &Command, authorized: bool) -> Option<Envelope> {
        let Some(action) = Action::resolve(&cmd.command_type, &cmd.action) else {
            tracing::warn!("Unknown command {}/{}", cmd.command_type, cmd.action);
            return Some(self.error(cmd, "", &CommandError::UnknownCommand));
        };
        if self.config.require_authorization && !authorized && !action.is_read_only() {
            return Some(self.error(cmd, cmd.target_id().unwrap_or_default(), &CommandError::Unauthorized));
        }

        let handler = async {
            match action.command_type() {
                CommandType::Status => self.handle_status(action, cmd).await,
                _ => self.handle_targeted(action, cmd).await,
            }
        };
        // Bounds every collaborator call the handler makes, lookups and
        // capability checks included.
        let result = tokio::time::timeout(self.command_timeout(), handler)
            .await
            .unwrap_or_else(|_| Err(CommandError::ExecutionFailed(format!("{} timed out", cmd.action))));
        match result {
            Ok(reply) => reply,
            Err(err) => {
                let printer_id = match action {
                    Action::GetMachineList | Action::GetConfig => self.config.account_name.as_str(),
                    _ => cmd.target_id().unwrap_or_default(),
                };
                Some(self.error(cmd, printer_id, &err))
            }
        }
    }

    fn error(&self, cmd: &Command, printer_id: &str, err: &CommandError) -> Envelope {
        tracing::warn!("{} for {} failed: {}", cmd.action, printer_id, err);
        Envelope::error(printer_id, &cmd.action, cmd.original.clone(), err)
    }

    fn success(&self, cmd: &Command, printer_id: &str, detail: impl Into<String>) -> Reply {
        Ok(Some(Envelope::success(printer_id, &cmd.action, cmd.original.clone(), detail)))
    }

    async fn handle_status(&self, action: Action, cmd: &Command) -> Reply {
        match action {
            Action::GetMachineList => {
                let mut machines = Vec::new();
                for device in self.devices.devices().await {
                    machines.push(device.status().await);
                }
                let data = json!({
                    "machines": machines,
                    "selected": self.devices.selected().await,
                    "job": self.jobs.snapshot().await,
                });
                Ok(Some(Envelope::response(self.config.account_name.clone(), cmd.original.clone(), data)))
            }
            Action::GetConfig => {
                let kind: PresetKind = cmd
                    .param("config_type")
                    .unwrap_or_default()
                    .parse()
                    .map_err(|_| CommandError::ConfigNotFound)?;
                let name = cmd.param("config_name").unwrap_or_default();
                let config = self.presets.find(kind, name).await.map_err(|e| {
                    tracing::warn!("Preset lookup {}/{} failed: {}", kind, name, e);
                    CommandError::ConfigNotFound
                })?;
                match config {
                    Some(config) => Ok(Some(Envelope::response(
                        self.config.account_name.clone(),
                        cmd.original.clone(),
                        config,
                    ))),
                    None => Err(CommandError::ConfigNotFound),
                }
            }
            Action::SwitchActive => {
                if self.jobs.is_blocked().await {
                    return Err(CommandError::Busy("unable, UI blocked".to_string()));
                }
                let target = cmd.target_id().ok_or(CommandError::MissingTarget)?;
                if !self.devices.select(target).await {
                    return Err(CommandError::TargetNotFound(target.to_string()));
                }
                self.success(cmd, target, format!("connecting to {target}"))
            }
            _ => Err(CommandError::UnknownCommand),
        }
    }

    async fn handle_targeted(&self, action: Action, cmd: &Command) -> Reply {
        let target = cmd.target_id().ok_or(CommandError::MissingTarget)?;
        let device = self
            .devices
            .find(target)
            .await
            .ok_or_else(|| CommandError::TargetNotFound(target.to_string()))?;
        self.devices.select(target).await;

        match action {
            Action::PausePrint => {
                if !device.can_pause().await {
                    return Err(CommandError::PreconditionFailed("cannot pause printer".to_string()));
                }
                self.device_call("pause_print", device.pause()).await?;
                self.success(cmd, target, "")
            }
            Action::ResumePrint => {
                if !device.can_resume().await {
                    return Err(CommandError::PreconditionFailed("cannot resume printer".to_string()));
                }
                self.device_call("resume_print", device.resume()).await?;
                self.success(cmd, target, "")
            }
            Action::StopPrint => {
                if !device.can_abort().await {
                    return Err(CommandError::PreconditionFailed("cannot abort printer".to_string()));
                }
                self.device_call("stop_print", device.abort()).await?;
                self.success(cmd, target, "")
            }
            Action::GetStatus => {
                let mut data = json!(device.status().await);
                if self.jobs.is_owned_by(target).await {
                    data["job"] = json!(self.jobs.snapshot().await);
                }
                Ok(Some(Envelope::status(target, cmd.original.clone(), data)))
            }
            Action::StartPrintBbl => self.start_print(cmd, target, device.as_ref()).await,
            Action::SetHotend | Action::SetBed => {
                self.ensure_controllable(target, device.as_ref(), "cannot control temperature; printer busy")
                    .await?;
                let temperature = cmd
                    .param("temperature")
                    .ok_or_else(|| CommandError::MissingParameter("no temperature specified".to_string()))?
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| CommandError::InvalidParameter("invalid temperature value".to_string()))?;
                if action == Action::SetHotend {
                    self.device_call("set_hotend", device.set_nozzle_temperature(temperature)).await?;
                    self.success(cmd, target, temperature.to_string())
                } else {
                    let limit = device.bed_temperature_limit().await;
                    let temperature = if temperature >= limit { limit } else { temperature };
                    self.device_call("set_bed", device.set_bed_temperature(temperature)).await?;
                    self.success(cmd, target, temperature.to_string())
                }
            }
            Action::Jog => {
                self.ensure_controllable(target, device.as_ref(), "cannot control movement; printer busy")
                    .await?;
                self.jog(cmd, device.as_ref()).await?;
                self.success(cmd, target, "")
            }
            Action::Home => {
                self.ensure_controllable(target, device.as_ref(), "cannot control movement; printer busy")
                    .await?;
                self.device_call("home", device.home()).await?;
                self.success(cmd, target, "")
            }
            Action::Extrude => {
                self.ensure_controllable(target, device.as_ref(), "cannot control movement; printer busy")
                    .await?;
                let amount = cmd
                    .param("amount")
                    .ok_or_else(|| CommandError::MissingParameter("no extrude amount specified".to_string()))?
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| CommandError::InvalidParameter("invalid extrude amount value".to_string()))?;
                if device.nozzle_temperature().await < EXTRUDE_MIN_TEMP {
                    return Err(CommandError::UnsafeTemperature);
                }
                self.device_call(
                    "extrude",
                    device.move_axis(Axis::E, amount as f64, self.config.extrude_feed_rate),
                )
                .await?;
                self.success(cmd, target, amount.to_string())
            }
            Action::GetMachineList | Action::GetConfig | Action::SwitchActive => Err(CommandError::UnknownCommand),
        }
    }

    /// Manual control is allowed when the device is free, or when the job
    /// in flight belongs to it.
    async fn ensure_controllable(&self, target: &str, device: &dyn Device, busy: &str) -> Result<(), CommandError> {
        if device.can_accept_control().await || self.jobs.is_owned_by(target).await {
            Ok(())
        } else {
            Err(CommandError::PreconditionFailed(busy.to_string()))
        }
    }

    /// Every axis is validated before the first move is issued.
    async fn jog(&self, cmd: &Command, device: &dyn Device) -> Result<(), CommandError> {
        let requested: Vec<(&str, &str)> = cmd.prefixed_params("axes").collect();
        if requested.is_empty() {
            return Err(CommandError::MissingParameter("no axes specified".to_string()));
        }
        for axis in Axis::LINEAR {
            if !device.is_axis_homed(axis).await {
                return Err(CommandError::PreconditionFailed("must home axes before moving".to_string()));
            }
        }

        let mut moves = Vec::with_capacity(requested.len());
        for (name, value) in requested {
            let axis = Axis::parse_linear(name).ok_or_else(|| {
                CommandError::InvalidParameter(format!("invalid axis name: {}", name.to_ascii_uppercase()))
            })?;
            let distance = value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite())
                .ok_or_else(|| CommandError::InvalidParameter(format!("invalid value for axis {axis}")))?;
            moves.push((axis, distance));
        }

        for (axis, distance) in moves {
            self.device_call("jog", device.move_axis(axis, distance, self.config.jog_feed_rate))
                .await?;
        }
        Ok(())
    }

    async fn start_print(&self, cmd: &Command, target: &str, device: &dyn Device) -> Reply {
        if !self.jobs.is_owned_by(target).await && !device.can_accept_control().await {
            return Err(CommandError::PreconditionFailed("cannot start print".to_string()));
        }
        self.jobs.ensure_available(target).await?;
        let request = StartPrint::from_command(cmd, target)?;

        let admission = self
            .jobs
            .admit(target, &cmd.original, request.job_id.as_deref(), request.options.clone())
            .await?;
        match admission {
            Admission::Started(snapshot) => {
                let ticket = snapshot.ticket;
                // Never awaits, so a handler timeout cannot strand an admitted job.
                if let Err(e) = self.job_tx.try_send(JobRequest::Start { request, ticket }) {
                    tracing::error!("Job worker unavailable: {}", e);
                    self.jobs.release().await;
                    return Err(CommandError::ExecutionFailed("job worker unavailable".to_string()));
                }
            }
            Admission::Continuation(snapshot) => {
                tracing::info!("Job {} for {} already in {}", snapshot.job_id, target, snapshot.state);
                self.sessions.publish(&snapshot.envelope()).await;
            }
        }
        Ok(None)
    }

    /// Run one device call, mapping any fault to `ExecutionFailed`.
    async fn device_call<F>(&self, what: &str, call: F) -> Result<(), CommandError>
    where
        F: Future<Output = Result<(), DeviceError>>,
    {
        call.await.map_err(|e| {
            tracing::warn!("{} failed: {}", what, e);
            CommandError::ExecutionFailed(format!("an error occurred issuing {what}"))
        })
    }

    fn command_timeout(&self) -> Duration {
        self.config.command_timeout()
    }
}
