//! Messages from the command router to the job worker.

use super::{JobOptions, JobTicket};
use crate::error::CommandError;
use crate::protocol::Command;

/// The four files a job downloads before configuring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSources {
    pub model: String,
    pub printer_conf: String,
    pub filament_conf: String,
    pub print_conf: String,
}

/// A validated `start_print_bbl` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPrint {
    pub target_id: String,
    /// Raw command, echoed on every event the job produces.
    pub command: String,
    pub job_id: Option<String>,
    pub sources: JobSources,
    pub options: JobOptions,
}

impl StartPrint {
    /// Check that every required source is present before anything is fetched.
    pub fn from_command(cmd: &Command, target_id: &str) -> Result<Self, CommandError> {
        let model = cmd
            .non_empty_param("model")
            .ok_or_else(|| CommandError::MissingParameter("no url specified".to_string()))?;
        let (Some(printer_conf), Some(filament_conf), Some(print_conf)) = (
            cmd.non_empty_param("printer_conf"),
            cmd.non_empty_param("filament_conf"),
            cmd.non_empty_param("print_conf"),
        ) else {
            return Err(CommandError::MissingParameter(
                "must specify printer, filament, and print configurations".to_string(),
            ));
        };

        Ok(Self {
            target_id: target_id.to_string(),
            command: cmd.original.clone(),
            job_id: cmd.non_empty_param("printago_job").map(str::to_string),
            sources: JobSources {
                model: model.to_string(),
                printer_conf: printer_conf.to_string(),
                filament_conf: filament_conf.to_string(),
                print_conf: print_conf.to_string(),
            },
            options: JobOptions {
                use_ams: flag(cmd.param("use_ams")),
                bed_leveling: flag(cmd.param("bed_leveling")),
                bed_type: cmd.non_empty_param("bed_type").map(str::to_string),
            },
        })
    }
}

fn flag(value: Option<&str>) -> bool {
    matches!(value, Some(v) if v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Work handed to the job worker.
#[derive(Debug)]
pub enum JobRequest {
    /// Run the pipeline for a job that has just been admitted.
    Start { request: StartPrint, ticket: JobTicket },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> Command {
        Command::decode(raw).unwrap()
    }

    #[test]
    fn test_requires_model_url() {
        let cmd = decode("printago://h/printer_control/start_print_bbl?printer_id=p&printer_conf=a&filament_conf=b&print_conf=c");
        let err = StartPrint::from_command(&cmd, "p").unwrap_err();
        assert_eq!(err, CommandError::MissingParameter("no url specified".to_string()));
    }

    #[test]
    fn test_requires_all_configs() {
        let cmd = decode("printago://h/printer_control/start_print_bbl?printer_id=p&model=m&printer_conf=a&print_conf=c");
        let err = StartPrint::from_command(&cmd, "p").unwrap_err();
        assert_eq!(err.kind(), "MissingParameter");
        assert_eq!(err.to_string(), "must specify printer, filament, and print configurations");
    }

    #[test]
    fn test_decodes_sources_and_flags() {
        let cmd = decode(
            "printago://h/printer_control/start_print_bbl?printer_id=p&model=http%3A%2F%2Fx%2Fcube.3mf\
             &printer_conf=a&filament_conf=b&print_conf=c&printago_job=j9&use_ams=true&bed_type=textured",
        );
        let start = StartPrint::from_command(&cmd, "p").unwrap();
        assert_eq!(start.sources.model, "http://x/cube.3mf");
        assert_eq!(start.job_id.as_deref(), Some("j9"));
        assert!(start.options.use_ams);
        assert!(!start.options.bed_leveling);
        assert_eq!(start.options.bed_type.as_deref(), Some("textured"));
    }
}
