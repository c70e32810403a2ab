// src/protocol/grammar.rs - The {command_type -> actions} table clients rely on
use super::command::Command;

/// Accepted command types and their actions. Anything else is rejected.
pub const GRAMMAR: &[(&str, &[&str])] = &[
    ("status", &["get_machine_list", "get_config", "switch_active"]),
    (
        "printer_control",
        &["pause_print", "resume_print", "stop_print", "get_status", "start_print_bbl"],
    ),
    ("temperature_control", &["set_hotend", "set_bed"]),
    ("movement_control", &["jog", "home", "extrude"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    Status,
    PrinterControl,
    TemperatureControl,
    MovementControl,
}

/// A validated `(command_type, action)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    GetMachineList,
    GetConfig,
    SwitchActive,
    PausePrint,
    ResumePrint,
    StopPrint,
    GetStatus,
    StartPrintBbl,
    SetHotend,
    SetBed,
    Jog,
    Home,
    Extrude,
}

impl Action {
    /// Look the pair up in [`GRAMMAR`].
    pub fn resolve(command_type: &str, action: &str) -> Option<Self> {
        let allowed = GRAMMAR
            .iter()
            .find(|(ty, _)| *ty == command_type)
            .is_some_and(|(_, actions)| actions.contains(&action));
        if !allowed {
            return None;
        }
        Some(match action {
            "get_machine_list" => Action::GetMachineList,
            "get_config" => Action::GetConfig,
            "switch_active" => Action::SwitchActive,
            "pause_print" => Action::PausePrint,
            "resume_print" => Action::ResumePrint,
            "stop_print" => Action::StopPrint,
            "get_status" => Action::GetStatus,
            "start_print_bbl" => Action::StartPrintBbl,
            "set_hotend" => Action::SetHotend,
            "set_bed" => Action::SetBed,
            "jog" => Action::Jog,
            "home" => Action::Home,
            "extrude" => Action::Extrude,
            _ => return None,
        })
    }

    pub fn command_type(self) -> CommandType {
        match self {
            Action::GetMachineList | Action::GetConfig | Action::SwitchActive => CommandType::Status,
            Action::PausePrint
            | Action::ResumePrint
            | Action::StopPrint
            | Action::GetStatus
            | Action::StartPrintBbl => CommandType::PrinterControl,
            Action::SetHotend | Action::SetBed => CommandType::TemperatureControl,
            Action::Jog | Action::Home | Action::Extrude => CommandType::MovementControl,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::GetMachineList => "get_machine_list",
            Action::GetConfig => "get_config",
            Action::SwitchActive => "switch_active",
            Action::PausePrint => "pause_print",
            Action::ResumePrint => "resume_print",
            Action::StopPrint => "stop_print",
            Action::GetStatus => "get_status",
            Action::StartPrintBbl => "start_print_bbl",
            Action::SetHotend => "set_hotend",
            Action::SetBed => "set_bed",
            Action::Jog => "jog",
            Action::Home => "home",
            Action::Extrude => "extrude",
        }
    }

    /// Actions that only read state.
    pub fn is_read_only(self) -> bool {
        matches!(self, Action::GetMachineList | Action::GetConfig | Action::GetStatus)
    }
}

/// True when the command's type and action are jointly present in the grammar.
pub fn validate(cmd: &Command) -> bool {
    Action::resolve(&cmd.command_type, &cmd.action).is_some()
}
