//! # Bridge Configuration
//!
//! All settings come from a single TOML file. Every section is optional and
//! falls back to the defaults below.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 33647
//!
//! [control]
//! account_name = "farm@example.com"
//! require_authorization = true
//!
//! [job]
//! work_dir = "/var/lib/printago"
//! download_timeout_secs = 300
//! # file:// sources are refused unless this is set
//! local_source_dir = "/srv/printago/models"
//!
//! [slicer]
//! program = "orca-slicer"
//! args = ["--slice", "0", "--load-settings", "{printer};{print}", "--load-filaments", "{filament}", "--export-3mf", "{output}", "{model}"]
//! timeout_secs = 1800
//!
//! [[printers]]
//! id = "01P00A123456789"
//! name = "X1C bay 3"
//! model = "X1 Carbon"
//! bed_temp_limit = 110
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the control server and its collaborators.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub presets: PresetConfig,
    #[serde(default)]
    pub slicer: SlicerConfig,
    #[serde(default)]
    pub printers: Vec<PrinterEntry>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening endpoint and accept-loop settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Length of one reconnect backoff unit.
    #[serde(default = "default_reconnect_unit_ms")]
    pub reconnect_unit_ms: u64,
    /// Authorize sessions from non-loopback peers.
    #[serde(default = "default_true")]
    pub allow_remote_control: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            reconnect_unit_ms: default_reconnect_unit_ms(),
            allow_remote_control: true,
        }
    }
}

impl ServerConfig {
    pub fn reconnect_unit(&self) -> Duration {
        Duration::from_millis(self.reconnect_unit_ms)
    }
}

/// Command handling settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Reported as `printer_id` on directory and config responses.
    #[serde(default = "default_account_name")]
    pub account_name: String,
    #[serde(default)]
    pub require_authorization: bool,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_jog_feed_rate")]
    pub jog_feed_rate: u32,
    #[serde(default = "default_extrude_feed_rate")]
    pub extrude_feed_rate: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            account_name: default_account_name(),
            require_authorization: false,
            command_timeout_secs: default_command_timeout_secs(),
            jog_feed_rate: default_jog_feed_rate(),
            extrude_feed_rate: default_extrude_feed_rate(),
        }
    }
}

impl ControlConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Multi-phase job settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobConfig {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_configure_timeout_secs")]
    pub configure_timeout_secs: u64,
    #[serde(default = "default_execute_timeout_secs")]
    pub execute_timeout_secs: u64,
    /// Only directory `file://` job sources may be read from.
    #[serde(default)]
    pub local_source_dir: Option<PathBuf>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            download_timeout_secs: default_download_timeout_secs(),
            configure_timeout_secs: default_configure_timeout_secs(),
            execute_timeout_secs: default_execute_timeout_secs(),
            local_source_dir: None,
        }
    }
}

impl JobConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn configure_timeout(&self) -> Duration {
        Duration::from_secs(self.configure_timeout_secs)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PresetConfig {
    #[serde(default = "default_preset_dir")]
    pub dir: PathBuf,
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self { dir: default_preset_dir() }
    }
}

/// External slicer invocation. `args` may contain `{model}`, `{printer}`,
/// `{filament}`, `{print}` and `{output}` placeholders.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlicerConfig {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// A slicer run still going after this long is killed and the job failed.
    #[serde(default = "default_slice_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            output_dir: default_output_dir(),
            timeout_secs: default_slice_timeout_secs(),
        }
    }
}

impl SlicerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A device served by the built-in simulator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_bed_temp_limit")]
    pub bed_temp_limit: i64,
    #[serde(default = "default_nozzle_temp")]
    pub nozzle_temp: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> Result<tracing::Level, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }
}

impl Config {
    /// Reject settings that would make the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_address.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "bind_address '{}' is not an IP address",
                self.server.bind_address
            )));
        }
        if self.server.reconnect_unit_ms == 0 {
            return Err(ConfigError::Invalid("reconnect_unit_ms must be > 0".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for printer in &self.printers {
            if printer.id.is_empty() {
                return Err(ConfigError::Invalid("printer id must not be empty".to_string()));
            }
            if !seen.insert(printer.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate printer id '{}'", printer.id)));
            }
        }
        if self.slicer.timeout_secs == 0 {
            return Err(ConfigError::Invalid("slicer timeout_secs must be > 0".to_string()));
        }
        self.logging.max_level()?;
        Ok(())
    }
}

// Default value functions
fn default_bind_address() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 33647 }
fn default_reconnect_unit_ms() -> u64 { 1000 }
fn default_true() -> bool { true }
fn default_account_name() -> String { "nouser@bab".to_string() }
fn default_command_timeout_secs() -> u64 { 10 }
fn default_jog_feed_rate() -> u32 { 3000 }
fn default_extrude_feed_rate() -> u32 { 900 }
fn default_work_dir() -> PathBuf { PathBuf::from("printago") }
fn default_download_timeout_secs() -> u64 { 120 }
fn default_configure_timeout_secs() -> u64 { 30 }
fn default_execute_timeout_secs() -> u64 { 120 }
fn default_preset_dir() -> PathBuf { PathBuf::from("presets") }
fn default_output_dir() -> PathBuf { PathBuf::from("printago/output") }
fn default_slice_timeout_secs() -> u64 { 1800 }
fn default_model() -> String { "unknown".to_string() }
fn default_bed_temp_limit() -> i64 { 110 }
fn default_nozzle_temp() -> f64 { 25.0 }
fn default_log_level() -> String { "info".to_string() }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path.display(), e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}
