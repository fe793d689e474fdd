use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// A provisioning job: a named batch of devices that will be bootstrapped
/// together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub customer: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    #[serde(default)]
    pub customer: Option<String>,
}

/// A target switch within a job. `port` is the controller-side console port
/// (1-16) the device is cabled to; `vendor` selects the adapter used to talk
/// to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub job_id: i64,
    pub port: Option<u8>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub hostname: String,
    pub mgmt_ip: String,
    pub mask: String,
    pub gateway: String,
    pub mgmt_vlan: Option<u16>,
    pub status: String,
}

impl Device {
    /// Parameters fed into vendor command rendering and verification.
    pub fn bootstrap_params(&self) -> BootstrapParams {
        BootstrapParams {
            hostname: self.hostname.clone(),
            mgmt_ip: self.mgmt_ip.clone(),
            mgmt_mask: self.mask.clone(),
            gateway: self.gateway.clone(),
            mgmt_vlan: self.mgmt_vlan,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDevice {
    #[serde(default)]
    pub port: Option<u8>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub hostname: String,
    pub mgmt_ip: String,
    pub mask: String,
    pub gateway: String,
    #[serde(default)]
    pub mgmt_vlan: Option<u16>,
    #[serde(default = "default_device_status")]
    pub status: String,
}

fn default_device_status() -> String {
    "pending".to_string()
}

/// Partial update for a device; unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceUpdate {
    #[serde(default)]
    pub port: Option<u8>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub mgmt_ip: Option<String>,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub mgmt_vlan: Option<u16>,
    #[serde(default)]
    pub status: Option<String>,
}

/// One execution of a job's devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub job_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The per-device record within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDevice {
    pub run_id: i64,
    pub device_id: i64,
    pub status: RunDeviceStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub template_hash: Option<String>,
    pub tasks: Vec<VerifyTask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunDeviceStatus {
    Pending,
    Running,
    Verified,
    Failed,
}

impl RunDeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunDeviceStatus::Pending => "PENDING",
            RunDeviceStatus::Running => "RUNNING",
            RunDeviceStatus::Verified => "VERIFIED",
            RunDeviceStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunDeviceStatus::Verified | RunDeviceStatus::Failed)
    }
}

impl FromStr for RunDeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RunDeviceStatus::Pending),
            "RUNNING" => Ok(RunDeviceStatus::Running),
            "VERIFIED" => Ok(RunDeviceStatus::Verified),
            "FAILED" => Ok(RunDeviceStatus::Failed),
            _ => Err(format!("Unknown run device status: {}", s)),
        }
    }
}

impl Display for RunDeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only execution event. `raw` carries verbatim transport bytes when a
/// transcript is worth keeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    pub id: i64,
    pub run_id: i64,
    pub device_id: Option<i64>,
    pub port: Option<u8>,
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub raw: Option<String>,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewEvent {
    pub run_id: i64,
    pub device_id: Option<i64>,
    pub port: Option<u8>,
    pub level: LogLevel,
    pub message: String,
    pub raw: Option<String>,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Closed set of user-visible failure codes attached to run devices and
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SerialTimeout,
    PromptNotFound,
    CommandError,
    VerifyFailed,
    TemplateError,
    ValidationError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SerialTimeout => "SERIAL_TIMEOUT",
            ErrorCode::PromptNotFound => "PROMPT_NOT_FOUND",
            ErrorCode::CommandError => "COMMAND_ERROR",
            ErrorCode::VerifyFailed => "VERIFY_FAILED",
            ErrorCode::TemplateError => "TEMPLATE_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named group of CLI commands that executes atomically from the operator's
/// perspective. A failure inside a critical block terminates the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandBlock {
    pub name: String,
    pub commands: Vec<String>,
    pub critical: bool,
    #[serde(default)]
    pub expect_prompt: Option<String>,
}

/// Values substituted into vendor command templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapParams {
    pub hostname: String,
    pub mgmt_ip: String,
    pub mgmt_mask: String,
    pub gateway: String,
    pub mgmt_vlan: Option<u16>,
}

/// Outcome of parsing the verification transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    pub success: bool,
    pub details: String,
    pub tasks: Vec<VerifyTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyTask {
    pub name: String,
    pub status: VerifyStatus,
    pub message: String,
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyStatus {
    Success,
    Failed,
}

impl Display for VerifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyStatus::Success => f.write_str("success"),
            VerifyStatus::Failed => f.write_str("failed"),
        }
    }
}

/// A single validation finding produced by the policy layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub device_id: Option<i64>,
    pub row: Option<usize>,
    pub message: String,
    pub suggestion: Option<String>,
}
