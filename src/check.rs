//! Health-check request/response contract.
//!
//! A request is built (payload validated and rendered), submitted through
//! [`ComputeApi::run_command`], and the guest's stdout decoded into a
//! [`HealthCheckResult`]. Every outcome past building is a value, never an
//! error: transport faults, empty output and unparseable output all become
//! `Failure` with whatever raw text was received.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::compute::ComputeApi;
use crate::inventory::VmDescriptor;
use crate::script::{script_lines, Payload, ScriptError};

pub const PARSE_FAILURE: &str = "Failed to parse service information";
pub const EMPTY_RESPONSE: &str = "No output received from VM";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckRequest {
    pub target: VmDescriptor,
    pub payload: Payload,
    script: Vec<String>,
}

impl HealthCheckRequest {
    pub fn new(target: VmDescriptor, payload: Payload) -> Result<Self, ScriptError> {
        let script = script_lines(&payload)?;
        Ok(Self { target, payload, script })
    }

    pub fn service_names(&self) -> &[String] {
        &self.payload.services
    }

    pub fn script(&self) -> &[String] {
        &self.script
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopped,
    NotFound,
    Other(String),
}

impl ServiceState {
    fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("running") {
            Self::Running
        } else if name.eq_ignore_ascii_case("stopped") {
            Self::Stopped
        } else if name.eq_ignore_ascii_case("notfound") {
            Self::NotFound
        } else {
            Self::Other(name.to_string())
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::NotFound => "NotFound",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    pub status: ServiceState,
    pub start_type: String,
    pub process_info: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SystemSnapshot {
    Measured {
        cpu_usage_percent: f64,
        total_memory_gb: f64,
        free_memory_gb: f64,
        memory_usage_percent: f64,
    },
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub process_name: String,
    pub start_time: String,
    pub cpu_seconds: f64,
    pub working_set_mb: f64,
    pub virtual_memory_mb: f64,
    pub handle_count: u64,
    pub thread_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStamp {
    pub timestamp: String,
    pub host_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub services: Vec<ServiceStatus>,
    pub processes: Vec<ProcessSnapshot>,
    pub missing_processes: Vec<String>,
    pub system: Option<SystemSnapshot>,
    pub stamp: Option<HostStamp>,
    pub raw_output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Parse,
    Transport,
    EmptyResponse,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parse => "parse_failure",
            Self::Transport => "transport_failure",
            Self::EmptyResponse => "empty_response",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealthCheckResult {
    Success(HealthReport),
    Failure { kind: FailureKind, reason: String, raw_output: String },
}

impl HealthCheckResult {
    fn failure(kind: FailureKind, reason: impl Into<String>, raw_output: impl Into<String>) -> Self {
        Self::Failure { kind, reason: reason.into(), raw_output: raw_output.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn raw_output(&self) -> &str {
        match self {
            Self::Success(report) => &report.raw_output,
            Self::Failure { raw_output, .. } => raw_output,
        }
    }
}

// ── wire shapes ──────────────────────────────────────────────────────

/// Windows PowerShell 5.1 serialises enums as their numeric value.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnumValue {
    Text(String),
    Code(i64),
}

impl EnumValue {
    fn service_status(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Code(code) => match code {
                1 => "Stopped",
                2 => "StartPending",
                3 => "StopPending",
                4 => "Running",
                5 => "ContinuePending",
                6 => "PausePending",
                7 => "Paused",
                _ => return format!("Unknown({code})"),
            }
            .to_string(),
        }
    }

    fn start_mode(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Code(code) => match code {
                0 => "Boot",
                1 => "System",
                2 => "Automatic",
                3 => "Manual",
                4 => "Disabled",
                _ => return format!("Unknown({code})"),
            }
            .to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(v) => v,
            Self::One(t) => vec![t],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireService {
    service_name: String,
    #[serde(default)]
    status: Option<EnumValue>,
    #[serde(default)]
    start_type: Option<EnumValue>,
    #[serde(default)]
    process_info: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl From<WireService> for ServiceStatus {
    fn from(w: WireService) -> Self {
        let present = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        Self {
            name: w.service_name,
            status: w
                .status
                .map(|s| ServiceState::from_name(&s.service_status()))
                .unwrap_or_else(|| ServiceState::Other("Unknown".into())),
            start_type: w.start_type.map(|s| s.start_mode()).unwrap_or_else(|| "Unknown".into()),
            process_info: present(w.process_info),
            error: present(w.error),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireProcess {
    #[serde(rename = "PID")]
    pid: u32,
    #[serde(default)]
    process_name: String,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default, rename = "CPU")]
    cpu: Option<f64>,
    #[serde(default)]
    working_set: Option<f64>,
    #[serde(default)]
    virtual_memory: Option<f64>,
    #[serde(default)]
    handle_count: Option<u64>,
    #[serde(default)]
    thread_count: Option<u64>,
}

impl From<WireProcess> for ProcessSnapshot {
    fn from(w: WireProcess) -> Self {
        Self {
            pid: w.pid,
            process_name: w.process_name,
            start_time: w.start_time.unwrap_or_else(|| "Unknown".into()),
            cpu_seconds: w.cpu.unwrap_or(0.0),
            working_set_mb: w.working_set.unwrap_or(0.0),
            virtual_memory_mb: w.virtual_memory.unwrap_or(0.0),
            handle_count: w.handle_count.unwrap_or(0),
            thread_count: w.thread_count.unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSystem {
    #[serde(default, rename = "CPUUsage")]
    cpu_usage: Option<f64>,
    #[serde(default, rename = "TotalMemoryGB")]
    total_memory_gb: Option<f64>,
    #[serde(default, rename = "FreeMemoryGB")]
    free_memory_gb: Option<f64>,
    #[serde(default, rename = "MemoryUsagePercent")]
    memory_usage_percent: Option<f64>,
    #[serde(default, rename = "Error")]
    error: Option<String>,
}

impl From<WireSystem> for SystemSnapshot {
    fn from(w: WireSystem) -> Self {
        match w.error {
            Some(e) => Self::Unavailable(e),
            None => Self::Measured {
                cpu_usage_percent: w.cpu_usage.unwrap_or(0.0),
                total_memory_gb: w.total_memory_gb.unwrap_or(0.0),
                free_memory_gb: w.free_memory_gb.unwrap_or(0.0),
                memory_usage_percent: w.memory_usage_percent.unwrap_or(0.0),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireReport {
    services: OneOrMany<WireService>,
    #[serde(default)]
    processes: Option<OneOrMany<WireProcess>>,
    #[serde(default)]
    missing_processes: Option<OneOrMany<String>>,
    #[serde(default)]
    system_info: Option<WireSystem>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    computer_name: Option<String>,
}

// ── decoding ─────────────────────────────────────────────────────────

/// Decode guest stdout. Pure; the raw text is carried into every outcome.
pub fn parse_output(raw: &str) -> HealthCheckResult {
    let text = raw.trim_start_matches('\u{feff}').trim();
    if text.is_empty() {
        return HealthCheckResult::failure(FailureKind::EmptyResponse, EMPTY_RESPONSE, raw);
    }
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "guest output is not JSON");
            return HealthCheckResult::failure(FailureKind::Parse, PARSE_FAILURE, raw);
        }
    };

    let is_wrapped = value.as_object().map(|o| o.contains_key("Services")).unwrap_or(false);
    let decoded = if is_wrapped {
        serde_json::from_value::<WireReport>(value).map(|w| report_from_wire(w, raw))
    } else {
        serde_json::from_value::<OneOrMany<WireService>>(value).map(|w| HealthReport {
            services: w.into_vec().into_iter().map(ServiceStatus::from).collect(),
            processes: Vec::new(),
            missing_processes: Vec::new(),
            system: None,
            stamp: None,
            raw_output: raw.to_string(),
        })
    };

    match decoded {
        Ok(report) if report.services.is_empty() => {
            HealthCheckResult::failure(FailureKind::EmptyResponse, EMPTY_RESPONSE, raw)
        }
        Ok(report) => HealthCheckResult::Success(report),
        Err(e) => {
            tracing::debug!(error = %e, "guest output has an unexpected shape");
            HealthCheckResult::failure(FailureKind::Parse, PARSE_FAILURE, raw)
        }
    }
}

fn report_from_wire(w: WireReport, raw: &str) -> HealthReport {
    let stamp = match (w.timestamp, w.computer_name) {
        (None, None) => None,
        (timestamp, host_name) => Some(HostStamp {
            timestamp: timestamp.unwrap_or_else(|| "Unknown".into()),
            host_name: host_name.unwrap_or_else(|| "Unknown".into()),
        }),
    };
    HealthReport {
        services: w.services.into_vec().into_iter().map(ServiceStatus::from).collect(),
        processes: w
            .processes
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(ProcessSnapshot::from)
            .collect(),
        missing_processes: w.missing_processes.map(OneOrMany::into_vec).unwrap_or_default(),
        system: w.system_info.map(SystemSnapshot::from),
        stamp,
        raw_output: raw.to_string(),
    }
}

/// Submit the request and block until the remote execution is terminal.
pub fn run_health_check(api: &dyn ComputeApi, request: &HealthCheckRequest) -> HealthCheckResult {
    let vm = &request.target;
    tracing::info!(vm = %vm.name, resource_group = %vm.resource_group, services = request.service_names().len(), "submitting health check");

    let result = match api.run_command(&vm.resource_group, &vm.name, request.script()) {
        Err(e) => HealthCheckResult::failure(FailureKind::Transport, format!("Azure API error: {e}"), ""),
        Ok(output) => match output.stdout() {
            Some(stdout) if !stdout.trim().is_empty() => parse_output(stdout),
            _ => HealthCheckResult::failure(
                FailureKind::EmptyResponse,
                EMPTY_RESPONSE,
                output.stderr().unwrap_or_default(),
            ),
        },
    };

    match &result {
        HealthCheckResult::Success(report) => {
            tracing::info!(vm = %vm.name, services = report.services.len(), "health check parsed");
        }
        HealthCheckResult::Failure { kind, reason, .. } => {
            tracing::warn!(vm = %vm.name, kind = %kind, reason = %reason, "health check failed");
        }
    }
    result
}
