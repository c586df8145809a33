//! Operator-facing rendering of health-check results. Presentation only:
//! severities are labels, nothing acts on them.

use crate::check::{HealthCheckResult, HealthReport, ProcessSnapshot, ServiceState, SystemSnapshot};
use crate::inventory::VmDescriptor;

const RULE: &str = "================================================================================";
pub const SEPARATOR: &str = "--------------------------------------------------------------------------------";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Running,
    Stopped,
    NotFound,
    Other,
}

pub fn bucket(state: &ServiceState) -> Bucket {
    match state {
        ServiceState::Running => Bucket::Running,
        ServiceState::Stopped => Bucket::Stopped,
        ServiceState::NotFound => Bucket::NotFound,
        ServiceState::Other(_) => Bucket::Other,
    }
}

fn bucket_marker(b: Bucket) -> &'static str {
    match b {
        Bucket::Running => "[ OK ]",
        Bucket::Stopped => "[DOWN]",
        Bucket::NotFound => "[ ?? ]",
        Bucket::Other => "[WARN]",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Nominal,
    Elevated,
    Critical,
}

impl Severity {
    fn marker(self) -> &'static str {
        match self {
            Self::Nominal => "[ OK ]",
            Self::Elevated => "[WARN]",
            Self::Critical => "[CRIT]",
        }
    }
}

fn graded(value: f64, nominal_below: f64, elevated_below: f64) -> Severity {
    if value < nominal_below {
        Severity::Nominal
    } else if value < elevated_below {
        Severity::Elevated
    } else {
        Severity::Critical
    }
}

pub fn cpu_severity(percent: f64) -> Severity {
    graded(percent, 70.0, 90.0)
}

pub fn memory_severity(percent: f64) -> Severity {
    graded(percent, 80.0, 95.0)
}

/// Render one VM's outcome.
pub fn render(vm: &VmDescriptor, result: &HealthCheckResult) -> String {
    match result {
        HealthCheckResult::Failure { reason, raw_output, .. } => {
            let mut lines = vec![format!("Health check failed on {} (RG: {}): {reason}", vm.name, vm.resource_group)];
            if !raw_output.is_empty() {
                lines.push(format!("Raw output: {raw_output}"));
            }
            lines.join("\n")
        }
        HealthCheckResult::Success(report) => render_report(vm, report),
    }
}

fn render_report(vm: &VmDescriptor, report: &HealthReport) -> String {
    let mut lines = vec![format!("Service Health Report - {} (RG: {})", vm.name, vm.resource_group), RULE.to_string()];

    if let Some(stamp) = &report.stamp {
        lines.push(format!("Timestamp: {}", stamp.timestamp));
        lines.push(format!("Computer: {}", stamp.host_name));
    }

    for svc in &report.services {
        lines.push(String::new());
        lines.push(format!("{} Service: {}", bucket_marker(bucket(&svc.status)), svc.name));
        lines.push(format!("   Status: {}", svc.status.label()));
        lines.push(format!("   Start Type: {}", svc.start_type));
        if let Some(info) = &svc.process_info {
            lines.push(format!("   Process: {info}"));
        }
        if let Some(err) = &svc.error {
            lines.push(format!("   Error: {err}"));
        }
    }

    if !report.processes.is_empty() || !report.missing_processes.is_empty() {
        lines.push(String::new());
        lines.push("Processes:".to_string());
        lines.extend(report.processes.iter().map(process_line));
        for name in &report.missing_processes {
            lines.push(format!("   [DOWN] No {name} process found"));
        }
    }

    if let Some(system) = &report.system {
        lines.push(String::new());
        lines.push("System Performance:".to_string());
        match system {
            SystemSnapshot::Measured { cpu_usage_percent, total_memory_gb, free_memory_gb, memory_usage_percent } => {
                lines.push(format!("   {} CPU Usage: {cpu_usage_percent}%", cpu_severity(*cpu_usage_percent).marker()));
                lines.push(format!("   {} Memory Usage: {memory_usage_percent}%", memory_severity(*memory_usage_percent).marker()));
                lines.push(format!("   Total Memory: {total_memory_gb} GB"));
                lines.push(format!("   Free Memory: {free_memory_gb} GB"));
            }
            SystemSnapshot::Unavailable(err) => lines.push(format!("   System info error: {err}")),
        }
    }

    lines.push(RULE.to_string());
    lines.join("\n")
}

fn process_line(p: &ProcessSnapshot) -> String {
    format!(
        "   PID {} {} (started {}): CPU {}s, Working Set {} MB, Virtual {} MB, Handles {}, Threads {}",
        p.pid, p.process_name, p.start_time, p.cpu_seconds, p.working_set_mb, p.virtual_memory_mb, p.handle_count, p.thread_count
    )
}
