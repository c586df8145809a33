//! PowerShell payload executed through Run Command.
//!
//! The script always ends in a single `ConvertTo-Json` document. The basic
//! payload emits the service records (one object or an array); the extended
//! payload wraps them in an object with process snapshots, a system snapshot
//! and a host/time stamp.

use std::fmt;

/// What to collect on the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub services: Vec<String>,
    pub processes: Vec<String>,
    pub system_snapshot: bool,
}

impl Payload {
    pub fn services(services: Vec<String>) -> Self {
        Self { services, ..Self::default() }
    }

    /// Whether the output document is the wrapped (monitoring) shape.
    pub fn extended(&self) -> bool {
        self.system_snapshot || !self.processes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    NoServices,
    BlankName { position: usize },
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoServices => write!(f, "at least one service name is required"),
            Self::BlankName { position } => write!(f, "name #{position} is blank"),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Single-quoted PowerShell literal. PowerShell also treats typographic single quotes as
/// delimiters, so those are doubled too.
fn ps_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}') {
            out.push(c);
        }
        out.push(c);
    }
    out.push('\'');
    out
}

fn ps_array(values: &[String]) -> String {
    let items: Vec<String> = values.iter().map(|v| ps_literal(v)).collect();
    format!("@({})", items.join(", "))
}

fn validate(names: &[String]) -> Result<(), ScriptError> {
    match names.iter().position(|n| n.trim().is_empty()) {
        Some(i) => Err(ScriptError::BlankName { position: i + 1 }),
        None => Ok(()),
    }
}

const SERVICE_LOOP: &str = r#"$results = @()
foreach ($serviceName in $services) {
    try {
        $service = Get-Service -Name $serviceName -ErrorAction Stop
        $processInfo = ""
        if ($service.Status -eq 'Running' -and $service.ServiceType -ne 'Win32ShareProcess') {
            try {
                $wmi = Get-WmiObject -Class Win32_Service -Filter "Name='$($service.Name)'"
                $process = Get-Process -Id $wmi.ProcessId -ErrorAction SilentlyContinue
                if ($process) {
                    $processInfo = "PID: $($process.Id), CPU: $([math]::Round($process.CPU, 2))s, Memory: $([math]::Round($process.WorkingSet64/1MB, 2))MB"
                }
            } catch {
                $processInfo = "Process info unavailable"
            }
        }
        $results += [PSCustomObject]@{
            ServiceName = $serviceName
            Status = $service.Status.ToString()
            StartType = $service.StartType.ToString()
            ProcessInfo = $processInfo
            Error = $null
        }
    } catch {
        $results += [PSCustomObject]@{
            ServiceName = $serviceName
            Status = "NotFound"
            StartType = "Unknown"
            ProcessInfo = ""
            Error = $_.Exception.Message
        }
    }
}
"#;

const PROCESS_LOOP: &str = r#"$procs = @()
$missing = @()
foreach ($processName in $processNames) {
    $found = @(Get-Process -Name $processName -ErrorAction SilentlyContinue)
    if ($found.Count -eq 0) {
        $missing += $processName
        continue
    }
    foreach ($proc in $found) {
        $startTime = "Unknown"
        try { if ($proc.StartTime) { $startTime = $proc.StartTime.ToString("yyyy-MM-dd HH:mm:ss") } } catch { }
        $procs += [PSCustomObject]@{
            PID = $proc.Id
            ProcessName = $proc.ProcessName
            StartTime = $startTime
            CPU = [math]::Round($proc.CPU, 2)
            WorkingSet = [math]::Round($proc.WorkingSet64/1MB, 2)
            VirtualMemory = [math]::Round($proc.VirtualMemorySize64/1MB, 2)
            HandleCount = $proc.HandleCount
            ThreadCount = $proc.Threads.Count
        }
    }
}
$report.Processes = @($procs)
$report.MissingProcesses = @($missing)
"#;

const SYSTEM_SNAPSHOT: &str = r#"try {
    $cpu = Get-WmiObject -Class Win32_Processor | Measure-Object -Property LoadPercentage -Average
    $memory = Get-WmiObject -Class Win32_OperatingSystem
    $report.SystemInfo = [ordered]@{
        CPUUsage = [math]::Round($cpu.Average, 2)
        TotalMemoryGB = [math]::Round($memory.TotalVisibleMemorySize/1MB, 2)
        FreeMemoryGB = [math]::Round($memory.FreePhysicalMemory/1MB, 2)
        MemoryUsagePercent = [math]::Round((($memory.TotalVisibleMemorySize - $memory.FreePhysicalMemory) / $memory.TotalVisibleMemorySize) * 100, 2)
    }
} catch {
    $report.SystemInfo = @{ Error = $_.Exception.Message }
}
"#;

/// Build the full script text.
pub fn build_script(payload: &Payload) -> Result<String, ScriptError> {
    if payload.services.is_empty() {
        return Err(ScriptError::NoServices);
    }
    validate(&payload.services)?;
    let process_names: Vec<String> = payload
        .processes
        .iter()
        .map(|p| strip_exe(p.trim()).to_string())
        .collect();
    validate(&process_names)?;

    let mut script = String::new();
    script.push_str(&format!("$services = {}\n", ps_array(&payload.services)));
    script.push_str(SERVICE_LOOP);

    if !payload.extended() {
        script.push_str("$results | ConvertTo-Json -Depth 3\n");
        return Ok(script);
    }

    script.push_str("$report = [ordered]@{ Services = @($results) }\n");
    if !process_names.is_empty() {
        script.push_str(&format!("$processNames = {}\n", ps_array(&process_names)));
        script.push_str(PROCESS_LOOP);
    }
    if payload.system_snapshot {
        script.push_str(SYSTEM_SNAPSHOT);
    }
    script.push_str("$report.Timestamp = (Get-Date).ToString(\"yyyy-MM-dd HH:mm:ss\")\n");
    script.push_str("$report.ComputerName = $env:COMPUTERNAME\n");
    script.push_str("$report | ConvertTo-Json -Depth 4\n");
    Ok(script)
}

/// The script as Run Command `script` lines.
pub fn script_lines(payload: &Payload) -> Result<Vec<String>, ScriptError> {
    Ok(build_script(payload)?.lines().map(str::to_string).collect())
}

// Get-Process matches image names without the extension.
fn strip_exe(name: &str) -> &str {
    match name.len().checked_sub(4) {
        Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".exe") => &name[..cut],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn basic_script_lists_services_in_order() {
        let script = build_script(&Payload::services(names(&["W3SVC", "Spooler"]))).unwrap();
        assert!(script.starts_with("$services = @('W3SVC', 'Spooler')\n"));
        assert!(script.contains("Get-Service -Name $serviceName -ErrorAction Stop"));
        assert!(script.contains("Win32ShareProcess"));
        assert!(script.trim_end().ends_with("$results | ConvertTo-Json -Depth 3"));
        assert!(!script.contains("SystemInfo"));
        assert!(!script.contains("$processNames"));
    }

    #[test]
    fn extended_script_wraps_report() {
        let payload = Payload {
            services: names(&["ncrpes"]),
            processes: names(&["ncrpes.exe"]),
            system_snapshot: true,
        };
        let script = build_script(&payload).unwrap();
        assert!(script.contains("$report = [ordered]@{ Services = @($results) }"));
        assert!(script.contains("$processNames = @('ncrpes')"));
        assert!(script.contains("MemoryUsagePercent"));
        assert!(script.contains("$report.ComputerName = $env:COMPUTERNAME"));
        assert!(script.trim_end().ends_with("$report | ConvertTo-Json -Depth 4"));
    }

    #[test]
    fn system_only_extension_skips_process_loop() {
        let payload = Payload { services: names(&["W3SVC"]), processes: vec![], system_snapshot: true };
        let script = build_script(&payload).unwrap();
        assert!(script.contains("CPUUsage"));
        assert!(!script.contains("$processNames"));
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(ps_literal("a'b"), "'a''b'");
        assert_eq!(ps_literal("x\u{2019}y"), "'x\u{2019}\u{2019}y'");
        let script = build_script(&Payload::services(names(&["it's"]))).unwrap();
        assert!(script.starts_with("$services = @('it''s')"));
    }

    #[test]
    fn rejects_empty_and_blank_names() {
        assert_eq!(build_script(&Payload::default()), Err(ScriptError::NoServices));
        assert_eq!(
            build_script(&Payload::services(names(&["W3SVC", "  "]))),
            Err(ScriptError::BlankName { position: 2 })
        );
        let payload = Payload { services: names(&["a"]), processes: names(&[""]), system_snapshot: false };
        assert_eq!(build_script(&payload), Err(ScriptError::BlankName { position: 1 }));
    }

    #[test]
    fn duplicates_are_kept() {
        let script = build_script(&Payload::services(names(&["W3SVC", "W3SVC"]))).unwrap();
        assert!(script.starts_with("$services = @('W3SVC', 'W3SVC')"));
    }

    #[test]
    fn lines_split() {
        let lines = script_lines(&Payload::services(names(&["W3SVC"]))).unwrap();
        assert_eq!(lines[0], "$services = @('W3SVC')");
        assert!(lines.len() > 10);
    }

    #[test]
    fn exe_suffix_stripped() {
        assert_eq!(strip_exe("ncrpes.exe"), "ncrpes");
        assert_eq!(strip_exe("NCRPES.EXE"), "NCRPES");
        assert_eq!(strip_exe("svc"), "svc");
        assert_eq!(strip_exe(".exe"), "");
    }
}
