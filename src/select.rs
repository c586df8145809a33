//! Interactive choice of target VM(s) and of the services to check.

use crate::inventory::VmDescriptor;
use crate::prompt::{confirm, Prompt, Reply};

const CANCEL_TOKENS: [&str; 3] = ["q", "quit", "exit"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    One(VmDescriptor),
    All(Vec<VmDescriptor>),
}

impl Selection {
    pub fn targets(&self) -> Vec<&VmDescriptor> {
        match self {
            Self::One(vm) => vec![vm],
            Self::All(vms) => vms.iter().collect(),
        }
    }
}

enum Choice {
    Index(usize),
    All,
    Cancel,
}

fn parse_choice(input: &str, count: usize, allow_all: bool) -> Result<Choice, &'static str> {
    let input = input.trim().to_lowercase();
    if CANCEL_TOKENS.contains(&input.as_str()) {
        return Ok(Choice::Cancel);
    }
    if allow_all && input == "all" {
        return Ok(Choice::All);
    }
    let n: i64 = input.parse().map_err(|_| {
        if allow_all { "Please enter a valid number or 'all'." } else { "Please enter a valid number." }
    })?;
    if n < 1 || n as usize > count {
        return Err("Invalid selection. Please try again.");
    }
    Ok(Choice::Index(n as usize - 1))
}

/// Print the numbered VM list.
pub fn show_vms(prompt: &mut dyn Prompt, vms: &[VmDescriptor]) {
    prompt.say(&format!("Found {} matching VM(s):", vms.len()));
    for (i, vm) in vms.iter().enumerate() {
        let tags = if vm.tags.is_empty() {
            "No tags".to_string()
        } else {
            vm.tags.iter().map(|(k, v)| format!("{k}:{v}")).collect::<Vec<_>>().join(", ")
        };
        prompt.say(&format!("{}. {} (RG: {}) - {}", i + 1, vm.name, vm.resource_group, vm.power_state));
        prompt.say(&format!("   Size: {}, Location: {}", vm.vm_size, vm.location));
        prompt.say(&format!("   Tags: {tags}"));
    }
}

/// Ask for a 1-based index (or `all` when allowed). Bad input re-prompts; a VM that is
/// not running needs explicit confirmation. `None` on cancel, decline, interrupt or empty list.
pub fn select_vm(prompt: &mut dyn Prompt, vms: &[VmDescriptor], allow_all: bool) -> Option<Selection> {
    if vms.is_empty() {
        return None;
    }
    show_vms(prompt, vms);

    let question = if allow_all {
        format!("\nSelect VM (1-{}) or 'all' for all VMs: ", vms.len())
    } else {
        format!("\nSelect VM (1-{}): ", vms.len())
    };

    loop {
        let answer = match prompt.ask(&question) {
            Reply::Line(line) => line,
            Reply::Interrupted => return None,
        };
        match parse_choice(&answer, vms.len(), allow_all) {
            Ok(Choice::Cancel) => return None,
            Ok(Choice::All) => return Some(Selection::All(vms.to_vec())),
            Ok(Choice::Index(i)) => {
                let vm = &vms[i];
                prompt.say(&format!("Selected VM: {} (power state: {})", vm.name, vm.power_state));
                if !vm.is_running() {
                    prompt.say("Warning: VM is not in running state");
                    if !confirm(prompt, "Continue anyway? (y/N): ") {
                        return None;
                    }
                }
                return Some(Selection::One(vm.clone()));
            }
            Err(msg) => prompt.say(msg),
        }
    }
}

/// Read service names one per line until a blank line. Interrupt yields an empty list.
pub fn collect_service_names(prompt: &mut dyn Prompt) -> Vec<String> {
    prompt.say("Enter service names to check (one per line, empty line to finish):");
    prompt.say("Examples: W3SVC, MSSQLSERVER, Spooler, Themes");
    let mut names = Vec::new();
    loop {
        match prompt.ask("Service name: ") {
            Reply::Line(name) if name.is_empty() => return names,
            Reply::Line(name) => names.push(name),
            Reply::Interrupted => return Vec::new(),
        }
    }
}
