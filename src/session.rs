use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::check::{run_health_check, HealthCheckRequest, HealthCheckResult};
use crate::compute::ComputeApi;
use crate::error::Result;
use crate::inventory::{discover, FilterCriteria, VmDescriptor};
use crate::prompt::{confirm, Prompt};
use crate::report::{render, SEPARATOR};
use crate::script::Payload;
use crate::select::{collect_service_names, select_vm, show_vms, Selection};

/// Per-command variant knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckProfile {
    /// Offer "all" at the selection prompt.
    pub allow_all: bool,
    /// Services are prompted for when this carries none.
    pub payload: Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed { succeeded: usize, failed: usize },
    NoTargets,
    Cancelled,
}

/// One operator run: discovery, selection, confirmation, then checks one VM at a time.
pub struct Session<'a> {
    api: &'a dyn ComputeApi,
    prompt: &'a mut dyn Prompt,
    interrupted: Arc<AtomicBool>,
    assume_yes: bool,
}

impl<'a> Session<'a> {
    pub fn new(api: &'a dyn ComputeApi, prompt: &'a mut dyn Prompt, interrupted: Arc<AtomicBool>) -> Self {
        Self { api, prompt, interrupted, assume_yes: false }
    }

    /// Skip the final "proceed?" confirmation. Power-state confirmation still applies.
    pub fn assume_yes(mut self, yes: bool) -> Self {
        self.assume_yes = yes;
        self
    }

    fn discover(&mut self, criteria: &FilterCriteria) -> Result<Vec<VmDescriptor>> {
        self.prompt.say("Discovering VMs...");
        for line in criteria.describe() {
            self.prompt.say(&format!("   - {line}"));
        }
        let vms = discover(self.api, criteria)?;
        if vms.is_empty() {
            self.prompt.say("No VMs found matching the criteria.");
            self.prompt.say("Troubleshooting:");
            self.prompt.say("   - Verify the subscription is the intended one");
            self.prompt.say("   - Check that the VMs carry every required tag listed above");
            self.prompt.say("   - Verify your account can read Microsoft.Compute resources");
        }
        Ok(vms)
    }

    /// Discovery only.
    pub fn list(&mut self, criteria: &FilterCriteria) -> Result<usize> {
        let vms = self.discover(criteria)?;
        if !vms.is_empty() {
            show_vms(self.prompt, &vms);
        }
        Ok(vms.len())
    }

    pub fn run(&mut self, criteria: &FilterCriteria, profile: &CheckProfile) -> Result<Outcome> {
        let vms = self.discover(criteria)?;
        if vms.is_empty() {
            return Ok(Outcome::NoTargets);
        }

        let Some(selection) = select_vm(self.prompt, &vms, profile.allow_all) else {
            self.prompt.say("No VM selected.");
            return Ok(Outcome::Cancelled);
        };

        let mut payload = profile.payload.clone();
        if payload.services.is_empty() {
            payload.services = collect_service_names(self.prompt);
        }
        if payload.services.is_empty() {
            self.prompt.say("No services specified.");
            return Ok(Outcome::Cancelled);
        }

        let targets: Vec<VmDescriptor> = selection.targets().into_iter().cloned().collect();
        // Reject an invalid payload before anything is submitted.
        for vm in &targets {
            HealthCheckRequest::new(vm.clone(), payload.clone())?;
        }

        let scope = match &selection {
            Selection::One(vm) => vm.name.clone(),
            Selection::All(vms) => format!("all {} VMs", vms.len()),
        };
        self.prompt.say(&format!("Will check {} service(s) on {scope}: {}", payload.services.len(), payload.services.join(", ")));
        if !self.assume_yes && !confirm(self.prompt, "Proceed with health check? (y/N): ") {
            self.prompt.say("Health check cancelled.");
            return Ok(Outcome::Cancelled);
        }

        let results = self.run_checks(&targets, &payload)?;
        let succeeded = results.iter().filter(|(_, r)| r.is_success()).count();
        let failed = results.len() - succeeded;
        if targets.len() > 1 {
            self.prompt.say(&format!("{succeeded} succeeded, {failed} failed"));
        }
        Ok(Outcome::Completed { succeeded, failed })
    }

    /// Check each target in order. A failed VM never stops the loop; an interrupt stops it
    /// before the next VM.
    pub fn run_checks(&mut self, targets: &[VmDescriptor], payload: &Payload) -> Result<Vec<(VmDescriptor, HealthCheckResult)>> {
        let mut results = Vec::with_capacity(targets.len());
        for (i, vm) in targets.iter().enumerate() {
            if self.interrupted.load(Ordering::SeqCst) {
                self.prompt.say("Interrupted; skipping remaining VMs.");
                break;
            }
            if i > 0 {
                self.prompt.say(SEPARATOR);
            }
            self.prompt.say(&format!("Checking service health on {}...", vm.name));
            let request = HealthCheckRequest::new(vm.clone(), payload.clone())?;
            let result = run_health_check(self.api, &request);
            self.prompt.say(&render(vm, &result));
            results.push((vm.clone(), result));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::FailureKind;
    use crate::compute::{InstanceViewStatus, RawVm, RunCommandOutput};
    use crate::error::{CloudError, CloudErrorKind, CloudResult};
    use crate::inventory::tests::raw_vm;
    use crate::prompt::ScriptedPrompt;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    const W3SVC_RUNNING: &str = r#"[{"ServiceName":"W3SVC","Status":"Running","StartType":"Auto","ProcessInfo":"PID: 123","Error":null}]"#;

    struct Fleet {
        vms: Vec<RawVm>,
        broken: Vec<&'static str>,
        calls: RefCell<Vec<String>>,
    }

    impl Fleet {
        fn new(vms: Vec<RawVm>) -> Self {
            Self { vms, broken: Vec::new(), calls: RefCell::new(Vec::new()) }
        }
    }

    impl ComputeApi for Fleet {
        fn list_all_virtual_machines(&self) -> CloudResult<Vec<RawVm>> {
            Ok(self.vms.clone())
        }

        fn instance_view(&self, _rg: &str, _name: &str) -> CloudResult<Vec<InstanceViewStatus>> {
            Ok(vec![InstanceViewStatus { code: "PowerState/running".into(), ..Default::default() }])
        }

        fn run_command(&self, _rg: &str, name: &str, _script: &[String]) -> CloudResult<RunCommandOutput> {
            self.calls.borrow_mut().push(name.to_string());
            if self.broken.iter().any(|b| *b == name) {
                return Err(CloudError::new(CloudErrorKind::Network, "connection reset"));
            }
            Ok(RunCommandOutput::from_stdout(W3SVC_RUNNING))
        }
    }

    fn web_criteria() -> FilterCriteria {
        FilterCriteria {
            os_type: "windows".into(),
            required_tags: BTreeMap::from([("System".to_string(), "X".to_string())]),
            name_contains: Some("WEB".into()),
        }
    }

    fn descriptor(name: &str) -> VmDescriptor {
        VmDescriptor {
            name: name.into(),
            resource_group: "rg".into(),
            location: "westeurope".into(),
            vm_size: "Standard_B2s".into(),
            power_state: "running".into(),
            tags: BTreeMap::new(),
        }
    }

    fn flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn end_to_end_single_vm() {
        let api = Fleet::new(vec![
            raw_vm("web01", "rg", "Windows", Some(&[("System", "X"), ("Name", "WEB01")])),
            raw_vm("db01", "rg", "Windows", Some(&[("System", "X"), ("Name", "DB01")])),
        ]);
        let mut prompt = ScriptedPrompt::new(&["1", "W3SVC", "", "y"]);
        let outcome = Session::new(&api, &mut prompt, flag())
            .run(&web_criteria(), &CheckProfile::default())
            .unwrap();
        assert_eq!(outcome, Outcome::Completed { succeeded: 1, failed: 0 });
        assert_eq!(*api.calls.borrow(), vec!["web01".to_string()]);
        let transcript = prompt.transcript();
        assert!(transcript.contains("Found 1 matching VM(s):"));
        assert!(transcript.contains("[ OK ] Service: W3SVC"));
    }

    #[test]
    fn all_flow_continues_past_failed_vm() {
        let mut api = Fleet::new(Vec::new());
        api.broken.push("web02");
        let targets = vec![descriptor("web01"), descriptor("web02"), descriptor("web03")];
        let mut prompt = ScriptedPrompt::new(&[]);
        let results = Session::new(&api, &mut prompt, flag())
            .run_checks(&targets, &Payload::services(vec!["W3SVC".into()]))
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_success());
        assert!(matches!(results[1].1, HealthCheckResult::Failure { kind: FailureKind::Transport, .. }));
        assert!(results[2].1.is_success());
        assert_eq!(results[2].0.name, "web03");

        let transcript = prompt.transcript();
        assert!(transcript.contains("Service Health Report - web01"));
        assert!(transcript.contains("Health check failed on web02"));
        assert!(transcript.contains("Service Health Report - web03"));
    }

    #[test]
    fn all_selection_reports_summary() {
        let mut api = Fleet::new(vec![
            raw_vm("a", "rg1", "Windows", Some(&[("System", "X"), ("Name", "WEB-A")])),
            raw_vm("b", "rg2", "Windows", Some(&[("System", "X"), ("Name", "WEB-B")])),
        ]);
        api.broken.push("b");
        let profile = CheckProfile { allow_all: true, payload: Payload::services(vec!["ncrpes".into()]) };
        let mut prompt = ScriptedPrompt::new(&["all"]);
        let outcome = Session::new(&api, &mut prompt, flag())
            .assume_yes(true)
            .run(&web_criteria(), &profile)
            .unwrap();
        assert_eq!(outcome, Outcome::Completed { succeeded: 1, failed: 1 });
        assert!(prompt.transcript().contains("1 succeeded, 1 failed"));
        assert!(prompt.transcript().contains(SEPARATOR));
    }

    #[test]
    fn interrupt_stops_before_next_vm() {
        let api = Fleet::new(Vec::new());
        let interrupted = flag();
        interrupted.store(true, Ordering::SeqCst);
        let mut prompt = ScriptedPrompt::new(&[]);
        let results = Session::new(&api, &mut prompt, interrupted)
            .run_checks(&[descriptor("a"), descriptor("b")], &Payload::services(vec!["x".into()]))
            .unwrap();
        assert!(results.is_empty());
        assert!(api.calls.borrow().is_empty());
    }

    #[test]
    fn declining_confirmation_sends_nothing() {
        let api = Fleet::new(vec![raw_vm("web01", "rg", "Windows", Some(&[("System", "X"), ("Name", "web01")]))]);
        let mut prompt = ScriptedPrompt::new(&["1", "W3SVC", "", "n"]);
        let outcome = Session::new(&api, &mut prompt, flag())
            .run(&web_criteria(), &CheckProfile::default())
            .unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert!(api.calls.borrow().is_empty());
    }

    #[test]
    fn no_services_cancels() {
        let api = Fleet::new(vec![raw_vm("web01", "rg", "Windows", Some(&[("System", "X"), ("Name", "WEB01")]))]);
        let mut prompt = ScriptedPrompt::new(&["1", ""]);
        let outcome = Session::new(&api, &mut prompt, flag())
            .run(&web_criteria(), &CheckProfile::default())
            .unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert!(prompt.transcript().contains("No services specified."));
    }

    #[test]
    fn no_matches_prints_hints() {
        let api = Fleet::new(vec![raw_vm("lnx", "rg", "Linux", Some(&[("System", "X"), ("Name", "WEB")]))]);
        let mut prompt = ScriptedPrompt::new(&[]);
        let outcome = Session::new(&api, &mut prompt, flag())
            .run(&web_criteria(), &CheckProfile::default())
            .unwrap();
        assert_eq!(outcome, Outcome::NoTargets);
        assert!(prompt.transcript().contains("Tag System: X"));
        assert!(prompt.transcript().contains("Troubleshooting:"));
        assert!(prompt.questions.is_empty());
    }

    #[test]
    fn list_counts_matches() {
        let api = Fleet::new(vec![
            raw_vm("web01", "rg", "Windows", Some(&[("System", "X"), ("Name", "WEB01")])),
            raw_vm("web02", "rg", "Windows", Some(&[("System", "Y"), ("Name", "WEB02")])),
        ]);
        let mut prompt = ScriptedPrompt::new(&[]);
        let count = Session::new(&api, &mut prompt, flag()).list(&web_criteria()).unwrap();
        assert_eq!(count, 1);
        assert!(prompt.transcript().contains("1. web01 (RG: rg) - running"));
    }

    #[test]
    fn blank_configured_service_is_an_error() {
        let api = Fleet::new(vec![raw_vm("web01", "rg", "Windows", Some(&[("System", "X"), ("Name", "WEB01")]))]);
        let profile = CheckProfile { allow_all: false, payload: Payload::services(vec![" ".into()]) };
        let mut prompt = ScriptedPrompt::new(&["1"]);
        let err = Session::new(&api, &mut prompt, flag()).run(&web_criteria(), &profile).unwrap_err();
        assert_eq!(err.to_string(), "name #1 is blank");
        assert!(api.calls.borrow().is_empty());
    }
}
