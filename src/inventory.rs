//! VM discovery: filter the subscription's VMs down to eligible targets and
//! enrich each with its power state.

use std::collections::BTreeMap;
use std::fmt;

use crate::compute::{ComputeApi, InstanceViewStatus, RawVm};
use crate::error::CloudResult;

pub const UNKNOWN: &str = "unknown";
pub const RUNNING: &str = "running";

/// Tag whose value (not the resource name) is matched by `name_contains`.
pub const NAME_TAG: &str = "Name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmDescriptor {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub vm_size: String,
    pub power_state: String,
    pub tags: BTreeMap<String, String>,
}

impl VmDescriptor {
    /// VM names are unique only within a resource group.
    pub fn identity(&self) -> (&str, &str) {
        (&self.resource_group, &self.name)
    }

    pub fn is_running(&self) -> bool {
        self.power_state == RUNNING
    }

    fn from_raw(raw: &RawVm) -> Self {
        Self {
            name: raw.name.clone(),
            resource_group: raw.resource_group().unwrap_or(UNKNOWN).to_string(),
            location: raw.location.clone(),
            vm_size: raw.vm_size().unwrap_or(UNKNOWN).to_string(),
            power_state: UNKNOWN.to_string(),
            tags: raw.tags.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for VmDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCriteria {
    pub os_type: String,
    pub required_tags: BTreeMap<String, String>,
    pub name_contains: Option<String>,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self { os_type: "windows".into(), required_tags: BTreeMap::new(), name_contains: None }
    }
}

impl FilterCriteria {
    fn needs_tags(&self) -> bool {
        !self.required_tags.is_empty() || self.name_contains.is_some()
    }

    /// Whether a raw VM satisfies OS type, every required tag pair and the name-tag substring.
    pub fn matches(&self, vm: &RawVm) -> bool {
        let os_ok = vm
            .os_type()
            .map(|os| os.eq_ignore_ascii_case(&self.os_type))
            .unwrap_or(false);
        if !os_ok {
            return false;
        }

        let tags = match &vm.tags {
            Some(tags) => tags,
            None => return !self.needs_tags(),
        };

        let tags_ok = self
            .required_tags
            .iter()
            .all(|(k, v)| tags.get(k) == Some(v));
        if !tags_ok {
            return false;
        }

        match &self.name_contains {
            Some(needle) => tags
                .get(NAME_TAG)
                .map(|name| name.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            None => true,
        }
    }

    /// Human-readable criteria lines, used for discovery banners and hints.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![format!("OS type: {}", self.os_type)];
        for (k, v) in &self.required_tags {
            lines.push(format!("Tag {k}: {v}"));
        }
        if let Some(needle) = &self.name_contains {
            lines.push(format!("{NAME_TAG} tag contains: {needle}"));
        }
        lines
    }
}

/// Pure filter step; preserves input order.
pub fn filter_vms<'a>(vms: &'a [RawVm], criteria: &FilterCriteria) -> Vec<&'a RawVm> {
    vms.iter().filter(|vm| criteria.matches(vm)).collect()
}

/// Power state is the suffix of the first `PowerState/` status code.
pub fn power_state_from(statuses: &[InstanceViewStatus]) -> Option<String> {
    statuses
        .iter()
        .find(|s| s.code.starts_with("PowerState/"))
        .and_then(|s| s.code.rsplit('/').next())
        .map(str::to_string)
}

/// List, filter, and enrich. Enumeration faults propagate; a failed power-state
/// lookup keeps the VM with an `unknown` state.
pub fn discover(api: &dyn ComputeApi, criteria: &FilterCriteria) -> CloudResult<Vec<VmDescriptor>> {
    let all = api.list_all_virtual_machines()?;
    let matched = filter_vms(&all, criteria);
    tracing::info!(total = all.len(), matched = matched.len(), "vm discovery");

    let mut out = Vec::with_capacity(matched.len());
    for raw in matched {
        let mut vm = VmDescriptor::from_raw(raw);
        match api.instance_view(&vm.resource_group, &vm.name) {
            Ok(statuses) => {
                if let Some(state) = power_state_from(&statuses) {
                    vm.power_state = state;
                }
            }
            Err(e) => {
                tracing::warn!(vm = %vm.name, resource_group = %vm.resource_group, error = %e, "could not get power state");
            }
        }
        out.push(vm);
    }
    Ok(out)
}
