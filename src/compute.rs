//! Compute management-plane access: VM listing, instance view and Run Command.
//!
//! [`ComputeApi`] is the seam the rest of the crate talks to; [`ArmClient`]
//! implements it over the ARM REST API with a blocking HTTP client.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, LOCATION, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::auth::{AccessToken, Credential};
use crate::config::AzureConfig;
use crate::error::{CloudError, CloudErrorKind, CloudResult, Result};

pub const RUN_POWERSHELL: &str = "RunPowerShellScript";

/// Operations consumed from the cloud provider.
pub trait ComputeApi {
    /// Every VM visible in the subscription, in provider order.
    fn list_all_virtual_machines(&self) -> CloudResult<Vec<RawVm>>;

    /// Status entries of a VM's instance view.
    fn instance_view(&self, resource_group: &str, name: &str) -> CloudResult<Vec<InstanceViewStatus>>;

    /// Run a PowerShell script in the guest and block until the operation is terminal.
    fn run_command(&self, resource_group: &str, name: &str, script: &[String]) -> CloudResult<RunCommandOutput>;
}

// ── wire types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmList<T> {
    #[serde(default)]
    pub value: Vec<T>,
    #[serde(default)]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVm {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    /// `None` when the provider omits the tag map entirely.
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub properties: VmProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmProperties {
    #[serde(default)]
    pub hardware_profile: Option<HardwareProfile>,
    #[serde(default)]
    pub storage_profile: Option<StorageProfile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    #[serde(default)]
    pub vm_size: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    #[serde(default)]
    pub os_disk: Option<OsDisk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    #[serde(default)]
    pub os_type: Option<String>,
}

impl RawVm {
    pub fn os_type(&self) -> Option<&str> {
        self.properties
            .storage_profile
            .as_ref()
            .and_then(|sp| sp.os_disk.as_ref())
            .and_then(|od| od.os_type.as_deref())
    }

    pub fn vm_size(&self) -> Option<&str> {
        self.properties.hardware_profile.as_ref().and_then(|hp| hp.vm_size.as_deref())
    }

    /// Resource group segment of the ARM id.
    pub fn resource_group(&self) -> Option<&str> {
        let mut parts = self.id.split('/');
        while let Some(part) = parts.next() {
            if part.eq_ignore_ascii_case("resourceGroups") {
                return parts.next().filter(|rg| !rg.is_empty());
            }
        }
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceViewStatus {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub display_status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InstanceView {
    #[serde(default)]
    statuses: Vec<InstanceViewStatus>,
}

/// Terminal result of a Run Command operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RunCommandOutput {
    #[serde(default)]
    pub value: Vec<InstanceViewStatus>,
}

impl RunCommandOutput {
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            value: vec![InstanceViewStatus {
                code: "ComponentStatus/StdOut/succeeded".into(),
                message: Some(stdout.into()),
                ..Default::default()
            }],
        }
    }

    /// Standard output: the `StdOut` entry, else the first entry.
    pub fn stdout(&self) -> Option<&str> {
        self.value
            .iter()
            .find(|s| s.code.contains("StdOut"))
            .or_else(|| self.value.first())
            .map(|s| s.message.as_deref().unwrap_or(""))
    }

    pub fn stderr(&self) -> Option<&str> {
        self.value
            .iter()
            .find(|s| s.code.contains("StdErr"))
            .and_then(|s| s.message.as_deref())
            .filter(|m| !m.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunCommandInput<'a> {
    command_id: &'a str,
    script: &'a [String],
    parameters: Vec<serde_json::Value>,
}

// ── REST client ──────────────────────────────────────────────────────

/// Blocking ARM client bound to one subscription.
pub struct ArmClient {
    http: Client,
    credential: Credential,
    token: RefCell<Option<AccessToken>>,
    endpoint: String,
    subscription_id: String,
    api_version: String,
    poll_interval: Duration,
}

impl ArmClient {
    pub fn new(cfg: &AzureConfig, subscription_id: impl Into<String>, credential: Credential) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .user_agent(concat!("vmhealth/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            credential,
            token: RefCell::new(None),
            endpoint: cfg.management_endpoint.trim_end_matches('/').to_string(),
            subscription_id: subscription_id.into(),
            api_version: cfg.api_version.clone(),
            poll_interval: Duration::from_secs(cfg.poll_interval_secs.max(1)),
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    fn vms_url(&self) -> String {
        format!(
            "{}/subscriptions/{}/providers/Microsoft.Compute/virtualMachines?api-version={}",
            self.endpoint, self.subscription_id, self.api_version
        )
    }

    fn vm_url(&self, resource_group: &str, name: &str, action: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/{}/{}?api-version={}",
            self.endpoint, self.subscription_id, resource_group, name, action, self.api_version
        )
    }

    fn bearer(&self) -> CloudResult<String> {
        let mut slot = self.token.borrow_mut();
        let stale = slot.as_ref().map(AccessToken::is_expired).unwrap_or(true);
        if stale {
            *slot = Some(self.credential.acquire(&self.http, &self.endpoint)?);
        }
        let token = slot
            .as_ref()
            .map(|t| t.token.clone())
            .ok_or_else(|| CloudError::new(CloudErrorKind::Auth, "no access token"))?;
        Ok(format!("Bearer {token}"))
    }

    fn get(&self, url: &str) -> CloudResult<Response> {
        tracing::debug!(url, "GET");
        self.http
            .get(url)
            .header(AUTHORIZATION, self.bearer()?)
            .send()
            .map_err(network)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> CloudResult<T> {
        let resp = self.get(url)?;
        decode(resp)
    }

    fn poll_operation(&self, location: &str, mut wait: Duration) -> CloudResult<RunCommandOutput> {
        loop {
            thread::sleep(wait);
            let resp = self.get(location)?;
            match resp.status().as_u16() {
                202 => {
                    wait = retry_after(&resp).unwrap_or(self.poll_interval);
                    tracing::debug!(wait_secs = wait.as_secs(), "run command still in progress");
                }
                _ => return decode(resp),
            }
        }
    }
}

impl ComputeApi for ArmClient {
    fn list_all_virtual_machines(&self) -> CloudResult<Vec<RawVm>> {
        let mut all = Vec::new();
        let mut url = self.vms_url();
        loop {
            let page: ArmList<RawVm> = self.get_json(&url)?;
            all.extend(page.value);
            match page.next_link {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }
        Ok(all)
    }

    fn instance_view(&self, resource_group: &str, name: &str) -> CloudResult<Vec<InstanceViewStatus>> {
        let view: InstanceView = self.get_json(&self.vm_url(resource_group, name, "instanceView"))?;
        Ok(view.statuses)
    }

    fn run_command(&self, resource_group: &str, name: &str, script: &[String]) -> CloudResult<RunCommandOutput> {
        let url = self.vm_url(resource_group, name, "runCommand");
        let body = RunCommandInput { command_id: RUN_POWERSHELL, script, parameters: Vec::new() };
        tracing::debug!(url = %url, "POST run command");
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.bearer()?)
            .json(&body)
            .send()
            .map_err(network)?;

        if resp.status().as_u16() != 202 {
            return decode(resp);
        }
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CloudError::new(CloudErrorKind::Network, "run command accepted without a Location header"))?;
        let wait = retry_after(&resp).unwrap_or(self.poll_interval);
        self.poll_operation(&location, wait)
    }
}

fn network(e: reqwest::Error) -> CloudError {
    CloudError::new(CloudErrorKind::Network, e.to_string())
}

fn decode<T: DeserializeOwned>(resp: Response) -> CloudResult<T> {
    let status = resp.status().as_u16();
    let body = resp.text().map_err(network)?;
    if !(200..300).contains(&status) {
        return Err(CloudError::from_status(status, &body));
    }
    serde_json::from_str(&body).map_err(|e| CloudError::new(CloudErrorKind::Parse, format!("JSON parse: {e}")))
}

fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(|secs| Duration::from_secs(secs.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ArmClient {
        let cfg = AzureConfig { management_endpoint: "https://management.azure.com/".into(), ..AzureConfig::default() };
        ArmClient::new(&cfg, "sub-1", Credential::Static("tok".into())).unwrap()
    }

    #[test]
    fn url_construction() {
        let c = client();
        assert_eq!(c.subscription_id(), "sub-1");
        assert_eq!(
            c.vms_url(),
            "https://management.azure.com/subscriptions/sub-1/providers/Microsoft.Compute/virtualMachines?api-version=2024-03-01"
        );
        assert_eq!(
            c.vm_url("rg1", "web01", "runCommand"),
            "https://management.azure.com/subscriptions/sub-1/resourceGroups/rg1/providers/Microsoft.Compute/virtualMachines/web01/runCommand?api-version=2024-03-01"
        );
    }

    #[test]
    fn bearer_from_static_credential() {
        assert_eq!(client().bearer().unwrap(), "Bearer tok");
    }

    #[test]
    fn raw_vm_decoding() {
        let json = r#"{
            "value": [{
                "id": "/subscriptions/s/resourceGroups/RG-Web/providers/Microsoft.Compute/virtualMachines/web01",
                "name": "web01",
                "location": "westeurope",
                "tags": {"System": "X", "Name": "WEB01"},
                "properties": {
                    "hardwareProfile": {"vmSize": "Standard_D2s_v3"},
                    "storageProfile": {"osDisk": {"osType": "Windows"}}
                }
            }, {
                "id": "/subscriptions/s/resourcegroups/rg2/providers/Microsoft.Compute/virtualMachines/lnx",
                "name": "lnx",
                "location": "westeurope",
                "properties": {}
            }],
            "nextLink": null
        }"#;
        let page: ArmList<RawVm> = serde_json::from_str(json).unwrap();
        assert_eq!(page.value.len(), 2);
        let web = &page.value[0];
        assert_eq!(web.resource_group(), Some("RG-Web"));
        assert_eq!(web.os_type(), Some("Windows"));
        assert_eq!(web.vm_size(), Some("Standard_D2s_v3"));
        let lnx = &page.value[1];
        assert_eq!(lnx.resource_group(), Some("rg2"));
        assert!(lnx.tags.is_none());
        assert!(lnx.os_type().is_none());
    }

    #[test]
    fn run_command_output_streams() {
        let json = r#"{"value":[
            {"code":"ComponentStatus/StdOut/succeeded","message":"[]"},
            {"code":"ComponentStatus/StdErr/succeeded","message":"warning: x"}
        ]}"#;
        let out: RunCommandOutput = serde_json::from_str(json).unwrap();
        assert_eq!(out.stdout(), Some("[]"));
        assert_eq!(out.stderr(), Some("warning: x"));

        let empty = RunCommandOutput::default();
        assert_eq!(empty.stdout(), None);
        assert_eq!(empty.stderr(), None);
    }

    #[test]
    fn run_command_body_shape() {
        let script = vec!["Write-Output 1".to_string()];
        let body = RunCommandInput { command_id: RUN_POWERSHELL, script: &script, parameters: Vec::new() };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["commandId"], "RunPowerShellScript");
        assert_eq!(json["script"][0], "Write-Output 1");
        assert!(json["parameters"].as_array().unwrap().is_empty());
    }

    #[test]
    fn retry_after_values() {
        assert_eq!(parse_retry_after("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_retry_after("0"), Some(Duration::from_secs(1)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
