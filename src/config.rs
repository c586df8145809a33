use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{CloudError, CloudErrorKind, Result};
use crate::inventory::FilterCriteria;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub check: ProfileConfig,
    #[serde(default)]
    pub monitor: ProfileConfig,
}

/// `[filter]` table: which VMs are eligible.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_os_type")]
    pub os_type: String,
    #[serde(default)]
    pub required_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub name_contains: Option<String>,
}

/// `[azure]` table: management endpoint and polling knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct AzureConfig {
    #[serde(default = "default_endpoint")]
    pub management_endpoint: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// `[check]` / `[monitor]` tables: default payload parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub processes: Vec<String>,
}

fn default_log_level() -> String { "warn".to_string() }
fn default_os_type() -> String { "windows".to_string() }
fn default_endpoint() -> String { "https://management.azure.com".to_string() }
fn default_api_version() -> String { "2024-03-01".to_string() }
fn default_poll_interval() -> u64 { 5 }
fn default_request_timeout() -> u64 { 60 }

impl Default for FilterConfig {
    fn default() -> Self {
        Self { os_type: default_os_type(), required_tags: BTreeMap::new(), name_contains: None }
    }
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            management_endpoint: default_endpoint(),
            api_version: default_api_version(),
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            subscription_id: None,
            filter: FilterConfig::default(),
            azure: AzureConfig::default(),
            check: ProfileConfig::default(),
            monitor: ProfileConfig::default(),
        }
    }
}

impl Config {
    /// Subscription precedence: explicit override -> config file -> `AZURE_SUBSCRIPTION_ID`.
    pub fn resolve_subscription(&self, cli_override: Option<&str>) -> Result<String> {
        let env = std::env::var("AZURE_SUBSCRIPTION_ID").ok();
        cli_override
            .map(str::to_string)
            .or_else(|| self.subscription_id.clone())
            .or(env)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CloudError::new(
                    CloudErrorKind::Config,
                    "no subscription configured (use --subscription, subscription_id or AZURE_SUBSCRIPTION_ID)",
                )
                .into()
            })
    }

    /// Build the immutable filter for this invocation. Extra tags override configured ones.
    pub fn criteria(&self, extra_tags: &[(String, String)], name_contains: Option<&str>) -> FilterCriteria {
        let mut required_tags = self.filter.required_tags.clone();
        for (k, v) in extra_tags {
            required_tags.insert(k.clone(), v.clone());
        }
        FilterCriteria {
            os_type: self.filter.os_type.clone(),
            required_tags,
            name_contains: name_contains
                .map(str::to_string)
                .or_else(|| self.filter.name_contains.clone())
                .filter(|s| !s.is_empty()),
        }
    }
}

/// Load configuration from `VMHEALTH_CONFIG` (TOML) if set, otherwise `vmhealth.toml`.
/// If the file doesn't exist, return safe defaults.
pub fn load_config() -> Result<Config> {
    let config_path = std::env::var("VMHEALTH_CONFIG").unwrap_or_else(|_| "vmhealth.toml".into());
    load_config_from(Path::new(&config_path))
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&content)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_missing() {
        let cfg = load_config_from(Path::new("___does_not_exist___vmhealth.toml")).unwrap();
        assert_eq!(cfg.log_level, "warn");
        assert_eq!(cfg.filter.os_type, "windows");
        assert!(cfg.filter.required_tags.is_empty());
        assert_eq!(cfg.azure.api_version, "2024-03-01");
        assert_eq!(cfg.azure.poll_interval_secs, 5);
    }

    #[test]
    fn reads_file() {
        let path = std::env::temp_dir().join(format!("vmhealth_cfg_{}.toml", std::process::id()));
        std::fs::write(&path, r#"log_level = "debug"
subscription_id = "sub-123"

[filter]
name_contains = "WEB"

[filter.required_tags]
System = "LOYALTY"
ARIS = "CLPE"

[monitor]
services = ["ncrpes"]
processes = ["ncrpes"]
"#).unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.subscription_id.as_deref(), Some("sub-123"));
        assert_eq!(cfg.filter.os_type, "windows");
        assert_eq!(cfg.filter.required_tags.get("ARIS").map(String::as_str), Some("CLPE"));
        assert_eq!(cfg.filter.name_contains.as_deref(), Some("WEB"));
        assert_eq!(cfg.monitor.processes, vec!["ncrpes".to_string()]);
        assert!(cfg.check.services.is_empty());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn rejects_malformed_file() {
        let path = std::env::temp_dir().join(format!("vmhealth_bad_{}.toml", std::process::id()));
        std::fs::write(&path, "log_level = [").unwrap();
        assert!(load_config_from(&path).is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn criteria_merges_overrides() {
        let mut cfg = Config::default();
        cfg.filter.required_tags.insert("System".into(), "A".into());
        cfg.filter.name_contains = Some("DB".into());

        let extra = vec![("System".to_string(), "B".to_string()), ("Env".to_string(), "prod".to_string())];
        let criteria = cfg.criteria(&extra, Some("WEB"));
        assert_eq!(criteria.required_tags.get("System").map(String::as_str), Some("B"));
        assert_eq!(criteria.required_tags.len(), 2);
        assert_eq!(criteria.name_contains.as_deref(), Some("WEB"));

        let plain = cfg.criteria(&[], None);
        assert_eq!(plain.name_contains.as_deref(), Some("DB"));
    }

    #[test]
    fn subscription_override_wins() {
        let mut cfg = Config::default();
        cfg.subscription_id = Some("from-file".into());
        assert_eq!(cfg.resolve_subscription(Some("from-cli")).unwrap(), "from-cli");
        assert_eq!(cfg.resolve_subscription(None).unwrap(), "from-file");
    }
}
