//! Bearer-token acquisition for the management API.
//!
//! Sources are tried in a fixed order: a pre-issued token in
//! `AZURE_ACCESS_TOKEN`, a service principal (`AZURE_TENANT_ID`,
//! `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET`), then the signed-in Azure CLI.

use std::process::Command;

use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::error::{CloudError, CloudErrorKind, CloudResult};

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) >= exp,
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Credential {
    Static(String),
    ClientSecret { tenant_id: String, client_id: String, client_secret: String },
    AzureCli,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
    #[serde(default, rename = "expires_on")]
    expires_on: Option<i64>,
}

impl Credential {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        if let Some(token) = var("AZURE_ACCESS_TOKEN") {
            return Self::Static(token);
        }
        match (var("AZURE_TENANT_ID"), var("AZURE_CLIENT_ID"), var("AZURE_CLIENT_SECRET")) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => {
                Self::ClientSecret { tenant_id, client_id, client_secret }
            }
            _ => Self::AzureCli,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Static(_) => "AZURE_ACCESS_TOKEN",
            Self::ClientSecret { .. } => "service principal",
            Self::AzureCli => "Azure CLI",
        }
    }

    /// Acquire a token scoped to the given management endpoint.
    pub fn acquire(&self, http: &Client, endpoint: &str) -> CloudResult<AccessToken> {
        tracing::debug!(source = self.describe(), "acquiring management token");
        match self {
            Self::Static(token) => Ok(AccessToken { token: token.clone(), expires_at: None }),
            Self::ClientSecret { tenant_id, client_id, client_secret } => {
                let scope = format!("{}/.default", endpoint.trim_end_matches('/'));
                let form = [
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("scope", scope.as_str()),
                ];
                let resp = http
                    .post(token_url(tenant_id))
                    .form(&form)
                    .send()
                    .map_err(|e| CloudError::new(CloudErrorKind::Network, e.to_string()))?;
                let status = resp.status().as_u16();
                let body = resp
                    .text()
                    .map_err(|e| CloudError::new(CloudErrorKind::Network, e.to_string()))?;
                if !(200..300).contains(&status) {
                    return Err(CloudError::from_status(status, &body));
                }
                let parsed: TokenResponse = serde_json::from_str(&body)
                    .map_err(|e| CloudError::new(CloudErrorKind::Parse, format!("token response: {e}")))?;
                Ok(AccessToken {
                    token: parsed.access_token,
                    expires_at: parsed.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
                })
            }
            Self::AzureCli => cli_token(endpoint),
        }
    }
}

fn token_url(tenant_id: &str) -> String {
    format!("https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token")
}

fn cli_token(endpoint: &str) -> CloudResult<AccessToken> {
    let program = if cfg!(windows) { "az.cmd" } else { "az" };
    let resource = format!("{}/", endpoint.trim_end_matches('/'));
    let output = Command::new(program)
        .args(["account", "get-access-token", "--resource", &resource, "--output", "json"])
        .output()
        .map_err(|e| CloudError::new(CloudErrorKind::Auth, format!("could not run `{program}`: {e} (is the Azure CLI installed?)")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CloudError::new(
            CloudErrorKind::Auth,
            format!("`az account get-access-token` failed: {} (try `az login`)", stderr.trim()),
        ));
    }
    parse_cli_token(&String::from_utf8_lossy(&output.stdout))
}

fn parse_cli_token(stdout: &str) -> CloudResult<AccessToken> {
    let parsed: CliTokenResponse = serde_json::from_str(stdout)
        .map_err(|e| CloudError::new(CloudErrorKind::Parse, format!("az token output: {e}")))?;
    let expires_at = parsed.expires_on.and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    Ok(AccessToken { token: parsed.access_token, expires_at })
}
