use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::types::{LocalityVerdict, Service};

/// API path prefix
pub const API_PREFIX: &str = "/api";

/// Query parameter carrying the entry token on outbound links
pub const ENTRY_TOKEN_PARAM: &str = "entry-token";

/// Template token replaced by the resolved locality rather than the environment
pub const IS_LOCAL_VAR: &str = "IS_LOCAL";

/// Payload key forced onto every external source request
pub const IS_LOCAL_KEY: &str = "isLocal";

/// Environment variables supplying the legacy credential payload
pub const ENV_FN_ID: &str = "FN_ID";
pub const ENV_FN_USERNAME: &str = "FN_USERNAME";
pub const ENV_FN_PASSWORD: &str = "FN_PASSWORD";
pub const ENV_API_KEY: &str = "API_KEY";

/// Path probed by the image-load locality signal
pub const FAVICON_PATH: &str = "/favicon.ico";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Online,
    Offline,
}

/// Response of `GET /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: ServiceStatus,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckIpStatus {
    Ok,
    Error,
}

/// Response of `GET /check-ip`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIpResponse {
    pub status: CheckIpStatus,
    pub reachable: bool,
}

/// Body of `POST /external-services`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalServicesRequest {
    pub source_name: String,
    pub is_local: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalServicesResponse {
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Outcome of one locality signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalResult {
    pub name: String,
    pub positive: bool,
}

/// Response of `GET /locality`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalityReport {
    pub verdict: LocalityVerdict,
    pub signals: Vec<SignalResult>,
}

impl LocalityReport {
    pub fn unknown() -> Self {
        Self {
            verdict: LocalityVerdict::Unknown,
            signals: Vec::new(),
        }
    }
}

/// A service as rendered for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub clickable: bool,
    /// Absent when the service is not clickable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_local: Option<bool>,
    /// Clickable and reached over the external path
    pub external_access: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub locality: LocalityVerdict,
    pub services: Vec<ServiceView>,
}

/// Response of `GET /directory`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryView {
    pub title: String,
    pub subtitle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    pub groups: Vec<GroupView>,
    pub generated_at: DateTime<Utc>,
}
