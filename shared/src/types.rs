use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

fn default_true() -> bool {
    true
}

/// One navigable entry of the directory.
/// This is the canonical data model used by the daemon, the aggregator and the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Canonical target, unique within a group
    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Explicit icon URL. `None` derives `<origin>/favicon.ico`, an empty
    /// string means "no icon".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Stable identifier used to match static overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default = "default_true")]
    pub clickable: bool,

    #[serde(default = "default_true")]
    pub visible: bool,

    /// Access credential appended to the outbound link on remote access
    #[serde(default, alias = "entry_token", skip_serializing_if = "Option::is_none")]
    pub entry_token: Option<String>,

    /// `None` until locality has been determined
    #[serde(default, alias = "is_local", skip_serializing_if = "Option::is_none")]
    pub is_local: Option<bool>,
}

impl Service {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            description: None,
            icon: None,
            alias: None,
            clickable: true,
            visible: true,
            entry_token: None,
            is_local: None,
        }
    }

    /// A service lacking both a name and a url is never displayed.
    pub fn is_displayable(&self) -> bool {
        !(self.name.is_empty() && self.url.is_empty())
    }
}

/// Upstream directory-listing API backing a static group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryApi {
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Named collection of services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,

    #[serde(default = "default_true")]
    pub visible: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub services: Vec<Service>,

    #[serde(default, rename = "isLocal", alias = "is_local", skip_serializing_if = "Option::is_none")]
    pub is_local: Option<bool>,

    /// Locality beacon for this group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_api: Option<DirectoryApi>,
}

/// Field-name translation table from upstream records to [`Service`].
/// `name` and `url` are mandatory; a source without them is skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub clickable: Option<String>,
    #[serde(default)]
    pub visible: Option<String>,
}

/// Static per-alias patch applied over a fetched service.
/// Only the fields that are set replace fetched values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOverride {
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub clickable: Option<bool>,
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default, alias = "entry_token")]
    pub entry_token: Option<String>,
    #[serde(default, alias = "is_local")]
    pub is_local: Option<bool>,
}

/// Declarative descriptor of a remote directory merged into the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSource {
    pub name: String,
    pub url: String,

    /// HTTP method, POST when unset
    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request payload template. String values starting with `$` name a
    /// context variable; `$IS_LOCAL` is the resolved locality.
    #[serde(default)]
    pub body: Option<Map<String, Value>>,

    #[serde(default)]
    pub check_ip: Option<String>,

    #[serde(default = "default_true")]
    pub visible: bool,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub services: Vec<ServiceOverride>,

    #[serde(default)]
    pub mapping: FieldMapping,
}

impl ExternalSource {
    pub fn method_or_default(&self) -> &str {
        self.method.as_deref().filter(|m| !m.is_empty()).unwrap_or("POST")
    }
}

/// Whether the caller sits on the same network as a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalityVerdict {
    Local,
    Remote,
    Unknown,
}

impl LocalityVerdict {
    pub fn from_local(is_local: bool) -> Self {
        if is_local {
            Self::Local
        } else {
            Self::Remote
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Local => Some(true),
            Self::Remote => Some(false),
            Self::Unknown => None,
        }
    }

    /// Collapses `Unknown` to remote, the more restrictive mode.
    pub fn is_local_or_remote(self) -> bool {
        self.as_bool().unwrap_or(false)
    }
}

/// Credentials for the directory exchange API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FnCredentials {
    pub fn_id: String,
    pub username: String,
    pub password: String,
    pub key: String,
}

impl FnCredentials {
    pub fn is_complete(&self) -> bool {
        !(self.fn_id.is_empty()
            || self.username.is_empty()
            || self.password.is_empty()
            || self.key.is_empty())
    }
}

/// A service as seen by both views of the directory exchange, merged by alias.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub alias: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_url: Option<String>,
}

/// Top-level directory document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryDocument {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub external_sources: Vec<ExternalSource>,
}

impl DirectoryDocument {
    pub fn find_source(&self, name: &str) -> Option<&ExternalSource> {
        self.external_sources.iter().find(|s| s.name == name)
    }
}
