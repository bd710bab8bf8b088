//! Client for the upstream directory-listing API.
//!
//! The same endpoint is asked twice, once for the local view and once for
//! the remote one, and the answers are merged by alias. Either view failing
//! only empties that view.

use std::collections::BTreeMap;
use std::time::Duration;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;
use shared::protocol::ENTRY_TOKEN_PARAM;
use shared::types::{DirectoryEntry, FnCredentials};
use crate::aggregate::mapping::scalar_text;
use crate::error::FetchError;
use crate::probe::bounded;

#[derive(Debug, Clone, Default)]
struct ExchangeRecord {
    title: Option<String>,
    url: Option<String>,
    alias: Option<String>,
    description: Option<String>,
}

impl ExchangeRecord {
    /// Scalars of any JSON type are read as text; anything that is not an
    /// object is skipped.
    fn from_value(value: &Value) -> Option<Self> {
        let record = value.as_object()?;
        let text = |key: &str| record.get(key).and_then(scalar_text);
        Some(Self {
            title: text("title"),
            url: text("url"),
            alias: text("alias"),
            description: text("description"),
        })
    }
}

/// Records stay untyped until each is read on its own, so one odd record
/// cannot sink the whole view.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    services: Vec<Value>,
    #[serde(default)]
    entry_token: Option<Value>,
}

/// Append the entry token as a query parameter.
pub fn with_entry_token(url: &str, token: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair(ENTRY_TOKEN_PARAM, token);
            parsed.into()
        }
        Err(_) => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{}{}{}={}", url, separator, ENTRY_TOKEN_PARAM, token)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeClient {
    client: Client,
    timeout: Duration,
}

impl ExchangeClient {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Alias-keyed view of the directory. Incomplete credentials skip the
    /// exchange entirely.
    pub async fn fetch_directory(
        &self,
        api_url: &str,
        credentials: &FnCredentials,
        cancel: &CancellationToken,
    ) -> BTreeMap<String, DirectoryEntry> {
        if !credentials.is_complete() {
            tracing::warn!("Directory exchange credentials missing, skipping {}", api_url);
            return BTreeMap::new();
        }

        let (external, internal) = tokio::join!(
            self.fetch_view(api_url, credentials, false, cancel),
            self.fetch_view(api_url, credentials, true, cancel),
        );
        merge_views(external, internal)
    }

    async fn fetch_view(
        &self,
        api_url: &str,
        credentials: &FnCredentials,
        is_local: bool,
        cancel: &CancellationToken,
    ) -> Vec<ExchangeRecord> {
        match self.try_fetch_view(api_url, credentials, is_local, cancel).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("Directory exchange {} failed (isLocal={}): {}", api_url, is_local, e);
                Vec::new()
            }
        }
    }

    async fn try_fetch_view(
        &self,
        api_url: &str,
        credentials: &FnCredentials,
        is_local: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExchangeRecord>, FetchError> {
        let request = self
            .client
            .get(api_url)
            .header(CONTENT_TYPE, "application/json")
            .query(&[
                ("fnId", credentials.fn_id.as_str()),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
                ("key", credentials.key.as_str()),
                ("isLocal", if is_local { "true" } else { "false" }),
            ]);

        let fetch = async move {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };
        let (status, body) = bounded(fetch, self.timeout, cancel).await?;
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let response: ExchangeResponse = serde_json::from_slice(&body)?;
        if !response.success {
            return Err(FetchError::Rejected);
        }

        let mut records: Vec<ExchangeRecord> = response
            .services
            .iter()
            .filter_map(ExchangeRecord::from_value)
            .collect();
        if !is_local {
            let token = response.entry_token.as_ref().and_then(scalar_text);
            if let Some(token) = token.filter(|t| !t.is_empty()) {
                for record in &mut records {
                    if let Some(url) = record.url.as_mut() {
                        *url = with_entry_token(url, &token);
                    }
                }
            }
        }
        Ok(records)
    }
}

/// External view first, so its names win when both views carry one.
fn merge_views(external: Vec<ExchangeRecord>, internal: Vec<ExchangeRecord>) -> BTreeMap<String, DirectoryEntry> {
    let mut merged: BTreeMap<String, DirectoryEntry> = BTreeMap::new();
    let tagged = external
        .into_iter()
        .map(|r| (r, false))
        .chain(internal.into_iter().map(|r| (r, true)));

    for (record, internal) in tagged {
        let Some(alias) = record.alias.filter(|a| !a.is_empty()) else {
            continue;
        };
        let entry = merged.entry(alias.clone()).or_insert_with(|| DirectoryEntry {
            alias,
            ..Default::default()
        });

        if entry.name.is_empty() {
            if let Some(title) = record.title.filter(|t| !t.is_empty()) {
                entry.name = title;
            }
        }
        if entry.description.is_none() {
            entry.description = record.description.filter(|d| !d.is_empty());
        }
        let slot = if internal {
            &mut entry.internal_url
        } else {
            &mut entry.external_url
        };
        if slot.is_none() {
            *slot = record.url.filter(|u| !u.is_empty());
        }
    }

    for entry in merged.values_mut() {
        if entry.name.is_empty() {
            entry.name = entry.alias.clone();
        }
        if entry.description.is_none() {
            entry.description = Some(entry.alias.clone());
        }
    }
    merged
}
