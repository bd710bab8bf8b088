//! External source aggregation: build the request from the source's
//! template, fetch, map records through the field table, then overlay
//! static per-alias overrides.

pub mod mapping;
pub mod template;

use std::time::Duration;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use shared::types::{ExternalSource, Service};
use crate::error::FetchError;
use crate::probe::bounded;
use self::mapping::{apply_overrides, map_record, required_fields, SourcePayload};
use self::template::{build_payload, TemplateContext};

#[derive(Debug, Clone)]
pub struct Aggregator {
    client: Client,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Fail-soft aggregation: any failure is logged and yields no services.
    pub async fn aggregate(
        &self,
        source: &ExternalSource,
        is_local: bool,
        ctx: &TemplateContext,
        cancel: &CancellationToken,
    ) -> Vec<Service> {
        match self.try_aggregate(source, is_local, ctx, cancel).await {
            Ok(services) => services,
            Err(FetchError::Config(reason)) => {
                tracing::warn!("Skipping external source {}: {}", source.name, reason);
                Vec::new()
            }
            Err(e) => {
                tracing::error!("Failed to fetch external source {}: {}", source.name, e);
                Vec::new()
            }
        }
    }

    pub async fn try_aggregate(
        &self,
        source: &ExternalSource,
        is_local: bool,
        ctx: &TemplateContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<Service>, FetchError> {
        required_fields(&source.mapping)?;
        let method = parse_method(source.method_or_default())?;
        let headers = request_headers(source)?;

        let payload = build_payload(source.body.as_ref(), ctx, is_local);
        let mut request = self.client.request(method.clone(), &source.url).headers(headers);
        if method != Method::GET && method != Method::HEAD {
            request = request.body(serde_json::to_vec(&payload)?);
        }

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

        let value: Value = serde_json::from_slice(&body)?;
        let (records, entry_token) = SourcePayload::from_value(value).into_parts();

        let services: Vec<Service> = records
            .iter()
            .filter_map(|record| map_record(record, &source.mapping, is_local, entry_token.as_deref()))
            .map(|mut service| {
                apply_overrides(&mut service, &source.services);
                service
            })
            .collect();

        tracing::debug!(
            "External source {} returned {} services (isLocal={})",
            source.name,
            services.len(),
            is_local
        );
        Ok(services)
    }
}

fn parse_method(method: &str) -> Result<Method, FetchError> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| FetchError::Config(format!("invalid HTTP method {:?}", method)))
}

/// JSON content type and no-store, then the source's own headers on top.
fn request_headers(source: &ExternalSource) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    for (name, value) in &source.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| FetchError::Config(format!("invalid header name {:?}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| FetchError::Config(format!("invalid value for header {}", name)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
