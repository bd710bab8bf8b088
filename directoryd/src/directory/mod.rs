//! Loading and rendering the service directory.

pub mod hash;
pub mod render;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use shared::protocol::{DirectoryView, GroupView};
use shared::types::{DirectoryDocument, ExternalSource, Group};
use crate::aggregate::template::TemplateContext;
use crate::aggregate::Aggregator;
use crate::config::Config;
use crate::exchange::ExchangeClient;
use crate::locality::{LocalityMemo, LocalityResolver};
use crate::probe::deferred::DeferredStatus;
use crate::probe::status::StatusResolver;
use crate::probe::Prober;
use self::render::{group_view, merge_directory_entries};

const DEFAULT_TITLE: &str = "Service Directory";
const DEFAULT_SUBTITLE: &str = "Quick access to internal services and tools";

/// Reads the directory document. A missing or malformed file renders as
/// an empty directory.
pub async fn load_document(path: &Path) -> DirectoryDocument {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!("Failed to read directory file {}: {}", path.display(), e);
            return DirectoryDocument::default();
        }
    };

    match serde_yaml::from_str::<Option<DirectoryDocument>>(&contents) {
        Ok(document) => document.unwrap_or_default(),
        Err(e) => {
            tracing::error!("Failed to parse directory file {}: {}", path.display(), e);
            DirectoryDocument::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Probe every displayed service
    pub with_status: bool,
    /// Skip locality detection and use this mode everywhere
    pub forced_locality: Option<bool>,
    pub query: Option<String>,
}

/// Everything needed to turn a document into a rendered directory.
#[derive(Clone)]
pub struct Directory {
    pub locality: Arc<LocalityResolver>,
    pub aggregator: Aggregator,
    pub exchange: ExchangeClient,
    pub status: StatusResolver,
    pub status_concurrency: usize,
}

impl Directory {
    pub fn from_config(config: &Config, prober: Prober, client: reqwest::Client) -> Self {
        Self {
            locality: Arc::new(LocalityResolver::standard(
                prober.clone(),
                client.clone(),
                config.probe.fusion,
                config.probe.locality_timeout(),
            )),
            aggregator: Aggregator::new(client.clone(), config.upstream.source_timeout()),
            exchange: ExchangeClient::new(client, config.upstream.exchange_timeout()),
            status: StatusResolver::new(
                prober,
                config.probe.status_timeout(),
                config.probe.check_ip_timeout(),
            ),
            status_concurrency: config.directory.status_concurrency.max(1),
        }
    }

    /// Static groups and external sources resolve concurrently; each beacon
    /// is checked once per render. Status probes, when asked for, start only
    /// after the list is final.
    pub async fn render(
        &self,
        document: DirectoryDocument,
        ctx: &TemplateContext,
        options: &RenderOptions,
        cancel: &CancellationToken,
    ) -> DirectoryView {
        let memo = LocalityMemo::default();
        let DirectoryDocument {
            title,
            subtitle,
            favicon,
            groups,
            external_sources,
        } = document;

        let (static_groups, source_groups) = tokio::join!(
            join_all(groups.into_iter().map(|g| self.resolve_group(g, &memo, ctx, options, cancel))),
            join_all(external_sources.iter().map(|s| self.resolve_source(s, &memo, ctx, options, cancel))),
        );

        let query = options.query.as_deref();
        let mut groups: Vec<_> = static_groups
            .into_iter()
            .chain(source_groups)
            .filter_map(|g| group_view(g, query))
            .collect();

        if options.with_status {
            self.attach_status(&mut groups, cancel).await;
        }

        DirectoryView {
            title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            subtitle: subtitle.unwrap_or_else(|| DEFAULT_SUBTITLE.to_string()),
            favicon,
            groups,
            generated_at: Utc::now(),
        }
    }

    async fn resolve_group(
        &self,
        mut group: Group,
        memo: &LocalityMemo,
        ctx: &TemplateContext,
        options: &RenderOptions,
        cancel: &CancellationToken,
    ) -> Group {
        let is_local = match (options.forced_locality, group.check_ip.as_deref()) {
            (Some(forced), _) => Some(forced),
            (None, Some(beacon)) => memo.resolve(&self.locality, Some(beacon), cancel).await.verdict.as_bool(),
            (None, None) => group.is_local,
        };

        if let Some(api) = group.directory_api.as_ref().filter(|api| api.enabled) {
            let entries = self
                .exchange
                .fetch_directory(&api.url, &ctx.credentials(), cancel)
                .await;
            merge_directory_entries(&mut group.services, entries, is_local.unwrap_or(false));
        }

        if is_local.is_some() {
            for service in &mut group.services {
                service.is_local = is_local;
            }
        }
        group.is_local = is_local;
        group
    }

    /// Sources always get a definite mode: no beacon means remote.
    async fn resolve_source(
        &self,
        source: &ExternalSource,
        memo: &LocalityMemo,
        ctx: &TemplateContext,
        options: &RenderOptions,
        cancel: &CancellationToken,
    ) -> Group {
        let is_local = match options.forced_locality {
            Some(forced) => forced,
            None => memo
                .resolve(&self.locality, source.check_ip.as_deref(), cancel)
                .await
                .verdict
                .is_local_or_remote(),
        };

        let services = self.aggregator.aggregate(source, is_local, ctx, cancel).await;
        Group {
            name: source.name.clone(),
            visible: source.visible,
            description: source.description.clone(),
            services,
            is_local: Some(is_local),
            check_ip: source.check_ip.clone(),
            directory_api: None,
        }
    }

    /// Services sharing a URL share one probe.
    async fn attach_status(&self, groups: &mut [GroupView], cancel: &CancellationToken) {
        let mut cells: HashMap<String, DeferredStatus> = HashMap::new();
        for service in groups.iter().flat_map(|g| g.services.iter()) {
            cells
                .entry(service.url.clone())
                .or_insert_with(|| DeferredStatus::new(service.url.clone()));
        }

        let probes: Vec<_> = cells
            .values()
            .map(|cell| cell.get_or_probe(&self.status, cancel))
            .collect();
        stream::iter(probes)
            .buffer_unordered(self.status_concurrency)
            .for_each(|_| async {})
            .await;

        for service in groups.iter_mut().flat_map(|g| g.services.iter_mut()) {
            service.status = cells.get(&service.url).and_then(|cell| cell.peek()).cloned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use axum::{routing::{get, post}, Json, Router};
    use serde_json::json;
    use shared::protocol::ServiceStatus;
    use shared::types::LocalityVerdict;
    use crate::testing;

    fn directory() -> Directory {
        let mut config = Config::default();
        config.probe.locality_timeout_ms = 1000;
        config.probe.status_timeout_ms = 1000;
        Directory::from_config(&config, Prober::new("directoryd-test").unwrap(), reqwest::Client::new())
    }

    fn parse(yaml: &str) -> DirectoryDocument {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_load_document_degrades_to_empty() {
        let missing = load_document(Path::new("/nonexistent/services.yaml")).await;
        assert!(missing.groups.is_empty());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"groups: [this is: not valid").unwrap();
        let malformed = load_document(file.path()).await;
        assert_eq!(malformed, DirectoryDocument::default());

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(load_document(empty.path()).await, DirectoryDocument::default());
    }

    #[tokio::test]
    async fn test_render_static_and_external_groups() {
        let beacon = testing::serve(Router::new().route("/", get(|| async { "beacon" }))).await;
        let upstream = testing::serve(Router::new().route(
            "/list",
            post(|| async {
                Json(json!({
                    "success": true,
                    "entryToken": "tok",
                    "services": [
                        { "title": "db", "url": "http://db.example", "alias": "db1" },
                        { "title": "ghost", "url": "http://ghost", "visible": "false" }
                    ]
                }))
            }),
        ))
        .await;
        let closed = testing::closed_url().await;

        let document = parse(&format!(
            r#"
title: Lab
groups:
  - name: Core
    check_ip: {beacon}
    services:
      - name: router
        url: http://10.0.0.1
  - name: Offsite
    check_ip: {closed}
    services:
      - name: wiki
        url: http://wiki.example
  - name: Empty
    services: []
external_sources:
  - name: nas
    url: {upstream}/list
    mapping:
      name: title
      url: url
      alias: alias
      visible: visible
    services:
      - alias: db1
        description: Main database
"#
        ));

        let view = directory()
            .render(document, &TemplateContext::default(), &RenderOptions::default(), &CancellationToken::new())
            .await;

        assert_eq!(view.title, "Lab");
        assert_eq!(view.subtitle, DEFAULT_SUBTITLE);
        let names: Vec<&str> = view.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Core", "Offsite", "nas"]);

        assert_eq!(view.groups[0].locality, LocalityVerdict::Local);
        assert_eq!(view.groups[0].services[0].is_local, Some(true));
        assert_eq!(view.groups[1].locality, LocalityVerdict::Remote);
        assert!(view.groups[1].services[0].external_access);

        let nas = &view.groups[2];
        assert_eq!(nas.locality, LocalityVerdict::Remote);
        assert_eq!(nas.services.len(), 1);
        assert_eq!(nas.services[0].description.as_deref(), Some("Main database"));
        assert_eq!(nas.services[0].href.as_deref(), Some("http://db.example/?entry-token=tok"));
        assert!(nas.services[0].status.is_none());
    }

    #[tokio::test]
    async fn test_render_forced_mode_query_and_status() {
        let site = testing::serve(Router::new().route("/", get(|| async { "ok" }))).await;
        let document = parse(&format!(
            r#"
groups:
  - name: Apps
    check_ip: 192.0.2.1
    services:
      - name: Grafana
        url: {site}/
        description: Dashboards
      - name: Wiki
        url: {site}/
"#
        ));

        let options = RenderOptions {
            with_status: true,
            forced_locality: Some(true),
            query: Some("dash".to_string()),
        };
        let view = directory()
            .render(document, &TemplateContext::default(), &options, &CancellationToken::new())
            .await;

        assert_eq!(view.title, DEFAULT_TITLE);
        assert_eq!(view.groups.len(), 1);
        assert_eq!(view.groups[0].locality, LocalityVerdict::Local);
        assert_eq!(view.groups[0].services.len(), 1);
        let status = view.groups[0].services[0].status.as_ref().unwrap();
        assert_eq!(status.status, ServiceStatus::Online);
    }

    #[tokio::test]
    async fn test_shared_url_is_probed_once_per_render() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let site = testing::serve(Router::new().route(
            "/",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        ))
        .await;
        let yaml = format!(
            r#"
groups:
  - name: Apps
    services:
      - name: Grafana
        url: {site}/
  - name: Mirrors
    services:
      - name: Grafana mirror
        url: {site}/
"#
        );
        let options = RenderOptions {
            with_status: true,
            ..Default::default()
        };
        let directory = directory();
        let cancel = CancellationToken::new();

        let view = directory.render(parse(&yaml), &TemplateContext::default(), &options, &cancel).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(view.groups[0].services[0].status, view.groups[1].services[0].status);
        assert!(view.groups[1].services[0].status.is_some());

        directory.render(parse(&yaml), &TemplateContext::default(), &options, &cancel).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_source_does_not_block_others() {
        let closed = testing::closed_url().await;
        let document = parse(&format!(
            r#"
groups:
  - name: Core
    services:
      - name: router
        url: http://10.0.0.1
external_sources:
  - name: broken
    url: {closed}/list
    mapping:
      name: title
      url: url
  - name: unmapped
    url: {closed}/list
    mapping:
      name: title
"#
        ));

        let view = directory()
            .render(document, &TemplateContext::default(), &RenderOptions::default(), &CancellationToken::new())
            .await;
        assert_eq!(view.groups.len(), 1);
        assert_eq!(view.groups[0].name, "Core");
        assert_eq!(view.groups[0].locality, LocalityVerdict::Unknown);
    }
}
