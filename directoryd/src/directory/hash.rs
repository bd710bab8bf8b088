use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::protocol::{DirectoryView, GroupView, ServiceStatus, ServiceView};
use shared::types::LocalityVerdict;

/// Hash what the directory says plus any live verdict it carries. Latency
/// and the render timestamp change on every request and are left out.
#[derive(Serialize)]
struct HashView<'a> {
    title: &'a str,
    subtitle: &'a str,
    favicon: Option<&'a str>,
    groups: Vec<GroupHashView<'a>>,
}

#[derive(Serialize)]
struct GroupHashView<'a> {
    name: &'a str,
    description: Option<&'a str>,
    locality: LocalityVerdict,
    services: Vec<ServiceHashView<'a>>,
}

#[derive(Serialize)]
struct ServiceHashView<'a> {
    name: &'a str,
    url: &'a str,
    description: Option<&'a str>,
    icon: Option<&'a str>,
    alias: Option<&'a str>,
    clickable: bool,
    href: Option<&'a str>,
    is_local: Option<bool>,
    status: Option<ServiceStatus>,
    http_status: Option<u16>,
}

impl<'a> From<&'a ServiceView> for ServiceHashView<'a> {
    fn from(s: &'a ServiceView) -> Self {
        Self {
            name: &s.name,
            url: &s.url,
            description: s.description.as_deref(),
            icon: s.icon.as_deref(),
            alias: s.alias.as_deref(),
            clickable: s.clickable,
            href: s.href.as_deref(),
            is_local: s.is_local,
            status: s.status.as_ref().map(|r| r.status),
            http_status: s.status.as_ref().and_then(|r| r.http_status),
        }
    }
}

impl<'a> From<&'a GroupView> for GroupHashView<'a> {
    fn from(g: &'a GroupView) -> Self {
        Self {
            name: &g.name,
            description: g.description.as_deref(),
            locality: g.locality,
            services: g.services.iter().map(ServiceHashView::from).collect(),
        }
    }
}

/// Computes a SHA-256 hash of the rendered directory, used as its ETag.
/// Group and service order is content and is kept as rendered.
pub fn compute_hash(view: &DirectoryView) -> String {
    let stable = HashView {
        title: &view.title,
        subtitle: &view.subtitle,
        favicon: view.favicon.as_deref(),
        groups: view.groups.iter().map(GroupHashView::from).collect(),
    };

    let json = serde_json::to_vec(&stable).unwrap_or_default();
    hex::encode(Sha256::digest(&json))
}
