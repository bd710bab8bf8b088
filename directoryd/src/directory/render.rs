use std::collections::BTreeMap;
use url::Url;
use shared::protocol::{GroupView, ServiceView, ENTRY_TOKEN_PARAM, FAVICON_PATH};
use shared::types::{DirectoryEntry, Group, LocalityVerdict, Service};

/// Explicit icon, else the origin's favicon. An explicit empty string
/// means no icon at all.
pub fn derive_icon(icon: Option<&str>, url: &str) -> Option<String> {
    match icon {
        Some("") => None,
        Some(icon) => Some(icon.to_string()),
        None => Url::parse(url)
            .and_then(|base| base.join(FAVICON_PATH))
            .ok()
            .map(String::from),
    }
}

/// Outbound link for a clickable service. The entry token replaces any
/// token already on the URL; an unparsable URL is linked as is.
pub fn link_for(url: &str, entry_token: Option<&str>) -> String {
    let Some(token) = entry_token.filter(|t| !t.is_empty()) else {
        return url.to_string();
    };
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != ENTRY_TOKEN_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(ENTRY_TOKEN_PARAM, token);
    parsed.into()
}

pub fn service_view(service: Service) -> ServiceView {
    let href = if service.clickable {
        let token = match service.is_local {
            Some(true) => None,
            _ => service.entry_token.as_deref(),
        };
        Some(link_for(&service.url, token))
    } else {
        None
    };

    ServiceView {
        icon: derive_icon(service.icon.as_deref(), &service.url),
        external_access: service.clickable && service.is_local == Some(false),
        href,
        is_local: service.is_local,
        clickable: service.clickable,
        alias: service.alias,
        description: service.description,
        url: service.url,
        name: service.name,
        status: None,
    }
}

/// Case-insensitive match on name or description. No query matches all.
pub fn matches_query(service: &Service, query: Option<&str>) -> bool {
    let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) else {
        return true;
    };
    let query = query.to_lowercase();
    service.name.to_lowercase().contains(&query)
        || service
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(&query))
}

/// Renders a group, or `None` when it has nothing left to show.
pub fn group_view(group: Group, query: Option<&str>) -> Option<GroupView> {
    if !group.visible {
        return None;
    }

    let services: Vec<ServiceView> = group
        .services
        .into_iter()
        .filter(|s| s.visible && s.is_displayable() && matches_query(s, query))
        .map(service_view)
        .collect();

    if services.is_empty() {
        return None;
    }

    Some(GroupView {
        name: group.name,
        description: group.description,
        locality: group
            .is_local
            .map(LocalityVerdict::from_local)
            .unwrap_or(LocalityVerdict::Unknown),
        services,
    })
}

/// Folds exchange entries into a group's services. Local callers prefer
/// the internal URL; remote callers only ever get the external one.
pub fn merge_directory_entries(services: &mut Vec<Service>, entries: BTreeMap<String, DirectoryEntry>, is_local: bool) {
    for entry in entries.into_values() {
        let url = if is_local {
            entry.internal_url.or(entry.external_url)
        } else {
            entry.external_url
        };
        let Some(url) = url else {
            continue;
        };

        match services
            .iter_mut()
            .find(|s| s.alias.as_deref() == Some(entry.alias.as_str()))
        {
            Some(existing) => {
                existing.url = url;
                if existing.name.is_empty() {
                    existing.name = entry.name;
                }
                if existing.description.is_none() {
                    existing.description = entry.description;
                }
            }
            None => {
                let mut service = Service::new(entry.name, url);
                service.alias = Some(entry.alias);
                service.description = entry.description;
                services.push(service);
            }
        }
    }
}
