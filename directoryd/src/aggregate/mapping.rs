use serde_json::Value;
use shared::types::{FieldMapping, Service, ServiceOverride};
use crate::error::FetchError;

/// Recognized shapes of an upstream listing.
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePayload {
    /// A bare array of records
    Records(Vec<Value>),
    /// `{ success: true, services: [...], entryToken? }`
    Envelope {
        records: Vec<Value>,
        entry_token: Option<String>,
    },
    /// Anything else yields no services
    Unrecognized,
}

impl SourcePayload {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(records) => Self::Records(records),
            Value::Object(mut object) => {
                let success = object.get("success").is_some_and(is_truthy);
                match object.remove("services") {
                    Some(Value::Array(records)) if success => Self::Envelope {
                        records,
                        entry_token: object
                            .get("entryToken")
                            .and_then(scalar_text)
                            .filter(|t| !t.is_empty()),
                    },
                    _ => Self::Unrecognized,
                }
            }
            _ => Self::Unrecognized,
        }
    }

    pub fn into_parts(self) -> (Vec<Value>, Option<String>) {
        match self {
            Self::Records(records) => (records, None),
            Self::Envelope { records, entry_token } => (records, entry_token),
            Self::Unrecognized => (Vec::new(), None),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text form of a scalar field. Objects, arrays and null have none.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Only the literal `"false"` (or JSON `false`) disables a flag.
pub fn coerce_flag(value: Option<&Value>) -> bool {
    match value {
        None => true,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s != "false",
        Some(_) => true,
    }
}

/// Field names for the two mandatory mapping entries.
pub fn required_fields(mapping: &FieldMapping) -> Result<(&str, &str), FetchError> {
    let name = mapping.name.as_deref().filter(|f| !f.is_empty());
    let url = mapping.url.as_deref().filter(|f| !f.is_empty());
    match (name, url) {
        (Some(name), Some(url)) => Ok((name, url)),
        _ => Err(FetchError::Config("mapping.name and mapping.url are required".to_string())),
    }
}

/// Maps one upstream record. Records without a name or url are dropped.
pub fn map_record(
    record: &Value,
    mapping: &FieldMapping,
    is_local: bool,
    entry_token: Option<&str>,
) -> Option<Service> {
    let (name_field, url_field) = required_fields(mapping).ok()?;
    let field = |key: Option<&String>| key.and_then(|k| record.get(k.as_str()));
    let text = |key: Option<&String>| field(key).and_then(scalar_text);

    let name = record.get(name_field).and_then(scalar_text).filter(|s| !s.is_empty())?;
    let url = record.get(url_field).and_then(scalar_text).filter(|s| !s.is_empty())?;

    Some(Service {
        name,
        url,
        description: text(mapping.description.as_ref()),
        icon: text(mapping.icon.as_ref()),
        alias: text(mapping.alias.as_ref()),
        clickable: coerce_flag(field(mapping.clickable.as_ref())),
        visible: coerce_flag(field(mapping.visible.as_ref())),
        entry_token: if is_local { None } else { entry_token.map(str::to_string) },
        is_local: Some(is_local),
    })
}

/// Overlays every field the override sets onto `service`.
pub fn apply_override(service: &mut Service, patch: &ServiceOverride) {
    if let Some(alias) = &patch.alias {
        service.alias = Some(alias.clone());
    }
    if let Some(name) = &patch.name {
        service.name = name.clone();
    }
    if let Some(url) = &patch.url {
        service.url = url.clone();
    }
    if let Some(description) = &patch.description {
        service.description = Some(description.clone());
    }
    if let Some(icon) = &patch.icon {
        service.icon = Some(icon.clone());
    }
    if let Some(clickable) = patch.clickable {
        service.clickable = clickable;
    }
    if let Some(visible) = patch.visible {
        service.visible = visible;
    }
    if let Some(token) = &patch.entry_token {
        service.entry_token = Some(token.clone());
    }
    if let Some(is_local) = patch.is_local {
        service.is_local = Some(is_local);
    }
}

/// Applies the first same-alias override, if any. Services without an
/// alias pass through untouched.
pub fn apply_overrides(service: &mut Service, overrides: &[ServiceOverride]) {
    let Some(alias) = service.alias.as_deref() else {
        return;
    };
    if let Some(patch) = overrides.iter().find(|o| o.alias.as_deref() == Some(alias)) {
        apply_override(service, patch);
    }
}
