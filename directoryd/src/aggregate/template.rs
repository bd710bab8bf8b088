use std::collections::HashMap;
use serde_json::{Map, Value};
use shared::protocol::{ENV_API_KEY, ENV_FN_ID, ENV_FN_PASSWORD, ENV_FN_USERNAME, IS_LOCAL_KEY, IS_LOCAL_VAR};
use shared::types::FnCredentials;

/// Variables visible to `$NAME` tokens in request templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: HashMap<String, String>,
}

impl TemplateContext {
    /// Snapshot of the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Directory exchange credentials from the well-known variables.
    /// Unset variables come back empty.
    pub fn credentials(&self) -> FnCredentials {
        let var = |name: &str| self.get(name).unwrap_or_default().to_string();
        FnCredentials {
            fn_id: var(ENV_FN_ID),
            username: var(ENV_FN_USERNAME),
            password: var(ENV_FN_PASSWORD),
            key: var(ENV_API_KEY),
        }
    }
}

const LEGACY_FIELDS: [(&str, &str); 4] = [
    ("fnId", ENV_FN_ID),
    ("username", ENV_FN_USERNAME),
    ("password", ENV_FN_PASSWORD),
    ("key", ENV_API_KEY),
];

/// Builds the outgoing payload for an external source.
///
/// Template strings of the form `$NAME` are looked up in `ctx`, except
/// `$IS_LOCAL` which is the resolved locality. Unset variables drop their
/// key. Without a template the legacy credential fields are sent. In every
/// case `isLocal` is written last and cannot be overridden.
pub fn build_payload(template: Option<&Map<String, Value>>, ctx: &TemplateContext, is_local: bool) -> Map<String, Value> {
    let mut payload = Map::new();

    match template {
        Some(template) => {
            for (key, value) in template {
                let Some(var) = value.as_str().and_then(|s| s.strip_prefix('$')) else {
                    payload.insert(key.clone(), value.clone());
                    continue;
                };
                if var == IS_LOCAL_VAR {
                    payload.insert(key.clone(), Value::Bool(is_local));
                } else if let Some(resolved) = ctx.get(var) {
                    payload.insert(key.clone(), Value::String(resolved.to_string()));
                }
            }
        }
        None => {
            for (key, var) in LEGACY_FIELDS {
                if let Some(resolved) = ctx.get(var).filter(|v| !v.is_empty()) {
                    payload.insert(key.to_string(), Value::String(resolved.to_string()));
                }
            }
        }
    }

    payload.insert(IS_LOCAL_KEY.to_string(), Value::Bool(is_local));
    payload
}
