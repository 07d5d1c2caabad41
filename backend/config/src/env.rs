//! Environment handling for config values.
//!
//! Two passes run at load time:
//! - `${VAR_NAME}` references inside string values are substituted from the
//!   process environment (uppercase `[A-Z_][A-Z0-9_]*` names only; `$${VAR}`
//!   escapes to a literal `${VAR}`);
//! - a fixed set of `VIBESTUDY_*` variables override typed fields, so a
//!   container can be configured without a config file.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;

use crate::schema::{ClientConfig, ServerConfig, VibeStudyConfig};

/// `$${VAR}` (escaped) or `${VAR}`. The optional leading `$` tells them apart.
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$?)\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var regex"));

pub const ENV_BIND: &str = "VIBESTUDY_BIND";
pub const ENV_PORT: &str = "VIBESTUDY_PORT";
pub const ENV_GATEWAY_URL: &str = "VIBESTUDY_GATEWAY_URL";
pub const ENV_ACCESS_TOKEN: &str = "VIBESTUDY_ACCESS_TOKEN";
pub const ENV_USER_ID: &str = "VIBESTUDY_USER_ID";

/// Error returned for missing env vars.
#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute `${VAR}` references in a config JSON value tree.
///
/// Only string leaves are processed. A referenced variable that is unset or
/// empty is an error naming the config path it was found at.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    substitute_value(value, &std::env::vars().collect(), "")
}

/// Substitute env vars using a provided map (useful for testing).
pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    substitute_value(value, env, "")
}

fn substitute_value(value: &Value, env: &HashMap<String, String>, path: &str) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, env, path)?)),
        Value::Array(arr) => arr
            .iter()
            .enumerate()
            .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                let child_path = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                result.insert(k.clone(), substitute_value(v, env, &child_path)?);
            }
            Ok(Value::Object(result))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(s: &str, env: &HashMap<String, String>, path: &str) -> Result<String> {
    if !s.contains("${") {
        return Ok(s.to_string());
    }

    let mut missing: Option<MissingEnvVarError> = None;
    let substituted = ENV_VAR_PATTERN.replace_all(s, |caps: &Captures| {
        let var_name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{var_name}}}");
        }
        match env.get(var_name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: var_name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });

    if let Some(err) = missing {
        bail!(err);
    }
    Ok(substituted.into_owned())
}

/// Collect all env var names referenced in a config value tree (for diagnostics).
pub fn collect_referenced_vars(value: &Value) -> Vec<String> {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) => out.extend(
                ENV_VAR_PATTERN
                    .captures_iter(s)
                    .filter(|caps| caps[1].is_empty())
                    .map(|caps| caps[2].to_string()),
            ),
            Value::Array(arr) => arr.iter().for_each(|v| walk(v, out)),
            Value::Object(map) => map.values().for_each(|v| walk(v, out)),
            _ => {}
        }
    }

    let mut vars = Vec::new();
    walk(value, &mut vars);
    vars.sort();
    vars.dedup();
    vars
}

/// Apply `VIBESTUDY_*` overrides from the process environment.
pub fn apply_env_overrides(config: VibeStudyConfig) -> Result<VibeStudyConfig> {
    apply_env_overrides_with(config, &std::env::vars().collect())
}

/// Apply `VIBESTUDY_*` overrides from a provided map (useful for testing).
pub fn apply_env_overrides_with(
    mut config: VibeStudyConfig,
    env: &HashMap<String, String>,
) -> Result<VibeStudyConfig> {
    let get = |name: &str| env.get(name).filter(|v| !v.trim().is_empty()).cloned();

    if let Some(bind) = get(ENV_BIND) {
        config.server.get_or_insert_with(ServerConfig::default).bind = Some(bind);
    }
    if let Some(port) = get(ENV_PORT) {
        let port: u16 = port
            .trim()
            .parse()
            .with_context(|| format!("{ENV_PORT} must be a port number, got '{port}'"))?;
        config.server.get_or_insert_with(ServerConfig::default).port = Some(port);
    }

    fn client(config: &mut VibeStudyConfig) -> &mut ClientConfig {
        config.client.get_or_insert_with(ClientConfig::default)
    }
    if let Some(url) = get(ENV_GATEWAY_URL) {
        client(&mut config).gateway_url = Some(url);
    }
    if let Some(token) = get(ENV_ACCESS_TOKEN) {
        client(&mut config).access_token = Some(token);
    }
    if let Some(user_id) = get(ENV_USER_ID) {
        client(&mut config).user_id = Some(user_id);
    }

    Ok(config)
}
