//! Config redaction: produce safe-to-log config snapshots by masking secrets.
//!
//! Masks access tokens wherever they appear. The gateway token table is keyed
//! by the secret itself, so its keys are masked rather than its values.

use serde_json::Value;

/// Keys whose string value is a secret.
static SECRET_KEYS: &[&str] = &[
    "accessToken",
    "access_token",
    "token",
    "secret",
    "password",
    "apiKey",
    "api_key",
];

/// Keys whose object children are keyed by secrets.
static SECRET_MAP_KEYS: &[&str] = &["tokens"];

/// Redact a config JSON value, masking every secret with a short hint.
pub fn redact(value: &Value) -> Value {
    redact_recursive(value, "")
}

fn is_secret_key(key: &str) -> bool {
    SECRET_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

fn is_secret_map(key: &str) -> bool {
    SECRET_MAP_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// First four characters plus `***`, or just `***` for short secrets.
fn mask(secret: &str) -> String {
    if secret.chars().count() > 8 {
        format!("{}***", secret.chars().take(4).collect::<String>())
    } else {
        "***".to_string()
    }
}

fn redact_recursive(value: &Value, key: &str) -> Value {
    match value {
        Value::String(s) if is_secret_key(key) && !s.is_empty() => Value::String(mask(s)),
        Value::Array(arr) => Value::Array(arr.iter().map(|v| redact_recursive(v, key)).collect()),
        Value::Object(map) if is_secret_map(key) => {
            let mut result = serde_json::Map::new();
            for (i, (k, v)) in map.iter().enumerate() {
                // Keep masked keys distinct so the entry count stays visible.
                result.insert(format!("{}#{i}", mask(k)), v.clone());
            }
            Value::Object(result)
        }
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                result.insert(k.clone(), redact_recursive(v, k));
            }
            Value::Object(result)
        }
        other => other.clone(),
    }
}

/// Collect all field paths holding secrets (for diagnostics).
pub fn collect_redacted_paths(value: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    collect_paths_recursive(value, "", &mut paths);
    paths
}

fn collect_paths_recursive(value: &Value, path: &str, out: &mut Vec<String>) {
    let key = path.rsplit('.').next().unwrap_or("");
    match value {
        Value::String(s) if !s.is_empty() && is_secret_key(key) => out.push(path.to_string()),
        Value::Object(map) if is_secret_map(key) && !map.is_empty() => out.push(path.to_string()),
        Value::Array(arr) => {
            for (i, v) in arr.iter().enumerate() {
                collect_paths_recursive(v, &format!("{path}[{i}]"), out);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                let child_path = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                collect_paths_recursive(v, &child_path, out);
            }
        }
        _ => {}
    }
}
