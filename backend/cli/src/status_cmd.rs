//! CLI Status Command
//!
//! Reports gateway health and the effective (redacted) configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use vibestudy_config::{
    collect_redacted_paths, collect_referenced_vars, defaults::DEFAULT_GATEWAY_URL, io::load_raw,
    redact, VibeStudyConfig,
};

use crate::client;
use crate::terminal_output::{note_info, note_success, note_warn, render_fields};

pub(crate) async fn run(config_path: &Path, config: &VibeStudyConfig) -> Result<()> {
    let gateway = config
        .client()
        .gateway_url
        .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());

    println!("\nVibeStudy status\n");
    let learner = client::current_user(config)
        .map(|u| u.id.to_string())
        .unwrap_or_else(|| "(local only)".to_string());
    print!(
        "{}",
        render_fields(&[("gateway", gateway.clone()), ("learner", learner)])
    );
    println!();

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("Failed to build HTTP client")?;
    match http.get(format!("{}/api/health", gateway.trim_end_matches('/'))).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body: Value = resp.json().await.context("Unreadable health response")?;
            note_success(&format!(
                "Gateway {} is up (v{}, uptime {}s)",
                gateway,
                body["version"].as_str().unwrap_or("?"),
                body["uptimeSeconds"].as_u64().unwrap_or(0)
            ));
        }
        Ok(resp) => note_warn(&format!("Gateway answered {}", resp.status())),
        Err(_) => note_warn(&format!("Gateway is not reachable at {gateway}")),
    }

    let raw = load_raw(config_path).await?;
    let value = serde_json::to_value(config).context("Failed to serialize config")?;
    println!();
    print!(
        "{}",
        render_fields(&config_sources(&config_path.display().to_string(), &raw, &value))
    );
    println!();

    note_info("Effective configuration:");
    println!("{}", serde_json::to_string_pretty(&redact(&value))?);
    Ok(())
}

/// Where the config came from: the file, the `${VAR}`s it pulls in and the
/// secret paths masked below.
fn config_sources(file: &str, raw: &Value, effective: &Value) -> Vec<(&'static str, String)> {
    let or_none = |items: Vec<String>| {
        if items.is_empty() {
            "(none)".to_string()
        } else {
            items.join(", ")
        }
    };
    vec![
        ("config", file.to_string()),
        ("env vars", or_none(collect_referenced_vars(raw))),
        ("masked", or_none(collect_redacted_paths(effective))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lists_env_refs_and_masked_paths() {
        let raw = json!({
            "client": { "accessToken": "${VIBESTUDY_TOKEN}", "gatewayUrl": "${GATEWAY}/v1" }
        });
        let effective = json!({
            "client": { "accessToken": "tok-123", "gatewayUrl": "http://localhost/v1" }
        });
        let fields = config_sources("/tmp/config.yaml", &raw, &effective);

        assert_eq!(fields[0], ("config", "/tmp/config.yaml".to_string()));
        assert_eq!(fields[1], ("env vars", "GATEWAY, VIBESTUDY_TOKEN".to_string()));
        assert_eq!(fields[2], ("masked", "client.accessToken".to_string()));
    }

    #[test]
    fn plain_config_reports_none() {
        let fields = config_sources("c.yaml", &json!({}), &json!({ "server": { "port": 8787 } }));
        assert_eq!(fields[1].1, "(none)");
        assert_eq!(fields[2].1, "(none)");
    }
}
