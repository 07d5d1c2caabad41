//! `vibestudy-config`: runtime configuration for the VibeStudy gateway and
//! sync client.
//!
//! Provides:
//! - Typed config schema (server, storage, rate limits, sync, auth, client, logging)
//! - YAML loading from `~/.vibestudy/config.yaml` (or `VIBESTUDY_CONFIG_DIR`)
//! - `${ENV_VAR}` substitution and `VIBESTUDY_*` overrides
//! - Default value application
//! - Validation, fatal on errors
//! - Config redaction for safe logging

pub mod defaults;
pub mod env;
pub mod io;
pub mod redact;
pub mod schema;
pub mod validation;

// Re-export most-used types at crate root.
pub use defaults::apply_all_defaults;
pub use env::{
    apply_env_overrides, apply_env_overrides_with, collect_referenced_vars, resolve_env_vars,
    resolve_env_vars_with, MissingEnvVarError,
};
pub use io::{config_dir, config_file_path, load_config};
pub use redact::{collect_redacted_paths, redact};
pub use schema::{
    AuthConfig, ClientConfig, LoggingConfig, RateLimitEntry, RetrySettings, ServerConfig,
    StorageConfig, SyncSettings, VibeStudyConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Load, substitute env vars, apply overrides and defaults, then validate.
///
/// This is the main entry point for loading a config at runtime. Validation
/// errors are fatal; warnings are logged.
pub async fn load_and_prepare(path: &Path) -> Result<VibeStudyConfig> {
    let raw = io::load_raw(path).await?;
    let value = resolve_env_vars(&raw).context("Failed to resolve env vars in config")?;
    let config: VibeStudyConfig = serde_json::from_value(value)
        .with_context(|| format!("Config at {} does not match the schema", path.display()))?;
    let config = apply_env_overrides(config)?;
    prepare(config)
}

/// Apply defaults and validate an already-parsed config.
pub fn prepare(config: VibeStudyConfig) -> Result<VibeStudyConfig> {
    let config = apply_all_defaults(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if let Some(first) = report.errors.into_iter().next() {
        bail!(first);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_and_prepare_rejects_invalid_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path());
        tokio::fs::write(&path, "rateLimits:\n  progressWrite:\n    limit: 0\n    windowMs: 1000\n")
            .await
            .unwrap();

        let err = load_and_prepare(&path).await.unwrap_err().to_string();
        assert!(err.contains("rateLimits.progressWrite.limit"), "{err}");
    }

    #[tokio::test]
    async fn load_and_prepare_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path());
        tokio::fs::write(&path, "server:\n  port: 9321\n").await.unwrap();

        let cfg = load_and_prepare(&path).await.unwrap();
        assert_eq!(cfg.server().port, Some(9321));
        assert!(cfg.rate_limits.contains_key("progressRead"));
    }
}
