//! Sync client wiring: turns the `client` and `sync` config sections into a
//! running [`SyncManager`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use vibestudy_config::{defaults::DEFAULT_GATEWAY_URL, VibeStudyConfig};
use vibestudy_core::User;
use vibestudy_sync::{
    RemoteProgressStore, RetryPolicy, StaticUserResolver, SyncConfig, SyncManager,
};

/// Retry and queue settings, with config values layered over the defaults.
pub(crate) fn sync_config(config: &VibeStudyConfig) -> SyncConfig {
    let mut sync = SyncConfig::default();
    let Some(settings) = &config.sync else {
        return sync;
    };
    if let Some(capacity) = settings.queue_capacity {
        sync.queue_capacity = capacity;
    }
    if let Some(retry) = &settings.retry {
        let base = RetryPolicy::default();
        sync.retry = RetryPolicy {
            max_attempts: retry.max_attempts.unwrap_or(base.max_attempts),
            base_delay_ms: retry.base_delay_ms.unwrap_or(base.base_delay_ms),
            backoff_factor: retry.backoff_factor.unwrap_or(base.backoff_factor),
            max_delay_ms: retry.max_delay_ms.unwrap_or(base.max_delay_ms),
            jitter: retry.jitter.unwrap_or(base.jitter),
        };
    }
    sync
}

/// Gateway client for the configured learner.
pub(crate) fn remote_store(config: &VibeStudyConfig) -> Result<RemoteProgressStore> {
    let client = config.client();
    let url = client.gateway_url.as_deref().unwrap_or(DEFAULT_GATEWAY_URL);
    let token = client.access_token.unwrap_or_default();
    debug!(gateway = url, has_token = !token.is_empty(), "Building gateway client");
    RemoteProgressStore::new(url, token)
}

/// The learner the client acts for; `None` keeps progress local.
pub(crate) fn current_user(config: &VibeStudyConfig) -> Option<User> {
    config.client().user_id.filter(|id| !id.trim().is_empty()).map(User::new)
}

pub(crate) fn sync_manager(config: &VibeStudyConfig) -> Result<SyncManager> {
    let store = remote_store(config).context("Failed to set up the gateway client")?;
    let resolver = StaticUserResolver::new(current_user(config));
    Ok(SyncManager::new(
        Arc::new(store),
        Arc::new(resolver),
        sync_config(config),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibestudy_config::{ClientConfig, RetrySettings, SyncSettings};

    #[test]
    fn retry_settings_override_defaults_field_by_field() {
        let mut config = VibeStudyConfig::default();
        config.sync = Some(SyncSettings {
            queue_capacity: Some(8),
            retry: Some(RetrySettings {
                max_attempts: Some(2),
                jitter: Some(false),
                ..Default::default()
            }),
        });

        let sync = sync_config(&config);
        assert_eq!(sync.queue_capacity, 8);
        assert_eq!(sync.retry.max_attempts, 2);
        assert!(!sync.retry.jitter);
        assert_eq!(sync.retry.base_delay_ms, RetryPolicy::default().base_delay_ms);
    }

    #[test]
    fn blank_user_id_means_local_only() {
        let mut config = VibeStudyConfig::default();
        assert!(current_user(&config).is_none());

        config.client = Some(ClientConfig { user_id: Some("  ".into()), ..Default::default() });
        assert!(current_user(&config).is_none());

        config.client = Some(ClientConfig { user_id: Some("learner-3".into()), ..Default::default() });
        assert_eq!(current_user(&config).unwrap().id.as_str(), "learner-3");
    }
}
