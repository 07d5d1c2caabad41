//! `vibestudy serve`: wire stores, limiter and gateway from config.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use vibestudy_config::{defaults, VibeStudyConfig};
use vibestudy_gateway::{start_server, GatewayState, TokenTable};
use vibestudy_ratelimit::{
    spawn_sweeper, CounterStore, InMemoryCounterStore, RateLimitPolicies, RateLimiter,
    SqliteCounterStore,
};
use vibestudy_sync::SqliteProgressStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Validated policy table from the `rateLimits` section.
pub(crate) fn policies(config: &VibeStudyConfig) -> Result<RateLimitPolicies> {
    let table = RateLimitPolicies::from_entries(
        config
            .rate_limits
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.limit, entry.window_ms)),
    )?;
    Ok(table)
}

fn ensure_parent(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

pub(crate) async fn run(config: VibeStudyConfig, port: Option<u16>) -> Result<()> {
    let server = config.server();
    let storage = config.storage();

    let bind: IpAddr = server
        .bind
        .as_deref()
        .unwrap_or(defaults::DEFAULT_BIND)
        .parse()
        .context("server.bind is not an IP address")?;
    let port = port.or(server.port).unwrap_or(defaults::DEFAULT_PORT);
    let addr = SocketAddr::new(bind, port);

    let counters: Arc<dyn CounterStore> = match &storage.rate_limit_db {
        Some(path) => {
            ensure_parent(path)?;
            Arc::new(SqliteCounterStore::open(path)?)
        }
        None => Arc::new(InMemoryCounterStore::new()),
    };
    let limiter = RateLimiter::new(counters);
    let sweeper = spawn_sweeper(limiter.clone(), SWEEP_INTERVAL);

    let progress_path = storage
        .progress_db
        .context("storage.progressDb is not configured")?;
    ensure_parent(&progress_path)?;
    let progress = Arc::new(SqliteProgressStore::open(&progress_path)?);

    let tokens = TokenTable::new(config.tokens());
    let state = GatewayState::new(limiter, policies(&config)?, progress, tokens)
        .with_trust_forwarded_for(server.trust_forwarded_for.unwrap_or(false));

    info!(
        %addr,
        progress_db = %progress_path,
        rate_limit_db = storage.rate_limit_db.as_deref().unwrap_or("memory"),
        "Starting VibeStudy gateway"
    );

    let result = tokio::select! {
        result = start_server(addr, state) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };
    sweeper.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibestudy_config::{apply_all_defaults, RateLimitEntry};

    #[test]
    fn default_policies_cover_progress_routes() {
        let table = policies(&apply_all_defaults(VibeStudyConfig::default())).unwrap();
        assert_eq!(table.get(vibestudy_gateway::PROGRESS_WRITE).limit(), 60);
        assert_eq!(table.get(vibestudy_gateway::PROGRESS_READ).limit(), 120);
        assert_eq!(table.default_policy().limit(), 100);
    }

    #[test]
    fn zero_limit_is_rejected() {
        let mut config = VibeStudyConfig::default();
        config
            .rate_limits
            .insert("progressWrite".into(), RateLimitEntry { limit: 0, window_ms: 1_000 });
        assert!(policies(&config).is_err());
    }
}
