//! Config defaults: fills the sections the operator left out.

use crate::io::config_dir;
use crate::schema::{
    LoggingConfig, RateLimitEntry, ServerConfig, StorageConfig, SyncSettings, VibeStudyConfig,
};

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_SYNC_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8787";

/// Built-in policies: `(name, limit, windowMs)`.
pub const DEFAULT_RATE_LIMITS: &[(&str, u32, u64)] = &[
    ("default", 100, 60_000),
    ("progressWrite", 60, 60_000),
    ("progressRead", 120, 60_000),
];

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: VibeStudyConfig) -> VibeStudyConfig {
    let config = apply_server_defaults(config);
    let config = apply_storage_defaults(config);
    let config = apply_rate_limit_defaults(config);
    let config = apply_sync_defaults(config);
    apply_logging_defaults(config)
}

fn apply_server_defaults(mut config: VibeStudyConfig) -> VibeStudyConfig {
    let server = config.server.get_or_insert_with(ServerConfig::default);
    server.bind.get_or_insert_with(|| DEFAULT_BIND.to_string());
    server.port.get_or_insert(DEFAULT_PORT);
    server.trust_forwarded_for.get_or_insert(false);
    config
}

/// Progress is always durable; rate limit counters stay in memory unless a
/// file is configured.
fn apply_storage_defaults(mut config: VibeStudyConfig) -> VibeStudyConfig {
    let storage = config.storage.get_or_insert_with(StorageConfig::default);
    if storage.progress_db.is_none() {
        storage.progress_db = Some(config_dir().join("progress.db").display().to_string());
    }
    config
}

/// Add built-in policies that the file does not override.
fn apply_rate_limit_defaults(mut config: VibeStudyConfig) -> VibeStudyConfig {
    for (name, limit, window_ms) in DEFAULT_RATE_LIMITS {
        config
            .rate_limits
            .entry((*name).to_string())
            .or_insert(RateLimitEntry { limit: *limit, window_ms: *window_ms });
    }
    config
}

fn apply_sync_defaults(mut config: VibeStudyConfig) -> VibeStudyConfig {
    let sync = config.sync.get_or_insert_with(SyncSettings::default);
    sync.queue_capacity.get_or_insert(DEFAULT_SYNC_QUEUE_CAPACITY);
    config
}

fn apply_logging_defaults(mut config: VibeStudyConfig) -> VibeStudyConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    logging.level.get_or_insert_with(|| DEFAULT_LOG_LEVEL.to_string());
    if logging.dir.is_none() {
        logging.dir = Some(config_dir().join("logs").display().to_string());
    }
    logging.json.get_or_insert(false);
    config
}
