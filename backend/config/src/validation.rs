//! Config validation: deep schema checks with user-friendly error messages.

use crate::schema::VibeStudyConfig;
use thiserror::Error;

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &VibeStudyConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_server(config, &mut report);
    validate_rate_limits(config, &mut report);
    validate_sync(config, &mut report);
    validate_auth(config, &mut report);
    validate_client(config, &mut report);
    validate_logging(config, &mut report);
    report
}

fn validate_server(config: &VibeStudyConfig, report: &mut ValidationReport) {
    let Some(server) = &config.server else { return };
    if server.port == Some(0) {
        report.error("server.port", "port must be > 0");
    }
    if let Some(bind) = &server.bind {
        if bind.parse::<std::net::IpAddr>().is_err() {
            report.error("server.bind", format!("'{bind}' is not an IP address"));
        }
    }
    if server.trust_forwarded_for == Some(true) {
        report.warn(
            "server.trustForwardedFor",
            "Clients can pick their own rate limit bucket unless a proxy overwrites X-Forwarded-For",
        );
    }
}

/// Zero limits or windows would make every request fail at admission. Windows
/// past `i64::MAX` ms overflow the millisecond clock the limiter counts on.
fn validate_rate_limits(config: &VibeStudyConfig, report: &mut ValidationReport) {
    for (name, entry) in &config.rate_limits {
        let path = format!("rateLimits.{name}");
        if name.trim().is_empty() {
            report.error("rateLimits", "Policy name cannot be empty");
        }
        if entry.limit == 0 {
            report.error(format!("{path}.limit"), "limit must be > 0");
        }
        if entry.window_ms == 0 {
            report.error(format!("{path}.windowMs"), "windowMs must be > 0");
        } else if entry.window_ms > i64::MAX as u64 {
            report.error(format!("{path}.windowMs"), "windowMs is too large");
        }
    }
}

fn validate_sync(config: &VibeStudyConfig, report: &mut ValidationReport) {
    let Some(sync) = &config.sync else { return };
    if sync.queue_capacity == Some(0) {
        report.error("sync.queueCapacity", "queueCapacity must be >= 1");
    }
    let Some(retry) = &sync.retry else { return };
    if retry.max_attempts == Some(0) {
        report.error("sync.retry.maxAttempts", "maxAttempts must be >= 1");
    }
    if let Some(factor) = retry.backoff_factor {
        if !factor.is_finite() || factor < 1.0 {
            report.error("sync.retry.backoffFactor", "backoffFactor must be >= 1.0");
        }
    }
    if let (Some(base), Some(max)) = (retry.base_delay_ms, retry.max_delay_ms) {
        if max < base {
            report.warn(
                "sync.retry.maxDelayMs",
                format!("maxDelayMs ({max}) is below baseDelayMs ({base}); every retry waits {max}ms"),
            );
        }
    }
}

fn validate_auth(config: &VibeStudyConfig, report: &mut ValidationReport) {
    let Some(auth) = &config.auth else { return };
    if auth.tokens.is_empty() {
        report.warn("auth.tokens", "No tokens configured; the gateway will reject every progress call");
    }
    for (token, user_id) in &auth.tokens {
        if token.trim().is_empty() {
            report.error("auth.tokens", "Token cannot be empty");
        }
        if user_id.trim().is_empty() {
            report.error("auth.tokens", "Token maps to an empty user id");
        }
    }
}

fn validate_client(config: &VibeStudyConfig, report: &mut ValidationReport) {
    let Some(client) = &config.client else { return };
    if let Some(url) = &client.gateway_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            report.error("client.gatewayUrl", format!("'{url}' must start with http:// or https://"));
        }
    }
    if client.user_id.is_some() && client.access_token.is_none() {
        report.warn("client.accessToken", "userId is set without an access token; the gateway will answer 401");
    }
}

fn validate_logging(config: &VibeStudyConfig, report: &mut ValidationReport) {
    let Some(logging) = &config.logging else { return };
    if let Some(level) = &logging.level {
        if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            report.error(
                "logging.level",
                format!("Unknown level '{level}'. Use one of: {}", LOG_LEVELS.join(", ")),
            );
        }
    }
}
