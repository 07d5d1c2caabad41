//! Structured logging for VibeStudy services.
//!
//! Console output plus a daily-rolling NDJSON file, and redaction of
//! credentials before they reach either.

pub mod logger;
pub mod redact;

pub use logger::{init_logger, LOG_FILE_PREFIX};
pub use redact::redact_sensitive_data;
