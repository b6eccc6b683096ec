//! Logging and tracing initialization.
//!
//! [`init_tracing`] configures structured logging in one of two modes:
//! - **JSON mode** (`json = true`): machine-readable output with
//!   microsecond timestamps for log aggregation.
//! - **Pretty mode** (`json = false`): human-readable colored output for
//!   local development.
//!
//! Both modes respect `RUST_LOG` for filtering (e.g.,
//! `RUST_LOG=xmaker_oms=debug,xmaker_outbox=trace`).
//!
//! A [`SecretSanitizer`] layer watches span and event fields for values that
//! look like API keys and warns when one is about to be logged.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize the global tracing subscriber.
///
/// # Panics
///
/// Panics if the global subscriber has already been set.
pub fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(SecretSanitizer);

    if json {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(MicrosecondTimer)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE);

        registry.with(json_layer).init();
    } else {
        let pretty_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false)
            .with_span_events(FmtSpan::CLOSE);

        registry.with(pretty_layer).init();
    }
}

/// Custom timer emitting microsecond-precision timestamps for JSON logs.
#[derive(Debug, Clone)]
struct MicrosecondTimer;

impl tracing_subscriber::fmt::time::FormatTime for MicrosecondTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))
    }
}

/// A tracing layer that flags field values matching common API key patterns.
///
/// Patterns detected:
/// - Base64-like strings of 32+ characters
/// - Hex strings of 40+ characters
/// - Fields named `api_key`, `secret`, `operation_key`, `password`,
///   `token`, or `signature`
#[derive(Debug, Clone)]
pub struct SecretSanitizer;

impl<S> Layer<S> for SecretSanitizer
where
    S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_new_span(
        &self,
        attrs: &span::Attributes<'_>,
        _id: &span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = SecretCheckVisitor::default();
        attrs.record(&mut visitor);
        if visitor.found_secret {
            tracing::warn!(
                "Potential secret detected in span fields — ensure sensitive values are not logged"
            );
        }
    }

    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = SecretCheckVisitor::default();
        event.record(&mut visitor);
        if visitor.found_secret {
            tracing::warn!(
                "Potential secret detected in event fields — ensure sensitive values are not logged"
            );
        }
    }
}

/// Visitor that checks field names and values for secret-like patterns.
#[derive(Default)]
struct SecretCheckVisitor {
    found_secret: bool,
}

/// Field names that always indicate secrets regardless of value.
const SENSITIVE_FIELD_NAMES: &[&str] = &[
    "api_key",
    "secret",
    "operation_key",
    "password",
    "token",
    "signature",
    "private_key",
    "signed_tx",
];

impl SecretCheckVisitor {
    /// Check if a string value looks like an API key or secret.
    fn looks_like_secret(value: &str) -> bool {
        if value.len() < 32 {
            return false;
        }

        let alnum_count = value.chars().filter(|c| c.is_alphanumeric()).count();
        let ratio = alnum_count as f64 / value.len() as f64;

        if ratio > 0.85 {
            let is_base64_like = value
                .chars()
                .all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '=');
            if is_base64_like {
                return true;
            }

            if value.len() >= 40 && value.chars().all(|c| c.is_ascii_hexdigit()) {
                return true;
            }
        }

        false
    }
}

impl Visit for SecretCheckVisitor {
    fn record_debug(&mut self, field: &Field, _value: &dyn fmt::Debug) {
        if SENSITIVE_FIELD_NAMES.contains(&field.name()) {
            self.found_secret = true;
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if SENSITIVE_FIELD_NAMES.contains(&field.name()) {
            self.found_secret = true;
        } else if Self::looks_like_secret(value) {
            self.found_secret = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_string_not_secret() {
        assert!(!SecretCheckVisitor::looks_like_secret("hello"));
    }

    #[test]
    fn test_base64_like_key_flagged() {
        let fake_key = "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A";
        assert!(SecretCheckVisitor::looks_like_secret(fake_key));
    }

    #[test]
    fn test_hex_key_flagged() {
        let fake_hex = "aabbccddee00112233445566778899aabbccddee00112233";
        assert!(SecretCheckVisitor::looks_like_secret(fake_hex));
    }

    #[test]
    fn test_normal_message_not_flagged() {
        assert!(!SecretCheckVisitor::looks_like_secret(
            "connected to destination account stream for ADAUSDM"
        ));
    }

    #[test]
    fn test_sensitive_field_names() {
        assert!(SENSITIVE_FIELD_NAMES.contains(&"api_key"));
        assert!(SENSITIVE_FIELD_NAMES.contains(&"operation_key"));
        assert!(SENSITIVE_FIELD_NAMES.contains(&"signed_tx"));
        assert!(!SENSITIVE_FIELD_NAMES.contains(&"symbol"));
    }
}
