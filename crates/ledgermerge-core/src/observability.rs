//! Observability infrastructure for ledgermerge.
//!
//! Structured logging with consistent spans. This module provides the
//! subscriber initialisation used by binaries and the span constructors used
//! by the engine and the ingestion path.

use std::str::FromStr;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Error;
use crate::merge_key::MergeKey;
use crate::record::RecordKind;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(Error::InvalidInput(format!(
                "unknown log format '{other}': expected 'json' or 'pretty'"
            ))),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `ledgermerge_engine=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for one reconciliation.
#[must_use]
pub fn reconcile_span(kind: RecordKind, merge_key: &MergeKey) -> Span {
    tracing::info_span!("reconcile", kind = kind.as_str(), key = %merge_key)
}

/// Creates a span for processing one uploaded object.
#[must_use]
pub fn ingest_span(container: &str, object_key: &str) -> Span {
    tracing::info_span!("ingest", container = container, object_key = object_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        // Uses Once internally.
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn test_span_helper_creates_span() {
        let span = reconcile_span(RecordKind::Account, &MergeKey::account(42));
        let _guard = span.enter();
        tracing::info!("test message in span");
    }

    #[test]
    fn test_log_format_parses() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
