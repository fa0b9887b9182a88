//! Ingestion configuration.
//!
//! Loaded from environment variables, every one optional:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `LEDGERMERGE_STORE_TIMEOUT_MS` | 5000 |
//! | `LEDGERMERGE_CAS_MAX_ATTEMPTS` | 8 |
//! | `LEDGERMERGE_BACKOFF_BASE_MS` | 20 |
//! | `LEDGERMERGE_BACKOFF_MAX_MS` | 2000 |
//! | `LEDGERMERGE_LOG_FORMAT` | `pretty` |
//! | `LEDGERMERGE_KIND_SEPARATOR` | `_` |

use std::time::Duration;

use ledgermerge_core::error::{Error, Result};
use ledgermerge_core::observability::LogFormat;
use ledgermerge_engine::ReconcilerConfig;

use crate::notification::DEFAULT_KIND_SEPARATOR;

/// Per-operation store timeout, in milliseconds.
pub const ENV_STORE_TIMEOUT_MS: &str = "LEDGERMERGE_STORE_TIMEOUT_MS";
/// Attempts per key before a lost race becomes an error.
pub const ENV_CAS_MAX_ATTEMPTS: &str = "LEDGERMERGE_CAS_MAX_ATTEMPTS";
/// First retry delay, in milliseconds.
pub const ENV_BACKOFF_BASE_MS: &str = "LEDGERMERGE_BACKOFF_BASE_MS";
/// Retry delay cap, in milliseconds.
pub const ENV_BACKOFF_MAX_MS: &str = "LEDGERMERGE_BACKOFF_MAX_MS";
/// `json` or `pretty`.
pub const ENV_LOG_FORMAT: &str = "LEDGERMERGE_LOG_FORMAT";
/// Single character between a batch file's kind prefix and the rest of its name.
pub const ENV_KIND_SEPARATOR: &str = "LEDGERMERGE_KIND_SEPARATOR";

/// Configuration for the ingestion path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Deadline for each store call.
    pub store_timeout: Duration,
    /// Attempts per key.
    pub max_attempts: u32,
    /// First retry delay.
    pub backoff_base: Duration,
    /// Retry delay cap.
    pub backoff_max: Duration,
    /// Log output format.
    pub log_format: LogFormat,
    /// Kind prefix separator in object keys.
    pub kind_separator: char,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let reconciler = ReconcilerConfig::default();
        Self {
            store_timeout: reconciler.store_timeout,
            max_attempts: reconciler.max_attempts,
            backoff_base: reconciler.backoff_base,
            backoff_max: reconciler.backoff_max,
            log_format: LogFormat::default(),
            kind_separator: DEFAULT_KIND_SEPARATOR,
        }
    }
}

impl IngestConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a variable is set but unparsable.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a variable is set but unparsable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(lookup);
        let mut config = Self::default();

        if let Some(ms) = vars.get_u64(ENV_STORE_TIMEOUT_MS)? {
            config.store_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = vars.get_u32(ENV_CAS_MAX_ATTEMPTS)? {
            if attempts == 0 {
                return Err(Error::InvalidInput(format!(
                    "{ENV_CAS_MAX_ATTEMPTS} must be at least 1"
                )));
            }
            config.max_attempts = attempts;
        }
        if let Some(ms) = vars.get_u64(ENV_BACKOFF_BASE_MS)? {
            config.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = vars.get_u64(ENV_BACKOFF_MAX_MS)? {
            config.backoff_max = Duration::from_millis(ms);
        }
        if let Some(format) = vars.string(ENV_LOG_FORMAT) {
            config.log_format = format.parse()?;
        }
        if let Some(separator) = vars.string(ENV_KIND_SEPARATOR) {
            config.kind_separator = parse_separator(&separator)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.store_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "store timeout must be greater than zero".to_string(),
            ));
        }
        if self.backoff_base > self.backoff_max {
            return Err(Error::InvalidInput(format!(
                "backoff base ({:?}) exceeds backoff max ({:?})",
                self.backoff_base, self.backoff_max
            )));
        }
        Ok(())
    }

    /// The engine settings carried by this configuration.
    #[must_use]
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            store_timeout: self.store_timeout,
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base,
            backoff_max: self.backoff_max,
        }
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn get_u64(&self, name: &str) -> Result<Option<u64>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u64>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
    }

    fn get_u32(&self, name: &str) -> Result<Option<u32>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u32>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u32: {e}")))
    }
}

fn parse_separator(value: &str) -> Result<char> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c != '/' => Ok(c),
        _ => Err(Error::InvalidInput(format!(
            "{ENV_KIND_SEPARATOR} must be a single character other than '/' (got '{value}')"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<IngestConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        IngestConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, IngestConfig::default());
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 8);
        assert_eq!(config.kind_separator, '_');
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn values_are_trimmed_and_parsed() {
        let config = config_from(&[
            (ENV_STORE_TIMEOUT_MS, " 250 "),
            (ENV_CAS_MAX_ATTEMPTS, "3"),
            (ENV_BACKOFF_BASE_MS, "5"),
            (ENV_BACKOFF_MAX_MS, "50"),
            (ENV_LOG_FORMAT, "json"),
            (ENV_KIND_SEPARATOR, "-"),
        ])
        .unwrap();

        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.kind_separator, '-');

        let engine = config.reconciler_config();
        assert_eq!(engine.max_attempts, 3);
        assert_eq!(engine.backoff_max, Duration::from_millis(50));
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = config_from(&[(ENV_CAS_MAX_ATTEMPTS, "   ")]).unwrap();
        assert_eq!(config.max_attempts, 8);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for vars in [
            [(ENV_STORE_TIMEOUT_MS, "soon")],
            [(ENV_CAS_MAX_ATTEMPTS, "0")],
            [(ENV_STORE_TIMEOUT_MS, "0")],
            [(ENV_LOG_FORMAT, "xml")],
            [(ENV_KIND_SEPARATOR, "__")],
            [(ENV_BACKOFF_BASE_MS, "5000")],
        ] {
            let err = config_from(&vars).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{vars:?}: {err}");
        }
    }
}
