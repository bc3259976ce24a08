//! Engine configuration. Loaded once at startup from environment
//! variables; every knob has a policy default.

use std::time::Duration;

use crate::validator::ValidatorConfig;

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long the authorization collaborator may take before the gate
    /// fails closed.
    pub authority_timeout: Duration,
    pub validator: ValidatorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            authority_timeout: Duration::from_secs(5),
            validator: ValidatorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read overrides from the environment:
    ///
    /// - `GQ_AUTHORITY_TIMEOUT_MS` — collaborator timeout in milliseconds
    /// - `GQ_FORBIDDEN_TOKEN` — the banned literal symbol
    /// - `GQ_LARGE_TABLE_ROWS` — parallel-hint row threshold
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(ms) = env_u64("GQ_AUTHORITY_TIMEOUT_MS") {
            cfg.authority_timeout = Duration::from_millis(ms);
        }
        if let Ok(token) = std::env::var("GQ_FORBIDDEN_TOKEN") {
            if !token.is_empty() {
                cfg.validator.forbidden_token = token;
            }
        }
        if let Some(rows) = env_u64("GQ_LARGE_TABLE_ROWS") {
            cfg.validator.large_table_rows = rows;
        }
        cfg
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.authority_timeout, Duration::from_secs(5));
        assert_eq!(cfg.validator.forbidden_token, ";");
        assert_eq!(cfg.validator.large_table_rows, 10_000_000);
    }

    // One test for all env mutation; parallel tests sharing these vars
    // would race.
    #[test]
    fn env_overrides_apply_and_malformed_values_fall_back() {
        std::env::set_var("GQ_AUTHORITY_TIMEOUT_MS", "250");
        std::env::set_var("GQ_LARGE_TABLE_ROWS", "1000");
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.authority_timeout, Duration::from_millis(250));
        assert_eq!(cfg.validator.large_table_rows, 1000);

        std::env::set_var("GQ_AUTHORITY_TIMEOUT_MS", "soon");
        std::env::remove_var("GQ_LARGE_TABLE_ROWS");
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.authority_timeout, Duration::from_secs(5));
        assert_eq!(cfg.validator.large_table_rows, 10_000_000);

        std::env::remove_var("GQ_AUTHORITY_TIMEOUT_MS");
    }
}
