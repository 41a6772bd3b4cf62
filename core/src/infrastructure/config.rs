// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Security Configuration
//!
//! Behavioral knobs for the security core, deserializable from YAML with
//! humantime durations (`"15m"`, `"90d"`). Custom rate-limit rules can also
//! arrive as JSON through `PALISADE_RATE_LIMIT_RULES`; they are appended
//! after the built-in defaults so operators can tighten limits without
//! rebuilding.
//!
//! The master secret itself is not part of this file — it comes from the
//! environment or a vault (see [`crate::infrastructure::encryption`]).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::rate_limit::RateLimitRule;
use crate::infrastructure::rate_limiter::default_rules;

/// Environment variable carrying extra rate-limit rules as a JSON array.
pub const RATE_LIMIT_RULES_ENV: &str = "PALISADE_RATE_LIMIT_RULES";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Master-key rotation interval for the encryption core.
    #[serde(with = "humantime_serde")]
    pub key_rotation_interval: Duration,

    /// Session-key rotation deadline per agent pair.
    #[serde(with = "humantime_serde")]
    pub session_rotation_interval: Duration,
    /// Message ceiling per session key; rotation triggers at whichever of
    /// time or volume comes first.
    pub session_max_messages: u64,

    /// Failures within this window count toward lockout.
    #[serde(with = "humantime_serde")]
    pub lockout_duration: Duration,
    pub max_failed_attempts: u32,
    /// Lifetime of an issued authentication challenge.
    #[serde(with = "humantime_serde")]
    pub challenge_ttl: Duration,
    /// Credential validity from registration.
    #[serde(with = "humantime_serde")]
    pub credential_ttl: Duration,

    /// How long a captured message stays decryptable at all.
    #[serde(with = "humantime_serde")]
    pub replay_window: Duration,
    /// Replay-cache size ceiling per recipient; oldest half dropped beyond it.
    pub replay_cache_max: usize,
    /// Content-size ceiling before encryption.
    pub max_content_bytes: usize,

    pub audit_max_events: usize,

    /// Fail-open (allow) or fail-closed (reject) when the counter store is
    /// unreachable. Availability-over-strictness tradeoff; cryptographic
    /// paths are unaffected.
    pub fail_open: bool,

    pub rate_limit_rules: Vec<RateLimitRule>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            key_rotation_interval: Duration::from_secs(90 * 24 * 3600),
            session_rotation_interval: Duration::from_secs(4 * 3600),
            session_max_messages: 1000,
            lockout_duration: Duration::from_secs(15 * 60),
            max_failed_attempts: 5,
            challenge_ttl: Duration::from_secs(120),
            credential_ttl: Duration::from_secs(30 * 24 * 3600),
            replay_window: Duration::from_secs(5 * 60),
            replay_cache_max: 10_000,
            max_content_bytes: 50_000,
            audit_max_events: 50_000,
            fail_open: true,
            rate_limit_rules: default_rules(),
        }
    }
}

impl SecurityConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading security config {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing security config {}", path.display()))?;
        config.append_env_rules()?;
        Ok(config)
    }

    /// Default config plus any rules from the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.append_env_rules()?;
        Ok(config)
    }

    fn append_env_rules(&mut self) -> Result<()> {
        let Ok(raw) = std::env::var(RATE_LIMIT_RULES_ENV) else {
            return Ok(());
        };
        let rules: Vec<RateLimitRule> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {RATE_LIMIT_RULES_ENV}"))?;
        info!(count = rules.len(), "loaded custom rate-limit rules from environment");
        self.rate_limit_rules.extend(rules);
        Ok(())
    }

    pub fn key_rotation_interval_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.key_rotation_interval).unwrap_or(chrono::Duration::MAX)
    }

    pub fn session_rotation_interval_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.session_rotation_interval).unwrap_or(chrono::Duration::MAX)
    }

    pub fn lockout_duration_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lockout_duration).unwrap_or(chrono::Duration::MAX)
    }

    pub fn challenge_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.challenge_ttl).unwrap_or(chrono::Duration::MAX)
    }

    pub fn credential_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.credential_ttl).unwrap_or(chrono::Duration::MAX)
    }

    pub fn replay_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.replay_window).unwrap_or(chrono::Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = SecurityConfig::default();
        assert_eq!(config.max_failed_attempts, 5);
        assert_eq!(config.lockout_duration, Duration::from_secs(900));
        assert_eq!(config.session_max_messages, 1000);
        assert_eq!(config.replay_window, Duration::from_secs(300));
        assert!(config.fail_open);
        assert!(!config.rate_limit_rules.is_empty());
    }

    #[test]
    fn test_partial_yaml_overrides_defaults() {
        let yaml = r#"
lockout_duration: 30m
max_failed_attempts: 3
fail_open: false
"#;
        let config: SecurityConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.lockout_duration, Duration::from_secs(1800));
        assert_eq!(config.max_failed_attempts, 3);
        assert!(!config.fail_open);
        // Untouched fields keep their defaults.
        assert_eq!(config.session_max_messages, 1000);
    }

    #[test]
    fn test_rules_deserialize_inside_config() {
        let yaml = r#"
rate_limit_rules:
  - name: custom
    scope: tenant
    strategy: token_bucket
    limit: 50
    window_seconds: 60
    burst_limit: 10
    priority: 3
"#;
        let config: SecurityConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.rate_limit_rules.len(), 1);
        assert_eq!(config.rate_limit_rules[0].burst_limit, Some(10));
    }
}
