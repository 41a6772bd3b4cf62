// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Rate Limiting Domain Model
//!
//! Rule and status types for the distributed rate limiter. Rules are plain
//! data, deserializable from external configuration (YAML file or the
//! `PALISADE_RATE_LIMIT_RULES` environment variable); the evaluation engine
//! lives in [`crate::infrastructure::rate_limiter`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Strategy used to count requests against a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Window-aligned counter. Simple, but permits up to 2x the limit at
    /// window boundaries — documented behavior, not a bug.
    FixedWindow,
    /// Ordered set of request timestamps; bounds any trailing window to the
    /// exact limit.
    SlidingWindow,
    /// Continuously refilling bucket; allows controlled bursts up to capacity.
    TokenBucket,
}

/// What the rule's identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    /// A single principal (agent id).
    Agent,
    /// A network address.
    Address,
    /// A named endpoint or operation.
    Endpoint,
    /// A tenant (firm) aggregate.
    Tenant,
    /// Everything.
    Global,
}

impl std::fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Agent => "agent",
            Self::Address => "address",
            Self::Endpoint => "endpoint",
            Self::Tenant => "tenant",
            Self::Global => "global",
        };
        write!(f, "{}", s)
    }
}

fn default_priority() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

/// A single rate-limiting rule.
///
/// Rules of the same scope are evaluated in descending `priority` order;
/// the first blocking rule short-circuits the check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub name: String,
    pub scope: RateLimitScope,
    pub strategy: RateLimitStrategy,
    /// Number of requests permitted per window (token-bucket capacity).
    pub limit: u64,
    pub window_seconds: u64,
    /// Burst allowance added on top of `limit` for token-bucket rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_limit: Option<u64>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Transient result of one rate-limit check. Never persisted; recomputed per
/// request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub rule_name: String,
    pub scope: RateLimitScope,
    pub identifier: String,
    pub current_count: u64,
    pub limit: u64,
    pub window_seconds: u64,
    pub reset_time: DateTime<Utc>,
    pub blocked: bool,
    pub remaining: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_deserializes_with_defaults() {
        let yaml = r#"
name: auth_attempts
scope: agent
strategy: fixed_window
limit: 5
window_seconds: 300
"#;
        let rule: RateLimitRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.priority, 1);
        assert!(rule.enabled);
        assert_eq!(rule.burst_limit, None);
        assert_eq!(rule.strategy, RateLimitStrategy::FixedWindow);
    }

    #[test]
    fn test_scope_snake_case_round_trip() {
        let json = serde_json::to_string(&RateLimitScope::Tenant).unwrap();
        assert_eq!(json, "\"tenant\"");
        let back: RateLimitScope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RateLimitScope::Tenant);
    }
}
