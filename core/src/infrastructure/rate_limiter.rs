// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Distributed Rate Limiter
//!
//! Pluggable-strategy request throttling over a shared [`CounterStore`].
//! Rules of a scope are evaluated in descending priority order; the first
//! blocking rule short-circuits with [`SecurityError::RateLimitExceeded`].
//!
//! ## Store failures
//!
//! When the counter store is unreachable the limiter either fails **open**
//! (allows the request, logs a warning — the default, availability over
//! strictness) or fails **closed** ([`SecurityError::Store`]), selected at
//! construction. Cryptographic paths never depend on this choice.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::domain::error::SecurityError;
use crate::domain::rate_limit::{RateLimitRule, RateLimitScope, RateLimitStatus, RateLimitStrategy};
use crate::infrastructure::counter_store::CounterStore;

const KEY_PREFIX: &str = "palisade:ratelimit";

/// Rate limiter evaluating configured rules against a shared counter store.
pub struct DistributedRateLimiter {
    store: Arc<dyn CounterStore>,
    rules: RwLock<Vec<RateLimitRule>>,
    fail_open: bool,
}

impl DistributedRateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, rules: Vec<RateLimitRule>, fail_open: bool) -> Self {
        Self {
            store,
            rules: RwLock::new(rules),
            fail_open,
        }
    }

    /// Limiter with the default rule set: authentication-attempt throttling,
    /// per-agent message throughput, and per-tenant aggregate caps.
    pub fn with_default_rules(store: Arc<dyn CounterStore>) -> Self {
        Self::new(store, default_rules(), true)
    }

    /// Evaluate every enabled rule of `scope` for `identifier`, highest
    /// priority first.
    ///
    /// # Errors
    ///
    /// [`SecurityError::RateLimitExceeded`] with the blocking status and a
    /// retry-after hint; [`SecurityError::Store`] on store failure when
    /// configured fail-closed.
    pub async fn check(
        &self,
        identifier: &str,
        scope: RateLimitScope,
    ) -> Result<Vec<RateLimitStatus>, SecurityError> {
        self.check_at(identifier, scope, Utc::now()).await
    }

    /// [`DistributedRateLimiter::check`] at an explicit instant. Exposed so
    /// window and bucket behavior is testable without wall-clock coupling.
    pub async fn check_at(
        &self,
        identifier: &str,
        scope: RateLimitScope,
        now: DateTime<Utc>,
    ) -> Result<Vec<RateLimitStatus>, SecurityError> {
        let mut applicable: Vec<RateLimitRule> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.enabled && r.scope == scope)
            .cloned()
            .collect();
        applicable.sort_by(|a, b| b.priority.cmp(&a.priority));

        metrics::counter!("palisade_rate_checks_total").increment(1);

        let mut statuses = Vec::with_capacity(applicable.len());
        for rule in applicable {
            let status = self.apply_rule(&rule, identifier, now).await?;
            if status.blocked {
                return Err(self.blocked(status, now));
            }
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// Evaluate a single rule by name, regardless of scope grouping. Used
    /// where a caller throttles one specific operation (e.g. authentication
    /// attempts) without consuming the other counters of that scope.
    pub async fn check_named(
        &self,
        identifier: &str,
        rule_name: &str,
    ) -> Result<RateLimitStatus, SecurityError> {
        self.check_named_at(identifier, rule_name, Utc::now()).await
    }

    pub async fn check_named_at(
        &self,
        identifier: &str,
        rule_name: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitStatus, SecurityError> {
        let rule = self
            .rules
            .read()
            .iter()
            .find(|r| r.enabled && r.name == rule_name)
            .cloned();
        let Some(rule) = rule else {
            // No such rule configured: nothing to enforce.
            debug!(rule_name, "rate-limit rule not configured, allowing");
            return Ok(unlimited_status(rule_name, identifier, now));
        };

        let status = self.apply_rule(&rule, identifier, now).await?;
        if status.blocked {
            return Err(self.blocked(status, now));
        }
        Ok(status)
    }

    pub fn add_rule(&self, rule: RateLimitRule) {
        debug!(name = %rule.name, "added rate-limit rule");
        self.rules.write().push(rule);
    }

    pub fn remove_rule(&self, name: &str) {
        self.rules.write().retain(|r| r.name != name);
    }

    pub fn rules(&self) -> Vec<RateLimitRule> {
        self.rules.read().clone()
    }

    /// Administrative reset of all counters held for `identifier` under
    /// `scope`.
    pub async fn reset(&self, identifier: &str, scope: RateLimitScope) -> Result<(), SecurityError> {
        let names: Vec<String> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.scope == scope)
            .map(|r| r.name.clone())
            .collect();
        for name in names {
            let prefix = format!("{KEY_PREFIX}:{name}:{scope}:{identifier}");
            self.store
                .reset_matching(&prefix)
                .await
                .map_err(|e| SecurityError::Store(e.to_string()))?;
        }
        Ok(())
    }

    async fn apply_rule(
        &self,
        rule: &RateLimitRule,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitStatus, SecurityError> {
        let key = format!("{KEY_PREFIX}:{}:{}:{}", rule.name, rule.scope, identifier);
        let now_epoch = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6;

        let outcome = match rule.strategy {
            RateLimitStrategy::FixedWindow => self.fixed_window(rule, &key, identifier, now_epoch).await,
            RateLimitStrategy::SlidingWindow => self.sliding_window(rule, &key, identifier, now_epoch).await,
            RateLimitStrategy::TokenBucket => self.token_bucket(rule, &key, identifier, now_epoch).await,
        };

        match outcome {
            Ok(status) => Ok(status),
            Err(store_err) if self.fail_open => {
                warn!(
                    rule = %rule.name,
                    error = %store_err,
                    "counter store unavailable, failing open"
                );
                Ok(unlimited_status(&rule.name, identifier, now))
            }
            Err(store_err) => Err(SecurityError::Store(store_err.to_string())),
        }
    }

    async fn fixed_window(
        &self,
        rule: &RateLimitRule,
        key: &str,
        identifier: &str,
        now_epoch: f64,
    ) -> anyhow::Result<RateLimitStatus> {
        // Bucket key carries the window-aligned timestamp: up to 2x the
        // limit can pass across a boundary, which is documented behavior.
        let window_start = (now_epoch as u64) - (now_epoch as u64) % rule.window_seconds;
        let bucketed_key = format!("{key}:{window_start}");
        let count = self
            .store
            .incr_fixed_window(&bucketed_key, rule.window_seconds, now_epoch)
            .await?;

        Ok(RateLimitStatus {
            rule_name: rule.name.clone(),
            scope: rule.scope,
            identifier: identifier.to_string(),
            current_count: count,
            limit: rule.limit,
            window_seconds: rule.window_seconds,
            reset_time: epoch_to_datetime((window_start + rule.window_seconds) as f64),
            blocked: count > rule.limit,
            remaining: rule.limit.saturating_sub(count),
        })
    }

    async fn sliding_window(
        &self,
        rule: &RateLimitRule,
        key: &str,
        identifier: &str,
        now_epoch: f64,
    ) -> anyhow::Result<RateLimitStatus> {
        let outcome = self
            .store
            .sliding_window(key, rule.window_seconds, rule.limit, now_epoch)
            .await?;

        Ok(RateLimitStatus {
            rule_name: rule.name.clone(),
            scope: rule.scope,
            identifier: identifier.to_string(),
            current_count: outcome.count,
            limit: rule.limit,
            window_seconds: rule.window_seconds,
            reset_time: epoch_to_datetime(now_epoch + rule.window_seconds as f64),
            blocked: !outcome.allowed,
            remaining: outcome.remaining,
        })
    }

    async fn token_bucket(
        &self,
        rule: &RateLimitRule,
        key: &str,
        identifier: &str,
        now_epoch: f64,
    ) -> anyhow::Result<RateLimitStatus> {
        let capacity = (rule.limit + rule.burst_limit.unwrap_or(0)) as f64;
        let refill_rate = rule.limit as f64 / rule.window_seconds as f64;
        let outcome = self
            .store
            .token_bucket(key, capacity, refill_rate, 1.0, rule.window_seconds.max(3600), now_epoch)
            .await?;

        Ok(RateLimitStatus {
            rule_name: rule.name.clone(),
            scope: rule.scope,
            identifier: identifier.to_string(),
            current_count: (capacity - outcome.tokens_remaining).round() as u64,
            limit: rule.limit,
            window_seconds: rule.window_seconds,
            reset_time: epoch_to_datetime(now_epoch + rule.window_seconds as f64),
            blocked: !outcome.allowed,
            remaining: outcome.tokens_remaining.floor() as u64,
        })
    }

    fn blocked(&self, status: RateLimitStatus, now: DateTime<Utc>) -> SecurityError {
        metrics::counter!("palisade_rate_blocked_total").increment(1);
        let retry_after_secs = (status.reset_time - now).num_seconds().max(0) as u64;
        SecurityError::RateLimitExceeded {
            status: Box::new(status),
            retry_after_secs,
        }
    }
}

/// Default rule set for the A2A messaging core.
pub fn default_rules() -> Vec<RateLimitRule> {
    vec![
        // Brute-force protection on challenge-response attempts. Kept out
        // of the Agent message scope so message traffic never draws on the
        // auth counter; the authentication service evaluates it by name.
        RateLimitRule {
            name: "auth_attempts".into(),
            scope: RateLimitScope::Address,
            strategy: RateLimitStrategy::FixedWindow,
            limit: 5,
            window_seconds: 300,
            burst_limit: None,
            priority: 10,
            enabled: true,
        },
        // Per-agent message throughput cap.
        RateLimitRule {
            name: "a2a_messages".into(),
            scope: RateLimitScope::Agent,
            strategy: RateLimitStrategy::SlidingWindow,
            limit: 100,
            window_seconds: 60,
            burst_limit: None,
            priority: 8,
            enabled: true,
        },
        // Short-burst absorber on top of the steady per-agent rate.
        RateLimitRule {
            name: "a2a_burst".into(),
            scope: RateLimitScope::Agent,
            strategy: RateLimitStrategy::TokenBucket,
            limit: 200,
            window_seconds: 60,
            burst_limit: Some(50),
            priority: 7,
            enabled: true,
        },
        // Tenant-level aggregate for enterprise accounts.
        RateLimitRule {
            name: "tenant_messages".into(),
            scope: RateLimitScope::Tenant,
            strategy: RateLimitStrategy::SlidingWindow,
            limit: 10_000,
            window_seconds: 3600,
            burst_limit: None,
            priority: 5,
            enabled: true,
        },
    ]
}

fn unlimited_status(rule_name: &str, identifier: &str, now: DateTime<Utc>) -> RateLimitStatus {
    RateLimitStatus {
        rule_name: rule_name.to_string(),
        scope: RateLimitScope::Global,
        identifier: identifier.to_string(),
        current_count: 0,
        limit: u64::MAX,
        window_seconds: 0,
        reset_time: now,
        blocked: false,
        remaining: u64::MAX,
    }
}

fn epoch_to_datetime(epoch: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch as i64, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::counter_store::{
        InMemoryCounterStore, SlidingWindowOutcome, TokenBucketOutcome,
    };
    use async_trait::async_trait;

    fn limiter_with(rule: RateLimitRule) -> DistributedRateLimiter {
        DistributedRateLimiter::new(Arc::new(InMemoryCounterStore::new()), vec![rule], true)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_100 + secs, 0).single().unwrap()
    }

    #[tokio::test]
    async fn test_fixed_window_blocks_sixth_request_in_bucket() {
        let limiter = limiter_with(RateLimitRule {
            name: "fw".into(),
            scope: RateLimitScope::Agent,
            strategy: RateLimitStrategy::FixedWindow,
            limit: 5,
            window_seconds: 60,
            burst_limit: None,
            priority: 1,
            enabled: true,
        });

        for _ in 0..5 {
            limiter.check_at("alpha", RateLimitScope::Agent, at(0)).await.unwrap();
        }
        let err = limiter
            .check_at("alpha", RateLimitScope::Agent, at(0))
            .await
            .unwrap_err();
        match err {
            SecurityError::RateLimitExceeded { status, .. } => {
                assert_eq!(status.current_count, 6);
                // Reset at the bucket boundary.
                let bucket_start = 1_700_000_100 - 1_700_000_100 % 60;
                assert_eq!(status.reset_time.timestamp(), bucket_start + 60);
            }
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sliding_window_bounds_trailing_interval() {
        let limiter = limiter_with(RateLimitRule {
            name: "sw".into(),
            scope: RateLimitScope::Agent,
            strategy: RateLimitStrategy::SlidingWindow,
            limit: 3,
            window_seconds: 10,
            burst_limit: None,
            priority: 1,
            enabled: true,
        });

        for t in [0, 2, 4] {
            limiter.check_at("alpha", RateLimitScope::Agent, at(t)).await.unwrap();
        }
        assert!(limiter.check_at("alpha", RateLimitScope::Agent, at(5)).await.is_err());
        assert!(limiter.check_at("alpha", RateLimitScope::Agent, at(11)).await.is_ok());
    }

    #[tokio::test]
    async fn test_token_bucket_allows_refilled_requests() {
        let limiter = limiter_with(RateLimitRule {
            name: "tb".into(),
            scope: RateLimitScope::Agent,
            strategy: RateLimitStrategy::TokenBucket,
            limit: 10,
            window_seconds: 10, // refill rate 1 token/s
            burst_limit: None,
            priority: 1,
            enabled: true,
        });

        for _ in 0..10 {
            limiter.check_at("alpha", RateLimitScope::Agent, at(0)).await.unwrap();
        }
        assert!(limiter.check_at("alpha", RateLimitScope::Agent, at(0)).await.is_err());

        for _ in 0..5 {
            limiter.check_at("alpha", RateLimitScope::Agent, at(5)).await.unwrap();
        }
        assert!(limiter.check_at("alpha", RateLimitScope::Agent, at(5)).await.is_err());
    }

    #[tokio::test]
    async fn test_priority_order_reports_highest_first() {
        let store = Arc::new(InMemoryCounterStore::new());
        let limiter = DistributedRateLimiter::new(
            store,
            vec![
                RateLimitRule {
                    name: "low".into(),
                    scope: RateLimitScope::Agent,
                    strategy: RateLimitStrategy::FixedWindow,
                    limit: 100,
                    window_seconds: 60,
                    burst_limit: None,
                    priority: 1,
                    enabled: true,
                },
                RateLimitRule {
                    name: "high".into(),
                    scope: RateLimitScope::Agent,
                    strategy: RateLimitStrategy::FixedWindow,
                    limit: 100,
                    window_seconds: 60,
                    burst_limit: None,
                    priority: 9,
                    enabled: true,
                },
            ],
            true,
        );

        let statuses = limiter.check("alpha", RateLimitScope::Agent).await.unwrap();
        assert_eq!(statuses[0].rule_name, "high");
        assert_eq!(statuses[1].rule_name, "low");
    }

    #[tokio::test]
    async fn test_auth_rule_stays_out_of_message_scope() {
        // The send path evaluates every Agent-scope rule, so the auth
        // throttle must live on its own scope or message traffic would
        // exhaust the brute-force counter.
        let auth = default_rules()
            .into_iter()
            .find(|r| r.name == "auth_attempts")
            .unwrap();
        assert_ne!(auth.scope, RateLimitScope::Agent);

        let limiter =
            DistributedRateLimiter::new(Arc::new(InMemoryCounterStore::new()), default_rules(), true);
        // Well past the auth limit of 5, still nowhere near a2a_messages.
        for _ in 0..20 {
            limiter.check("alpha", RateLimitScope::Agent).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_disabled_rules_are_skipped() {
        let mut rule = default_rules().remove(0);
        rule.scope = RateLimitScope::Agent;
        rule.enabled = false;
        rule.limit = 0;
        let limiter = limiter_with(rule);
        // A zero-limit rule would block everything if it were evaluated.
        assert!(limiter.check("alpha", RateLimitScope::Agent).await.is_ok());
    }

    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn incr_fixed_window(&self, _: &str, _: u64, _: f64) -> anyhow::Result<u64> {
            anyhow::bail!("connection refused")
        }
        async fn sliding_window(
            &self,
            _: &str,
            _: u64,
            _: u64,
            _: f64,
        ) -> anyhow::Result<SlidingWindowOutcome> {
            anyhow::bail!("connection refused")
        }
        async fn token_bucket(
            &self,
            _: &str,
            _: f64,
            _: f64,
            _: f64,
            _: u64,
            _: f64,
        ) -> anyhow::Result<TokenBucketOutcome> {
            anyhow::bail!("connection refused")
        }
        async fn reset_matching(&self, _: &str) -> anyhow::Result<u64> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open_by_default() {
        let limiter =
            DistributedRateLimiter::new(Arc::new(UnreachableStore), default_rules(), true);
        assert!(limiter.check("alpha", RateLimitScope::Agent).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed_when_configured() {
        let limiter =
            DistributedRateLimiter::new(Arc::new(UnreachableStore), default_rules(), false);
        assert!(matches!(
            limiter.check("alpha", RateLimitScope::Agent).await,
            Err(SecurityError::Store(_))
        ));
    }
}
