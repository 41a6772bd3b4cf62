// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Counter Store
//!
//! Abstraction over the shared key-value/counter store backing the rate
//! limiter. Every operation is a **single atomic round trip** — never a
//! separate read-then-write — because two concurrent requests racing on a
//! shared counter must not both observe "under limit".
//!
//! The in-memory implementation mirrors the semantics a Redis deployment
//! provides through Lua scripts (atomic increment-with-TTL, sorted-set
//! sliding window, hash-backed token bucket), with per-key atomicity through
//! `DashMap` entry guards. Deployments spanning multiple processes supply
//! their own implementation against the real store.
//!
//! Time is passed in explicitly (seconds since the Unix epoch) so strategy
//! behavior is testable without wall-clock coupling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Result of one sliding-window round trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlidingWindowOutcome {
    pub allowed: bool,
    /// Requests in the trailing window, including this one when allowed.
    pub count: u64,
    pub remaining: u64,
}

/// Result of one token-bucket round trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketOutcome {
    pub allowed: bool,
    pub tokens_remaining: f64,
}

/// Atomic counter operations against the shared store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter at `key`, setting its TTL on first increment.
    /// Returns the post-increment count.
    async fn incr_fixed_window(&self, key: &str, ttl_secs: u64, now_epoch: f64) -> Result<u64>;

    /// Prune entries older than `now - window`, count the remainder and,
    /// only if under `limit`, record the current request.
    async fn sliding_window(
        &self,
        key: &str,
        window_secs: u64,
        limit: u64,
        now_epoch: f64,
    ) -> Result<SlidingWindowOutcome>;

    /// Refill the bucket by `elapsed * refill_rate` capped at `capacity`,
    /// then deduct `requested` tokens if available. State is persisted on
    /// both outcomes.
    async fn token_bucket(
        &self,
        key: &str,
        capacity: f64,
        refill_rate: f64,
        requested: f64,
        ttl_secs: u64,
        now_epoch: f64,
    ) -> Result<TokenBucketOutcome>;

    /// Drop all keys with the given prefix (administrative reset). Returns
    /// the number of keys removed.
    async fn reset_matching(&self, prefix: &str) -> Result<u64>;
}

enum Slot {
    Counter { count: u64, expires_at: f64 },
    Window { hits: VecDeque<f64>, expires_at: f64 },
    Bucket { tokens: f64, last_refill: f64, expires_at: f64 },
}

impl Slot {
    fn expired(&self, now_epoch: f64) -> bool {
        let expires_at = match self {
            Slot::Counter { expires_at, .. }
            | Slot::Window { expires_at, .. }
            | Slot::Bucket { expires_at, .. } => *expires_at,
        };
        now_epoch >= expires_at
    }
}

/// Sweep cadence: one full-map prune per this many store operations.
const PRUNE_EVERY: u64 = 1024;

/// Process-local [`CounterStore`] for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryCounterStore {
    slots: DashMap<String, Slot>,
    ops: AtomicU64,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every slot whose TTL has elapsed. Runs automatically every
    /// [`PRUNE_EVERY`] operations so dead window-bucket keys do not
    /// accumulate forever.
    fn prune_expired(&self, now_epoch: f64) {
        self.slots.retain(|_, slot| !slot.expired(now_epoch));
    }

    fn maybe_prune(&self, now_epoch: f64) {
        if self.ops.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune_expired(now_epoch);
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr_fixed_window(&self, key: &str, ttl_secs: u64, now_epoch: f64) -> Result<u64> {
        self.maybe_prune(now_epoch);
        let mut entry = self.slots.entry(key.to_string()).or_insert(Slot::Counter {
            count: 0,
            expires_at: now_epoch + ttl_secs as f64,
        });
        match entry.value_mut() {
            Slot::Counter { count, expires_at } => {
                if now_epoch >= *expires_at {
                    *count = 0;
                    *expires_at = now_epoch + ttl_secs as f64;
                }
                *count += 1;
                Ok(*count)
            }
            _ => anyhow::bail!("key {key} holds a non-counter slot"),
        }
    }

    async fn sliding_window(
        &self,
        key: &str,
        window_secs: u64,
        limit: u64,
        now_epoch: f64,
    ) -> Result<SlidingWindowOutcome> {
        self.maybe_prune(now_epoch);
        let mut entry = self.slots.entry(key.to_string()).or_insert(Slot::Window {
            hits: VecDeque::new(),
            expires_at: now_epoch + window_secs as f64,
        });
        match entry.value_mut() {
            Slot::Window { hits, expires_at } => {
                *expires_at = now_epoch + window_secs as f64;
                let cutoff = now_epoch - window_secs as f64;
                while hits.front().is_some_and(|&t| t <= cutoff) {
                    hits.pop_front();
                }
                let count = hits.len() as u64;
                if count < limit {
                    hits.push_back(now_epoch);
                    Ok(SlidingWindowOutcome {
                        allowed: true,
                        count: count + 1,
                        remaining: limit - count - 1,
                    })
                } else {
                    Ok(SlidingWindowOutcome {
                        allowed: false,
                        count,
                        remaining: 0,
                    })
                }
            }
            _ => anyhow::bail!("key {key} holds a non-window slot"),
        }
    }

    async fn token_bucket(
        &self,
        key: &str,
        capacity: f64,
        refill_rate: f64,
        requested: f64,
        ttl_secs: u64,
        now_epoch: f64,
    ) -> Result<TokenBucketOutcome> {
        self.maybe_prune(now_epoch);
        let mut entry = self.slots.entry(key.to_string()).or_insert(Slot::Bucket {
            tokens: capacity,
            last_refill: now_epoch,
            expires_at: now_epoch + ttl_secs as f64,
        });
        match entry.value_mut() {
            Slot::Bucket {
                tokens,
                last_refill,
                expires_at,
            } => {
                if now_epoch >= *expires_at {
                    *tokens = capacity;
                    *last_refill = now_epoch;
                }
                let elapsed = (now_epoch - *last_refill).max(0.0);
                *tokens = (*tokens + elapsed * refill_rate).min(capacity);
                *last_refill = now_epoch;
                *expires_at = now_epoch + ttl_secs as f64;

                if *tokens >= requested {
                    *tokens -= requested;
                    Ok(TokenBucketOutcome {
                        allowed: true,
                        tokens_remaining: *tokens,
                    })
                } else {
                    Ok(TokenBucketOutcome {
                        allowed: false,
                        tokens_remaining: *tokens,
                    })
                }
            }
            _ => anyhow::bail!("key {key} holds a non-bucket slot"),
        }
    }

    async fn reset_matching(&self, prefix: &str) -> Result<u64> {
        let keys: Vec<String> = self
            .slots
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        let removed = keys.len() as u64;
        for key in keys {
            self.slots.remove(&key);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_window_counter_increments() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.incr_fixed_window("k", 60, 0.0).await.unwrap(), 1);
        assert_eq!(store.incr_fixed_window("k", 60, 1.0).await.unwrap(), 2);
        // Counter resets after its TTL elapses.
        assert_eq!(store.incr_fixed_window("k", 60, 61.0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sliding_window_prunes_and_blocks() {
        let store = InMemoryCounterStore::new();
        for t in [0.0, 2.0, 4.0] {
            let out = store.sliding_window("k", 10, 3, t).await.unwrap();
            assert!(out.allowed, "request at t={t} should pass");
        }
        let blocked = store.sliding_window("k", 10, 3, 5.0).await.unwrap();
        assert!(!blocked.allowed);
        assert_eq!(blocked.count, 3);

        // t=0 entry ages out by t=11.
        let after = store.sliding_window("k", 10, 3, 11.0).await.unwrap();
        assert!(after.allowed);
    }

    #[tokio::test]
    async fn test_token_bucket_refills_over_time() {
        let store = InMemoryCounterStore::new();
        for _ in 0..10 {
            let out = store.token_bucket("k", 10.0, 1.0, 1.0, 3600, 100.0).await.unwrap();
            assert!(out.allowed);
        }
        let empty = store.token_bucket("k", 10.0, 1.0, 1.0, 3600, 100.0).await.unwrap();
        assert!(!empty.allowed);

        // 5 seconds later, 5 tokens have refilled.
        for _ in 0..5 {
            let out = store.token_bucket("k", 10.0, 1.0, 1.0, 3600, 105.0).await.unwrap();
            assert!(out.allowed);
        }
        let empty_again = store.token_bucket("k", 10.0, 1.0, 1.0, 3600, 105.0).await.unwrap();
        assert!(!empty_again.allowed);
    }

    #[tokio::test]
    async fn test_expired_slots_are_pruned() {
        let store = InMemoryCounterStore::new();
        store.incr_fixed_window("w:100", 60, 0.0).await.unwrap();
        store.incr_fixed_window("w:200", 60, 100.0).await.unwrap();
        store.sliding_window("sw", 10, 3, 100.0).await.unwrap();
        assert_eq!(store.slots.len(), 3);

        // Only the first bucket's TTL (t=60) has elapsed by t=105.
        store.prune_expired(105.0);
        assert_eq!(store.slots.len(), 2);

        store.prune_expired(1000.0);
        assert_eq!(store.slots.len(), 0);
    }

    #[tokio::test]
    async fn test_reset_matching_removes_prefixed_keys() {
        let store = InMemoryCounterStore::new();
        store.incr_fixed_window("rl:agent:a:1", 60, 0.0).await.unwrap();
        store.incr_fixed_window("rl:agent:b:1", 60, 0.0).await.unwrap();
        let removed = store.reset_matching("rl:agent:a").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.incr_fixed_window("rl:agent:a:1", 60, 1.0).await.unwrap(), 1);
    }
}
