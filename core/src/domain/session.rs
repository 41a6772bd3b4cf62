// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session Key Aggregate
//!
//! Symmetric session keys shared by exactly one agent pair for a bounded
//! time and message volume.
//!
//! ## Invariants
//!
//! - Sessions are keyed by the **unordered** pair, so either side resolves
//!   the same session.
//! - A key is replaced (never mutated in place) once `message_count >=
//!   max_messages` or `now >= expires_at`, whichever comes first.
//! - Rotation is lazy: evaluated on the next `establish` call, not by a
//!   background scheduler.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Canonical unordered agent pair. Constructing the pair from `(a, b)` or
/// `(b, a)` yields the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionPair {
    first: String,
    second: String,
}

impl SessionPair {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                first: a.to_string(),
                second: b.to_string(),
            }
        } else {
            Self {
                first: b.to_string(),
                second: a.to_string(),
            }
        }
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.first == agent_id || self.second == agent_id
    }
}

impl std::fmt::Display for SessionPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.first, self.second)
    }
}

/// One active symmetric key for an agent pair.
#[derive(Debug, Clone)]
pub struct SessionKey {
    pub key_id: Uuid,
    pub pair: SessionPair,
    /// 256-bit symmetric key. Never serialized.
    pub symmetric_key: [u8; 32],
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub message_count: u64,
    pub max_messages: u64,
}

impl SessionKey {
    /// Whether this key may still protect another message at `now`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at && self.message_count < self.max_messages
    }
}
