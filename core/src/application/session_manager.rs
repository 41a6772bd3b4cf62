// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Secure Session Manager
//!
//! Pairwise symmetric session keys for authenticated agents.
//!
//! ## Invariants
//!
//! - A session is keyed by the unordered agent pair: `(a, b)` and `(b, a)`
//!   resolve to the same key.
//! - Both endpoints must be authenticated before a session is established.
//! - A key is usable until it either reaches its age limit or its message
//!   ceiling; the next establish call after that mints a replacement.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rand::RngCore;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::audit::AuditSeverity;
use crate::domain::error::SecurityError;
use crate::domain::session::{SessionKey, SessionPair};
use crate::infrastructure::audit_log::AuditLog;
use crate::infrastructure::config::SecurityConfig;

use super::authentication::AuthenticationService;

pub struct SessionManager {
    auth: Arc<AuthenticationService>,
    audit: Arc<AuditLog>,
    sessions: DashMap<SessionPair, SessionKey>,
    config: SecurityConfig,
}

impl SessionManager {
    pub fn new(
        auth: Arc<AuthenticationService>,
        audit: Arc<AuditLog>,
        config: SecurityConfig,
    ) -> Self {
        Self {
            auth,
            audit,
            sessions: DashMap::new(),
            config,
        }
    }

    /// Establish (or reuse) the session between two agents.
    ///
    /// Returns the live key for the pair, minting a new one when none exists
    /// or the current one has expired or hit its message ceiling. Rotation is
    /// audited; routine reuse is not.
    pub fn establish(&self, agent_a: &str, agent_b: &str) -> Result<SessionKey, SecurityError> {
        for endpoint in [agent_a, agent_b] {
            if !self.auth.is_authenticated(endpoint) {
                return Err(SecurityError::NotAuthenticated(endpoint.to_string()));
            }
        }

        let pair = SessionPair::new(agent_a, agent_b);
        let now = Utc::now();

        let entry = self.sessions.entry(pair.clone());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(ref occupied)
                if occupied.get().is_usable(now) =>
            {
                debug!(session = %pair, "reusing session key");
                return Ok(occupied.get().clone());
            }
            _ => {}
        }

        let rotated = matches!(entry, dashmap::mapref::entry::Entry::Occupied(_));
        let key = self.mint_key(pair.clone());
        let fresh = key.clone();
        match entry {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                occupied.insert(key);
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(key);
            }
        }

        let event_type = if rotated {
            "SESSION_ROTATED"
        } else {
            "SESSION_ESTABLISHED"
        };
        self.audit.record(
            event_type,
            AuditSeverity::Info,
            agent_a,
            self.auth.tenant_of(agent_a).as_deref(),
            session_details(&fresh),
        );
        info!(session = %pair, key_id = %fresh.key_id, rotated, "session key issued");
        metrics::counter!("palisade_sessions_established_total").increment(1);
        Ok(fresh)
    }

    /// Look up the live session for a pair without establishing one.
    pub fn resolve(&self, agent_a: &str, agent_b: &str) -> Option<SessionKey> {
        let pair = SessionPair::new(agent_a, agent_b);
        let now = Utc::now();
        self.sessions
            .get(&pair)
            .filter(|key| key.is_usable(now))
            .map(|key| key.clone())
    }

    /// Count one message against the pair's session. Returns the updated
    /// count, or `None` when no session exists.
    pub fn increment_message_count(&self, agent_a: &str, agent_b: &str) -> Option<u64> {
        let pair = SessionPair::new(agent_a, agent_b);
        self.sessions.get_mut(&pair).map(|mut key| {
            key.message_count += 1;
            key.message_count
        })
    }

    /// Tear down the session for a pair, if any.
    pub fn terminate(&self, agent_a: &str, agent_b: &str) -> bool {
        let pair = SessionPair::new(agent_a, agent_b);
        if let Some((_, key)) = self.sessions.remove(&pair) {
            self.audit.record(
                "SESSION_TERMINATED",
                AuditSeverity::Info,
                agent_a,
                self.auth.tenant_of(agent_a).as_deref(),
                session_details(&key),
            );
            true
        } else {
            false
        }
    }

    pub fn active_sessions(&self) -> usize {
        let now = Utc::now();
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_usable(now))
            .count()
    }

    fn mint_key(&self, pair: SessionPair) -> SessionKey {
        let mut symmetric_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut symmetric_key);
        let now = Utc::now();
        SessionKey {
            key_id: Uuid::new_v4(),
            pair,
            symmetric_key,
            created_at: now,
            expires_at: now + self.config.session_rotation_interval_chrono(),
            message_count: 0,
            max_messages: self.config.session_max_messages,
        }
    }
}

fn session_details(key: &SessionKey) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("session".into(), json!(key.pair.to_string()));
    details.insert("key_id".into(), json!(key.key_id));
    details.insert("expires_at".into(), json!(key.expires_at));
    details
}
