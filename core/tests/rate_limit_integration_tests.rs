// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for rate limiting at the messaging layer.
//!
//! In-module tests cover the counter-store strategies directly; these tests
//! verify that rule configuration actually gates message traffic end to end.

use std::sync::Arc;

use ed25519_dalek::Signer;
use serde_json::json;

use palisade_core::domain::error::SecurityError;
use palisade_core::domain::identity::SecurityLevel;
use palisade_core::domain::rate_limit::{RateLimitRule, RateLimitScope, RateLimitStrategy};
use palisade_core::{
    AuditLog, AuthenticationService, DistributedRateLimiter, EncryptionService,
    InMemoryCounterStore, MessagingProtocol, SecurityConfig, SessionManager,
};

fn tight_message_rule(limit: u64) -> RateLimitRule {
    RateLimitRule {
        name: "a2a_messages".to_string(),
        scope: RateLimitScope::Agent,
        strategy: RateLimitStrategy::SlidingWindow,
        limit,
        window_seconds: 60,
        burst_limit: None,
        priority: 8,
        enabled: true,
    }
}

async fn protocol_with_rules(rules: Vec<RateLimitRule>) -> MessagingProtocol {
    let config = SecurityConfig::default();
    let audit = Arc::new(AuditLog::new(config.audit_max_events));
    let limiter = Arc::new(DistributedRateLimiter::new(
        Arc::new(InMemoryCounterStore::new()),
        rules,
        true,
    ));
    let auth = Arc::new(AuthenticationService::new(
        Arc::new(EncryptionService::new(
            vec![9u8; 32],
            b"rate_limit_test_salt".to_vec(),
            config.key_rotation_interval_chrono(),
        )),
        audit.clone(),
        limiter.clone(),
        config.clone(),
    ));

    for agent_id in ["drafter", "reviewer"] {
        let registered = auth
            .register(agent_id, "analysis", SecurityLevel::Standard, vec![], None)
            .unwrap();
        let challenge = auth.issue_challenge(agent_id).unwrap();
        let signature = registered.signing_key.sign(&challenge);
        auth.authenticate(agent_id, &signature.to_bytes())
            .await
            .unwrap();
    }

    let sessions = Arc::new(SessionManager::new(
        auth.clone(),
        audit.clone(),
        config.clone(),
    ));
    MessagingProtocol::new(auth, sessions, limiter, audit, config)
}

#[tokio::test]
async fn test_sender_budget_blocks_excess_messages() {
    let protocol = protocol_with_rules(vec![tight_message_rule(3)]).await;

    for seq in 0..3 {
        protocol
            .encrypt_message("drafter", "reviewer", json!({"seq": seq}), None)
            .await
            .unwrap();
    }

    let blocked = protocol
        .encrypt_message("drafter", "reviewer", json!({"seq": 3}), None)
        .await
        .unwrap_err();
    match blocked {
        SecurityError::RateLimitExceeded {
            status,
            retry_after_secs,
        } => {
            assert_eq!(status.rule_name, "a2a_messages");
            assert!(status.blocked);
            assert!(retry_after_secs <= 60);
        }
        other => panic!("expected RateLimitExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_budgets_are_per_sender() {
    let protocol = protocol_with_rules(vec![tight_message_rule(1)]).await;

    protocol
        .encrypt_message("drafter", "reviewer", json!({"n": 1}), None)
        .await
        .unwrap();
    assert!(protocol
        .encrypt_message("drafter", "reviewer", json!({"n": 2}), None)
        .await
        .is_err());

    // The reverse direction draws on the other agent's budget.
    protocol
        .encrypt_message("reviewer", "drafter", json!({"n": 1}), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_default_rules_sustain_message_traffic() {
    // The auth throttle (5 per 5 min) must never gate ordinary sends; only
    // the message rules apply on the send path.
    let config = SecurityConfig::default();
    let protocol = protocol_with_rules(config.rate_limit_rules.clone()).await;

    for seq in 0..20 {
        protocol
            .encrypt_message("drafter", "reviewer", json!({"seq": seq}), None)
            .await
            .unwrap_or_else(|e| panic!("message {seq} blocked: {e}"));
    }
}

#[tokio::test]
async fn test_no_rules_means_no_gating() {
    let protocol = protocol_with_rules(vec![]).await;

    for seq in 0..20 {
        protocol
            .encrypt_message("drafter", "reviewer", json!({"seq": seq}), None)
            .await
            .unwrap();
    }
}
