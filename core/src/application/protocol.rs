// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Secure Messaging Protocol
//!
//! End-to-end envelope construction and verification for agent-to-agent
//! messages: AES-256-GCM under the pairwise session key, HMAC-SHA256 over the
//! envelope header, replay suppression and a freshness window.
//!
//! ## Invariants
//!
//! - Every outbound message is rate-checked before any cryptographic work.
//! - The signature covers `message_id:sender:recipient:timestamp`, so a
//!   captured envelope cannot be re-addressed or re-dated.
//! - Verification order on receipt: addressing, replay, freshness, signature,
//!   then decryption. Failures are audited without ever logging plaintext.

use std::collections::VecDeque;
use std::sync::Arc;

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::{json, Map, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::audit::AuditSeverity;
use crate::domain::error::SecurityError;
use crate::domain::message::{signature_input, MessagePayload, SecureMessage};
use crate::domain::rate_limit::RateLimitScope;
use crate::infrastructure::audit_log::AuditLog;
use crate::infrastructure::config::SecurityConfig;
use crate::infrastructure::rate_limiter::DistributedRateLimiter;

use super::authentication::AuthenticationService;
use super::session_manager::SessionManager;

type HmacSha256 = Hmac<Sha256>;

const NONCE_SIZE: usize = 12;

/// Bounded per-recipient record of already-seen message ids.
#[derive(Default)]
struct ReplayCache {
    order: VecDeque<Uuid>,
    seen: std::collections::HashSet<Uuid>,
}

impl ReplayCache {
    fn contains(&self, id: &Uuid) -> bool {
        self.seen.contains(id)
    }

    /// Record an id. Returns `false` when it was already present. On
    /// overflow the oldest half of the cache is dropped in one pass.
    fn insert(&mut self, id: Uuid, cap: usize) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > cap {
            let drop_n = self.order.len() - cap / 2;
            for evicted in self.order.drain(..drop_n) {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

pub struct MessagingProtocol {
    auth: Arc<AuthenticationService>,
    sessions: Arc<SessionManager>,
    limiter: Arc<DistributedRateLimiter>,
    audit: Arc<AuditLog>,
    replay: dashmap::DashMap<String, ReplayCache>,
    config: SecurityConfig,
}

impl MessagingProtocol {
    pub fn new(
        auth: Arc<AuthenticationService>,
        sessions: Arc<SessionManager>,
        limiter: Arc<DistributedRateLimiter>,
        audit: Arc<AuditLog>,
        config: SecurityConfig,
    ) -> Self {
        Self {
            auth,
            sessions,
            limiter,
            audit,
            replay: dashmap::DashMap::new(),
            config,
        }
    }

    /// Seal `content` from `sender_id` to `recipient_id` into a signed,
    /// encrypted envelope.
    ///
    /// Consumes one unit of the sender's (and tenant's) message budget and
    /// one unit of the session's message ceiling.
    pub async fn encrypt_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: Value,
        correlation_id: Option<String>,
    ) -> Result<SecureMessage, SecurityError> {
        self.limiter.check(sender_id, RateLimitScope::Agent).await?;
        if let Some(tenant) = self.auth.tenant_of(sender_id) {
            self.limiter.check(&tenant, RateLimitScope::Tenant).await?;
        }

        let encoded_len = serde_json::to_vec(&content)
            .map_err(|e| SecurityError::InvalidContent(e.to_string()))?
            .len();
        if encoded_len > self.config.max_content_bytes {
            return Err(SecurityError::InvalidContent(format!(
                "content is {encoded_len} bytes, limit is {}",
                self.config.max_content_bytes
            )));
        }

        let session = self
            .sessions
            .resolve(sender_id, recipient_id)
            .map(Ok)
            .unwrap_or_else(|| self.sessions.establish(sender_id, recipient_id))?;

        let security_level = self
            .auth
            .identity(sender_id)
            .ok_or_else(|| SecurityError::UnknownAgent(sender_id.to_string()))?
            .security_level;

        let message_id = Uuid::new_v4();
        let timestamp = Utc::now();
        let payload = MessagePayload {
            content,
            timestamp,
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            security_level,
            correlation_id: correlation_id.clone(),
        };
        let plaintext =
            serde_json::to_vec(&payload).map_err(|e| SecurityError::InvalidContent(e.to_string()))?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let cipher = Aes256Gcm::new_from_slice(&session.symmetric_key)
            .map_err(|_| SecurityError::Session("session key has invalid length".into()))?;
        let encrypted_payload = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: message_id.as_bytes(),
                },
            )
            .map_err(|_| SecurityError::EncryptionFailed("AEAD sealing failed".into()))?;

        let signature = self.sign_envelope(
            &session.symmetric_key,
            &signature_input(&message_id, sender_id, recipient_id, &timestamp),
        );

        self.sessions.increment_message_count(sender_id, recipient_id);

        let message = SecureMessage {
            message_id,
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            encrypted_payload,
            signature,
            timestamp,
            nonce: nonce.to_vec(),
            security_level,
            message_type: "a2a_secure".to_string(),
            correlation_id,
        };

        self.audit.record(
            "MESSAGE_ENCRYPTED",
            AuditSeverity::Info,
            sender_id,
            self.auth.tenant_of(sender_id).as_deref(),
            envelope_details(&message),
        );
        debug!(%message_id, sender_id, recipient_id, "sealed message");
        metrics::counter!("palisade_messages_encrypted_total").increment(1);
        Ok(message)
    }

    /// Verify and open an envelope addressed to `recipient_id`.
    ///
    /// Rejects mis-addressed, replayed, stale, mis-signed, and undecryptable
    /// envelopes, in that order. Every rejection is audited; plaintext never
    /// appears in the audit trail.
    pub fn decrypt_message(
        &self,
        message: &SecureMessage,
        recipient_id: &str,
    ) -> Result<MessagePayload, SecurityError> {
        let now = Utc::now();

        if message.recipient_id != recipient_id {
            self.reject(
                message,
                "MESSAGE_MISADDRESSED",
                json!({"expected": recipient_id}),
            );
            return Err(SecurityError::Validation(format!(
                "message addressed to {}, not {recipient_id}",
                message.recipient_id
            )));
        }

        if self
            .replay
            .get(recipient_id)
            .is_some_and(|cache| cache.contains(&message.message_id))
        {
            self.reject(message, "MESSAGE_REPLAY_DETECTED", Value::Null);
            metrics::counter!("palisade_replays_detected_total").increment(1);
            return Err(SecurityError::ReplayDetected {
                message_id: message.message_id.to_string(),
            });
        }

        let age = now - message.timestamp;
        if age > self.config.replay_window_chrono() {
            self.reject(
                message,
                "MESSAGE_EXPIRED",
                json!({"age_secs": age.num_seconds()}),
            );
            return Err(SecurityError::MessageExpired {
                message_id: message.message_id.to_string(),
            });
        }

        let session = self
            .sessions
            .resolve(&message.sender_id, recipient_id)
            .ok_or_else(|| {
                self.reject(message, "MESSAGE_SESSION_MISSING", Value::Null);
                SecurityError::Session(format!(
                    "no live session between {} and {recipient_id}",
                    message.sender_id
                ))
            })?;

        let expected = self.sign_envelope(
            &session.symmetric_key,
            &signature_input(
                &message.message_id,
                &message.sender_id,
                &message.recipient_id,
                &message.timestamp,
            ),
        );
        if expected.ct_eq(&message.signature).unwrap_u8() != 1 {
            self.reject(message, "MESSAGE_SIGNATURE_INVALID", Value::Null);
            return Err(SecurityError::SignatureInvalid);
        }

        if message.nonce.len() != NONCE_SIZE {
            self.reject(message, "MESSAGE_DECRYPTION_FAILED", Value::Null);
            return Err(SecurityError::DecryptionFailed(format!(
                "nonce is {} bytes, expected {NONCE_SIZE}",
                message.nonce.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&session.symmetric_key)
            .map_err(|_| SecurityError::Session("session key has invalid length".into()))?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&message.nonce),
                Payload {
                    msg: &message.encrypted_payload,
                    aad: message.message_id.as_bytes(),
                },
            )
            .map_err(|_| {
                self.reject(message, "MESSAGE_DECRYPTION_FAILED", Value::Null);
                SecurityError::DecryptionFailed("authentication tag mismatch".into())
            })?;

        let payload: MessagePayload = serde_json::from_slice(&plaintext).map_err(|e| {
            self.reject(message, "MESSAGE_PAYLOAD_MALFORMED", Value::Null);
            SecurityError::DecryptionFailed(e.to_string())
        })?;

        // The record is the authoritative replay decision: check-and-insert
        // under one entry guard, so two concurrent deliveries of the same
        // envelope cannot both pass the earlier check and both be accepted.
        let recorded = self
            .replay
            .entry(recipient_id.to_string())
            .or_default()
            .insert(message.message_id, self.config.replay_cache_max);
        if !recorded {
            self.reject(message, "MESSAGE_REPLAY_DETECTED", Value::Null);
            metrics::counter!("palisade_replays_detected_total").increment(1);
            return Err(SecurityError::ReplayDetected {
                message_id: message.message_id.to_string(),
            });
        }

        debug!(message_id = %message.message_id, recipient_id, "opened message");
        metrics::counter!("palisade_messages_decrypted_total").increment(1);
        Ok(payload)
    }

    fn sign_envelope(&self, session_key: &[u8; 32], input: &[u8]) -> Vec<u8> {
        // Qualified call: `aes_gcm::KeyInit` also provides `new_from_slice`
        // for this type. A 32-byte key is always a valid HMAC key.
        let mut mac = <HmacSha256 as Mac>::new_from_slice(session_key)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }

    fn reject(&self, message: &SecureMessage, event_type: &str, extra: Value) {
        let mut details = envelope_details(message);
        if let Value::Object(map) = extra {
            details.extend(map);
        }
        self.audit.record(
            event_type,
            AuditSeverity::SecurityAlert,
            &message.sender_id,
            self.auth.tenant_of(&message.sender_id).as_deref(),
            details,
        );
        warn!(
            message_id = %message.message_id,
            sender_id = %message.sender_id,
            event_type,
            "rejected inbound message"
        );
    }
}

fn envelope_details(message: &SecureMessage) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("message_id".into(), json!(message.message_id));
    details.insert("sender_id".into(), json!(message.sender_id));
    details.insert("recipient_id".into(), json!(message.recipient_id));
    details.insert("timestamp".into(), json!(message.timestamp));
    details
}
