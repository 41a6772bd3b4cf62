// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Identity & Authentication
//!
//! Principal registration, Ed25519 credential issuance and challenge-response
//! verification with sliding-window lockout.
//!
//! ## Challenge protocol
//!
//! Authentication is a two-step exchange: the service issues a fresh random
//! 32-byte challenge with a short TTL ([`AuthenticationService::issue_challenge`]),
//! the agent signs it with its private key, and
//! [`AuthenticationService::authenticate`] verifies the signature against the
//! registered public key. Challenges are consumed on first use, so a captured
//! signature cannot be replayed.
//!
//! ## Lockout
//!
//! Failures are tracked per agent in a sliding window. Once the threshold is
//! reached within the lockout duration, attempts are rejected immediately —
//! no cryptographic work happens for a locked-out agent — and the lockout
//! clears itself as the oldest failure ages out of the window.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::domain::audit::AuditSeverity;
use crate::domain::error::SecurityError;
use crate::domain::identity::{AgentIdentity, AuthenticationStatus, SecurityLevel};
use crate::infrastructure::audit_log::AuditLog;
use crate::infrastructure::config::SecurityConfig;
use crate::infrastructure::encryption::EncryptionService;
use crate::infrastructure::rate_limiter::DistributedRateLimiter;

const MAX_AGENT_ID_LEN: usize = 100;
const CHALLENGE_SIZE: usize = 32;
/// Failure timestamps older than this are dropped from the tracker entirely.
const FAILURE_RETENTION: Duration = Duration::hours(24);

struct IssuedChallenge {
    nonce: [u8; CHALLENGE_SIZE],
    issued_at: DateTime<Utc>,
}

/// Registration result: the stored identity plus the one-time private-key
/// handoff. The service keeps only the encrypted copy.
pub struct RegisteredAgent {
    pub identity: AgentIdentity,
    pub signing_key: SigningKey,
}

/// Authentication service for agent principals.
///
/// Constructor-injected collaborators; no global state, so tests can build
/// isolated instances.
pub struct AuthenticationService {
    encryption: Arc<EncryptionService>,
    audit: Arc<AuditLog>,
    limiter: Arc<DistributedRateLimiter>,
    identities: DashMap<String, AgentIdentity>,
    statuses: DashMap<String, AuthenticationStatus>,
    failed_attempts: DashMap<String, Vec<DateTime<Utc>>>,
    challenges: DashMap<String, IssuedChallenge>,
    config: SecurityConfig,
}

impl AuthenticationService {
    pub fn new(
        encryption: Arc<EncryptionService>,
        audit: Arc<AuditLog>,
        limiter: Arc<DistributedRateLimiter>,
        config: SecurityConfig,
    ) -> Self {
        Self {
            encryption,
            audit,
            limiter,
            identities: DashMap::new(),
            statuses: DashMap::new(),
            failed_attempts: DashMap::new(),
            challenges: DashMap::new(),
            config,
        }
    }

    /// Register a new agent with a fresh Ed25519 keypair.
    ///
    /// The private key is stored encrypted at rest, context-bound to the
    /// agent id; the plaintext signing key is returned to the caller exactly
    /// once and never retained.
    pub fn register(
        &self,
        agent_id: &str,
        agent_type: &str,
        security_level: SecurityLevel,
        capabilities: Vec<String>,
        tenant_id: Option<&str>,
    ) -> Result<RegisteredAgent, SecurityError> {
        if let Err(reason) = validate_agent_id(agent_id) {
            self.audit.record(
                "AGENT_REGISTRATION_FAILED",
                AuditSeverity::Error,
                agent_id,
                tenant_id,
                details(&[("reason", json!(reason))]),
            );
            return Err(SecurityError::Validation(reason));
        }
        if self.identities.contains_key(agent_id) {
            self.audit.record(
                "AGENT_REGISTRATION_FAILED",
                AuditSeverity::Error,
                agent_id,
                tenant_id,
                details(&[("reason", json!("agent already registered"))]),
            );
            return Err(SecurityError::Validation(format!(
                "agent {agent_id} is already registered"
            )));
        }

        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let verifying_key = signing_key.verifying_key();
        let public_key = verifying_key.to_bytes().to_vec();

        let private_b64 = {
            use base64::{engine::general_purpose::STANDARD, Engine as _};
            STANDARD.encode(signing_key.to_bytes())
        };
        let encrypted_private_key = self
            .encryption
            .encrypt_string(&private_b64, Some(&format!("agent_private_key:{agent_id}")))?;

        // Self-signed attestation over id + public key; stands in for a
        // CA-issued certificate, which is out of scope.
        let mut attested = agent_id.as_bytes().to_vec();
        attested.extend_from_slice(&public_key);
        let credential = signing_key.sign(&attested).to_bytes().to_vec();

        let now = Utc::now();
        let identity = AgentIdentity {
            agent_id: agent_id.to_string(),
            agent_type: agent_type.to_string(),
            public_key,
            encrypted_private_key,
            credential,
            security_level,
            capabilities: capabilities.clone(),
            tenant_id: tenant_id.map(str::to_string),
            created_at: now,
            expires_at: now + self.config.credential_ttl_chrono(),
        };

        self.identities.insert(agent_id.to_string(), identity.clone());
        self.statuses
            .insert(agent_id.to_string(), AuthenticationStatus::Pending);

        self.audit.record(
            "AGENT_REGISTERED",
            AuditSeverity::Info,
            agent_id,
            tenant_id,
            details(&[
                ("agent_type", json!(agent_type)),
                ("security_level", json!(security_level)),
                ("capabilities", json!(capabilities)),
            ]),
        );
        info!(agent_id, ?security_level, "registered agent");

        Ok(RegisteredAgent {
            identity,
            signing_key,
        })
    }

    /// Issue a fresh random challenge for an agent. Replaces any previous
    /// outstanding challenge.
    pub fn issue_challenge(&self, agent_id: &str) -> Result<Vec<u8>, SecurityError> {
        if !self.identities.contains_key(agent_id) {
            return Err(SecurityError::UnknownAgent(agent_id.to_string()));
        }
        if self.status(agent_id) == Some(AuthenticationStatus::Revoked) {
            return Err(SecurityError::AuthenticationFailed {
                agent_id: agent_id.to_string(),
            });
        }
        let mut nonce = [0u8; CHALLENGE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        self.challenges.insert(
            agent_id.to_string(),
            IssuedChallenge {
                nonce,
                issued_at: Utc::now(),
            },
        );
        debug!(agent_id, "issued authentication challenge");
        Ok(nonce.to_vec())
    }

    /// Verify a signature over the agent's outstanding challenge.
    ///
    /// Enforced in order: lockout, attempt throttling, identity lookup,
    /// credential expiry, challenge freshness, signature verification. A
    /// locked-out agent is rejected before any cryptographic work.
    pub async fn authenticate(&self, agent_id: &str, signature: &[u8]) -> Result<(), SecurityError> {
        let now = Utc::now();
        metrics::counter!("palisade_auth_attempts_total").increment(1);

        // Revocation is terminal: no challenge, no verification, no path
        // back short of re-registration.
        if self.status(agent_id) == Some(AuthenticationStatus::Revoked) {
            self.audit.record(
                "AUTHENTICATION_FAILED",
                AuditSeverity::Warning,
                agent_id,
                self.tenant_of(agent_id).as_deref(),
                details(&[("reason", json!("agent revoked"))]),
            );
            return Err(SecurityError::AuthenticationFailed {
                agent_id: agent_id.to_string(),
            });
        }

        if let Some(retry_after_secs) = self.lockout_remaining(agent_id, now) {
            self.audit.record(
                "AUTHENTICATION_BLOCKED_LOCKOUT",
                AuditSeverity::Warning,
                agent_id,
                self.tenant_of(agent_id).as_deref(),
                details(&[("retry_after_secs", json!(retry_after_secs))]),
            );
            return Err(SecurityError::LockedOut {
                agent_id: agent_id.to_string(),
                retry_after_secs,
            });
        }

        self.limiter.check_named(agent_id, "auth_attempts").await?;

        let Some(identity) = self.identities.get(agent_id).map(|e| e.clone()) else {
            self.note_failure(agent_id, now);
            self.audit.record(
                "AUTHENTICATION_FAILED",
                AuditSeverity::Warning,
                agent_id,
                None,
                details(&[("reason", json!("unknown agent"))]),
            );
            return Err(SecurityError::UnknownAgent(agent_id.to_string()));
        };

        if identity.is_expired(now) {
            self.statuses
                .insert(agent_id.to_string(), AuthenticationStatus::Expired);
            self.audit.record(
                "AUTHENTICATION_FAILED",
                AuditSeverity::Warning,
                agent_id,
                identity.tenant_id.as_deref(),
                details(&[("reason", json!("credential expired"))]),
            );
            return Err(SecurityError::CredentialExpired(agent_id.to_string()));
        }

        // Consume the outstanding challenge; a second attempt needs a new one.
        let challenge = self.challenges.remove(agent_id).map(|(_, c)| c);
        let challenge = match challenge {
            Some(c) if now - c.issued_at <= self.config.challenge_ttl_chrono() => c,
            _ => {
                return self.fail_verification(&identity, now, "no live challenge");
            }
        };

        let Ok(public_bytes) = <[u8; 32]>::try_from(identity.public_key.as_slice()) else {
            return self.fail_verification(&identity, now, "stored public key malformed");
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public_bytes) else {
            return self.fail_verification(&identity, now, "stored public key invalid");
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
            return self.fail_verification(&identity, now, "signature length invalid");
        };
        let signature = Signature::from_bytes(&sig_bytes);

        if verifying_key.verify(&challenge.nonce, &signature).is_err() {
            return self.fail_verification(&identity, now, "signature verification failed");
        }

        self.statuses
            .insert(agent_id.to_string(), AuthenticationStatus::Authenticated);
        self.failed_attempts.remove(agent_id);
        self.audit.record(
            "AGENT_AUTHENTICATED",
            AuditSeverity::Info,
            agent_id,
            identity.tenant_id.as_deref(),
            details(&[("security_level", json!(identity.security_level))]),
        );
        info!(agent_id, "agent authenticated");
        Ok(())
    }

    /// Administratively revoke an agent. Terminal until re-registration.
    pub fn revoke(&self, agent_id: &str, reason: &str) -> Result<(), SecurityError> {
        if !self.identities.contains_key(agent_id) {
            return Err(SecurityError::UnknownAgent(agent_id.to_string()));
        }
        self.statuses
            .insert(agent_id.to_string(), AuthenticationStatus::Revoked);
        self.challenges.remove(agent_id);
        self.audit.record(
            "AGENT_REVOKED",
            AuditSeverity::Warning,
            agent_id,
            self.tenant_of(agent_id).as_deref(),
            details(&[("reason", json!(reason))]),
        );
        Ok(())
    }

    pub fn status(&self, agent_id: &str) -> Option<AuthenticationStatus> {
        self.statuses.get(agent_id).map(|s| *s)
    }

    /// Whether the agent is currently in the authenticated state with a live
    /// credential.
    pub fn is_authenticated(&self, agent_id: &str) -> bool {
        if self.status(agent_id) != Some(AuthenticationStatus::Authenticated) {
            return false;
        }
        self.identities
            .get(agent_id)
            .is_some_and(|identity| !identity.is_expired(Utc::now()))
    }

    pub fn identity(&self, agent_id: &str) -> Option<AgentIdentity> {
        self.identities.get(agent_id).map(|e| e.clone())
    }

    pub fn tenant_of(&self, agent_id: &str) -> Option<String> {
        self.identities
            .get(agent_id)
            .and_then(|e| e.tenant_id.clone())
    }

    /// Seconds until lockout clears, when the agent is locked out at `now`.
    fn lockout_remaining(&self, agent_id: &str, now: DateTime<Utc>) -> Option<u64> {
        let window = self.config.lockout_duration_chrono();
        let attempts = self.failed_attempts.get(agent_id)?;
        let mut recent: Vec<&DateTime<Utc>> = attempts
            .iter()
            .filter(|&&t| now - t < window)
            .collect();
        if (recent.len() as u32) < self.config.max_failed_attempts {
            return None;
        }
        recent.sort();
        // Lockout ends once the oldest counted failure ages out.
        let oldest = **recent.first()?;
        Some(((oldest + window) - now).num_seconds().max(0) as u64)
    }

    fn note_failure(&self, agent_id: &str, now: DateTime<Utc>) {
        let mut entry = self
            .failed_attempts
            .entry(agent_id.to_string())
            .or_default();
        entry.push(now);
        entry.retain(|&t| now - t < FAILURE_RETENTION);
        metrics::counter!("palisade_auth_failures_total").increment(1);
    }

    fn fail_verification(
        &self,
        identity: &AgentIdentity,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), SecurityError> {
        self.note_failure(&identity.agent_id, now);
        self.statuses
            .insert(identity.agent_id.clone(), AuthenticationStatus::Failed);
        self.audit.record(
            "AUTHENTICATION_FAILED",
            AuditSeverity::Warning,
            &identity.agent_id,
            identity.tenant_id.as_deref(),
            details(&[("reason", json!(reason))]),
        );
        Err(SecurityError::AuthenticationFailed {
            agent_id: identity.agent_id.clone(),
        })
    }

    #[cfg(test)]
    fn force_failures(&self, agent_id: &str, timestamps: Vec<DateTime<Utc>>) {
        self.failed_attempts.insert(agent_id.to_string(), timestamps);
    }

    #[cfg(test)]
    fn force_expiry(&self, agent_id: &str, expires_at: DateTime<Utc>) {
        if let Some(mut identity) = self.identities.get_mut(agent_id) {
            identity.expires_at = expires_at;
        }
    }
}

fn validate_agent_id(agent_id: &str) -> Result<(), String> {
    if agent_id.is_empty() {
        return Err("agent id must not be empty".into());
    }
    if agent_id.len() > MAX_AGENT_ID_LEN {
        return Err(format!("agent id exceeds {MAX_AGENT_ID_LEN} characters"));
    }
    if agent_id.chars().any(|c| c.is_control()) {
        return Err("agent id contains control characters".into());
    }
    Ok(())
}

fn details(kv: &[(&str, Value)]) -> Map<String, Value> {
    kv.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}
